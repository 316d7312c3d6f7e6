use crate::auth::error::{AuthError, AuthResult};
use crate::auth::types::CdnAuthToken;
use crate::cdn::{CdnError, TokenSource};
use crate::retry::RetryPolicy;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caches one CDN token per app and refreshes it on expiry.
///
/// Concurrent callers for the same app share a single in-flight
/// acquisition: the first caller fetches while the rest wait on the per-app
/// gate and then read the freshly cached token.
pub struct CdnAuthTokenManager {
    source: Arc<dyn TokenSource>,
    retry: RetryPolicy,
    cache: DashMap<u32, CdnAuthToken>,
    gates: DashMap<u32, Arc<Mutex<()>>>,
    acquisitions: AtomicU64,
}

impl CdnAuthTokenManager {
    pub fn new(source: Arc<dyn TokenSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            retry,
            cache: DashMap::new(),
            gates: DashMap::new(),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Return a valid token for `app_id`, acquiring a new one if the cached
    /// token is missing or expired
    pub async fn get_token(&self, app_id: u32) -> AuthResult<CdnAuthToken> {
        if let Some(token) = self.cached(app_id) {
            return Ok(token);
        }

        let gate = self.gate(app_id);
        let _guard = gate.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.cached(app_id) {
            return Ok(token);
        }

        self.acquire_and_store(app_id).await
    }

    /// Replace a token the CDN rejected. If another caller already replaced
    /// `rejected`, the newer cached token is returned without a new request.
    pub async fn refresh(&self, app_id: u32, rejected: &CdnAuthToken) -> AuthResult<CdnAuthToken> {
        let gate = self.gate(app_id);
        let _guard = gate.lock().await;

        if let Some(token) = self.cached(app_id) {
            if token.token != rejected.token {
                return Ok(token);
            }
        }

        tracing::info!(app_id, "Refreshing rejected CDN token");
        self.cache.remove(&app_id);
        self.acquire_and_store(app_id).await
    }

    /// Number of acquisitions performed against the token source
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    fn cached(&self, app_id: u32) -> Option<CdnAuthToken> {
        let now = chrono::Utc::now().timestamp();
        let token = self.cache.get(&app_id).map(|entry| entry.value().clone())?;
        if token.is_valid_at(now) {
            return Some(token);
        }

        self.cache.remove_if(&app_id, |_, t| !t.is_valid_at(now));
        None
    }

    fn gate(&self, app_id: u32) -> Arc<Mutex<()>> {
        self.gates
            .entry(app_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn acquire_and_store(&self, app_id: u32) -> AuthResult<CdnAuthToken> {
        let token = self.acquire(app_id).await?;
        self.cache.insert(app_id, token.clone());
        Ok(token)
    }

    async fn acquire(&self, app_id: u32) -> AuthResult<CdnAuthToken> {
        let mut schedule = self.retry.schedule();

        loop {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);

            match self.source.acquire(app_id).await {
                Ok(token) if token.is_valid() => return Ok(token),
                Ok(_) => return Err(AuthError::ExpiredOnArrival { app_id }),
                Err(CdnError::Unauthorized(reason)) => {
                    return Err(AuthError::Rejected { app_id, reason });
                }
                Err(e) if e.is_transient() => match schedule.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            app_id,
                            attempt = schedule.attempts(),
                            "Token acquisition failed, retrying in {:?}: {}",
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(AuthError::Unavailable {
                            app_id,
                            attempts: schedule.attempts(),
                            reason: e.to_string(),
                        });
                    }
                },
                Err(e) => return Err(AuthError::Cdn(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CountingTokenSource;
    use std::time::Duration;

    fn manager(source: Arc<CountingTokenSource>) -> CdnAuthTokenManager {
        CdnAuthTokenManager::new(source, RetryPolicy::immediate(3))
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let source = Arc::new(CountingTokenSource::new(3600));
        let manager = manager(source.clone());

        let first = manager.get_token(10).await.unwrap();
        let second = manager.get_token(10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.issued(), 1);
    }

    #[tokio::test]
    async fn test_expired_token_is_never_returned() {
        let source = Arc::new(CountingTokenSource::new(3600));
        let manager = manager(source.clone());

        manager
            .cache
            .insert(10, CdnAuthToken::new("stale", 1, "https://cdn.test/"));

        let token = manager.get_token(10).await.unwrap();
        assert_ne!(token.token, "stale");
        assert!(token.expires_at_unix_seconds > chrono::Utc::now().timestamp());
        assert_eq!(source.issued(), 1);
    }

    #[tokio::test]
    async fn test_source_issuing_expired_token_fails() {
        let source = Arc::new(CountingTokenSource::new(-10));
        let manager = manager(source);

        let result = manager.get_token(10).await;
        assert!(matches!(result, Err(AuthError::ExpiredOnArrival { app_id: 10 })));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_acquisition() {
        let source = Arc::new(CountingTokenSource::new(3600).with_delay(Duration::from_millis(50)));
        let manager = Arc::new(manager(source.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token(10).await.unwrap() })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap());
        }

        assert_eq!(source.issued(), 1);
        assert!(tokens.iter().all(|t| t == &tokens[0]));
    }

    #[tokio::test]
    async fn test_apps_have_independent_tokens() {
        let source = Arc::new(CountingTokenSource::new(3600));
        let manager = manager(source.clone());

        let a = manager.get_token(1).await.unwrap();
        let b = manager.get_token(2).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(source.issued(), 2);
    }

    #[tokio::test]
    async fn test_refresh_coalesces_after_replacement() {
        let source = Arc::new(CountingTokenSource::new(3600));
        let manager = manager(source.clone());

        let first = manager.get_token(10).await.unwrap();
        let refreshed = manager.refresh(10, &first).await.unwrap();
        assert_ne!(first, refreshed);

        // A second worker holding the same rejected token gets the replacement
        let again = manager.refresh(10, &first).await.unwrap();
        assert_eq!(again, refreshed);
        assert_eq!(source.issued(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = Arc::new(CountingTokenSource::new(3600));
        source.push_failure(CdnError::Network("connection reset".into()));
        source.push_failure(CdnError::Timeout);
        let manager = manager(source.clone());

        let token = manager.get_token(10).await.unwrap();
        assert!(token.is_valid());
        assert_eq!(manager.acquisition_count(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let source = Arc::new(CountingTokenSource::new(3600));
        for _ in 0..3 {
            source.push_failure(CdnError::Timeout);
        }
        let manager = manager(source);

        let result = manager.get_token(10).await;
        assert!(matches!(
            result,
            Err(AuthError::Unavailable { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let source = Arc::new(CountingTokenSource::new(3600));
        source.push_failure(CdnError::Unauthorized("bad login".into()));
        let manager = manager(source);

        let result = manager.get_token(10).await;
        assert!(matches!(result, Err(AuthError::Rejected { .. })));
        assert_eq!(manager.acquisition_count(), 1);
    }
}
