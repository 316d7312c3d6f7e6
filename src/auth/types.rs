use crate::cdn::{CdnError, CdnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Short-lived CDN authorization token.
///
/// Valid only while `now < expires_at_unix_seconds`; an expired token is
/// treated as absent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnAuthToken {
    pub token: String,
    pub expires_at_unix_seconds: i64,
    pub cdn_base_url: String,
}

impl CdnAuthToken {
    pub fn new(token: impl Into<String>, expires_at_unix_seconds: i64, cdn_base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at_unix_seconds,
            cdn_base_url: cdn_base_url.into(),
        }
    }

    pub fn is_valid_at(&self, now_unix_seconds: i64) -> bool {
        now_unix_seconds < self.expires_at_unix_seconds
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(chrono::Utc::now().timestamp())
    }

    /// CDN base URL, normalized so relative paths join below it
    pub fn base_url(&self) -> CdnResult<Url> {
        let mut raw = self.cdn_base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| CdnError::InvalidUrl(format!("{raw}: {e}")))
    }
}

impl fmt::Debug for CdnAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdnAuthToken")
            .field("token", &"<redacted>")
            .field("expires_at_unix_seconds", &self.expires_at_unix_seconds)
            .field("cdn_base_url", &self.cdn_base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_boundary() {
        let token = CdnAuthToken::new("t", 100, "https://cdn.example.net");
        assert!(token.is_valid_at(99));
        assert!(!token.is_valid_at(100));
        assert!(!token.is_valid_at(101));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let token = CdnAuthToken::new("t", 0, "https://cdn.example.net/content");
        let joined = token.base_url().unwrap().join("depot/1").unwrap();
        assert_eq!(joined.as_str(), "https://cdn.example.net/content/depot/1");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = CdnAuthToken::new("secret-value", 0, "https://cdn.example.net");
        assert!(!format!("{token:?}").contains("secret-value"));
    }
}
