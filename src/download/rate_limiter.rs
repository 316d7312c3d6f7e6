//! Bandwidth cap for chunk requests using the governor crate

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Byte-rate limiter shared by all download workers
#[derive(Clone, Default)]
pub struct BandwidthLimiter {
    /// One permit per KiB; `None` means unlimited
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
}

impl BandwidthLimiter {
    /// `bytes_per_second` of 0 disables limiting
    pub fn new(bytes_per_second: u32) -> Self {
        if bytes_per_second == 0 {
            return Self::unlimited();
        }

        let kb_per_second = NonZeroU32::new(bytes_per_second / 1024).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Some(Arc::new(RateLimiter::direct(Quota::per_second(kb_per_second)))),
        }
    }

    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// Wait until `bytes` may be requested
    pub async fn wait_for_bytes(&self, bytes: usize) {
        let Some(limiter) = &self.limiter else {
            return;
        };

        let kb_units = bytes.div_ceil(1024).max(1);
        for _ in 0..kb_units {
            limiter.until_ready().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_unlimited_does_not_block() {
        let limiter = BandwidthLimiter::new(0);
        assert!(!limiter.is_enabled());

        let start = Instant::now();
        for _ in 0..100 {
            limiter.wait_for_bytes(1 << 20).await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_limited_throughput() {
        // 4 KiB/s: the burst covers the first 4 KiB, the next 2 KiB wait ~0.5s
        let limiter = BandwidthLimiter::new(4 * 1024);
        assert!(limiter.is_enabled());

        let start = Instant::now();
        limiter.wait_for_bytes(4 * 1024).await;
        limiter.wait_for_bytes(2 * 1024).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(300), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5));
    }
}
