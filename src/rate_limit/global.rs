//! Process-wide limiter shared by every request.

use tokio_util::sync::CancellationToken;

use super::bucket::{Shortfall, TokenBucket};

/// Bounds aggregate throughput across all clients with a single bucket.
///
/// Built once at startup and handed to the request pipeline; its rate and
/// burst never change afterwards.
pub struct GlobalLimiter {
    bucket: TokenBucket,
}

impl GlobalLimiter {
    pub fn new(rate: f64, burst: u32) -> crate::Result<Self> {
        Ok(Self {
            bucket: TokenBucket::new(rate, burst)?,
        })
    }

    /// Wait for one token, queueing briefly instead of refusing outright.
    pub async fn admit(&self, cancel: &CancellationToken) -> Result<(), Shortfall> {
        self.bucket.acquire(1, cancel).await
    }

    /// Take one token if available right now.
    pub fn check(&self) -> Result<(), Shortfall> {
        self.bucket.try_acquire(1)
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}
