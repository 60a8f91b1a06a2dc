// Pacing policies for the persistence write. Pacing only bounds how fast we
// hit a rate-limited API; correctness never depends on it.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

use super::traits::Pacer;

/// No delay at all. The default, and what tests use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[async_trait]
impl Pacer for NoPacing {
    async fn before_persist(&self) {}
    async fn after_persist(&self) {}
}

/// Fixed sleeps immediately before and after the write.
#[derive(Debug, Clone, Copy)]
pub struct FixedPacing {
    pub before_persist: Duration,
    pub after_persist: Duration,
}

impl FixedPacing {
    pub fn new(before_persist: Duration, after_persist: Duration) -> Self {
        Self {
            before_persist,
            after_persist,
        }
    }
}

#[async_trait]
impl Pacer for FixedPacing {
    async fn before_persist(&self) {
        if !self.before_persist.is_zero() {
            debug!(delay_ms = self.before_persist.as_millis() as u64, "Pacing before persisting progress");
            tokio::time::sleep(self.before_persist).await;
        }
    }

    async fn after_persist(&self) {
        if !self.after_persist.is_zero() {
            debug!(delay_ms = self.after_persist.as_millis() as u64, "Pacing after persisting progress");
            tokio::time::sleep(self.after_persist).await;
        }
    }
}

/// Caps progress writes at a steady rate shared by every machine holding the
/// same pacer.
pub struct RateLimitedPacing {
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedPacing {
    pub fn per_minute(writes: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(writes)),
        }
    }

    pub fn per_second(writes: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(writes)),
        }
    }
}

impl std::fmt::Debug for RateLimitedPacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedPacing").finish_non_exhaustive()
    }
}

#[async_trait]
impl Pacer for RateLimitedPacing {
    async fn before_persist(&self) {
        self.limiter.until_ready().await;
    }

    async fn after_persist(&self) {}
}
