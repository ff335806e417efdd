//! Sliding window over a backend sorted set: admit while fewer than `limit`
//! entries remain with score within the trailing `window`.
//!
//! The teacher's `SlidingWindow` approximates this with a weighted pair of
//! adjacent fixed-window counters; this rewrite uses the spec's literal
//! sorted-set algorithm instead, since the two differ in kind (exact event
//! log vs weighted estimate), not just in storage plumbing. Only the
//! module's shape — a small config struct implementing [`Algorithm`] — is
//! carried over.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{clamp_wait, Algorithm};
use crate::backend::Backend;
use crate::decision::Decision;
use crate::error::{ConfigError, Result};

/// Sliding window configuration.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: u64,
    window: Duration,
    tag_seq: AtomicU64,
}

impl SlidingWindow {
    /// `limit` must be nonzero; `window` must be strictly positive.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(ConfigError::InvalidAlgorithm("sliding window limit must be > 0".into()).into());
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidAlgorithm("sliding window must have a positive window".into()).into());
        }
        Ok(Self {
            limit,
            window,
            tag_seq: AtomicU64::new(0),
        })
    }
}

impl Algorithm for SlidingWindow {
    fn name(&self) -> &'static str {
        "slidingwindow"
    }

    async fn try_acquire<B: Backend>(&self, backend: &B, key: &str, now: f64) -> Result<Decision> {
        let window_secs = self.window.as_secs_f64();
        let lo = now - window_secs;

        let count = backend.sliding_window_admit(key, lo, self.horizon()).await?;

        if count < self.limit {
            let seq = self.tag_seq.fetch_add(1, Ordering::Relaxed);
            let tag = format!("{now}-{seq}");
            backend.zadd(key, now, &tag, self.horizon()).await?;
            Ok(Decision::Admitted)
        } else {
            let oldest = backend.zmin(key).await?.unwrap_or(now);
            let wait = (oldest + window_secs) - now;
            Ok(Decision::Retry(clamp_wait(wait)))
        }
    }

    fn horizon(&self) -> Duration {
        self.window
    }
}
