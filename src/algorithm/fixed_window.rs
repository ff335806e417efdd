//! Fixed window: a `(window_start, count)` pair reset whenever the window
//! elapses.
//!
//! No teacher source exists for this algorithm — it is authored fresh in the
//! idiom of its siblings ([`super::gcra`], [`super::token_bucket`]): a small
//! config struct whose [`Algorithm::try_acquire`] drives [`super::cas_loop`].

use std::time::Duration;

use super::{cas_loop, decode_f64_pair, encode_f64_pair, Algorithm, DEFAULT_MAX_CAS_ATTEMPTS};
use crate::backend::Backend;
use crate::decision::Decision;
use crate::error::{ConfigError, Result};

/// Fixed window configuration.
#[derive(Debug, Clone, Copy)]
pub struct FixedWindow {
    limit: u64,
    window: Duration,
    max_cas_attempts: u32,
}

impl FixedWindow {
    /// `limit` must be nonzero; `window` must be strictly positive.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(ConfigError::InvalidAlgorithm("fixed window limit must be > 0".into()).into());
        }
        if window.is_zero() {
            return Err(ConfigError::InvalidAlgorithm("fixed window must have a positive window".into()).into());
        }
        Ok(Self {
            limit,
            window,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        })
    }
}

impl Algorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixedwindow"
    }

    async fn try_acquire<B: Backend>(&self, backend: &B, key: &str, now: f64) -> Result<Decision> {
        let limit = self.limit;
        let window_secs = self.window.as_secs_f64();

        cas_loop(backend, key, self.horizon(), self.max_cas_attempts, move |current| {
            let (window_start, count) = current.and_then(decode_f64_pair).unwrap_or((now, 0.0));

            let (window_start, count) = if now - window_start >= window_secs {
                (now, 0.0)
            } else {
                (window_start, count)
            };

            if (count as u64) < limit {
                (encode_f64_pair(window_start, count + 1.0), Decision::Admitted)
            } else {
                let wait = (window_start + window_secs) - now;
                (
                    encode_f64_pair(window_start, count),
                    Decision::Retry(super::clamp_wait(wait)),
                )
            }
        })
        .await
    }

    fn horizon(&self) -> Duration {
        self.window
    }

    fn set_max_cas_attempts(&mut self, attempts: u32) {
        self.max_cas_attempts = attempts;
    }
}
