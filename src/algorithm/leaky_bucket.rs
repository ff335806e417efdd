//! Leaky bucket: a `level` that drains at `leak_rate` per second, admitting
//! while `level + 1 <= capacity`.
//!
//! Structurally the same CAS-guarded shape as the teacher's `LeakyBucket`,
//! retargeted at [`super::cas_loop`] over the new `Backend` trait.

use std::time::Duration;

use super::{cas_loop, clamp_wait, decode_f64_pair, encode_f64_pair, Algorithm, DEFAULT_MAX_CAS_ATTEMPTS};
use crate::backend::Backend;
use crate::decision::Decision;
use crate::error::{ConfigError, Result};

/// Leaky bucket configuration.
#[derive(Debug, Clone, Copy)]
pub struct LeakyBucket {
    capacity: f64,
    leak_rate: f64,
    max_cas_attempts: u32,
}

impl LeakyBucket {
    /// `capacity` is the maximum level; `leak_rate` is units drained per
    /// second. Both must be strictly positive.
    pub fn new(capacity: f64, leak_rate: f64) -> Result<Self> {
        if capacity <= 0.0 {
            return Err(ConfigError::InvalidAlgorithm("leaky bucket capacity must be > 0".into()).into());
        }
        if leak_rate <= 0.0 {
            return Err(ConfigError::InvalidAlgorithm("leaky bucket leak_rate must be > 0".into()).into());
        }
        Ok(Self {
            capacity,
            leak_rate,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        })
    }
}

impl Algorithm for LeakyBucket {
    fn name(&self) -> &'static str {
        "leakybucket"
    }

    async fn try_acquire<B: Backend>(&self, backend: &B, key: &str, now: f64) -> Result<Decision> {
        let capacity = self.capacity;
        let leak_rate = self.leak_rate;

        cas_loop(backend, key, self.horizon(), self.max_cas_attempts, move |current| {
            let (level, last) = current.and_then(decode_f64_pair).unwrap_or((0.0, now));

            let elapsed = (now - last).max(0.0);
            let level = (level - elapsed * leak_rate).max(0.0);

            if level + 1.0 <= capacity {
                (encode_f64_pair(level + 1.0, now), Decision::Admitted)
            } else {
                let wait = (level + 1.0 - capacity) / leak_rate;
                (encode_f64_pair(level, now), Decision::Retry(clamp_wait(wait)))
            }
        })
        .await
    }

    fn horizon(&self) -> Duration {
        Duration::from_secs_f64(self.capacity / self.leak_rate)
    }

    fn set_max_cas_attempts(&mut self, attempts: u32) {
        self.max_cas_attempts = attempts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[tokio::test]
    async fn admits_up_to_capacity_then_retries() {
        let backend = MemoryBackend::new();
        let bucket = LeakyBucket::new(2.0, 1.0).unwrap();
        assert!(bucket.try_acquire(&backend, "k", 0.0).await.unwrap().is_admitted());
        assert!(bucket.try_acquire(&backend, "k", 0.0).await.unwrap().is_admitted());
        assert!(matches!(bucket.try_acquire(&backend, "k", 0.0).await.unwrap(), Decision::Retry(_)));
    }

    #[tokio::test]
    async fn leaks_over_time() {
        let backend = MemoryBackend::new();
        let bucket = LeakyBucket::new(1.0, 1.0).unwrap();
        assert!(bucket.try_acquire(&backend, "k", 0.0).await.unwrap().is_admitted());
        assert!(bucket.try_acquire(&backend, "k", 2.0).await.unwrap().is_admitted());
    }
}
