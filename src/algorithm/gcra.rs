//! GCRA (Generic Cell Rate Algorithm): a theoretical-arrival-time (`tat`)
//! virtual scheduler, parameterized by `period` and `limit`.
//!
//! Kept from the teacher's `GCRA` in spirit — single-timestamp state under
//! CAS — rebuilt over [`super::cas_loop`]. Unlike the bucket algorithms, a
//! non-admitted attempt here writes back the *unchanged* `tat`: the spec's
//! steps only commit `new_tat` on the admitted branch.

use std::time::Duration;

use super::{cas_loop, clamp_wait, decode_f64, Algorithm, DEFAULT_MAX_CAS_ATTEMPTS};
use crate::backend::Backend;
use crate::decision::Decision;
use crate::error::{ConfigError, Result};

/// GCRA configuration: `period` is the emission interval, `limit` the burst
/// size (`delay_tolerance = period * limit`).
#[derive(Debug, Clone, Copy)]
pub struct Gcra {
    period: f64,
    limit: u64,
    max_cas_attempts: u32,
}

impl Gcra {
    /// `period` (seconds) must be strictly positive; `limit` must be nonzero.
    pub fn new(period: Duration, limit: u64) -> Result<Self> {
        if period.is_zero() {
            return Err(ConfigError::InvalidAlgorithm("GCRA period must be > 0".into()).into());
        }
        if limit == 0 {
            return Err(ConfigError::InvalidAlgorithm("GCRA limit must be > 0".into()).into());
        }
        Ok(Self {
            period: period.as_secs_f64(),
            limit,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
        })
    }

    fn delay_tolerance(&self) -> f64 {
        self.period * self.limit as f64
    }
}

impl Algorithm for Gcra {
    fn name(&self) -> &'static str {
        "gcra"
    }

    async fn try_acquire<B: Backend>(&self, backend: &B, key: &str, now: f64) -> Result<Decision> {
        let period = self.period;
        let delay_tolerance = self.delay_tolerance();

        cas_loop(backend, key, self.horizon(), self.max_cas_attempts, move |current| {
            let stored_tat = current.map(decode_f64).unwrap_or(now);
            let tat = stored_tat.max(now);
            let new_tat = tat + period;

            if new_tat - now <= delay_tolerance {
                (new_tat.to_le_bytes().to_vec(), Decision::Admitted)
            } else {
                let wait = new_tat - now - delay_tolerance;
                (stored_tat.to_le_bytes().to_vec(), Decision::Retry(clamp_wait(wait)))
            }
        })
        .await
    }

    fn horizon(&self) -> Duration {
        Duration::from_secs_f64(self.delay_tolerance())
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
    async fn admits_burst_up_to_limit() {
        let backend = MemoryBackend::new();
        let gcra = Gcra::new(Duration::from_secs(2), 3).unwrap();
        for _ in 0..3 {
            assert!(gcra.try_acquire(&backend, "k", 0.0).await.unwrap().is_admitted());
        }
        assert!(matches!(gcra.try_acquire(&backend, "k", 0.0).await.unwrap(), Decision::Retry(_)));
    }

    #[tokio::test]
    async fn spaces_admissions_by_period_once_burst_exhausted() {
        let backend = MemoryBackend::new();
        let gcra = Gcra::new(Duration::from_secs(2), 1).unwrap();
        assert!(gcra.try_acquire(&backend, "k", 0.0).await.unwrap().is_admitted());
        assert!(matches!(gcra.try_acquire(&backend, "k", 0.5).await.unwrap(), Decision::Retry(_)));
        assert!(gcra.try_acquire(&backend, "k", 2.0).await.unwrap().is_admitted());
    }

    #[test]
    fn rejects_zero_params() {
        assert!(Gcra::new(Duration::ZERO, 1).is_err());
        assert!(Gcra::new(Duration::from_secs(1), 0).is_err());
    }
}
