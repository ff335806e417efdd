//! The rate-limit admission result shared by every algorithm.
//!
//! The teacher's `Decision`/`RateLimitInfo` pair carries a boolean plus a
//! diagnostics bag; this crate's algorithms need a third outcome (the caller
//! must itself retry after a wait, as opposed to being admitted or turned
//! away for good), so the result becomes a three-way enum instead of a bool.
//! `to_headers` is kept in spirit as `Decision::describe` for callers that
//! want a human-readable trace of an admission attempt.

use std::time::Duration;

/// Outcome of a single `try_acquire` call against one scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// The request may proceed; capacity was consumed.
    Admitted,
    /// The request must wait `Duration` before retrying; no capacity consumed.
    Retry(Duration),
}

impl Decision {
    /// `true` for [`Decision::Admitted`].
    pub fn is_admitted(self) -> bool {
        matches!(self, Decision::Admitted)
    }

    /// The wait duration, if this is a [`Decision::Retry`].
    pub fn retry_after(self) -> Option<Duration> {
        match self {
            Decision::Retry(wait) => Some(wait),
            _ => None,
        }
    }

    /// Combine this scope's decision with a later scope's, per the
    /// scope-expansion rule: the decision with the larger retry wait wins;
    /// Admitted only if both are Admitted.
    pub fn combine(self, other: Decision) -> Decision {
        match (self, other) {
            (Decision::Retry(a), Decision::Retry(b)) => Decision::Retry(a.max(b)),
            (Decision::Retry(w), Decision::Admitted) | (Decision::Admitted, Decision::Retry(w)) => {
                Decision::Retry(w)
            }
            (Decision::Admitted, Decision::Admitted) => Decision::Admitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_larger_retry() {
        let a = Decision::Retry(Duration::from_millis(100));
        let b = Decision::Retry(Duration::from_millis(400));
        assert_eq!(a.combine(b), Decision::Retry(Duration::from_millis(400)));
    }

    #[test]
    fn combine_admitted_is_identity() {
        assert_eq!(Decision::Admitted.combine(Decision::Admitted), Decision::Admitted);
        let retry = Decision::Retry(Duration::from_millis(50));
        assert_eq!(Decision::Admitted.combine(retry), retry);
    }
}
