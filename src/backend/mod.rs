//! Persistence backend trait and implementations.
//!
//! A single [`Backend`] trait is shared by the rate-limit engine and the cache
//! engine: limiter state and cached response payloads are both just bytes under
//! a key, with TTL and (for sliding-window admission) sorted-set operations
//! layered on top. Three implementations satisfy the same contract: [`memory`],
//! [`kv`] (feature `kv`), and [`sql`] (feature `sql`).

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "kv")]
pub mod kv;

#[cfg(feature = "sql")]
pub mod sql;

#[cfg(feature = "memory")]
pub use memory::MemoryBackend;

#[cfg(feature = "kv")]
pub use kv::{KvBackend, KvConfig};

#[cfg(feature = "sql")]
pub use sql::{SqlBackend, SqlConfig};

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// A uniform persistence surface over {memory, KV, SQL}.
///
/// Every operation is atomic with respect to concurrent callers within the same
/// process. TTL expiry is enforced on read as well as by any background sweep —
/// a read of an expired key must return absent regardless of whether the sweep
/// has run yet.
pub trait Backend: Send + Sync + 'static {
    /// Return the current value for `key`, or `None` if missing or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store `value` under `key` with the given TTL, overwriting any prior value.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove `key`. Idempotent: removing an absent key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Atomically add `delta` to the integer stored at `key`, creating it with
    /// the given TTL if absent, and return the value after the increment.
    fn incr(&self, key: &str, delta: i64, ttl: Duration) -> impl Future<Output = Result<i64>> + Send;

    /// Insert `(score, member)` into the sorted set stored at `key`.
    fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove all members of the sorted set at `key` with `lo <= score <= hi`,
    /// returning the number removed.
    fn zremrangebyscore(
        &self,
        key: &str,
        lo: f64,
        hi: f64,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Count members of the sorted set at `key` with `lo <= score <= hi`.
    fn zcount(&self, key: &str, lo: f64, hi: f64) -> impl Future<Output = Result<u64>> + Send;

    /// Return the lowest score currently present in the sorted set at `key`.
    fn zmin(&self, key: &str) -> impl Future<Output = Result<Option<f64>>> + Send;

    /// Compare-and-swap: if the current bytes at `key` equal `expected` (or the
    /// key is absent and `expected` is `None`), replace them with `new` and
    /// return `true`; otherwise leave the value untouched and return `false`.
    fn cas(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete every key whose name starts with `prefix`.
    fn clear(&self, prefix: &str) -> impl Future<Output = Result<()>> + Send;

    /// Evict every member of the sorted set at `key` scored below `window_lo`,
    /// then return the count of members remaining. The default implementation
    /// composes [`Backend::zremrangebyscore`] and [`Backend::zcount`] as two
    /// round trips; backends that can express this as one atomic operation
    /// (e.g. a Lua script) should override it.
    fn sliding_window_admit(
        &self,
        key: &str,
        window_lo: f64,
        _ttl: Duration,
    ) -> impl Future<Output = Result<u64>> + Send {
        async move {
            self.zremrangebyscore(key, f64::NEG_INFINITY, window_lo).await?;
            self.zcount(key, window_lo, f64::INFINITY).await
        }
    }
}

/// Enum-dispatch wrapper over the three implementations, so
/// [`crate::session::Session`] can hold one backend without becoming generic
/// over it.
pub enum AnyBackend {
    Memory(MemoryBackend),
    #[cfg(feature = "kv")]
    Kv(KvBackend),
    #[cfg(feature = "sql")]
    Sql(SqlBackend),
}

impl std::fmt::Debug for AnyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnyBackend::Memory(b) => b.fmt(f),
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.fmt(f),
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.fmt(f),
        }
    }
}

impl Backend for AnyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self {
            AnyBackend::Memory(b) => b.get(key).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.get(key).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        match self {
            AnyBackend::Memory(b) => b.set(key, value, ttl).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.set(key, value, ttl).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            AnyBackend::Memory(b) => b.delete(key).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.delete(key).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.delete(key).await,
        }
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        match self {
            AnyBackend::Memory(b) => b.incr(key, delta, ttl).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.incr(key, delta, ttl).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.incr(key, delta, ttl).await,
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        match self {
            AnyBackend::Memory(b) => b.zadd(key, score, member, ttl).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.zadd(key, score, member, ttl).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.zadd(key, score, member, ttl).await,
        }
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        match self {
            AnyBackend::Memory(b) => b.zremrangebyscore(key, lo, hi).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.zremrangebyscore(key, lo, hi).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.zremrangebyscore(key, lo, hi).await,
        }
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        match self {
            AnyBackend::Memory(b) => b.zcount(key, lo, hi).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.zcount(key, lo, hi).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.zcount(key, lo, hi).await,
        }
    }

    async fn zmin(&self, key: &str) -> Result<Option<f64>> {
        match self {
            AnyBackend::Memory(b) => b.zmin(key).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.zmin(key).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.zmin(key).await,
        }
    }

    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>, ttl: Duration) -> Result<bool> {
        match self {
            AnyBackend::Memory(b) => b.cas(key, expected, new, ttl).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.cas(key, expected, new, ttl).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.cas(key, expected, new, ttl).await,
        }
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        match self {
            AnyBackend::Memory(b) => b.clear(prefix).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.clear(prefix).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.clear(prefix).await,
        }
    }

    async fn sliding_window_admit(&self, key: &str, window_lo: f64, ttl: Duration) -> Result<u64> {
        match self {
            AnyBackend::Memory(b) => b.sliding_window_admit(key, window_lo, ttl).await,
            #[cfg(feature = "kv")]
            AnyBackend::Kv(b) => b.sliding_window_admit(key, window_lo, ttl).await,
            #[cfg(feature = "sql")]
            AnyBackend::Sql(b) => b.sliding_window_admit(key, window_lo, ttl).await,
        }
    }
}

/// Current Unix time in seconds, as a float — the canonical "now" fed into TTL
/// math across all three backend implementations.
pub fn unix_now() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs_f64()
}

#[cfg(test)]
/// Shared conformance tests run against every `Backend` implementation, so a
/// new backend can be checked for the same observable semantics as the others
/// (the cross-backend equivalence property from the testable-properties list).
pub(crate) mod conformance {
    use super::*;
    use std::time::Duration;

    pub async fn get_set_delete(backend: &impl Backend) {
        assert_eq!(backend.get("k").await.unwrap(), None);
        backend
            .set("k", b"v1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v1".to_vec()));
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
        // Deleting an absent key is not an error.
        backend.delete("k").await.unwrap();
    }

    pub async fn expiry_on_read(backend: &impl Backend) {
        backend
            .set("k", b"v".to_vec(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    pub async fn incr_creates_and_accumulates(backend: &impl Backend) {
        let v = backend.incr("c", 1, Duration::from_secs(60)).await.unwrap();
        assert_eq!(v, 1);
        let v = backend.incr("c", 4, Duration::from_secs(60)).await.unwrap();
        assert_eq!(v, 5);
    }

    pub async fn sorted_set_roundtrip(backend: &impl Backend) {
        backend.zadd("z", 1.0, "a", Duration::from_secs(60)).await.unwrap();
        backend.zadd("z", 2.0, "b", Duration::from_secs(60)).await.unwrap();
        backend.zadd("z", 3.0, "c", Duration::from_secs(60)).await.unwrap();
        assert_eq!(backend.zcount("z", 0.0, 3.0).await.unwrap(), 3);
        let removed = backend.zremrangebyscore("z", 0.0, 1.5).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.zcount("z", 0.0, 3.0).await.unwrap(), 2);
        assert_eq!(backend.zmin("z").await.unwrap(), Some(2.0));
    }

    pub async fn cas_semantics(backend: &impl Backend) {
        let ok = backend
            .cas("x", None, b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(ok);
        let fail = backend
            .cas("x", Some(b"wrong"), b"2".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!fail);
        assert_eq!(backend.get("x").await.unwrap(), Some(b"1".to_vec()));
        let ok = backend
            .cas("x", Some(b"1"), b"2".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(backend.get("x").await.unwrap(), Some(b"2".to_vec()));
    }

    pub async fn clear_by_prefix(backend: &impl Backend) {
        backend.set("ns:a", b"1".to_vec(), Duration::from_secs(60)).await.unwrap();
        backend.set("ns:b", b"2".to_vec(), Duration::from_secs(60)).await.unwrap();
        backend.set("other", b"3".to_vec(), Duration::from_secs(60)).await.unwrap();
        backend.clear("ns:").await.unwrap();
        assert_eq!(backend.get("ns:a").await.unwrap(), None);
        assert_eq!(backend.get("ns:b").await.unwrap(), None);
        assert_eq!(backend.get("other").await.unwrap(), Some(b"3".to_vec()));
    }
}
