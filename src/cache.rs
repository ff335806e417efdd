//! Response cache: fingerprint-keyed, TTL-bounded, sitting atop a [`Backend`].
//!
//! Grounded on `skp-cache`'s `CacheManager` (namespaced keys, pluggable
//! serializer, `get`/`set` over a generic backend) — simplified to the one
//! serialization format the spec calls for (a compact binary encoding via
//! `bincode`, chosen over JSON to keep bodies and headers binary-safe and to
//! avoid re-parsing on every read). Unlike `CacheManager`, this engine owns
//! its backend behind an `Arc`, shared with [`crate::session::Session`]'s
//! rate limiter rather than privately copied, so `lookup`/`store`/`clear`
//! don't need a backend argument on every call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{AnyBackend, Backend};
use crate::error::{Result, SerializationError};
use crate::fingerprint::cache_key;

/// A cached HTTP response: status, headers, and body, serialized bit-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self { status, headers, body }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SerializationError::Encode(e.to_string()).into())
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::Decode(e.to_string()).into())
    }
}

/// Response cache addressing rules: a namespace prefix and the default TTL
/// applied when a caller doesn't override it, plus the shared backend.
pub struct CacheEngine {
    prefix: String,
    default_ttl: Duration,
    backend: Arc<AnyBackend>,
    /// Entries materialized for [`std::ops::Index`], which must return a real
    /// `&CachedResponse` from a synchronous call. Each distinct fingerprint
    /// ever indexed leaks one `CachedResponse` for the engine's lifetime;
    /// bounded by the number of distinct fingerprints actually indexed, not
    /// by the number of index operations.
    indexed: Mutex<HashMap<String, &'static CachedResponse>>,
}

impl CacheEngine {
    pub fn new(prefix: impl Into<String>, default_ttl: Duration, backend: Arc<AnyBackend>) -> Self {
        Self {
            prefix: prefix.into(),
            default_ttl,
            backend,
            indexed: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, fingerprint: &str) -> String {
        cache_key(&self.prefix, fingerprint)
    }

    /// Look up a cached response by fingerprint. Never raises on miss; a
    /// corrupt entry is treated as a miss and evicted, with a warning logged.
    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<CachedResponse>> {
        let key = self.key(fingerprint);
        let Some(bytes) = self.backend.get(&key).await? else {
            return Ok(None);
        };

        match CachedResponse::decode(&bytes) {
            Ok(response) => Ok(Some(response)),
            Err(err) => {
                tracing::warn!(%key, error = %err, "evicting corrupt cache entry");
                self.backend.delete(&key).await?;
                Ok(None)
            }
        }
    }

    /// Store `response` under `fingerprint`. `ttl` overrides the engine's
    /// default when given; a later `store` with a different TTL wins
    /// (last-write-wins, matching the backend's plain `set` overwrite).
    pub async fn store(&self, fingerprint: &str, response: &CachedResponse, ttl: Option<Duration>) -> Result<()> {
        let key = self.key(fingerprint);
        let bytes = response.encode()?;
        self.backend.set(&key, bytes, ttl.unwrap_or(self.default_ttl)).await
    }

    /// Remove every cached entry under this engine's prefix.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear(&format!("{}:cache:", self.prefix)).await
    }
}

/// Synchronous read access to a cached entry by fingerprint, per the cache
/// engine's index-operator contract. Bridges [`CacheEngine::lookup`]'s async
/// backend read into a synchronous call via [`futures::executor::block_on`]
/// and leaks the decoded entry to satisfy `Index::index`'s `&Self::Output`
/// signature — see [`CacheEngine::indexed`]. Calling this from within an
/// async runtime that is itself driving the same KV/SQL backend connection
/// pool will deadlock; prefer [`CacheEngine::lookup`] there. Panics if the
/// fingerprint has no entry or the backend read fails.
impl std::ops::Index<&str> for CacheEngine {
    type Output = CachedResponse;

    fn index(&self, fingerprint: &str) -> &Self::Output {
        let mut indexed = self.indexed.lock();
        if let Some(existing) = indexed.get(fingerprint) {
            return existing;
        }

        let key = self.key(fingerprint);
        let bytes = futures::executor::block_on(self.backend.get(&key))
            .expect("backend read failed")
            .unwrap_or_else(|| panic!("no cached response for fingerprint {fingerprint:?}"));
        let response: &'static CachedResponse = Box::leak(Box::new(
            CachedResponse::decode(&bytes).unwrap_or_else(|e| panic!("corrupt cache entry for {fingerprint:?}: {e}")),
        ));
        indexed.insert(fingerprint.to_string(), response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn sample() -> CachedResponse {
        CachedResponse::new(200, vec![("content-type".into(), "text/plain".into())], b"hello".to_vec())
    }

    fn engine() -> CacheEngine {
        CacheEngine::new("app", Duration::from_secs(60), Arc::new(AnyBackend::Memory(MemoryBackend::new())))
    }

    #[tokio::test]
    async fn round_trips_bit_exact() {
        let engine = engine();
        let response = sample();
        engine.store("fp", &response, None).await.unwrap();
        let found = engine.lookup("fp").await.unwrap().unwrap();
        assert_eq!(found, response);
    }

    #[tokio::test]
    async fn miss_is_not_an_error() {
        let engine = engine();
        assert_eq!(engine.lookup("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_store_overrides_ttl() {
        let engine = engine();
        let response = sample();
        engine.store("fp", &response, Some(Duration::from_millis(5))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.lookup("fp").await.unwrap(), None);

        engine.store("fp", &response, Some(Duration::from_secs(60))).await.unwrap();
        assert!(engine.lookup("fp").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn corrupt_entry_is_treated_as_miss_and_evicted() {
        let engine = engine();
        engine
            .backend
            .set("app:cache:fp", b"not bincode".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(engine.lookup("fp").await.unwrap(), None);
        assert_eq!(engine.lookup("fp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_removes_entries_under_prefix() {
        let engine = engine();
        engine.store("fp1", &sample(), None).await.unwrap();
        engine.store("fp2", &sample(), None).await.unwrap();
        engine.clear().await.unwrap();
        assert_eq!(engine.lookup("fp1").await.unwrap(), None);
        assert_eq!(engine.lookup("fp2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn index_reads_a_stored_entry() {
        let engine = engine();
        let response = sample();
        engine.store("fp", &response, None).await.unwrap();
        assert_eq!(engine["fp"], response);
        // A second index of the same fingerprint serves the leaked entry.
        assert_eq!(engine["fp"], response);
    }
}
