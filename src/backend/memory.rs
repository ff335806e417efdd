//! In-process memory backend with a background sweeper.
//!
//! Grounded on the teacher's `MemoryStorage`: a `DashMap` guarded internally by
//! its own per-shard locks, a GC task spawned via `tokio::spawn`+`tokio::select!`
//! for duration-based sweeping, and a request-counter fast path for the
//! count-based trigger. Generalized from the teacher's fixed `StorageEntry`
//! value to raw bytes plus a parallel sorted-set map, since this backend now
//! also serves cache payloads and the sliding-window algorithm's score sets.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{unix_now, Backend};
use crate::error::Result;

/// Garbage collection cadence for the memory backend.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Sweep every `N` operations.
    Requests(u64),
    /// Sweep on a fixed wall-clock cadence via a background task.
    Duration(Duration),
    /// Never sweep automatically; callers invoke [`MemoryBackend::run_gc`] themselves.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10_000)
    }
}

/// Garbage collection configuration for the memory backend.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger a sweep.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Sweep every `count` operations.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Sweep on a fixed duration cadence.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
        }
    }

    /// Disable automatic sweeping.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: f64,
}

#[derive(Debug, Clone)]
struct SortedSet {
    members: Vec<(f64, String)>,
    expires_at: f64,
}

/// In-memory [`Backend`] implementation.
pub struct MemoryBackend {
    values: DashMap<String, Entry>,
    sets: Mutex<std::collections::HashMap<String, SortedSet>>,
    gc_config: GcConfig,
    op_count: AtomicU64,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.values.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a backend with the default GC configuration (sweep every 10,000 ops).
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a backend with a custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let backend = Self {
            values: DashMap::new(),
            sets: Mutex::new(std::collections::HashMap::new()),
            gc_config: gc_config.clone(),
            op_count: AtomicU64::new(0),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = gc_config.interval {
            backend.start_gc_task(interval);
        }

        backend
    }

    fn start_gc_task(&self, interval: Duration) {
        let values = self.values.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let reaped = sweep_values(&values);
                        if reaped > 0 {
                            tracing::debug!(reaped, "memory backend sweep cycle");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    /// Manually sweep expired keys.
    pub async fn run_gc(&self) {
        sweep_values(&self.values);
    }

    fn maybe_sweep(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.op_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                sweep_values(&self.values);
            }
        }
    }

    /// Number of scalar entries currently stored (for diagnostics/tests).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the backend holds no scalar entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Drop for MemoryBackend {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

fn sweep_values(values: &DashMap<String, Entry>) -> usize {
    let now = unix_now();
    let before = values.len();
    values.retain(|_, entry| entry.expires_at > now);
    before - values.len()
}

impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.maybe_sweep();
        let now = unix_now();
        if let Some(entry) = self.values.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.maybe_sweep();
        let expires_at = unix_now() + ttl.as_secs_f64();
        self.values.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.sets.lock().remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        self.maybe_sweep();
        let now = unix_now();
        let expires_at = now + ttl.as_secs_f64();

        let mut current = 0i64;
        self.values
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.expires_at <= now {
                    entry.value = 0i64.to_le_bytes().to_vec();
                }
                let existing = i64::from_le_bytes(entry.value.as_slice().try_into().unwrap_or([0; 8]));
                current = existing + delta;
                entry.value = current.to_le_bytes().to_vec();
                entry.expires_at = expires_at;
            })
            .or_insert_with(|| {
                current = delta;
                Entry {
                    value: delta.to_le_bytes().to_vec(),
                    expires_at,
                }
            });

        Ok(current)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        let now = unix_now();
        let mut sets = self.sets.lock();
        let set = sets.entry(key.to_string()).or_insert_with(|| SortedSet {
            members: Vec::new(),
            expires_at: now + ttl.as_secs_f64(),
        });
        set.members.retain(|(_, m)| m != member);
        set.members.push((score, member.to_string()));
        set.members
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        set.expires_at = now + ttl.as_secs_f64();
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let mut sets = self.sets.lock();
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.members.len();
        set.members.retain(|(score, _)| *score < lo || *score > hi);
        Ok((before - set.members.len()) as u64)
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let now = unix_now();
        let sets = self.sets.lock();
        let Some(set) = sets.get(key) else {
            return Ok(0);
        };
        if set.expires_at <= now {
            return Ok(0);
        }
        Ok(set
            .members
            .iter()
            .filter(|(score, _)| *score >= lo && *score <= hi)
            .count() as u64)
    }

    async fn zmin(&self, key: &str) -> Result<Option<f64>> {
        let sets = self.sets.lock();
        Ok(sets.get(key).and_then(|s| s.members.first().map(|(score, _)| *score)))
    }

    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>, ttl: Duration) -> Result<bool> {
        self.maybe_sweep();
        let now = unix_now();
        let expires_at = now + ttl.as_secs_f64();

        let current = self.values.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.value.clone())
            } else {
                None
            }
        });

        let matches = match (expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == cur.as_slice(),
            _ => false,
        };

        if matches {
            self.values.insert(key.to_string(), Entry { value: new, expires_at });
        }
        Ok(matches)
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        self.values.retain(|k, _| !k.starts_with(prefix));
        self.sets.lock().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
