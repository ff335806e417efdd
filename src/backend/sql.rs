//! Embedded SQL [`Backend`], backed by SQLite via `sqlx`.
//!
//! No teacher source grounds this directly (the teacher has no SQL backend);
//! the table shape and TTL-on-read discipline are lifted from the `Backend`
//! contract itself and from the memory backend's "expired reads are absent"
//! rule, reapplied over rows. `sqlx`'s async `SqlitePool` is used rather than
//! a synchronous driver plus `spawn_blocking`, since the `Backend` trait is
//! async throughout (see `SPEC_FULL.md` §9 for the rationale).

use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{unix_now, Backend};
use crate::error::{BackendError, Result};

/// Connection parameters for the SQL backend.
#[derive(Debug, Clone, Default)]
pub struct SqlConfig {
    /// Path to the SQLite database file; `None` uses an in-memory database
    /// scoped to the pool's lifetime.
    pub db: Option<PathBuf>,
}

impl SqlConfig {
    /// Use a SQLite file at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self { db: Some(path.into()) }
    }

    /// Use an ephemeral in-memory database.
    pub fn in_memory() -> Self {
        Self { db: None }
    }
}

/// SQL [`Backend`] implementation over a single table.
///
/// Columns: `key TEXT PRIMARY KEY, value BLOB, expires_at REAL, score REAL
/// NULL, member TEXT NULL`. Sorted-set members for one key occupy multiple
/// rows sharing that key, distinguished by `member`; scalar values occupy the
/// single row where `member IS NULL`. `incr` and `cas` read-then-write, so
/// both run inside immediate-mode transactions (`BEGIN IMMEDIATE`) to
/// serialize conflicting admissions; the other writes are single statements
/// and need no transaction.
pub struct SqlBackend {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend").finish()
    }
}

impl SqlBackend {
    /// Open (creating if necessary) the database described by `config`.
    pub async fn new(config: SqlConfig) -> Result<Self> {
        let options = match &config.db {
            Some(path) => SqliteConnectOptions::new().filename(path).create_if_missing(true),
            None => SqliteConnectOptions::new().filename(":memory:").create_if_missing(true),
        }
        .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(if config.db.is_none() { 1 } else { 5 })
            .connect_with(options)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS backend_store (
                key TEXT NOT NULL,
                member TEXT NOT NULL DEFAULT '',
                value BLOB,
                expires_at REAL NOT NULL,
                score REAL,
                PRIMARY KEY (key, member)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_backend_store_score ON backend_store(key, score)")
            .execute(&pool)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        Ok(Self { pool })
    }
}

impl Backend for SqlBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = unix_now();
        let row = sqlx::query(
            "SELECT value FROM backend_store WHERE key = ? AND member = '' AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = unix_now() + ttl.as_secs_f64();
        sqlx::query(
            "INSERT INTO backend_store (key, member, value, expires_at, score)
             VALUES (?, '', ?, ?, NULL)
             ON CONFLICT(key, member) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM backend_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut tx = (&self.pool)
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        let now = unix_now();
        let expires_at = now + ttl.as_secs_f64();

        let row = sqlx::query(
            "SELECT value FROM backend_store WHERE key = ? AND member = '' AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        let current: i64 = match row {
            Some(r) => {
                let bytes: Vec<u8> = r.get("value");
                i64::from_le_bytes(bytes.as_slice().try_into().unwrap_or([0; 8]))
            }
            None => 0,
        };
        let updated = current + delta;

        sqlx::query(
            "INSERT INTO backend_store (key, member, value, expires_at, score)
             VALUES (?, '', ?, ?, NULL)
             ON CONFLICT(key, member) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(updated.to_le_bytes().to_vec())
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        tx.commit()
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(updated)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        let expires_at = unix_now() + ttl.as_secs_f64();
        sqlx::query(
            "INSERT INTO backend_store (key, member, value, expires_at, score)
             VALUES (?, ?, NULL, ?, ?)
             ON CONFLICT(key, member) DO UPDATE SET score = excluded.score, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(member)
        .bind(expires_at)
        .bind(score)
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM backend_store WHERE key = ? AND member != '' AND score >= ? AND score <= ?",
        )
        .bind(key)
        .bind(lo)
        .bind(hi)
        .execute(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(result.rows_affected())
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let now = unix_now();
        let row = sqlx::query(
            "SELECT COUNT(*) as c FROM backend_store
             WHERE key = ? AND member != '' AND score >= ? AND score <= ? AND expires_at > ?",
        )
        .bind(key)
        .bind(lo)
        .bind(hi)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(row.get::<i64, _>("c") as u64)
    }

    async fn zmin(&self, key: &str) -> Result<Option<f64>> {
        let now = unix_now();
        let row = sqlx::query(
            "SELECT MIN(score) as s FROM backend_store
             WHERE key = ? AND member != '' AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(row.get::<Option<f64>, _>("s"))
    }

    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>, ttl: Duration) -> Result<bool> {
        let mut tx = (&self.pool)
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        let now = unix_now();
        let expires_at = now + ttl.as_secs_f64();

        let row = sqlx::query(
            "SELECT value FROM backend_store WHERE key = ? AND member = '' AND expires_at > ?",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        let current: Option<Vec<u8>> = row.map(|r| r.get("value"));
        let matches = match (expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == cur.as_slice(),
            _ => false,
        };

        if matches {
            sqlx::query(
                "INSERT INTO backend_store (key, member, value, expires_at, score)
                 VALUES (?, '', ?, ?, NULL)
                 ON CONFLICT(key, member) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            )
            .bind(key)
            .bind(new)
            .bind(expires_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        }

        tx.commit()
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(matches)
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        let pattern = format!("{prefix}%");
        sqlx::query("DELETE FROM backend_store WHERE key LIKE ?")
            .bind(pattern)
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::conformance;

    #[tokio::test]
    async fn conformance_suite() {
        let backend = SqlBackend::new(SqlConfig::in_memory()).await.unwrap();
        conformance::get_set_delete(&backend).await;
        conformance::incr_creates_and_accumulates(&backend).await;
        conformance::sorted_set_roundtrip(&backend).await;
        conformance::cas_semantics(&backend).await;
        conformance::clear_by_prefix(&backend).await;
    }

    #[tokio::test]
    async fn conformance_expiry() {
        let backend = SqlBackend::new(SqlConfig::in_memory()).await.unwrap();
        conformance::expiry_on_read(&backend).await;
    }
}
