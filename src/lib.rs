//! `throttlecache`: an HTTP client session with pluggable rate limiting,
//! response caching, and a dispatch loop over a transport you supply.
//!
//! - **Rate limiting**: five algorithms (sliding window, fixed window, leaky
//!   bucket, token bucket, GCRA), each usable over any of three backends
//!   (in-process memory, an embedded key-value store, or embedded SQLite),
//!   evaluated across global/host/endpoint scopes.
//! - **Response caching**: fingerprint-keyed, TTL-bounded, sharing whichever
//!   backend the rate limiter uses.
//! - **Dispatch**: a six-phase pipeline (cache lookup, admission, send, cache
//!   store, callbacks, progress) run in either a cooperative-concurrent mode
//!   or a blocking-parallel worker pool.
//!
//! # Quick start
//!
//! ```ignore
//! use throttlecache::{AlgorithmConfig, MockTransport, Request, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SessionConfig::builder(AlgorithmConfig::TokenBucket {
//!         capacity: 10.0,
//!         fill_rate: 5.0,
//!     })
//!     .key("my-app")
//!     .build()
//!     .unwrap();
//!
//!     let session = Session::open(config, MockTransport::ok(b"hi".to_vec())).await.unwrap();
//!     let responses = session.requests_cooperative(vec![Request::new("GET", "http://example.com")]).await;
//!     println!("{:?}", responses[0]);
//! }
//! ```
//!
//! # Feature flags
//!
//! - `memory` (default): in-memory backend with background GC.
//! - `kv`: embedded key-value backend.
//! - `sql`: embedded SQLite backend.
//! - `progress-indicatif`: a reference [`progress::ProgressReporter`] backed by `indicatif`.
//! - `full`: every backend plus the reference progress reporter.

pub mod algorithm;
pub mod backend;
pub mod cache;
pub mod callback;
pub mod clock;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod progress;
pub mod session;
pub mod transport;

pub use algorithm::{Algorithm, AnyAlgorithm, FixedWindow, Gcra, LeakyBucket, ScopedLimiter, SlidingWindow, TokenBucket};
pub use backend::{AnyBackend, Backend};
pub use cache::{CacheEngine, CachedResponse};
pub use callback::{Callback, CallbackError};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{AlgorithmConfig, BackendConfig, SessionConfig, SessionConfigBuilder};
pub use decision::Decision;
pub use error::{BackendError, ConfigError, Error, Result, SerializationError, TransportError};
pub use progress::{NoopProgress, ProgressReporter};
pub use session::Session;
pub use transport::{MockTransport, Request, Response, Transport};

#[cfg(feature = "memory")]
pub use backend::MemoryBackend;

#[cfg(feature = "kv")]
pub use backend::{KvBackend, KvConfig};

#[cfg(feature = "sql")]
pub use backend::{SqlBackend, SqlConfig};

#[cfg(feature = "progress-indicatif")]
pub use progress::IndicatifProgress;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::algorithm::{Algorithm, AnyAlgorithm};
    pub use crate::backend::{AnyBackend, Backend};
    pub use crate::cache::CacheEngine;
    pub use crate::config::{AlgorithmConfig, BackendConfig, SessionConfig};
    pub use crate::decision::Decision;
    pub use crate::error::{Error, Result};
    pub use crate::session::Session;
    pub use crate::transport::{Request, Response, Transport};

    #[cfg(feature = "memory")]
    pub use crate::backend::MemoryBackend;
}
