//! The session façade: assembles clock, backend, cache, limiter, transport,
//! and progress reporter behind one handle, and runs `requests` in either
//! execution mode.
//!
//! Grounded on the teacher's `RateLimitManagerBuilder` for the
//! construct-then-validate shape; the two execution modes follow
//! `SPEC_FULL.md` §5's resolution of the worker-pool Open Question — a
//! hand-rolled fixed-size pool of OS threads, each running its own
//! single-threaded Tokio runtime, rather than `rayon` (tuned for CPU-bound
//! work, not I/O-bound backend/transport calls) or Tokio's blocking pool
//! (unbounded, not the fixed-N pool the spec calls for).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::algorithm::{Algorithm, AnyAlgorithm, ScopeToggles, ScopedLimiter};
use crate::backend::memory::GcConfig;
use crate::backend::{AnyBackend, MemoryBackend};
use crate::cache::CacheEngine;
use crate::callback::Callback;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendConfig, SessionConfig};
use crate::dispatch::Pipeline;
use crate::error::Result;
use crate::progress::{NoopProgress, ProgressReporter};
use crate::transport::{Request, Response, Transport};

async fn build_backend(config: &SessionConfig) -> Result<AnyBackend> {
    match &config.backend {
        BackendConfig::Memory => {
            let gc_config = match config.check_frequency {
                Some(interval) => GcConfig::on_duration(interval),
                None => GcConfig::default(),
            };
            Ok(AnyBackend::Memory(MemoryBackend::with_gc(gc_config)))
        }
        #[cfg(feature = "kv")]
        BackendConfig::Kv(kv_config) => Ok(AnyBackend::Kv(crate::backend::KvBackend::new(kv_config.clone()).await?)),
        #[cfg(feature = "sql")]
        BackendConfig::Sql(sql_config) => {
            Ok(AnyBackend::Sql(crate::backend::SqlBackend::new(sql_config.clone()).await?))
        }
    }
}

/// A configured HTTP client session: rate limiting, caching, and dispatch
/// over a pluggable transport `T` and progress sink `P`.
pub struct Session<T: Transport, P: ProgressReporter = NoopProgress> {
    clock: Box<dyn Clock>,
    backend: Arc<AnyBackend>,
    cache: Option<CacheEngine>,
    limiter: ScopedLimiter<AnyAlgorithm>,
    transport: T,
    progress: P,
    config: SessionConfig,
    callbacks: Vec<Box<dyn Callback>>,
}

impl<T: Transport> Session<T, NoopProgress> {
    /// Open a session with no progress reporting.
    pub async fn open(config: SessionConfig, transport: T) -> Result<Self> {
        Self::open_with_progress(config, transport, NoopProgress).await
    }
}

impl<T: Transport, P: ProgressReporter> Session<T, P> {
    /// Open a session reporting progress through `progress`.
    pub async fn open_with_progress(config: SessionConfig, transport: T, progress: P) -> Result<Self> {
        let backend = Arc::new(build_backend(&config).await?);
        let mut algorithm = AnyAlgorithm::from_config(config.algorithm.clone())?;
        algorithm.set_max_cas_attempts(config.max_cas_attempts);
        let toggles = ScopeToggles {
            per_host: config.per_host,
            per_endpoint: config.per_endpoint,
        };
        let limiter = ScopedLimiter::new(algorithm, config.key.clone(), toggles);
        let cache = config
            .cache_enabled
            .then(|| CacheEngine::new(config.key.clone(), config.cache_timeout, Arc::clone(&backend)));

        Ok(Self {
            clock: Box::new(SystemClock::new()),
            backend,
            cache,
            limiter,
            transport,
            progress,
            config,
            callbacks: Vec::new(),
        })
    }

    /// Override the clock (used by tests to drive deterministic timing).
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Register a callback run on every response, in registration order.
    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    /// Clear the response cache, if enabled.
    pub async fn clear_cache(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear().await?;
        }
        Ok(())
    }

    fn pipeline(&self) -> Pipeline<'_, T> {
        Pipeline {
            backend: self.backend.as_ref(),
            clock: self.clock.as_ref(),
            cache: self.cache.as_ref(),
            limiter: &self.limiter,
            transport: &self.transport,
            callbacks: &self.callbacks,
            config: &self.config,
        }
    }

    /// Cooperative-concurrent dispatch: all requests interleave on the
    /// calling task; result order matches input order regardless of
    /// completion order.
    pub async fn requests_cooperative(&self, requests: Vec<Request>) -> Vec<Result<Response>> {
        let total = requests.len() as u64;
        let completed = AtomicU64::new(0);
        let pipeline = self.pipeline();

        let futures = requests.into_iter().map(|request| {
            let pipeline = &pipeline;
            let completed = &completed;
            async move {
                let result = pipeline.run(request).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                self.progress.tick(done, total);
                result
            }
        });

        let results = futures::future::join_all(futures).await;
        self.progress.close();
        results
    }
}

impl<T: Transport + 'static, P: ProgressReporter + 'static> Session<T, P> {
    /// Blocking-parallel dispatch: a fixed-size pool of OS threads, each
    /// running its own single-threaded Tokio runtime, shares this session.
    /// Result order matches input order.
    pub fn requests_blocking(self: &Arc<Self>, requests: Vec<Request>) -> Vec<Result<Response>> {
        let total = requests.len();
        let worker_count = self.config.worker_count.min(total.max(1));

        let work: Arc<Mutex<VecDeque<(usize, Request)>>> =
            Arc::new(Mutex::new(requests.into_iter().enumerate().collect()));
        let results: Arc<Mutex<Vec<Option<Result<Response>>>>> = Arc::new(Mutex::new((0..total).map(|_| None).collect()));
        let completed = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..worker_count)
            .map(|_| {
                let session = Arc::clone(self);
                let work = Arc::clone(&work);
                let results = Arc::clone(&results);
                let completed = Arc::clone(&completed);
                std::thread::spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to start dispatch worker runtime");
                    runtime.block_on(async {
                        let pipeline = session.pipeline();
                        loop {
                            let item = work.lock().pop_front();
                            let Some((index, request)) = item else { break };
                            let result = pipeline.run(request).await;
                            results.lock()[index] = Some(result);
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            session.progress.tick(done, total as u64);
                        }
                    });
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("dispatch worker thread panicked");
        }
        self.progress.close();

        Arc::try_unwrap(results)
            .unwrap_or_else(|arc| Mutex::new(arc.lock().drain(..).collect()))
            .into_inner()
            .into_iter()
            .map(|slot| slot.expect("every queued request produced a result"))
            .collect()
    }
}
