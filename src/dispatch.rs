//! The six-phase per-request pipeline shared by both execution modes.
//!
//! Grounded on lychee's `Host` (per-host rate limiting wrapping a transport
//! call) and jhol's concurrency-guard pattern for the admission wait loop;
//! the phase ordering itself is literal from `SPEC_FULL.md` §4.5.

use std::time::Instant;

use crate::algorithm::AnyAlgorithm;
use crate::backend::AnyBackend;
use crate::cache::{CacheEngine, CachedResponse};
use crate::callback::{self, Callback};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::decision::Decision;
use crate::error::{Error, Result, TransportError};
use crate::fingerprint;
use crate::transport::{Request, Response, Transport};

/// Everything the pipeline needs to process one request, borrowed from the
/// owning [`crate::session::Session`].
pub(crate) struct Pipeline<'a, T: Transport> {
    pub backend: &'a AnyBackend,
    pub clock: &'a dyn Clock,
    pub cache: Option<&'a CacheEngine>,
    pub limiter: &'a crate::algorithm::ScopedLimiter<AnyAlgorithm>,
    pub transport: &'a T,
    pub callbacks: &'a [Box<dyn Callback>],
    pub config: &'a SessionConfig,
}

impl<'a, T: Transport> Pipeline<'a, T> {
    /// Run the six phases for a single request.
    pub async fn run(&self, request: Request) -> Result<Response> {
        let host = fingerprint::host_of(&request.url);
        let fp = fingerprint::fingerprint(&request.method, &request.url, request.body.as_deref());

        if let Some(cache) = self.cache {
            if let Some(cached) = cache.lookup(&fp).await? {
                let mut response = Response::new(cached.status, cached.headers, cached.body, request);
                callback::run(self.callbacks, &mut response, self.config.return_callbacks);
                return Ok(response);
            }
        }

        let deadline = Instant::now() + self.config.request_timeout;

        tokio::time::timeout(self.config.request_timeout, self.admit(&host, &fp))
            .await
            .map_err(|_| Error::Transport(TransportError::Timeout(self.config.request_timeout)))??;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut response = tokio::time::timeout(remaining, self.transport.send(request))
            .await
            .map_err(|_| Error::Transport(TransportError::Timeout(self.config.request_timeout)))??;

        if let Some(cache) = self.cache {
            let cached = CachedResponse::new(response.status, response.headers.clone(), response.body.clone());
            cache.store(&fp, &cached, None).await?;
        }

        callback::run(self.callbacks, &mut response, self.config.return_callbacks);
        Ok(response)
    }

    async fn admit(&self, host: &str, fingerprint: &str) -> Result<()> {
        loop {
            let now = self.clock.now();
            let decision = self.limiter.try_acquire(self.backend, host, fingerprint, now).await?;
            match decision {
                Decision::Admitted => return Ok(()),
                Decision::Retry(wait) => {
                    if self.config.raise_errors {
                        return Err(Error::RateLimited {
                            retry_after: wait,
                            scope: "combined",
                        });
                    }
                    let to_sleep = if wait < self.config.sleep_duration * 2 {
                        wait
                    } else {
                        self.config.sleep_duration
                    };
                    tokio::time::sleep(to_sleep).await;
                }
            }
        }
    }
}
