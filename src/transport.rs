//! The pluggable HTTP transport boundary.
//!
//! The transport itself is explicitly out of scope (see `SPEC_FULL.md` §1):
//! this module defines only the seam the dispatch loop calls through, plus an
//! in-memory mock used by this crate's own tests and by downstream
//! integration tests exercising the dispatch loop without a real network.

use std::future::Future;

use crate::error::{Result, SerializationError, TransportError};

/// An outbound HTTP request, as seen by the transport.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// An HTTP response, as seen by the dispatch loop.
///
/// Not `Clone`: a callback's return value may be any `Send` type, and trait
/// objects can't be cloned generically.
pub struct Response {
    pub request: Request,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Return values collected from the callback pipeline, when
    /// `return_callbacks` is enabled.
    pub callbacks: Vec<Option<Box<dyn std::any::Any + Send>>>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("request", &self.request)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Response {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>, request: Request) -> Self {
        Self {
            request,
            status,
            headers,
            body,
            callbacks: Vec::new(),
        }
    }

    /// Decode the response body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| SerializationError::Decode(e.to_string()).into())
    }
}

/// Sends a [`Request`] and returns a [`Response`] or a typed transport error.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

/// A canned-response transport for tests: returns a fixed status/body for
/// every request, or a configured failure.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    status: u16,
    body: Vec<u8>,
    fail_with: Option<String>,
}

impl MockTransport {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            fail_with: Some(message.into()),
        }
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        if let Some(message) = &self.fail_with {
            return Err(TransportError::Network(message.clone()).into());
        }
        Ok(Response::new(self.status, Vec::new(), self.body.clone(), request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_transport_echoes_configured_body() {
        let transport = MockTransport::ok(b"hi".to_vec());
        let response = transport.send(Request::new("GET", "http://x/")).await.unwrap();
        assert_eq!(response.body, b"hi");
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn mock_transport_surfaces_configured_failure() {
        let transport = MockTransport::failing("boom");
        let err = transport.send(Request::new("GET", "http://x/")).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
