//! Callback fan-out over each response.
//!
//! Per §4.6: callbacks run sequentially per response in supplied order. A
//! callback that panics is treated as a `CallbackError` and dispatch
//! continues to the rest — `CallbackError` is deliberately not a variant of
//! the crate-level `Error` (§7): it is wrapped per callback and never
//! aborts, so it is a sentinel value attached to the response rather than
//! something a caller `?`-propagates.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::transport::Response;

/// Sentinel recorded in `response.callbacks` when a callback panics, in
/// place of its return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError(pub String);

/// A callback invoked once per response, optionally returning an arbitrary
/// value that gets collected when `return_callbacks` is enabled. The value is
/// type-erased since callbacks may return whatever shape is useful to their
/// caller (a parsed body, a metric, a unit acknowledgement); callers that
/// collect results know their own callbacks' concrete return types and
/// downcast accordingly.
pub trait Callback: Send + Sync {
    fn call(&self, response: &Response) -> Option<Box<dyn Any + Send>>;
}

impl<F> Callback for F
where
    F: Fn(&Response) -> Option<Box<dyn Any + Send>> + Send + Sync,
{
    fn call(&self, response: &Response) -> Option<Box<dyn Any + Send>> {
        self(response)
    }
}

/// Run every callback over `response` in order. When `collect` is set, each
/// callback's return value (or a boxed [`CallbackError`] if it panicked) is
/// appended to `response.callbacks`; otherwise return values are discarded.
pub fn run(callbacks: &[Box<dyn Callback>], response: &mut Response, collect: bool) {
    for callback in callbacks {
        let outcome = catch_unwind(AssertUnwindSafe(|| callback.call(response)));
        if collect {
            let value = match outcome {
                Ok(value) => value,
                Err(panic) => Some(Box::new(CallbackError(describe_panic(panic))) as Box<dyn Any + Send>),
            };
            response.callbacks.push(value);
        }
    }
}

fn describe_panic(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "callback panicked".to_string()
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "callback error: {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Request;

    fn blank_response() -> Response {
        Response::new(200, Vec::new(), Vec::new(), Request::new("GET", "http://x/"))
    }

    #[test]
    fn runs_callbacks_in_order_and_collects_results() {
        let mut response = blank_response();
        let callbacks: Vec<Box<dyn Callback>> = vec![
            Box::new(|_: &Response| Some(Box::new("first".to_string()) as Box<dyn Any + Send>)),
            Box::new(|_: &Response| Some(Box::new("second".to_string()) as Box<dyn Any + Send>)),
        ];
        run(&callbacks, &mut response, true);
        assert_eq!(response.callbacks.len(), 2);
        assert_eq!(response.callbacks[0].as_ref().unwrap().downcast_ref::<String>(), Some(&"first".to_string()));
        assert_eq!(response.callbacks[1].as_ref().unwrap().downcast_ref::<String>(), Some(&"second".to_string()));
    }

    #[test]
    fn discards_results_when_collection_disabled() {
        let mut response = blank_response();
        let callbacks: Vec<Box<dyn Callback>> =
            vec![Box::new(|_: &Response| Some(Box::new("x".to_string()) as Box<dyn Any + Send>))];
        run(&callbacks, &mut response, false);
        assert!(response.callbacks.is_empty());
    }

    #[test]
    fn panicking_callback_does_not_abort_later_callbacks() {
        let mut response = blank_response();
        let callbacks: Vec<Box<dyn Callback>> = vec![
            Box::new(|_: &Response| panic!("boom")),
            Box::new(|_: &Response| Some(Box::new("still ran".to_string()) as Box<dyn Any + Send>)),
        ];
        run(&callbacks, &mut response, true);
        assert_eq!(response.callbacks.len(), 2);
        assert_eq!(
            response.callbacks[1].as_ref().unwrap().downcast_ref::<String>(),
            Some(&"still ran".to_string())
        );
        let first_err = response.callbacks[0].as_ref().unwrap().downcast_ref::<CallbackError>().unwrap();
        assert!(first_err.0.contains("boom"));
    }
}
