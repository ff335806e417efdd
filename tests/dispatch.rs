//! Integration tests for caching, callbacks, and the blocking-parallel dispatch mode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use throttlecache::{AlgorithmConfig, MockTransport, Request, Session, SessionConfig};

#[tokio::test]
async fn cached_response_is_served_without_a_second_transport_hit() {
    let config = SessionConfig::builder(AlgorithmConfig::TokenBucket {
        capacity: 1.0,
        fill_rate: 0.001,
    })
    .key("test:cache")
    .cache_enabled(true)
    .cache_timeout(Duration::from_secs(60))
    .raise_errors(true)
    .build()
    .unwrap();
    let session = Session::open(config, MockTransport::ok(b"first".to_vec())).await.unwrap();

    let request = Request::new("GET", "http://example.com/resource");
    let first = session.requests_cooperative(vec![request.clone()]).await;
    assert_eq!(first[0].as_ref().unwrap().body, b"first");

    // The token bucket has a capacity of one and a near-zero fill rate, so a
    // second live request would be rejected; a cache hit bypasses admission
    // entirely and still succeeds.
    let second = session.requests_cooperative(vec![request]).await;
    assert_eq!(second[0].as_ref().unwrap().body, b"first");
}

#[tokio::test]
async fn callbacks_run_in_order_and_collect_results_when_enabled() {
    let config = SessionConfig::builder(AlgorithmConfig::TokenBucket {
        capacity: 10.0,
        fill_rate: 10.0,
    })
    .key("test:callbacks")
    .return_callbacks(true)
    .build()
    .unwrap();
    let order = Arc::new(AtomicUsize::new(0));
    let first_slot = Arc::clone(&order);
    let second_slot = Arc::clone(&order);

    let session = Session::open(config, MockTransport::ok(b"ok".to_vec()))
        .await
        .unwrap()
        .with_callback(move |_: &throttlecache::Response| {
            first_slot.fetch_add(1, Ordering::SeqCst);
            Some(Box::new("first".to_string()) as Box<dyn std::any::Any + Send>)
        })
        .with_callback(move |_: &throttlecache::Response| {
            second_slot.fetch_add(1, Ordering::SeqCst);
            Some(Box::new("second".to_string()) as Box<dyn std::any::Any + Send>)
        });

    let results = session.requests_cooperative(vec![Request::new("GET", "http://example.com/a")]).await;
    let response = results[0].as_ref().unwrap();
    assert_eq!(response.callbacks.len(), 2);
    assert_eq!(response.callbacks[0].as_ref().unwrap().downcast_ref::<String>(), Some(&"first".to_string()));
    assert_eq!(response.callbacks[1].as_ref().unwrap().downcast_ref::<String>(), Some(&"second".to_string()));
    assert_eq!(order.load(Ordering::SeqCst), 2);
}

#[test]
fn blocking_dispatch_delivers_every_request_in_order() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = SessionConfig::builder(AlgorithmConfig::TokenBucket {
        capacity: 100.0,
        fill_rate: 100.0,
    })
    .key("test:blocking")
    .worker_count(4)
    .build()
    .unwrap();
    let session = runtime.block_on(async { Session::open(config, MockTransport::ok(b"ok".to_vec())).await.unwrap() });
    let session = Arc::new(session);

    let requests: Vec<_> = (0..50).map(|i| Request::new("GET", format!("http://example.com/{i}"))).collect();
    let results = session.requests_blocking(requests);

    assert_eq!(results.len(), 50);
    assert!(results.iter().all(|r| r.is_ok()));
}
