//! Runtime ownership across start and stop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use knative_http::config::Config;
use knative_http::runtime::{CloseAck, InstanceRegistry, IoRuntime, TokioRuntime};
use knative_http::{EndpointConfig, KnativeHttpTransport, Message, TransportState};

use crate::common::{destination, echo, endpoint, sink, url};

/// Shared runtime that records close requests.
struct Recording {
    inner: TokioRuntime,
    closes: AtomicUsize,
}

impl IoRuntime for Recording {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn handle(&self) -> Handle {
        self.inner.handle()
    }

    fn close(&self, ack: CloseAck) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close(ack);
    }
}

fn recording() -> Arc<Recording> {
    Arc::new(Recording {
        inner: TokioRuntime::from_handle("shared", Handle::current()),
        closes: AtomicUsize::new(0),
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn test_local_runtime_serves_and_is_closed_on_stop() {
    let transport = KnativeHttpTransport::new(Config::for_test());
    transport.start().await.unwrap();
    assert!(transport.owns_runtime());
    let local = transport.runtime_handle().unwrap();

    let consumer = transport
        .create_consumer(sink("ping", "/ping"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    let addr = consumer.local_addr();
    let producer = transport
        .create_producer(destination("ping", addr, "/ping"), endpoint(EndpointConfig::default()))
        .unwrap();

    let reply = producer.send(Message::with_body("ping")).await.unwrap();
    assert_eq!(reply.body().as_ref(), b"ping");

    transport.stop().await.unwrap();
    assert_eq!(transport.state(), TransportState::Stopped);
    assert!(!transport.owns_runtime());

    // The listener went away with its runtime.
    let refused = reqwest::Client::new().post(url(addr, "/ping")).send().await;
    assert!(refused.is_err());
    assert!(local.spawn(async {}).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_injected_runtime_survives_stop() {
    let shared = recording();
    let transport = KnativeHttpTransport::new(Config::for_test()).with_runtime(shared.clone());

    transport.start().await.unwrap();
    let consumer = transport
        .create_consumer(sink("a", "/a"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    drop(consumer);
    transport.stop().await.unwrap();

    assert_eq!(shared.closes.load(Ordering::SeqCst), 0);
    assert_eq!(shared.handle().spawn(async { 5 }).await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discovered_runtime_survives_stop() {
    let shared = recording();
    let registry = Arc::new(InstanceRegistry::new());
    registry.register(shared.clone());

    let transport = KnativeHttpTransport::new(Config::for_test()).with_runtime_registry(registry);
    transport.start().await.unwrap();
    assert!(!transport.owns_runtime());
    transport.stop().await.unwrap();

    assert_eq!(shared.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_binds_fresh_listeners() {
    let transport = KnativeHttpTransport::new(Config::for_test()).with_runtime(recording());

    transport.start().await.unwrap();
    let first = transport
        .create_consumer(sink("r", "/r"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    first.stop();
    transport.stop().await.unwrap();
    assert_eq!(transport.listener_count(), 0);

    transport.start().await.unwrap();
    let second = transport
        .create_consumer(sink("r", "/r"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    assert!(second.is_registered());
    assert_eq!(transport.listener_count(), 1);
    transport.stop().await.unwrap();
}
