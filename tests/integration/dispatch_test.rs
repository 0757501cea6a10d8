//! Request dispatch over a running shared listener.

use std::sync::Arc;

use tokio::sync::Notify;

use knative_http::cloudevents::MIME_STRUCTURED_CONTENT_MODE;
use knative_http::environment::META_VIRTUAL_HOST;
use knative_http::listener::HandlerError;
use knative_http::{processor_fn, EndpointConfig, Message, TransportError};

use crate::common::{echo, endpoint, running_transport, sink, url};

#[tokio::test(flavor = "multi_thread")]
async fn test_unregister_mid_traffic() {
    let transport = running_transport().await;
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let processor = {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        processor_fn(move |request: Message| {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            async move {
                started.notify_one();
                release.notified().await;
                Ok(Message::with_body(request.body().clone()))
            }
        })
    };

    let consumer = transport
        .create_consumer(sink("slow", "/slow"), endpoint(EndpointConfig::default()), processor)
        .await
        .unwrap();
    let target = url(consumer.local_addr(), "/slow");
    let client = reqwest::Client::new();

    let in_flight = tokio::spawn({
        let client = client.clone();
        let target = target.clone();
        async move { client.post(target).body("first").send().await }
    });
    started.notified().await;

    consumer.stop();

    let after = client.post(&target).body("second").send().await.unwrap();
    assert_eq!(after.status(), 404);

    release.notify_one();
    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "first");

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_structured_body_is_400() {
    let transport = running_transport().await;
    let consumer = transport
        .create_consumer(sink("in", "/in"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    let client = reqwest::Client::new();

    let response = client
        .post(url(consumer.local_addr(), "/in"))
        .header("Content-Type", MIME_STRUCTURED_CONTENT_MODE)
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("CloudEvent"));

    // The listener keeps serving after a rejected request.
    let response = client
        .post(url(consumer.local_addr(), "/in"))
        .body("fine")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_consumer_does_not_affect_neighbours() {
    let transport = running_transport().await;
    let failing = processor_fn(|_request: Message| async move {
        Err(HandlerError::Processing("database unavailable".to_string()))
    });

    let bad = transport
        .create_consumer(sink("bad", "/bad"), endpoint(EndpointConfig::default()), failing)
        .await
        .unwrap();
    let good = transport
        .create_consumer(sink("good", "/good"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();
    assert_eq!(bad.local_addr(), good.local_addr());

    let client = reqwest::Client::new();
    let response = client
        .post(url(bad.local_addr(), "/bad"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert!(response.text().await.unwrap().contains("database unavailable"));

    let response = client
        .post(url(good.local_addr(), "/good/nested"))
        .body("y")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "y");

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_virtual_host_routing() {
    let transport = running_transport().await;
    let tagged = |tag: &'static str| {
        processor_fn(move |_request: Message| async move { Ok(Message::with_body(tag)) })
    };

    let any = transport
        .create_consumer(sink("any", "/events"), endpoint(EndpointConfig::default()), tagged("any"))
        .await
        .unwrap();
    let _orders = transport
        .create_consumer(
            sink("orders", "/events").with_metadata(META_VIRTUAL_HOST, "orders.example.com"),
            endpoint(EndpointConfig::default()),
            tagged("orders"),
        )
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let target = url(any.local_addr(), "/events");

    let response = client
        .post(&target)
        .header("Host", "orders.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "orders");

    let response = client.post(&target).send().await.unwrap();
    assert_eq!(response.text().await.unwrap(), "any");

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_registration_after_stop_rejected() {
    let transport = running_transport().await;
    transport.stop().await.unwrap();

    let result = transport
        .create_consumer(sink("late", "/late"), endpoint(EndpointConfig::default()), echo())
        .await;
    assert!(matches!(result, Err(TransportError::NotRunning(_))));
}
