//! Producer to consumer exchanges over a shared listener.

use knative_http::cloudevents::CloudEventVersion;
use knative_http::environment::META_EVENT_TYPE;
use knative_http::{ContentMode, EndpointConfig, Message, ProducerError};

use crate::common::{destination, echo, endpoint, running_transport, sink};

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_mode_exchange() {
    let transport = running_transport().await;
    let consumer = transport
        .create_consumer(sink("orders", "/orders"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();

    let service = destination("orders", consumer.local_addr(), "/orders")
        .with_metadata(META_EVENT_TYPE, "order.created");
    let producer = transport
        .create_producer(service, endpoint(EndpointConfig::default()))
        .unwrap();

    let message = Message::with_body("hello")
        .header("Content-Type", "text/plain")
        .header("CE-EventID", "evt-1");
    let reply = producer.send(message).await.unwrap();

    assert_eq!(reply.body().as_ref(), b"hello");
    assert_eq!(reply.headers().get("X-Echo-CE-EventID"), Some("evt-1"));
    assert_eq!(reply.headers().get("X-Echo-CE-EventType"), Some("order.created"));
    assert_eq!(reply.headers().get("X-Echo-CE-Source"), Some("knative:endpoint/test"));
    assert_eq!(reply.headers().get("X-Echo-CE-CloudEventsVersion"), Some("0.1"));
    assert!(reply.headers().get("X-Echo-CE-EventTime").is_some());
    assert_eq!(reply.headers().get("X-Echo-Content-Type"), Some("text/plain"));

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_structured_mode_exchange() {
    let config = EndpointConfig::default()
        .with_version(CloudEventVersion::V10)
        .with_content_mode(ContentMode::Structured);

    let transport = running_transport().await;
    let consumer = transport
        .create_consumer(sink("audit", "/audit"), endpoint(config.clone()), echo())
        .await
        .unwrap();

    let producer = transport
        .create_producer(
            destination("audit", consumer.local_addr(), "/audit"),
            endpoint(config.with_cloud_events_type("audit.logged")),
        )
        .unwrap();

    let message = Message::with_body("plain words").header("Content-Type", "text/plain");
    let id = message.id().to_string();
    let reply = producer.send(message).await.unwrap();

    // The envelope was decoded before the processor saw it.
    assert_eq!(reply.body().as_ref(), b"plain words");
    assert_eq!(reply.headers().get("X-Echo-Content-Type"), Some("text/plain"));
    assert_eq!(reply.headers().get("X-Echo-ce-id"), Some(id.as_str()));
    assert_eq!(reply.headers().get("X-Echo-ce-type"), Some("audit.logged"));
    assert_eq!(reply.headers().get("X-Echo-ce-specversion"), Some("1.0"));

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_structured_json_data_round_trips() {
    let config = EndpointConfig::default()
        .with_version(CloudEventVersion::V02)
        .with_content_mode(ContentMode::Structured);

    let transport = running_transport().await;
    let consumer = transport
        .create_consumer(sink("json", "/json"), endpoint(config.clone()), echo())
        .await
        .unwrap();
    let producer = transport
        .create_producer(destination("json", consumer.local_addr(), "/json"), endpoint(config))
        .unwrap();

    let body = r#"{"order":42,"items":["a","b"]}"#;
    let message = Message::with_body(body).header("Content-Type", "application/json");
    let reply = producer.send(message).await.unwrap();

    let sent: serde_json::Value = serde_json::from_str(body).unwrap();
    let received: serde_json::Value = serde_json::from_slice(reply.body()).unwrap();
    assert_eq!(sent, received);
    assert_eq!(reply.headers().get("X-Echo-ce-specversion"), Some("0.2"));

    transport.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unrouted_destination_is_status_error() {
    let transport = running_transport().await;
    let consumer = transport
        .create_consumer(sink("a", "/a"), endpoint(EndpointConfig::default()), echo())
        .await
        .unwrap();

    let producer = transport
        .create_producer(
            destination("missing", consumer.local_addr(), "/missing"),
            endpoint(EndpointConfig::default()),
        )
        .unwrap();

    let err = producer.send(Message::with_body("x")).await.unwrap_err();
    match err {
        ProducerError::Status { status, body, .. } => {
            assert_eq!(status, 404);
            assert!(body.contains("/missing"));
        }
        other => panic!("expected status error, got {other}"),
    }

    transport.stop().await.unwrap();
}
