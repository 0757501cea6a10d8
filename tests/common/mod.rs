//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::Handle;

use knative_http::config::Config;
use knative_http::runtime::TokioRuntime;
use knative_http::{
    processor_fn, EndpointConfig, KnativeEndpoint, KnativeHttpTransport, Message, Processor,
    ServiceDefinition, ServiceType,
};

/// Loopback host used for every listener.
pub const HOST: &str = "127.0.0.1";

/// Start a transport sharing the test runtime.
pub async fn running_transport() -> KnativeHttpTransport {
    let transport = KnativeHttpTransport::new(Config::for_test()).with_runtime(Arc::new(
        TokioRuntime::from_handle("test", Handle::current()),
    ));
    transport.start().await.expect("transport should start");
    transport
}

/// Endpoint service on an ephemeral loopback port.
pub fn sink(name: &str, path: &str) -> ServiceDefinition {
    ServiceDefinition::new(ServiceType::Endpoint, name, HOST, 0).with_path(path)
}

/// Destination service pointing at an already bound listener.
pub fn destination(name: &str, addr: SocketAddr, path: &str) -> ServiceDefinition {
    ServiceDefinition::new(ServiceType::Endpoint, name, HOST, addr.port()).with_path(path)
}

pub fn endpoint(config: EndpointConfig) -> KnativeEndpoint {
    KnativeEndpoint::new("knative:endpoint/test", config)
}

/// Replies with the request body and every request header echoed as `X-Echo-<name>`.
pub fn echo() -> Arc<dyn Processor> {
    processor_fn(|request: Message| async move {
        let mut reply = Message::with_body(request.body().clone());
        for (name, value) in request.headers().iter() {
            reply
                .headers_mut()
                .insert(format!("X-Echo-{}", name), value);
        }
        Ok(reply)
    })
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}
