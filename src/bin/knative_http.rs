//! knative-http: CloudEvents sink bridge
//!
//! Binds every `endpoint` service of the Knative environment on its shared
//! listener and logs each received event.
//!
//! ## Architecture
//! ```text
//! [Knative broker / channel] -> [knative-http listener] -> [log]
//! ```
//!
//! ## Configuration
//! - KNATIVE_CONFIG / --config: YAML configuration file
//! - KNATIVE_ENVIRONMENT: service catalog (path or inline JSON), unless
//!   `environment` is set in the configuration
//! - KNATIVE_LOG: tracing filter (default "info")

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use knative_http::config::Config;
use knative_http::runtime::{InstanceRegistry, TokioRuntime};
use knative_http::utils::bootstrap;
use knative_http::{
    processor_fn, EndpointConfig, KnativeEndpoint, KnativeEnvironment, KnativeHttpTransport,
    Message, ServiceType,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();

    let config_path = bootstrap::parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let environment = match &config.environment {
        Some(path) => KnativeEnvironment::from_file(path)?,
        None => KnativeEnvironment::from_env()?,
    };

    info!("Starting knative-http");

    // Publish the process runtime so the transport discovers and shares it.
    let runtimes = Arc::new(InstanceRegistry::new());
    runtimes.register(Arc::new(TokioRuntime::from_handle("main", Handle::current())));

    let transport = KnativeHttpTransport::new(config).with_runtime_registry(runtimes);
    transport.start().await?;

    let log_event = processor_fn(|message: Message| async move {
        let headers: Vec<String> = message
            .headers()
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        info!(
            id = %message.id(),
            headers = ?headers,
            body = %String::from_utf8_lossy(message.body()),
            "Received event"
        );
        Ok(Message::new())
    });

    let mut consumers = Vec::new();
    for service in environment.services() {
        if service.service_type() != ServiceType::Endpoint {
            continue;
        }
        let endpoint = KnativeEndpoint::new(
            format!("knative:endpoint/{}", service.name()),
            EndpointConfig::default(),
        );
        match transport
            .create_consumer(service.clone(), endpoint, Arc::clone(&log_event))
            .await
        {
            Ok(consumer) => {
                info!(
                    service = %service.name(),
                    address = %consumer.local_addr(),
                    route = %consumer.route(),
                    "Consumer ready"
                );
                consumers.push(consumer);
            }
            Err(e) => error!(service = %service.name(), error = %e, "Failed to start consumer"),
        }
    }

    if consumers.is_empty() {
        warn!("No endpoint services configured");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for consumer in &consumers {
        consumer.stop();
    }
    transport.stop().await?;

    Ok(())
}
