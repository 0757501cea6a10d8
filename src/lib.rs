//! knative-http - shared HTTP listeners and CloudEvents binding
//!
//! Lets many logical event consumers share a few physical HTTP listeners,
//! and converts between CloudEvents (binary and structured content modes,
//! versions 0.1 to 1.0) and a header + body message model.
//!
//! ```text
//! producer.send ──→ [codec encode] ──→ HTTP POST ──→ remote service
//!
//! HTTP request ──→ [Dispatcher (host:port)] ──→ route ──→ [codec decode] ──→ Processor
//!                                                                               │
//! HTTP response ←──────────────────────────────────────────── reply Message ────┘
//! ```

pub mod cloudevents;
pub mod config;
pub mod consumer;
pub mod endpoint;
pub mod environment;
pub mod lifecycle;
pub mod listener;
pub mod message;
pub mod producer;
pub mod registry;
pub mod runtime;
pub mod transport;
pub mod utils;

pub use consumer::{processor_fn, KnativeHttpConsumer, Processor};
pub use endpoint::{ContentMode, EndpointConfig, KnativeEndpoint};
pub use environment::{KnativeEnvironment, ServiceDefinition, ServiceType};
pub use message::{Headers, Message};
pub use producer::{KnativeHttpProducer, ProducerError};
pub use transport::{KnativeHttpTransport, TransportError, TransportState};
