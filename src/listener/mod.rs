//! Shared HTTP listeners.
//!
//! Many logical consumers share one physical listener per [`ListenerKey`].
//! Each listener owns a [`Dispatcher`] that routes inbound requests to the
//! consumer registered for the request's host and path.
//!
//! ```text
//! [HTTP request] ──→ [Dispatcher (host:port)] ──→ route lookup ──→ [RequestHandler]
//!                          │                                           │
//!                          └──────── HTTP response ←── reply Message ──┘
//! ```

mod dispatcher;
mod routes;

pub use dispatcher::Dispatcher;
pub(crate) use routes::RouteTable;

use std::fmt;

use axum::http::StatusCode;
use futures::future::BoxFuture;

use crate::cloudevents::DecodeError;
use crate::message::Message;

/// Identity of one physical listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    host: String,
    port: u16,
    protocol: String,
}

impl ListenerKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: "http".to_string(),
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// Request-matching predicate for a registered consumer.
///
/// A route without a host matches requests for any host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    host: Option<String>,
    path: String,
}

/// Normalize a path: leading `/`, no trailing `/` except for the root.
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

impl Route {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            host: None,
            path: normalize_path(path.as_ref()),
        }
    }

    /// Restrict the route to one request host (port suffixes are ignored).
    pub fn with_host(mut self, host: impl AsRef<str>) -> Self {
        self.host = Some(strip_port(host.as_ref()).to_ascii_lowercase());
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.host.as_deref().unwrap_or("*"), self.path)
    }
}

/// Strip a `:port` suffix from a host, leaving IPv6 literals intact.
pub(crate) fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Failure reported by a consumer while handling one request.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Failed to decode CloudEvent: {0}")]
    Decode(#[from] DecodeError),

    #[error("Processing failed: {0}")]
    Processing(String),
}

impl HandlerError {
    /// HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::Decode(_) => StatusCode::BAD_REQUEST,
            HandlerError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Consumer-side handler invoked for each matched request.
pub trait RequestHandler: Send + Sync {
    /// Handle a request message, producing the reply message.
    fn handle(&self, request: Message) -> BoxFuture<'static, Result<Message, HandlerError>>;
}

/// Errors raised by listener creation and route registration.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Cannot resolve listener address {0}")]
    Resolve(ListenerKey),

    #[error("Failed to bind listener {key}: {source}")]
    Bind {
        key: ListenerKey,
        #[source]
        source: std::io::Error,
    },

    #[error("Route {route} is already registered on {key}")]
    RouteConflict { key: ListenerKey, route: Route },

    #[error("Listener {0} is closed")]
    Closed(ListenerKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("events/"), "/events");
        assert_eq!(normalize_path("/a/b//"), "/a/b");
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:8080"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[::1]:80"), "[::1]");
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::new("/a").to_string(), "*/a");
        assert_eq!(
            Route::new("/a").with_host("Example.COM:80").to_string(),
            "example.com/a"
        );
    }

    #[test]
    fn test_listener_key_identity() {
        let a = ListenerKey::new("0.0.0.0", 8080);
        let b = ListenerKey::new("0.0.0.0", 8080);
        let c = ListenerKey::new("0.0.0.0", 8081);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, a.clone().with_protocol("https"));
        assert_eq!(a.to_string(), "http://0.0.0.0:8080");
    }

    #[test]
    fn test_handler_error_status() {
        let decode = HandlerError::Decode(DecodeError::NotAnObject("an array"));
        assert_eq!(decode.status(), StatusCode::BAD_REQUEST);
        let processing = HandlerError::Processing("boom".to_string());
        assert_eq!(processing.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
