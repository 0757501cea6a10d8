//! Shared I/O runtime resolution.
//!
//! The transport runs its listeners and client on one tokio runtime, which
//! is either injected by the operator, discovered in a [`RuntimeRegistry`],
//! or created locally through a [`RuntimeFactory`]. Only a locally created
//! runtime is ever closed by the transport.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::config::RuntimeOptions;

/// Runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to build runtime: {0}")]
    Build(#[source] std::io::Error),

    #[error("Runtime '{0}' is not owned by this instance or is already closed")]
    NotOwned(String),

    #[error("Runtime close was never acknowledged")]
    AckDropped,
}

/// Acknowledgment channel for an asynchronous close.
pub type CloseAck = oneshot::Sender<Result<(), RuntimeError>>;

/// A shared I/O engine instance.
pub trait IoRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Handle used to spawn listener and client tasks.
    fn handle(&self) -> Handle;

    /// Close the runtime, reporting the outcome through `ack` once done.
    fn close(&self, ack: CloseAck);
}

/// Process-wide lookup of already-running runtimes.
pub trait RuntimeRegistry: Send + Sync {
    fn find_by_type(&self) -> Vec<Arc<dyn IoRuntime>>;
}

/// Creates locally owned runtimes.
pub trait RuntimeFactory: Send + Sync {
    fn create(&self, options: &RuntimeOptions) -> Result<Arc<dyn IoRuntime>, RuntimeError>;
}

/// Tokio-backed [`IoRuntime`].
pub struct TokioRuntime {
    name: String,
    handle: Handle,
    owned: Mutex<Option<Runtime>>,
    shutdown_timeout: Duration,
}

impl TokioRuntime {
    /// Wrap a runtime owned elsewhere. Such a runtime is never closed here.
    pub fn from_handle(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
            owned: Mutex::new(None),
            shutdown_timeout: Duration::ZERO,
        }
    }

    /// Build a new multi-threaded runtime owned by this instance.
    pub fn build(options: &RuntimeOptions) -> Result<Self, RuntimeError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name(options.thread_name.clone());
        if let Some(workers) = options.worker_threads {
            builder.worker_threads(workers);
        }
        let runtime = builder.build().map_err(RuntimeError::Build)?;
        info!(name = %options.thread_name, workers = ?options.worker_threads, "Created I/O runtime");

        Ok(Self {
            name: options.thread_name.clone(),
            handle: runtime.handle().clone(),
            owned: Mutex::new(Some(runtime)),
            shutdown_timeout: options.shutdown_timeout(),
        })
    }

    pub fn is_owned(&self) -> bool {
        self.owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl IoRuntime for TokioRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self) -> Handle {
        self.handle.clone()
    }

    fn close(&self, ack: CloseAck) {
        let runtime = self
            .owned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(runtime) = runtime else {
            let _ = ack.send(Err(RuntimeError::NotOwned(self.name.clone())));
            return;
        };

        // A runtime cannot be dropped from inside an async context, so shut
        // it down from a plain thread and acknowledge from there.
        let timeout = self.shutdown_timeout;
        let name = self.name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-shutdown", name))
            .spawn(move || {
                runtime.shutdown_timeout(timeout);
                debug!(name = %name, "I/O runtime shut down");
                let _ = ack.send(Ok(()));
            });
        if let Err(e) = spawned {
            // The closure (runtime and ack) was dropped with the failed spawn.
            error!(name = %self.name, error = %e, "Could not shut down I/O runtime");
        }
    }
}

/// Default factory building [`TokioRuntime`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRuntimeFactory;

impl RuntimeFactory for TokioRuntimeFactory {
    fn create(&self, options: &RuntimeOptions) -> Result<Arc<dyn IoRuntime>, RuntimeError> {
        Ok(Arc::new(TokioRuntime::build(options)?))
    }
}

/// Simple in-process [`RuntimeRegistry`].
#[derive(Default)]
pub struct InstanceRegistry {
    instances: Mutex<Vec<Arc<dyn IoRuntime>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, runtime: Arc<dyn IoRuntime>) {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(runtime);
    }
}

impl RuntimeRegistry for InstanceRegistry {
    fn find_by_type(&self) -> Vec<Arc<dyn IoRuntime>> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
