//! Transport lifecycle.
//!
//! ```text
//! Stopped ──start()──→ Starting ──→ Running ──stop()──→ Stopping ──→ Stopped
//!                          │
//!                          └── configuration error ──→ Stopped
//! ```
//!
//! While running, the transport owns the listener registry, the outbound
//! client and a reference to the shared I/O runtime. Producers and consumers
//! can only be created in `Running`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigError};
use crate::consumer::{KnativeHttpConsumer, Processor};
use crate::endpoint::KnativeEndpoint;
use crate::environment::ServiceDefinition;
use crate::lifecycle::{LifecycleError, LifecycleExecutor, LIFECYCLE_THREAD_NAME};
use crate::listener::DispatchError;
use crate::producer::KnativeHttpProducer;
use crate::registry::ListenerRegistry;
use crate::runtime::{
    IoRuntime, RuntimeError, RuntimeFactory, RuntimeRegistry, TokioRuntimeFactory,
};

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Ambiguous runtime discovery: {0} candidates registered")]
    AmbiguousRuntime(usize),

    #[error("Transport is {0}, expected {1}")]
    InvalidState(TransportState, TransportState),

    #[error("Transport is not running (state: {0})")]
    NotRunning(TransportState),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Lifecycle executor error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Listener error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Stopped => "stopped",
            TransportState::Starting => "starting",
            TransportState::Running => "running",
            TransportState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Resources held while running.
struct Active {
    runtime: Arc<dyn IoRuntime>,
    locally_owned: bool,
    executor: LifecycleExecutor,
    registry: Arc<ListenerRegistry>,
    client: reqwest::Client,
}

struct Inner {
    state: TransportState,
    active: Option<Active>,
}

/// HTTP transport for Knative event producers and consumers.
pub struct KnativeHttpTransport {
    config: Config,
    runtime: Option<Arc<dyn IoRuntime>>,
    runtime_registry: Option<Arc<dyn RuntimeRegistry>>,
    runtime_factory: Arc<dyn RuntimeFactory>,
    inner: Mutex<Inner>,
}

impl KnativeHttpTransport {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runtime: None,
            runtime_registry: None,
            runtime_factory: Arc::new(TokioRuntimeFactory),
            inner: Mutex::new(Inner {
                state: TransportState::Stopped,
                active: None,
            }),
        }
    }

    /// Use an operator-supplied runtime. It is never closed by the transport.
    pub fn with_runtime(mut self, runtime: Arc<dyn IoRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Registry searched for an already-running runtime.
    pub fn with_runtime_registry(mut self, registry: Arc<dyn RuntimeRegistry>) -> Self {
        self.runtime_registry = Some(registry);
        self
    }

    /// Factory used when no runtime is configured or discovered.
    pub fn with_runtime_factory(mut self, factory: Arc<dyn RuntimeFactory>) -> Self {
        self.runtime_factory = factory;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TransportState {
        self.lock().state
    }

    /// Whether the current runtime was created by this transport.
    pub fn owns_runtime(&self) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|active| active.locally_owned)
    }

    /// Handle of the runtime in use, while running.
    pub fn runtime_handle(&self) -> Option<Handle> {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.runtime.handle())
    }

    /// Number of bound shared listeners.
    pub fn listener_count(&self) -> usize {
        self.lock()
            .active
            .as_ref()
            .map_or(0, |active| active.registry.len())
    }

    /// Resolve the runtime: configured, then discovered, then created.
    fn resolve_runtime(&self) -> Result<(Arc<dyn IoRuntime>, bool), TransportError> {
        if let Some(runtime) = &self.runtime {
            info!(runtime = %runtime.name(), "Using configured I/O runtime");
            return Ok((Arc::clone(runtime), false));
        }

        if let Some(registry) = &self.runtime_registry {
            let mut candidates = registry.find_by_type();
            match candidates.len() {
                1 => {
                    let runtime = candidates.remove(0);
                    info!(runtime = %runtime.name(), "Using discovered I/O runtime");
                    return Ok((runtime, false));
                }
                0 => debug!("No I/O runtime registered"),
                n if self.config.runtime.strict_discovery => {
                    return Err(TransportError::AmbiguousRuntime(n));
                }
                n => warn!(
                    candidates = n,
                    "Several I/O runtimes registered, creating a dedicated one"
                ),
            }
        }

        let runtime = self.runtime_factory.create(&self.config.runtime)?;
        info!(runtime = %runtime.name(), "Created local I/O runtime");
        Ok((runtime, true))
    }

    fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let options = &self.config.client;
        reqwest::Client::builder()
            .timeout(options.timeout())
            .connect_timeout(options.connect_timeout())
            .pool_max_idle_per_host(options.pool_idle_per_host)
            .build()
    }

    /// Transition `Stopped → Running`.
    ///
    /// Configuration errors leave the transport `Stopped`.
    pub async fn start(&self) -> Result<(), TransportError> {
        {
            let mut inner = self.lock();
            if inner.state != TransportState::Stopped {
                return Err(TransportError::InvalidState(
                    inner.state,
                    TransportState::Stopped,
                ));
            }
            inner.state = TransportState::Starting;
        }
        info!("Starting transport");

        match self.activate() {
            Ok(active) => {
                let mut inner = self.lock();
                inner.active = Some(active);
                inner.state = TransportState::Running;
                info!("Transport running");
                Ok(())
            }
            Err(e) => {
                self.lock().state = TransportState::Stopped;
                warn!(error = %e, "Transport failed to start");
                Err(e)
            }
        }
    }

    fn activate(&self) -> Result<Active, TransportError> {
        self.config.validate()?;
        let executor = LifecycleExecutor::spawn(LIFECYCLE_THREAD_NAME)?;
        let (runtime, locally_owned) = self.resolve_runtime()?;

        let client = match self.build_client() {
            Ok(client) => client,
            Err(e) => {
                if locally_owned {
                    Self::release_runtime(&executor, runtime);
                }
                return Err(e.into());
            }
        };

        let registry = Arc::new(ListenerRegistry::new(
            runtime.handle(),
            self.config.server.clone(),
        ));

        Ok(Active {
            runtime,
            locally_owned,
            executor,
            registry,
            client,
        })
    }

    /// Close a locally owned runtime on the lifecycle thread, blocking that
    /// thread until the close is acknowledged.
    fn release_runtime(
        executor: &LifecycleExecutor,
        runtime: Arc<dyn IoRuntime>,
    ) -> Option<tokio::sync::oneshot::Receiver<()>> {
        let job = move || {
            let (ack, done) = tokio::sync::oneshot::channel();
            runtime.close(ack);
            match done.blocking_recv() {
                Ok(Ok(())) => info!(runtime = %runtime.name(), "I/O runtime closed"),
                Ok(Err(e)) => warn!(runtime = %runtime.name(), error = %e, "I/O runtime close failed"),
                Err(_) => warn!(
                    runtime = %runtime.name(),
                    error = %RuntimeError::AckDropped,
                    "I/O runtime close failed"
                ),
            }
        };
        match executor.submit(job) {
            Ok(done) => Some(done),
            Err(e) => {
                warn!(error = %e, "Could not schedule I/O runtime close");
                None
            }
        }
    }

    /// Transition `Running → Stopped`.
    ///
    /// Only a locally created runtime is closed. Close failures are logged and
    /// the runtime reference is released either way.
    pub async fn stop(&self) -> Result<(), TransportError> {
        let active = {
            let mut inner = self.lock();
            if inner.state != TransportState::Running {
                return Err(TransportError::InvalidState(
                    inner.state,
                    TransportState::Running,
                ));
            }
            inner.state = TransportState::Stopping;
            inner.active.take()
        };
        info!("Stopping transport");

        if let Some(active) = active {
            let Active {
                runtime,
                locally_owned,
                executor,
                registry,
                client,
            } = active;

            registry.close_all();
            drop(registry);
            drop(client);

            if locally_owned {
                if let Some(done) = Self::release_runtime(&executor, runtime) {
                    let _ = done.await;
                }
            } else {
                debug!(runtime = %runtime.name(), "Leaving shared I/O runtime open");
                drop(runtime);
            }
            // Joining is immediate: the close job, if any, has completed.
            executor.shutdown();
        }

        self.lock().state = TransportState::Stopped;
        info!("Transport stopped");
        Ok(())
    }

    fn running(&self) -> Result<(Arc<ListenerRegistry>, reqwest::Client, Handle), TransportError> {
        let inner = self.lock();
        match (&inner.state, &inner.active) {
            (TransportState::Running, Some(active)) => Ok((
                Arc::clone(&active.registry),
                active.client.clone(),
                active.runtime.handle(),
            )),
            (state, _) => Err(TransportError::NotRunning(*state)),
        }
    }

    /// Create a producer sending to `service`.
    pub fn create_producer(
        &self,
        service: ServiceDefinition,
        endpoint: KnativeEndpoint,
    ) -> Result<KnativeHttpProducer, TransportError> {
        let (_, client, handle) = self.running()?;
        debug!(service = %service.name(), url = %service.url(), "Creating producer");
        Ok(KnativeHttpProducer::new(
            client,
            handle,
            service,
            endpoint,
            self.config.cloud_event.time_zone,
        ))
    }

    /// Create a consumer for `service` and register it on its shared listener.
    pub async fn create_consumer(
        &self,
        service: ServiceDefinition,
        endpoint: KnativeEndpoint,
        processor: Arc<dyn Processor>,
    ) -> Result<KnativeHttpConsumer, TransportError> {
        let (registry, _, _) = self.running()?;
        let dispatcher = registry.get_or_create(&service.listener_key()).await?;
        // Stop may have begun while the listener was being bound.
        let state = self.state();
        if state != TransportState::Running {
            return Err(TransportError::NotRunning(state));
        }
        Ok(KnativeHttpConsumer::register(
            dispatcher, service, &endpoint, processor,
        )?)
    }
}

impl Drop for KnativeHttpTransport {
    fn drop(&mut self) {
        let active = self
            .inner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .active
            .take();
        if let Some(active) = active {
            warn!("Transport dropped while running");
            active.registry.close_all();
            if active.locally_owned {
                // Not awaited; the lifecycle thread drains the close job before exiting.
                let _ = Self::release_runtime(&active.executor, active.runtime);
            }
        }
    }
}
