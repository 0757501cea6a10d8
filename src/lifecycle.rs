//! Dedicated single-thread context for start/stop work.
//!
//! Blocking waits during shutdown run here, never on an I/O runtime worker.

use std::sync::mpsc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::debug;

/// Default name of the lifecycle thread.
pub const LIFECYCLE_THREAD_NAME: &str = "knative-http-lifecycle";

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Lifecycle executor errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to spawn lifecycle thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Lifecycle executor is shut down")]
    Closed,
}

/// Runs submitted jobs in order on one owned OS thread.
pub struct LifecycleExecutor {
    sender: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl LifecycleExecutor {
    pub fn spawn(name: &str) -> Result<Self, LifecycleError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                debug!(thread = %thread_name, "Lifecycle thread exiting");
            })?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    /// Queue `job`; the receiver resolves with its result.
    pub fn submit<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>, LifecycleError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let sender = self.sender.as_ref().ok_or(LifecycleError::Closed)?;
        sender
            .send(Box::new(move || {
                let _ = tx.send(job());
            }))
            .map_err(|_| LifecycleError::Closed)?;
        Ok(rx)
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LifecycleExecutor {
    fn drop(&mut self) {
        // Closing the channel ends the thread once its queue drains.
        self.sender.take();
    }
}
