//! Queue worker: pulls work items and runs them one at a time.
//!
//! An item is archived to `old<queue>` before it runs. Any failure while
//! running an item, including an unknown method, is fatal: the loop stops and
//! the error is reported through the handle. Items are never retried in place.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::store::services::HashService;

use super::dispatch::{DispatchError, JobContext, MethodTable};
use super::queue::WorkQueue;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to take work: {0}")]
    Dequeue(DispatchError),

    #[error("failed to archive work from '{queue}': {source}")]
    Archive {
        queue: String,
        source: DispatchError,
    },

    #[error("job '{method}' from '{queue}' failed: {source}")]
    Job {
        queue: String,
        method: String,
        source: DispatchError,
    },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("worker thread panicked")]
    Panicked,
}

/// Per-worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub name: String,
    pub queues: Vec<String>,
    /// Upper bound on one blocking dequeue; shutdown is checked in between.
    pub dequeue_timeout: Duration,
}

impl WorkerOptions {
    pub fn new(queues: Vec<String>) -> Self {
        Self {
            name: "rowforge-worker".to_string(),
            queues,
            dequeue_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<Result<u64, WorkerError>>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop. Returns the
    /// number of items processed, or the fatal error that stopped it earlier.
    pub fn shutdown(self) -> Result<u64, WorkerError> {
        let _ = self.shutdown.send(());
        self.join()
    }

    /// Wait for the worker to stop on its own (only a fatal error does that).
    pub fn join(mut self) -> Result<u64, WorkerError> {
        match self.join.take() {
            Some(j) => j.join().map_err(|_| WorkerError::Panicked)?,
            None => Ok(0),
        }
    }
}

pub struct Worker<H> {
    queue: WorkQueue<H>,
    methods: Arc<MethodTable>,
    context: JobContext,
    config: WorkerOptions,
}

impl<H> Worker<H>
where
    H: HashService + 'static,
{
    pub fn new(
        queue: WorkQueue<H>,
        methods: Arc<MethodTable>,
        context: JobContext,
        config: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            methods,
            context,
            config,
        }
    }

    /// Take and run at most one item. `Ok(false)` when the dequeue timed out.
    pub fn run_once(&self) -> Result<bool, WorkerError> {
        let Some((queue, item)) = self
            .queue
            .dequeue(&self.config.queues, self.config.dequeue_timeout)
            .map_err(WorkerError::Dequeue)?
        else {
            return Ok(false);
        };

        debug!(worker = %self.config.name, queue = %queue, method = %item.method, "claimed work");
        self.queue
            .archive(&queue, &item)
            .map_err(|source| WorkerError::Archive {
                queue: queue.clone(),
                source,
            })?;

        self.methods
            .invoke(&self.context, &item.method, &item.params)
            .map_err(|source| WorkerError::Job {
                queue,
                method: item.method.clone(),
                source,
            })?;
        Ok(true)
    }

    /// Run until shutdown is requested or an item fails.
    pub fn run(&self, shutdown_rx: &mpsc::Receiver<()>) -> Result<u64, WorkerError> {
        info!(worker = %self.config.name, queues = ?self.config.queues, "worker started");
        let mut processed = 0u64;

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            match self.run_once() {
                Ok(true) => processed += 1,
                Ok(false) => continue,
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, processed, "worker stopping on failure");
                    return Err(e);
                }
            }
        }

        info!(worker = %self.config.name, processed, "worker stopped");
        Ok(processed)
    }

    /// Spawn the worker loop in a background thread.
    pub fn spawn(self) -> Result<WorkerHandle, WorkerError> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || self.run(&shutdown_rx))
            .map_err(|e| WorkerError::Spawn(e.to_string()))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}
