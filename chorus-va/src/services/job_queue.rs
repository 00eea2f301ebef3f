//! Job queue and worker pool
//!
//! Jobs carry only ids; the database row is the source of truth. A job left
//! in the channel at shutdown stays PENDING in the store and is re-enqueued
//! by startup recovery.
//!
//! Enqueueing never blocks the caller. When the channel is full the job is
//! handed to a forwarding task that waits for room.

use async_trait::async_trait;
use chorus_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unit of work for the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Isolate and extract a reference feature set
    PrepareReference(Uuid),
    /// Run the analysis pipeline for one attempt
    Analyze(Uuid),
}

/// Something that processes jobs
///
/// Handlers record their own outcome in the store; a job has no return value.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job, cancel: &CancellationToken);
}

/// Producer side of the queue
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Enqueue a job without waiting for room in the channel
    ///
    /// Fails only once the pool has shut down.
    pub fn enqueue(&self, job: Job) -> Result<()> {
        match self.tx.try_send(job) {
            Ok(()) => {
                debug!(?job, "Job enqueued");
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                debug!(?job, "Job queue full, deferring enqueue");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(job).await.is_err() {
                        // Row stays PENDING; startup recovery picks it up
                        warn!(?job, "Job queue closed before deferred job was enqueued");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::Internal("Job queue is closed".to_string())),
        }
    }
}

/// Fixed set of workers draining the queue
pub struct WorkerPool {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers reading from a queue of `capacity` jobs
    pub fn start(
        worker_count: usize,
        capacity: usize,
        handler: Arc<dyn JobHandler>,
    ) -> (JobQueue, WorkerPool) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, rx, handler, cancel).await;
                })
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), capacity, "Worker pool started");

        (JobQueue { tx }, WorkerPool { cancel, workers })
    }

    /// Token cancelled by `shutdown`
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new jobs and wait for in-flight jobs to return
    pub async fn shutdown(self) {
        info!("Shutting down worker pool");
        self.cancel.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    handler: Arc<dyn JobHandler>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        let Some(job) = job else {
            debug!(worker_id, "Worker exiting");
            break;
        };

        debug!(worker_id, ?job, "Worker picked up job");
        handler.handle(job, &cancel).await;
    }
}
