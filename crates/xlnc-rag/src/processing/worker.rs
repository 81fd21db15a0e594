//! Worker pool draining the job queue

use dashmap::DashSet;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::Result;

use super::job_queue::JobQueue;
use super::pipeline::IngestPipeline;

/// Error recorded on jobs still running when the grace period ends
pub const SHUTDOWN_INTERRUPTED: &str = "Processing interrupted by shutdown";
/// Error recorded on queued jobs that never started
pub const SHUTDOWN_CANCELLED: &str = "Cancelled by shutdown before processing";

/// What shutdown did with outstanding work
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// In-flight jobs aborted after the grace period
    pub interrupted: usize,
    /// Queued jobs cancelled before they started
    pub cancelled: usize,
}

/// Fixed set of workers sharing one receiver
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    in_flight: Arc<DashSet<Uuid>>,
    queue: Arc<JobQueue>,
    pipeline: Arc<IngestPipeline>,
}

impl WorkerPool {
    /// Spawn `workers` tasks. Each document gets at most `file_timeout`.
    pub fn start(
        workers: usize,
        receiver: mpsc::Receiver<Uuid>,
        queue: Arc<JobQueue>,
        pipeline: Arc<IngestPipeline>,
        file_timeout: Duration,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(Mutex::new(receiver));
        let in_flight = Arc::new(DashSet::new());

        tracing::info!(
            "Starting {} workers (file timeout: {}s)",
            workers,
            file_timeout.as_secs()
        );

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    receiver: receiver.clone(),
                    shutdown: shutdown_rx.clone(),
                    in_flight: in_flight.clone(),
                    queue: queue.clone(),
                    pipeline: pipeline.clone(),
                    file_timeout,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            handles,
            shutdown,
            receiver,
            in_flight,
            queue,
            pipeline,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Jobs currently being processed
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop taking work, give in-flight jobs `grace` to finish, then abort
    /// the rest and cancel whatever is still queued.
    pub async fn shutdown(mut self, grace: Duration) -> Result<ShutdownReport> {
        self.queue.close();
        let _ = self.shutdown.send(true);

        let finished = timeout(grace, join_all(self.handles.iter_mut())).await.is_ok();
        if !finished {
            tracing::warn!(
                "{} jobs still running after {}s grace period, aborting",
                self.in_flight.len(),
                grace.as_secs()
            );
            for handle in &self.handles {
                handle.abort();
            }
            join_all(self.handles.iter_mut().filter(|h| !h.is_finished())).await;
        }

        let mut report = ShutdownReport::default();

        let interrupted: Vec<Uuid> = self.in_flight.iter().map(|id| *id).collect();
        for job_id in interrupted {
            if self.pipeline.interrupt(job_id, SHUTDOWN_INTERRUPTED).await? {
                report.interrupted += 1;
            }
            self.in_flight.remove(&job_id);
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(job_id) = receiver.try_recv() {
            self.queue.dequeued();
            if self.pipeline.cancel(job_id, SHUTDOWN_CANCELLED)? {
                report.cancelled += 1;
            }
        }

        tracing::info!(
            "Worker pool stopped ({} interrupted, {} cancelled)",
            report.interrupted,
            report.cancelled
        );
        Ok(report)
    }
}

struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    shutdown: watch::Receiver<bool>,
    in_flight: Arc<DashSet<Uuid>>,
    queue: Arc<JobQueue>,
    pipeline: Arc<IngestPipeline>,
    file_timeout: Duration,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!("Worker {} started", self.id);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let receiver = &self.receiver;
            let shutdown = &mut self.shutdown;
            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job_id = async { receiver.lock().await.recv().await } => job_id,
            };
            let Some(job_id) = next else {
                break;
            };

            self.queue.dequeued();
            self.in_flight.insert(job_id);
            self.process(job_id).await;
            self.in_flight.remove(&job_id);
        }

        tracing::debug!("Worker {} stopped", self.id);
    }

    async fn process(&self, job_id: Uuid) {
        match timeout(self.file_timeout, self.pipeline.process(job_id)).await {
            Ok(Ok(status)) => {
                tracing::debug!("Worker {}: job {} finished {}", self.id, job_id, status.as_str());
            }
            Ok(Err(e)) => {
                tracing::error!("Worker {}: job {} could not be processed: {}", self.id, job_id, e);
            }
            Err(_) => {
                let reason = format!(
                    "Processing timed out after {}s",
                    self.file_timeout.as_secs()
                );
                if let Err(e) = self.pipeline.interrupt(job_id, &reason).await {
                    tracing::error!("Worker {}: failed to record timeout for job {}: {}", self.id, job_id, e);
                }
            }
        }
    }
}
