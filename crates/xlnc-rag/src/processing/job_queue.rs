//! Bounded job queue backed by the record store

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::RecordStore;
use crate::types::{Job, JobStatus};

/// Error recorded on jobs a previous process left running
pub const INTERRUPTED: &str = "Processing interrupted before completion";

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Tickets waiting in the channel
    pub queued: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Job queue: persists jobs, then hands their ids to the workers
pub struct JobQueue {
    sender: mpsc::Sender<Uuid>,
    store: RecordStore,
    /// Tickets sent but not yet taken by a worker
    queued: AtomicUsize,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` tickets.
    /// The receiver goes to the worker pool.
    pub fn new(capacity: usize, store: RecordStore) -> (Self, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let queue = Self {
            sender,
            store,
            queued: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        (queue, receiver)
    }

    /// Persist a new job and enqueue it. Waits while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<Uuid> {
        if self.is_closed() {
            return Err(Error::internal("Job queue is shut down"));
        }
        self.store.insert_job(&job)?;
        self.enqueue(job.id).await?;
        tracing::debug!("Job {} queued for document {}", job.id, job.document_id);
        Ok(job.id)
    }

    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job_id).await.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::internal("Job queue receiver dropped"));
        }
        Ok(())
    }

    /// A worker took a ticket off the channel
    pub(crate) fn dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Refuse further submissions
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of tickets waiting for a worker
    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> Result<QueueStats> {
        let counts = self.store.job_stats()?;
        Ok(QueueStats {
            queued: self.queue_size(),
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
        })
    }

    /// Fail jobs an earlier process left in Processing, along with their documents
    pub fn fail_stale_jobs(&self) -> Result<usize> {
        let stale = self.store.jobs_with_status(JobStatus::Processing)?;
        for mut job in stale.iter().cloned() {
            job.fail(INTERRUPTED)?;
            self.store.update_job(&job)?;

            if let Some(mut doc) = self.store.get_document(job.document_id)? {
                if !doc.status.is_terminal() {
                    doc.mark_failed(INTERRUPTED);
                    self.store.update_document(&doc)?;
                }
            }
            tracing::warn!("Job {} was interrupted, marked failed", job.id);
        }
        Ok(stale.len())
    }

    /// Re-send tickets for jobs still Pending in the store.
    ///
    /// Run after the workers are started; a full channel makes this wait.
    pub async fn requeue_pending(&self) -> Result<usize> {
        let pending = self.store.jobs_with_status(JobStatus::Pending)?;
        for job in &pending {
            self.enqueue(job.id).await?;
        }
        if !pending.is_empty() {
            tracing::info!("Requeued {} pending jobs", pending.len());
        }
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::MIME_PDF;
    use crate::types::{Document, DocumentStatus, JobKind, Metadata};

    fn seeded() -> (RecordStore, Document) {
        let store = RecordStore::in_memory().unwrap();
        let doc = Document::new("a.pdf", MIME_PDF, 10, "t1", "hash");
        store.insert_document(&doc).unwrap();
        (store, doc)
    }

    #[tokio::test]
    async fn test_submit_persists_and_sends() {
        let (store, doc) = seeded();
        let (queue, mut rx) = JobQueue::new(4, store.clone());

        let job = Job::new(JobKind::DocumentProcessing, doc.id, Metadata::new());
        let id = queue.submit(job).await.unwrap();

        assert_eq!(queue.queue_size(), 1);
        assert_eq!(rx.recv().await, Some(id));
        queue.dequeued();
        assert_eq!(queue.queue_size(), 0);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_closed_queue_rejects() {
        let (store, doc) = seeded();
        let (queue, _rx) = JobQueue::new(4, store.clone());
        queue.close();

        let job = Job::new(JobKind::DocumentProcessing, doc.id, Metadata::new());
        assert!(queue.submit(job).await.is_err());
        assert_eq!(store.job_stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn test_fail_stale_and_requeue() {
        let (store, doc) = seeded();
        let (queue, mut rx) = JobQueue::new(4, store.clone());

        let mut running = Job::new(JobKind::DocumentProcessing, doc.id, Metadata::new());
        running.transition(JobStatus::Processing).unwrap();
        store.insert_job(&running).unwrap();
        let waiting = Job::new(JobKind::DocumentProcessing, doc.id, Metadata::new());
        store.insert_job(&waiting).unwrap();

        assert_eq!(queue.fail_stale_jobs().unwrap(), 1);
        let failed = store.get_job(running.id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(INTERRUPTED));
        assert_eq!(
            store.get_document(doc.id).unwrap().unwrap().status,
            DocumentStatus::Failed
        );

        assert_eq!(queue.requeue_pending().await.unwrap(), 1);
        assert_eq!(rx.recv().await, Some(waiting.id));
    }
}
