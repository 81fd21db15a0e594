//! Background processing: upload acceptance, job queue, workers and the ingest pipeline

mod job_queue;
mod pipeline;
mod service;
mod worker;

pub use job_queue::{JobQueue, QueueStats, INTERRUPTED};
pub use pipeline::{IngestPipeline, PipelineDeps};
pub use service::{DocumentService, UploadReceipt, UploadRequest};
pub use worker::{ShutdownReport, WorkerPool, SHUTDOWN_CANCELLED, SHUTDOWN_INTERRUPTED};
