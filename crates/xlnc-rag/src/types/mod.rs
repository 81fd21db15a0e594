//! Core types for ingestion and retrieval

pub mod alert;
pub mod document;
pub mod job;
pub mod metadata;
pub mod response;

pub use alert::{Alert, AlertSeverity, AlertType};
pub use document::{Chunk, ContentKind, Document, DocumentStatus};
pub use job::{Job, JobKind, JobStatus, ProcessingStage};
pub use metadata::{Metadata, MetadataValue};
pub use response::{ChatResponse, QuickAction, ResponseSource};
