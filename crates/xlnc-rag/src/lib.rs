//! xlnc-rag: knowledge-base ingestion and retrieval-augmented answering
//!
//! Uploaded PDF and Word documents are scanned by ClamAV, converted to text,
//! split into categorized chunks, embedded and stored in a vector database.
//! Questions are answered from a tenant's passages with an LLM, falling back
//! to ungrounded and canned answers when retrieval or generation comes up empty.

pub mod alerts;
pub mod analytics;
pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod security;
pub mod state;
pub mod storage;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::RagEngine;
pub use processing::{DocumentService, UploadReceipt, UploadRequest};
pub use state::{AppState, Providers};
pub use types::{
    Alert, ChatResponse, Chunk, Document, DocumentStatus, Job, JobStatus, Metadata, MetadataValue,
    ResponseSource,
};
