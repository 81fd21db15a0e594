//! Error types for ingestion and retrieval

use thiserror::Error;

/// Result type alias for knowledge-base operations
pub type Result<T> = std::result::Result<T, Error>;

/// Knowledge-base errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upload rejected before any job was created
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Scanner reported the content as not clean
    #[error("Virus detected: {0}")]
    VirusDetected(String),

    /// The scanning daemon could not be reached or did not answer in time
    #[error("Malware scanner unavailable: {0}")]
    ScannerUnavailable(String),

    /// No extractor exists for the declared content type
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Every extraction strategy for the content type failed
    #[error("Failed to extract text from {kind}: {message}")]
    ExtractionFailed { kind: String, message: String },

    /// Extraction succeeded but produced only whitespace
    #[error("No text content could be extracted from the document")]
    NoContentExtracted,

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Vector database error
    #[error("Vector database error: {0}")]
    VectorStore(String),

    /// LLM error
    #[error("LLM error: {0}")]
    Llm(String),

    /// An external call exceeded its deadline
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Illegal job or document state change
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record store error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an extraction error
    pub fn extraction(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create a vector store error
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore(message.into())
    }

    /// Create an LLM error
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm(message.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the error means the file itself was rejected as unsafe
    pub fn is_security_rejection(&self) -> bool {
        matches!(self, Self::VirusDetected(_) | Self::ScannerUnavailable(_))
    }
}
