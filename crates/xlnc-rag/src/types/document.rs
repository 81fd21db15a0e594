//! Document and chunk records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Extraction family resolved from a declared MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Pdf,
    /// Binary .doc, converted before parsing
    LegacyWordProcessing,
    /// Office Open XML .docx
    ModernWordProcessing,
    /// Anything else, kept with the declared type for error reporting
    Unsupported(String),
}

impl ContentKind {
    /// Resolve from a MIME string. Parameters such as `; charset=` are ignored.
    pub fn from_mime(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            MIME_PDF => Self::Pdf,
            MIME_DOC => Self::LegacyWordProcessing,
            MIME_DOCX => Self::ModernWordProcessing,
            _ => Self::Unsupported(content_type.to_string()),
        }
    }

    /// Resolve from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "doc" => Self::LegacyWordProcessing,
            "docx" => Self::ModernWordProcessing,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Self::Pdf => MIME_PDF,
            Self::LegacyWordProcessing => MIME_DOC,
            Self::ModernWordProcessing => MIME_DOCX,
            Self::Unsupported(declared) => declared,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::LegacyWordProcessing => "doc",
            Self::ModernWordProcessing => "docx",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Lifecycle of an uploaded document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Processing,
    Completed,
    Failed,
    VirusDetected,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::VirusDetected => "virus_detected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "virus_detected" => Some(Self::VirusDetected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// An uploaded document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    /// Original filename as uploaded
    pub filename: String,
    /// Declared MIME type
    pub content_type: String,
    pub size_bytes: u64,
    /// Owner / tenant key
    pub tenant: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    /// Candidate categories supplied with the upload
    pub categories: Vec<String>,
    /// "Clean" or the detected threat name
    pub scan_result: Option<String>,
    pub chunk_count: usize,
    /// Where the uploaded bytes were written
    pub file_path: PathBuf,
    /// SHA-256 of the uploaded bytes
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        tenant: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        let title = std::path::Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&filename)
            .to_string();

        Self {
            id: Uuid::new_v4(),
            title,
            filename,
            content_type: content_type.into(),
            size_bytes,
            tenant: tenant.into(),
            status: DocumentStatus::Processing,
            error: None,
            categories: Vec::new(),
            scan_result: None,
            chunk_count: 0,
            file_path: PathBuf::new(),
            content_hash: content_hash.into(),
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn content_kind(&self) -> ContentKind {
        ContentKind::from_mime(&self.content_type)
    }

    pub fn mark_completed(&mut self, chunk_count: usize) {
        self.status = DocumentStatus::Completed;
        self.chunk_count = chunk_count;
        self.error = None;
        self.processed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = DocumentStatus::Failed;
        self.error = Some(error.into());
        self.processed_at = Some(Utc::now());
    }

    pub fn mark_virus_detected(&mut self, threat: impl Into<String>) {
        let threat = threat.into();
        self.status = DocumentStatus::VirusDetected;
        self.error = Some(format!("Virus detected: {}", threat));
        self.scan_result = Some(threat);
        self.processed_at = Some(Utc::now());
    }
}

/// A retrievable passage of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    /// Position within the document, starting at 0
    pub index: usize,
    /// Byte offset of the first covered character in the extracted text
    pub start: usize,
    /// Byte offset one past the last covered character
    pub end: usize,
    pub category: Option<String>,
    pub keywords: Vec<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
    /// Vector-store point id, assigned once after the vector is stored
    pub vector_id: Option<String>,
}

impl Chunk {
    pub fn new(document_id: Uuid, content: String, index: usize, start: usize, end: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            content,
            index,
            start,
            end,
            category: None,
            keywords: Vec::new(),
            embedding: Vec::new(),
            vector_id: None,
        }
    }

    /// Record the vector-store id. A chunk is stored at most once.
    pub fn assign_vector_id(&mut self, id: impl Into<String>) -> Result<()> {
        if let Some(existing) = &self.vector_id {
            return Err(Error::InvalidTransition(format!(
                "chunk {} already stored as vector {}",
                self.index, existing
            )));
        }
        self.vector_id = Some(id.into());
        Ok(())
    }
}
