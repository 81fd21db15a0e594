//! Configuration for ingestion, scanning and retrieval

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Malware scanner configuration
    pub scanner: ScannerConfig,
    /// Upload validation and storage
    pub upload: UploadConfig,
    /// Text extraction
    pub extraction: ExtractionConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Answer generation
    pub generation: GenerationConfig,
    /// Vector database configuration
    pub vector_db: VectorDbConfig,
    /// Processing configuration
    pub processing: ProcessingConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Load from an optional file, apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override endpoints from `XLNC_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("XLNC_OLLAMA_URL") {
            self.llm.base_url = url;
        }
        if let Ok(url) = std::env::var("XLNC_QDRANT_URL") {
            self.vector_db.url = url;
            self.vector_db.backend = VectorBackend::Qdrant;
        }
        if let Ok(key) = std::env::var("XLNC_QDRANT_API_KEY") {
            self.vector_db.api_key = Some(key);
        }
        if let Ok(host) = std::env::var("XLNC_CLAMAV_HOST") {
            self.scanner.host = host;
        }
        if let Ok(port) = std::env::var("XLNC_CLAMAV_PORT") {
            self.scanner.port = port
                .parse()
                .map_err(|_| Error::Config(format!("XLNC_CLAMAV_PORT is not a port: {}", port)))?;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::Config("chunking.chunk_size must be positive".into()));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::Config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            )));
        }
        if self.embeddings.dimensions == 0 {
            return Err(Error::Config("embeddings.dimensions must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.generation.similarity_threshold) {
            return Err(Error::Config(
                "generation.similarity_threshold must be within [0, 1]".into(),
            ));
        }
        if self.generation.max_context_chunks == 0 || self.generation.max_search_results == 0 {
            return Err(Error::Config(
                "generation.max_search_results and max_context_chunks must be positive".into(),
            ));
        }
        if self.processing.workers == Some(0) {
            return Err(Error::Config("processing.workers must be at least 1".into()));
        }
        if self.scanner.stream_chunk_size == 0 {
            return Err(Error::Config("scanner.stream_chunk_size must be positive".into()));
        }
        Ok(())
    }
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xlnc-rag")
}

/// ClamAV daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// When false every file is reported clean without contacting the daemon
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Deadline for a whole scan exchange
    pub timeout_secs: u64,
    /// Deadline for the availability probe
    pub ping_timeout_secs: u64,
    /// Payload bytes per INSTREAM frame
    pub stream_chunk_size: usize,
    /// Move infected uploads aside instead of leaving them in the upload dir
    pub quarantine_infected_files: bool,
    pub quarantine_dir: PathBuf,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_string(),
            port: 3310,
            timeout_secs: 30,
            ping_timeout_secs: 5,
            stream_chunk_size: 2048,
            quarantine_infected_files: true,
            quarantine_dir: data_dir().join("quarantine"),
        }
    }
}

/// Upload validation and storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub upload_dir: PathBuf,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_file_size: u64,
    /// Lower-case extensions without the dot
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: data_dir().join("uploads"),
            max_file_size: 100 * 1024 * 1024,
            allowed_extensions: vec!["pdf".into(), "doc".into(), "docx".into()],
        }
    }
}

/// Text extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Deadline for the primary PDF extractor before falling back
    pub pdf_timeout_secs: u64,
    /// LibreOffice executable used to convert legacy .doc files
    pub libreoffice_bin: String,
    pub conversion_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            pdf_timeout_secs: 60,
            libreoffice_bin: "soffice".to_string(),
            conversion_timeout_secs: 120,
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,
    /// Overlap between chunks in characters
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Must match the vector collection size
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Generation model name
    pub generate_model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Retries for failed generation requests. Embeddings are never retried.
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            timeout_secs: 120,
            max_retries: 1,
        }
    }
}

/// Answer generation and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub max_search_results: usize,
    pub similarity_threshold: f32,
    pub max_context_chunks: usize,
    /// Deadline for each embedding, search and generation call
    pub request_timeout_secs: u64,
    /// Organization the assistant speaks for
    pub company_name: String,
    /// Service lines mentioned in ungrounded answers
    pub services: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            top_p: 1.0,
            max_search_results: 10,
            similarity_threshold: 0.7,
            max_context_chunks: 5,
            request_timeout_secs: 30,
            company_name: "XLNC Technologies".to_string(),
            services: vec![
                "Custom software development".to_string(),
                "AI and machine learning solutions".to_string(),
                "Cloud migration and infrastructure".to_string(),
                "Digital transformation consulting".to_string(),
                "Mobile and web application development".to_string(),
            ],
        }
    }
}

/// Vector store backend
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Process-local brute-force store
    #[default]
    Memory,
    /// Qdrant over its REST API
    Qdrant,
}

/// Vector database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    pub backend: VectorBackend,
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "knowledge_base".to_string(),
        }
    }
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Concurrent document workers (default: CPU count, max 4)
    pub workers: Option<usize>,
    /// Pending jobs the queue holds before `submit` waits
    pub queue_capacity: usize,
    /// Concurrent embedding requests per document (default: CPU count, max 4)
    pub parallel_embeddings: Option<usize>,
    /// Timeout for processing a single document in seconds
    pub file_timeout_secs: u64,
    /// Delete already-stored vectors of a document whose job fails
    pub rollback_partial_writes: bool,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace_secs: u64,
    /// SQLite file for document, job and chunk records
    pub database_path: PathBuf,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: 1000,
            parallel_embeddings: None,
            file_timeout_secs: 300,
            rollback_partial_writes: true,
            shutdown_grace_secs: 30,
            database_path: data_dir().join("records.db"),
        }
    }
}

impl ProcessingConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| num_cpus::get().min(4)).max(1)
    }

    pub fn embedding_parallelism(&self) -> usize {
        self.parallel_embeddings
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}
