//! Application state: providers, record store, queue and workers wired from config

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::AlertSink;
use crate::analytics::QueryRecorder;
use crate::config::{RagConfig, VectorBackend};
use crate::error::{Error, Result};
use crate::generation::{ContentEnricher, RagEngine};
use crate::processing::{
    DocumentService, IngestPipeline, JobQueue, PipelineDeps, ShutdownReport, WorkerPool,
};
use crate::providers::{
    EmbeddingProvider, InMemoryVectorStore, LlmProvider, OllamaClient, OllamaEmbedder, OllamaLlm,
    QdrantVectorStore, VectorStoreProvider,
};
use crate::security::{ClamAvScanner, MalwareScanner};
use crate::storage::RecordStore;

/// Everything the state needs from the outside world
pub struct Providers {
    pub store: RecordStore,
    pub scanner: Arc<dyn MalwareScanner>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
    pub alerts: Arc<dyn AlertSink>,
    pub recorder: Arc<dyn QueryRecorder>,
}

impl Providers {
    /// Providers described by the configuration: SQLite records, clamd,
    /// Ollama and the configured vector backend
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        let store = RecordStore::open(&config.processing.database_path)?;
        tracing::info!("Record store opened at {}", config.processing.database_path.display());

        let ollama = Arc::new(OllamaClient::new(&config.llm)?);
        tracing::info!(
            "Ollama client initialized (using {} for embeddings, {} for answers)",
            config.embeddings.model,
            config.llm.generate_model
        );

        let dimensions = config.embeddings.dimensions;
        let vector_store: Arc<dyn VectorStoreProvider> = match config.vector_db.backend {
            VectorBackend::Memory => {
                tracing::info!("Using in-memory vector store");
                Arc::new(InMemoryVectorStore::new(dimensions))
            }
            VectorBackend::Qdrant => {
                tracing::info!(
                    "Using Qdrant at {} (collection {})",
                    config.vector_db.url,
                    config.vector_db.collection
                );
                Arc::new(QdrantVectorStore::new(
                    &config.vector_db,
                    dimensions,
                    config.llm.timeout_secs,
                )?)
            }
        };

        Ok(Self {
            scanner: Arc::new(ClamAvScanner::new(config.scanner.clone())),
            embedder: Arc::new(OllamaEmbedder::new(ollama.clone(), &config.embeddings)),
            llm: Arc::new(OllamaLlm::new(ollama, &config.llm)),
            vector_store,
            alerts: Arc::new(store.clone()),
            recorder: Arc::new(store.clone()),
            store,
        })
    }
}

/// Provider reachability
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub scanner: bool,
    pub embeddings: bool,
    pub llm: bool,
    pub vector_store: bool,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.scanner && self.embeddings && self.llm && self.vector_store
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    store: RecordStore,
    scanner: Arc<dyn MalwareScanner>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    queue: Arc<JobQueue>,
    documents: DocumentService,
    engine: RagEngine,
    enricher: ContentEnricher,
    /// Taken on shutdown
    workers: Mutex<Option<WorkerPool>>,
}

impl AppState {
    /// Build state from configuration alone
    pub async fn new(config: RagConfig) -> Result<Self> {
        config.validate()?;
        let providers = Providers::from_config(&config)?;
        Self::with_providers(config, providers).await
    }

    /// Build state around the given providers and start the workers.
    ///
    /// Jobs a previous run left Processing are failed; Pending ones are requeued.
    pub async fn with_providers(config: RagConfig, providers: Providers) -> Result<Self> {
        let (queue, receiver) =
            JobQueue::new(config.processing.queue_capacity, providers.store.clone());
        let queue = Arc::new(queue);

        let stale = queue.fail_stale_jobs()?;
        if stale > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", stale);
        }

        let pipeline = Arc::new(IngestPipeline::new(
            PipelineDeps {
                store: providers.store.clone(),
                scanner: providers.scanner.clone(),
                embedder: providers.embedder.clone(),
                vector_store: providers.vector_store.clone(),
                alerts: providers.alerts.clone(),
            },
            &config,
        )?);

        let workers = WorkerPool::start(
            config.processing.worker_count(),
            receiver,
            queue.clone(),
            pipeline,
            Duration::from_secs(config.processing.file_timeout_secs),
        );
        queue.requeue_pending().await?;

        let documents = DocumentService::new(
            providers.store.clone(),
            queue.clone(),
            providers.vector_store.clone(),
            &config.upload,
        );
        let engine = RagEngine::new(
            providers.embedder.clone(),
            providers.vector_store.clone(),
            providers.llm.clone(),
            providers.recorder.clone(),
            &config.generation,
        );
        let enricher = ContentEnricher::new(providers.llm.clone(), &config.generation);

        tracing::info!(
            "Application state ready ({} workers, vector store: {})",
            workers.worker_count(),
            providers.vector_store.name()
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store: providers.store,
                scanner: providers.scanner,
                embedder: providers.embedder,
                llm: providers.llm,
                vector_store: providers.vector_store,
                queue,
                documents,
                engine,
                enricher,
                workers: Mutex::new(Some(workers)),
            }),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.inner.store
    }

    pub fn documents(&self) -> &DocumentService {
        &self.inner.documents
    }

    pub fn engine(&self) -> &RagEngine {
        &self.inner.engine
    }

    /// Keyword, summary and category helpers over the answer model
    pub fn enricher(&self) -> &ContentEnricher {
        &self.inner.enricher
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.inner.queue
    }

    pub fn scanner(&self) -> &Arc<dyn MalwareScanner> {
        &self.inner.scanner
    }

    pub fn vector_store(&self) -> &Arc<dyn VectorStoreProvider> {
        &self.inner.vector_store
    }

    /// Check every provider
    pub async fn health(&self) -> HealthReport {
        let (scanner, embeddings, llm, vector_store) = tokio::join!(
            self.inner.scanner.is_available(),
            self.inner.embedder.health_check(),
            self.inner.llm.health_check(),
            self.inner.vector_store.health_check(),
        );
        HealthReport {
            scanner,
            embeddings: embeddings.unwrap_or(false),
            llm: llm.unwrap_or(false),
            vector_store: vector_store.unwrap_or(false),
        }
    }

    /// Stop the workers, waiting up to `processing.shutdown_grace_secs`
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let workers = self
            .inner
            .workers
            .lock()
            .take()
            .ok_or_else(|| Error::internal("Workers already shut down"))?;
        let grace = Duration::from_secs(self.inner.config.processing.shutdown_grace_secs);
        workers.shutdown(grace).await
    }
}
