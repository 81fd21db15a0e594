//! Document processing state machine: scan, extract, chunk, embed, store

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::alerts::AlertSink;
use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::ingestion::{ChunkDraft, TextChunker, TextExtractor};
use crate::metadata;
use crate::providers::{EmbeddingProvider, VectorStoreProvider};
use crate::security::scanner::THREAT_SCAN_FAILED;
use crate::security::{MalwareScanner, Quarantine, ScanVerdict};
use crate::storage::RecordStore;
use crate::types::metadata::keys;
use crate::types::{
    Alert, AlertSeverity, AlertType, Chunk, Document, Job, JobStatus, Metadata, ProcessingStage,
};

/// Providers the pipeline runs against
pub struct PipelineDeps {
    pub store: RecordStore,
    pub scanner: Arc<dyn MalwareScanner>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vector_store: Arc<dyn VectorStoreProvider>,
    pub alerts: Arc<dyn AlertSink>,
}

/// Runs one document job from Pending to a terminal status
pub struct IngestPipeline {
    store: RecordStore,
    scanner: Arc<dyn MalwareScanner>,
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    alerts: Arc<dyn AlertSink>,
    extractor: TextExtractor,
    chunker: TextChunker,
    quarantine: Option<Quarantine>,
    parallel_embeddings: usize,
    rollback_partial_writes: bool,
}

impl IngestPipeline {
    pub fn new(deps: PipelineDeps, config: &RagConfig) -> Result<Self> {
        let quarantine = config
            .scanner
            .quarantine_infected_files
            .then(|| Quarantine::new(config.scanner.quarantine_dir.clone()));

        Ok(Self {
            store: deps.store,
            scanner: deps.scanner,
            embedder: deps.embedder,
            vector_store: deps.vector_store,
            alerts: deps.alerts,
            extractor: TextExtractor::new(config.extraction.clone()),
            chunker: TextChunker::from_config(&config.chunking)?,
            quarantine,
            parallel_embeddings: config.processing.embedding_parallelism(),
            rollback_partial_writes: config.processing.rollback_partial_writes,
        })
    }

    /// Process a queued job and return its final status.
    ///
    /// Pipeline failures are recorded on the job and document; `Err` means
    /// the records themselves could not be read or written.
    pub async fn process(&self, job_id: Uuid) -> Result<JobStatus> {
        let mut job = self.load_job(job_id)?;
        if job.status != JobStatus::Pending {
            tracing::warn!("Job {} is {}, skipping", job.id, job.status.as_str());
            return Ok(job.status);
        }
        let Some(mut doc) = self.store.get_document(job.document_id)? else {
            job.fail(format!("Document {} not found", job.document_id))?;
            self.store.update_job(&job)?;
            return Ok(job.status);
        };
        if doc.status.is_terminal() {
            tracing::warn!(
                "[{}] Document is already {}, cancelling job {}",
                doc.filename,
                doc.status.as_str(),
                job.id
            );
            job.transition(JobStatus::Cancelled)?;
            job.error = Some(format!("Document already {}", doc.status.as_str()));
            self.store.update_job(&job)?;
            return Ok(job.status);
        }

        job.transition(JobStatus::Processing)?;
        self.store.update_job(&job)?;
        tracing::info!("[{}] Starting processing ({} bytes)", doc.filename, doc.size_bytes);
        let started = Instant::now();

        match self.run_stages(&mut job, &mut doc).await {
            Ok(result) => {
                self.store.update_document(&doc)?;
                job.complete(result)?;
                self.store.update_job(&job)?;
                tracing::info!(
                    "[{}] COMPLETE: {} chunks stored in {:.1}s",
                    doc.filename,
                    doc.chunk_count,
                    started.elapsed().as_secs_f64()
                );
            }
            Err(Error::VirusDetected(threat)) => self.reject_infected(&mut job, &mut doc, &threat).await?,
            Err(Error::ScannerUnavailable(reason)) => {
                self.reject_unscanned(&mut job, &mut doc, &reason).await?
            }
            Err(e) => {
                tracing::error!("[{}] FAILED at {}: {}", doc.filename, job.stage.as_str(), e);
                self.record_failure(&mut job, &mut doc, &e.to_string()).await?;
            }
        }
        Ok(job.status)
    }

    /// Fail a job whose processing was cut short by a timeout or shutdown.
    ///
    /// Returns false when the job had already reached a terminal status.
    pub async fn interrupt(&self, job_id: Uuid, reason: &str) -> Result<bool> {
        let mut job = self.load_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(false);
        }
        let mut doc = self.load_document(job.document_id)?;
        tracing::error!("[{}] {}", doc.filename, reason);
        self.record_failure(&mut job, &mut doc, reason).await?;
        Ok(true)
    }

    /// Cancel a job that never started. Its document is marked failed.
    pub fn cancel(&self, job_id: Uuid, reason: &str) -> Result<bool> {
        let mut job = self.load_job(job_id)?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.transition(JobStatus::Cancelled)?;
        job.error = Some(reason.to_string());
        self.store.update_job(&job)?;

        if let Some(mut doc) = self.store.get_document(job.document_id)? {
            if !doc.status.is_terminal() {
                doc.mark_failed(reason);
                self.store.update_document(&doc)?;
            }
        }
        Ok(true)
    }

    fn load_job(&self, job_id: Uuid) -> Result<Job> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    fn load_document(&self, document_id: Uuid) -> Result<Document> {
        self.store
            .get_document(document_id)?
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))
    }

    /// Persist the stage before running it
    fn enter(&self, job: &mut Job, stage: ProcessingStage) -> Result<()> {
        job.stage = stage;
        self.store.update_job(job)
    }

    async fn run_stages(&self, job: &mut Job, doc: &mut Document) -> Result<Metadata> {
        self.enter(job, ProcessingStage::Scanning)?;
        let scan = self.scanner.scan_file(&doc.file_path).await?;
        if !scan.is_clean {
            return Err(Error::VirusDetected(scan.label().to_string()));
        }
        doc.scan_result = Some(match scan.verdict {
            ScanVerdict::Skipped => "Skipped".to_string(),
            _ => scan.label().to_string(),
        });
        self.store.update_document(doc)?;

        self.enter(job, ProcessingStage::Extracting)?;
        let text = self
            .extractor
            .extract(&doc.file_path, &doc.content_type)
            .await?;
        tracing::info!("[{}] Extracted {} characters", doc.filename, text.chars().count());

        self.enter(job, ProcessingStage::Chunking)?;
        let drafts = self.chunker.chunk(&text, &doc.categories);
        if drafts.is_empty() {
            return Err(Error::NoContentExtracted);
        }
        let mut chunks: Vec<Chunk> = drafts
            .into_iter()
            .map(|draft| chunk_from_draft(doc.id, draft))
            .collect();
        tracing::info!("[{}] Created {} chunks, generating embeddings...", doc.filename, chunks.len());

        self.enter(job, ProcessingStage::Embedding)?;
        self.embed_chunks(&doc.filename, &mut chunks).await?;

        self.enter(job, ProcessingStage::Storing)?;
        tracing::info!("[{}] Storing {} chunks in vector database...", doc.filename, chunks.len());
        for chunk in chunks.iter_mut() {
            let id = self
                .vector_store
                .store(&chunk.embedding, &chunk.content, &chunk_metadata(doc, chunk))
                .await?;
            chunk.assign_vector_id(id)?;
        }
        self.store.replace_chunks(doc.id, &chunks)?;

        doc.mark_completed(chunks.len());

        let mut categories: Vec<String> = Vec::new();
        for category in chunks.iter().filter_map(|c| c.category.as_ref()) {
            if !categories.contains(category) {
                categories.push(category.clone());
            }
        }
        Ok(metadata! {
            "chunkCount" => chunks.len(),
            "textLength" => text.chars().count(),
            "categories" => categories,
        })
    }

    /// Embed in concurrent batches. Any failure fails the document.
    async fn embed_chunks(&self, filename: &str, chunks: &mut [Chunk]) -> Result<()> {
        let total_batches = chunks.len().div_ceil(self.parallel_embeddings);

        for (batch_num, batch) in chunks.chunks_mut(self.parallel_embeddings).enumerate() {
            let batch_start = Instant::now();
            let results = join_all(batch.iter().map(|chunk| self.embedder.embed_checked(&chunk.content))).await;

            for (chunk, result) in batch.iter_mut().zip(results) {
                chunk.embedding = result?;
            }

            let elapsed = batch_start.elapsed();
            if elapsed.as_secs() > 10 {
                tracing::info!(
                    "[{}] Batch {}/{} took {:.1}s",
                    filename,
                    batch_num + 1,
                    total_batches,
                    elapsed.as_secs_f64()
                );
            }
        }
        Ok(())
    }

    async fn reject_infected(&self, job: &mut Job, doc: &mut Document, threat: &str) -> Result<()> {
        tracing::warn!("[{}] Virus detected: {}", doc.filename, threat);
        doc.mark_virus_detected(threat);

        if let Some(quarantine) = &self.quarantine {
            match quarantine.quarantine(&doc.file_path, threat) {
                Ok(record) => doc.file_path = record.quarantined_path,
                Err(e) => tracing::error!("[{}] Quarantine failed: {}", doc.filename, e),
            }
        }
        self.store.update_document(doc)?;

        job.fail(format!("Virus detected: {}", threat))?;
        self.store.update_job(job)?;

        let alert = Alert::new(
            AlertType::VirusDetected,
            AlertSeverity::High,
            "Virus detected in uploaded document",
            format!("File {} was rejected by the malware scanner", doc.filename),
        )
        .with_detail("threat", threat)
        .with_detail(keys::DOCUMENT_ID, doc.id.to_string())
        .with_detail(keys::TENANT, doc.tenant.as_str())
        .with_detail("filename", doc.filename.as_str());
        self.raise(alert).await;
        Ok(())
    }

    async fn reject_unscanned(&self, job: &mut Job, doc: &mut Document, reason: &str) -> Result<()> {
        tracing::error!("[{}] Virus scan failed: {}", doc.filename, reason);
        doc.mark_virus_detected(THREAT_SCAN_FAILED);
        doc.error = Some(format!("Virus scan failed: {}", reason));
        self.store.update_document(doc)?;

        job.fail(format!("Virus scan failed: {}", reason))?;
        self.store.update_job(job)?;

        let alert = Alert::new(
            AlertType::SystemError,
            AlertSeverity::Medium,
            "Virus scan failed",
            format!("File {} could not be scanned and was not processed", doc.filename),
        )
        .with_detail("error", reason)
        .with_detail(keys::DOCUMENT_ID, doc.id.to_string())
        .with_detail("filename", doc.filename.as_str());
        self.raise(alert).await;
        Ok(())
    }

    async fn record_failure(&self, job: &mut Job, doc: &mut Document, error: &str) -> Result<()> {
        let reached_storage = job.stage == ProcessingStage::Storing;

        doc.mark_failed(error);
        self.store.update_document(doc)?;
        job.fail(error)?;
        self.store.update_job(job)?;

        if reached_storage && self.rollback_partial_writes {
            let filter = metadata! {keys::DOCUMENT_ID => doc.id.to_string()};
            match self.vector_store.delete_by_filter(&filter).await {
                Ok(true) => tracing::info!("[{}] Rolled back partially stored vectors", doc.filename),
                Ok(false) => {}
                Err(e) => tracing::error!("[{}] Vector rollback failed: {}", doc.filename, e),
            }
        }

        let alert = Alert::new(
            AlertType::ProcessingFailure,
            AlertSeverity::Medium,
            "Document processing failed",
            format!("File {} could not be processed", doc.filename),
        )
        .with_detail("error", error)
        .with_detail(keys::DOCUMENT_ID, doc.id.to_string())
        .with_detail("filename", doc.filename.as_str());
        self.raise(alert).await;
        Ok(())
    }

    async fn raise(&self, alert: Alert) {
        if let Err(e) = self.alerts.raise(alert).await {
            tracing::error!("Failed to record alert: {}", e);
        }
    }
}

fn chunk_from_draft(document_id: Uuid, draft: ChunkDraft) -> Chunk {
    let mut chunk = Chunk::new(document_id, draft.content, draft.index, draft.start, draft.end);
    chunk.category = draft.category;
    chunk.keywords = draft.keywords;
    chunk
}

/// Vector-store metadata for one chunk
fn chunk_metadata(doc: &Document, chunk: &Chunk) -> Metadata {
    let mut metadata = metadata! {
        keys::TENANT => doc.tenant.as_str(),
        keys::DOCUMENT_ID => doc.id.to_string(),
        keys::CHUNK_INDEX => chunk.index,
        keys::KEYWORDS => chunk.keywords.clone(),
    };
    if let Some(category) = &chunk.category {
        metadata.insert(keys::CATEGORY.to_string(), category.as_str().into());
    }
    metadata
}
