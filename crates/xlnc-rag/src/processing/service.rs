//! Upload acceptance and document management

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::Result;
use crate::metadata;
use crate::providers::VectorStoreProvider;
use crate::security::UploadValidator;
use crate::storage::RecordStore;
use crate::types::metadata::keys;
use crate::types::{Document, Job, JobKind};

use super::job_queue::JobQueue;

/// Declared type that defers to the type resolved from the file itself
const GENERIC_CONTENT_TYPE: &str = "application/octet-stream";

/// An uploaded file with its owner and candidate categories
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub filename: String,
    /// Declared MIME type; empty or `application/octet-stream` to infer
    pub content_type: String,
    pub data: Vec<u8>,
    pub tenant: String,
    pub categories: Vec<String>,
    /// Display title; the file name without its extension when absent
    pub title: Option<String>,
}

/// Returned as soon as the upload is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub document_id: Uuid,
    pub job_id: Uuid,
}

/// Entry point for uploads and document housekeeping
pub struct DocumentService {
    store: RecordStore,
    queue: Arc<JobQueue>,
    vector_store: Arc<dyn VectorStoreProvider>,
    validator: UploadValidator,
    upload_dir: PathBuf,
}

impl DocumentService {
    pub fn new(
        store: RecordStore,
        queue: Arc<JobQueue>,
        vector_store: Arc<dyn VectorStoreProvider>,
        config: &UploadConfig,
    ) -> Self {
        Self {
            store,
            queue,
            vector_store,
            validator: UploadValidator::new(config),
            upload_dir: config.upload_dir.clone(),
        }
    }

    /// Validate, store and enqueue an upload without waiting for processing
    pub async fn accept_upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        let kind = self.validator.validate(&request.filename, &request.data)?;

        let declared = request.content_type.trim();
        let content_type = if declared.is_empty() || declared.eq_ignore_ascii_case(GENERIC_CONTENT_TYPE) {
            kind.mime_type().to_string()
        } else {
            declared.to_string()
        };

        let hash = hex::encode(Sha256::digest(&request.data));
        let filename = base_name(&request.filename);
        let mut doc = Document::new(
            filename.clone(),
            content_type,
            request.data.len() as u64,
            request.tenant,
            hash,
        );
        doc.categories = request.categories;
        if let Some(title) = request.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            doc.title = title.to_string();
        }

        let dir = self
            .upload_dir
            .join(doc.uploaded_at.format("%Y/%m/%d").to_string());
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}_{}", doc.id, filename));
        tokio::fs::write(&path, &request.data).await?;
        doc.file_path = path;

        self.store.insert_document(&doc)?;

        let job = Job::new(
            JobKind::DocumentProcessing,
            doc.id,
            metadata! {
                keys::DOCUMENT_ID => doc.id.to_string(),
                "filePath" => doc.file_path.to_string_lossy().to_string(),
                "categories" => doc.categories.clone(),
            },
        );

        let job_id = match self.queue.submit(job).await {
            Ok(id) => id,
            Err(e) => {
                doc.mark_failed(e.to_string());
                self.store.update_document(&doc)?;
                return Err(e);
            }
        };

        tracing::info!(
            "[{}] Accepted upload for tenant {} (document {}, job {})",
            doc.filename,
            doc.tenant,
            doc.id,
            job_id
        );
        Ok(UploadReceipt {
            document_id: doc.id,
            job_id,
        })
    }

    /// A tenant's documents, newest first
    pub fn list_documents(&self, tenant: &str, skip: usize, take: usize) -> Result<Vec<Document>> {
        self.store.list_documents(tenant, skip, take)
    }

    pub fn document(&self, id: Uuid) -> Result<Option<Document>> {
        self.store.get_document(id)
    }

    pub fn job_status(&self, job_id: Uuid) -> Result<Option<Job>> {
        self.store.get_job(job_id)
    }

    /// Delete a tenant's document with its vectors, file and records.
    ///
    /// Returns false when the document does not exist or belongs to another tenant.
    pub async fn delete_document(&self, id: Uuid, tenant: &str) -> Result<bool> {
        let Some(doc) = self.store.get_document(id)? else {
            return Ok(false);
        };
        if doc.tenant != tenant {
            return Ok(false);
        }

        self.vector_store
            .delete_by_filter(&metadata! {keys::DOCUMENT_ID => id.to_string()})
            .await?;

        match tokio::fs::remove_file(&doc.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[{}] Could not remove stored file: {}", doc.filename, e),
        }

        let deleted = self.store.delete_document(id)?;
        tracing::info!("[{}] Deleted document {}", doc.filename, id);
        Ok(deleted)
    }
}

/// Last path component, so uploads cannot escape the upload directory
fn base_name(filename: &str) -> String {
    Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}
