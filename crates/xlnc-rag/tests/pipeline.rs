//! End-to-end ingestion and answering against a fake clamd and mock models

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use xlnc_rag::alerts::MemoryAlertSink;
use xlnc_rag::analytics::MemoryQueryRecorder;
use xlnc_rag::providers::{
    EmbeddingProvider, GenerationParams, InMemoryVectorStore, LlmProvider, VectorSearchResult,
    VectorStoreProvider,
};
use xlnc_rag::security::ClamAvScanner;
use xlnc_rag::storage::RecordStore;
use xlnc_rag::types::{AlertSeverity, AlertType, Job, JobStatus};
use xlnc_rag::{
    AppState, DocumentStatus, Error, Metadata, Providers, RagConfig, ResponseSource, Result,
    UploadRequest,
};

const MIME_PDF: &str = "application/pdf";

// ---------- fakes ----------

/// clamd stand-in answering every INSTREAM request with `reply`
async fn fake_clamd(reply: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut command = [0u8; 10];
                if socket.read_exact(&mut command).await.is_err() {
                    return;
                }
                loop {
                    let Ok(len) = socket.read_u32().await else {
                        return;
                    };
                    if len == 0 {
                        break;
                    }
                    let mut chunk = vec![0u8; len as usize];
                    if socket.read_exact(&mut chunk).await.is_err() {
                        return;
                    }
                }
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.write_all(b"\0").await;
            });
        }
    });

    port
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Every text lands close to the same direction, so any query matches
struct FlatEmbedder {
    delay: Duration,
    fail: bool,
}

impl FlatEmbedder {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlatEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(Error::embedding("model not loaded"));
        }
        let wobble = (text.len() % 7) as f32 * 0.01;
        Ok(vec![1.0, wobble, 0.5, 0.25])
    }

    fn dimensions(&self) -> usize {
        4
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "flat"
    }
}

struct EchoLlm;

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn generate(&self, _system: &str, _user: &str, _params: &GenerationParams) -> Result<String> {
        Ok("We offer cloud migration.\nAsk us for details!".to_string())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "echo"
    }

    fn model(&self) -> &str {
        "echo-1"
    }
}

/// In-memory store that refuses writes after the first `allowed`
struct FlakyStore {
    inner: InMemoryVectorStore,
    allowed: usize,
    writes: AtomicUsize,
}

#[async_trait]
impl VectorStoreProvider for FlakyStore {
    async fn store(&self, vector: &[f32], content: &str, metadata: &Metadata) -> Result<String> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(Error::vector_store("disk full"));
        }
        self.inner.store(vector, content, metadata).await
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: &Metadata,
    ) -> Result<Vec<VectorSearchResult>> {
        self.inner.search(query, limit, score_threshold, filters).await
    }

    async fn get(&self, id: &str) -> Result<Option<VectorSearchResult>> {
        self.inner.get(id).await
    }

    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<bool> {
        self.inner.update_metadata(id, metadata).await
    }

    async fn ids_by_document(&self, document_id: &str) -> Result<Vec<String>> {
        self.inner.ids_by_document(document_id).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }

    async fn delete_by_filter(&self, filters: &Metadata) -> Result<bool> {
        self.inner.delete_by_filter(filters).await
    }

    async fn collection_size(&self) -> Result<u64> {
        self.inner.collection_size().await
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

// ---------- fixtures ----------

/// A PDF with one line of text per page
fn build_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![40.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = Object::Integer(kids.len() as i64);
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn three_page_pdf() -> Vec<u8> {
    build_pdf(&[
        "Our cloud migration service moves software workloads safely. The team supports every API.",
        "Pricing for the business plan depends on revenue goals. Our sales team prepares each contract.",
        "Support engineers answer technical questions quickly. Every software release is tested.",
    ])
}

fn build_docx() -> Vec<u8> {
    use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};

    let cell = |s: &str| TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text(s)));
    let mut buf = std::io::Cursor::new(Vec::new());
    Docx::new()
        .add_paragraph(Paragraph::new().add_run(Run::new().add_text(
            "Our legal team reviews every contract before signing.",
        )))
        .add_table(Table::new(vec![
            TableRow::new(vec![cell("Plan"), cell("Price")]),
            TableRow::new(vec![cell("Starter"), cell("49")]),
        ]))
        .build()
        .pack(&mut buf)
        .unwrap();
    buf.into_inner()
}

fn config(dir: &Path, clamd_port: u16) -> RagConfig {
    let mut config = RagConfig::default();
    config.scanner.host = "127.0.0.1".to_string();
    config.scanner.port = clamd_port;
    config.scanner.timeout_secs = 5;
    config.scanner.quarantine_infected_files = true;
    config.scanner.quarantine_dir = dir.join("quarantine");
    config.upload.upload_dir = dir.join("uploads");
    config.chunking.chunk_size = 120;
    config.chunking.chunk_overlap = 30;
    config.embeddings.dimensions = 4;
    config.processing.workers = Some(2);
    config.processing.parallel_embeddings = Some(2);
    config.processing.file_timeout_secs = 30;
    config.processing.shutdown_grace_secs = 0;
    config
}

struct Harness {
    state: AppState,
    store: RecordStore,
    vectors: Arc<dyn VectorStoreProvider>,
    alerts: Arc<MemoryAlertSink>,
    recorder: Arc<MemoryQueryRecorder>,
    _dir: tempfile::TempDir,
}

async fn harness_with(
    clamd_port: u16,
    embedder: FlatEmbedder,
    vectors: Arc<dyn VectorStoreProvider>,
    tweak: impl FnOnce(&mut RagConfig),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), clamd_port);
    tweak(&mut config);

    let store = RecordStore::in_memory().unwrap();
    let alerts = Arc::new(MemoryAlertSink::new());
    let recorder = Arc::new(MemoryQueryRecorder::new());
    let providers = Providers {
        store: store.clone(),
        scanner: Arc::new(ClamAvScanner::new(config.scanner.clone())),
        embedder: Arc::new(embedder),
        llm: Arc::new(EchoLlm),
        vector_store: vectors.clone(),
        alerts: alerts.clone(),
        recorder: recorder.clone(),
    };
    let state = AppState::with_providers(config, providers).await.unwrap();

    Harness {
        state,
        store,
        vectors,
        alerts,
        recorder,
        _dir: dir,
    }
}

async fn harness(clamd_port: u16) -> Harness {
    harness_with(
        clamd_port,
        FlatEmbedder::new(),
        Arc::new(InMemoryVectorStore::new(4)),
        |_| {},
    )
    .await
}

fn upload(filename: &str, data: Vec<u8>, tenant: &str) -> UploadRequest {
    UploadRequest {
        filename: filename.to_string(),
        content_type: MIME_PDF.to_string(),
        data,
        tenant: tenant.to_string(),
        categories: vec!["technical".to_string(), "business".to_string()],
        title: None,
    }
}

async fn wait_for_terminal(store: &RecordStore, job_id: Uuid) -> Job {
    for _ in 0..200 {
        let job = store.get_job(job_id).unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("job {} did not finish", job_id);
}

async fn wait_for_status(store: &RecordStore, job_id: Uuid, status: JobStatus) {
    for _ in 0..200 {
        if store.get_job(job_id).unwrap().unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("job {} never reached {}", job_id, status.as_str());
}

// ---------- tests ----------

#[tokio::test]
async fn clean_pdf_is_chunked_embedded_and_stored() {
    let h = harness(fake_clamd("stream: OK").await).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("overview.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "job error: {:?}", job.error);

    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert_eq!(doc.scan_result.as_deref(), Some("Clean"));
    assert!(doc.processed_at.is_some());
    assert!(doc.chunk_count > 1);

    let chunks = h.store.chunks_for_document(doc.id).unwrap();
    assert_eq!(chunks.len(), doc.chunk_count);
    assert_eq!(h.vectors.collection_size().await.unwrap(), doc.chunk_count as u64);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        let stored = h
            .vectors
            .get(chunk.vector_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, chunk.content);
        assert_eq!(stored.document_id(), Some(doc.id.to_string().as_str()));
        assert_eq!(stored.metadata["chunkIndex"].as_i64(), Some(i as i64));
        assert_eq!(stored.metadata["tenant"].as_str(), Some("t1"));
    }

    let result = job.result.unwrap();
    assert_eq!(result["chunkCount"].as_i64(), Some(doc.chunk_count as i64));
    assert!(result["textLength"].as_i64().unwrap() > 0);

    let answer = h.state.engine().answer("Tell me about cloud migration", "t1", "s1", &Metadata::new()).await;
    assert!(answer.ok);
    assert_eq!(answer.source, ResponseSource::KnowledgeBase);
    assert_eq!(answer.text, "We offer cloud migration.\n\nAsk us for details!");
    assert!(answer.confidence > 0.5);

    assert!(h.alerts.alerts().is_empty());
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn docx_tables_are_indexed_after_paragraphs() {
    let h = harness(fake_clamd("stream: OK").await).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(UploadRequest {
            filename: "terms.docx".to_string(),
            content_type: "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                .to_string(),
            data: build_docx(),
            tenant: "t1".to_string(),
            categories: vec!["legal".to_string()],
            title: Some("Terms of Service".to_string()),
        })
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;
    assert_eq!(job.status, JobStatus::Completed, "job error: {:?}", job.error);

    let chunks = h.store.chunks_for_document(receipt.document_id).unwrap();
    let text: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let text = text.join(" ");
    let paragraph = text.find("legal team").unwrap();
    let table = text.find("Starter").unwrap();
    assert!(paragraph < table);
    assert_eq!(chunks[0].category.as_deref(), Some("legal"));

    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.title, "Terms of Service");
    assert_eq!(doc.filename, "terms.docx");
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn infected_upload_is_quarantined_and_alerted() {
    let h = harness(fake_clamd("stream: Eicar-Test-Signature FOUND").await).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("invoice.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Virus detected: Eicar-Test-Signature"));

    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::VirusDetected);
    assert_eq!(doc.scan_result.as_deref(), Some("Eicar-Test-Signature"));
    assert!(doc.file_path.to_string_lossy().contains("quarantine"));
    assert!(doc.file_path.exists());

    assert!(h.store.chunks_for_document(doc.id).unwrap().is_empty());
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::VirusDetected);
    assert_eq!(alerts[0].severity, AlertSeverity::High);
    assert_eq!(alerts[0].details["threat"].as_str(), Some("Eicar-Test-Signature"));
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn scanner_error_reply_is_not_clean() {
    let h = harness(fake_clamd("stream: ERROR").await).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("notes.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Virus detected: SCAN_ERROR"));

    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::VirusDetected);
    assert_eq!(doc.scan_result.as_deref(), Some("SCAN_ERROR"));
    assert!(h.store.chunks_for_document(doc.id).unwrap().is_empty());
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn slow_document_fails_after_file_timeout() {
    let slow = FlatEmbedder {
        delay: Duration::from_secs(30),
        fail: false,
    };
    let h = harness_with(
        fake_clamd("stream: OK").await,
        slow,
        Arc::new(InMemoryVectorStore::new(4)),
        |config| config.processing.file_timeout_secs = 1,
    )
    .await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("big.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Processing timed out after 1s"));
    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts[0].alert_type, AlertType::ProcessingFailure);
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_scanner_fails_closed() {
    let h = harness(closed_port().await).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("report.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);

    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::VirusDetected);
    assert_eq!(doc.scan_result.as_deref(), Some("SCAN_FAILED"));
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts[0].alert_type, AlertType::SystemError);
    assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    assert_eq!(alerts[0].title, "Virus scan failed");
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn embedding_failure_fails_the_document() {
    let embedder = FlatEmbedder {
        delay: Duration::ZERO,
        fail: true,
    };
    let h = harness_with(
        fake_clamd("stream: OK").await,
        embedder,
        Arc::new(InMemoryVectorStore::new(4)),
        |_| {},
    )
    .await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("guide.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("model not loaded"));
    let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);

    let alerts = h.alerts.alerts();
    assert_eq!(alerts[0].alert_type, AlertType::ProcessingFailure);
    assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn partial_vector_writes_are_rolled_back() {
    let flaky = Arc::new(FlakyStore {
        inner: InMemoryVectorStore::new(4),
        allowed: 1,
        writes: AtomicUsize::new(0),
    });
    let h = harness_with(fake_clamd("stream: OK").await, FlatEmbedder::new(), flaky, |_| {}).await;

    let receipt = h
        .state
        .documents()
        .accept_upload(upload("guide.pdf", three_page_pdf(), "t1"))
        .await
        .unwrap();
    let job = wait_for_terminal(&h.store, receipt.job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("disk full"));
    assert_eq!(h.vectors.collection_size().await.unwrap(), 0);
    assert!(h.store.chunks_for_document(receipt.document_id).unwrap().is_empty());
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn query_without_matches_answers_ungrounded() {
    let h = harness(fake_clamd("stream: OK").await).await;

    let answer = h
        .state
        .engine()
        .answer("Do you build mobile apps?", "empty-tenant", "s1", &Metadata::new())
        .await;

    assert!(answer.ok);
    assert_eq!(answer.source, ResponseSource::Ai);
    assert_eq!(answer.confidence, 0.6);
    assert_eq!(h.recorder.events().len(), 1);
    assert_eq!(h.recorder.events()[0].source, ResponseSource::Ai);
    h.state.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_interrupts_running_and_cancels_queued() {
    let slow = FlatEmbedder {
        delay: Duration::from_secs(30),
        fail: false,
    };
    let h = harness_with(
        fake_clamd("stream: OK").await,
        slow,
        Arc::new(InMemoryVectorStore::new(4)),
        |config| config.processing.workers = Some(1),
    )
    .await;

    let mut receipts = Vec::new();
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        receipts.push(
            h.state
                .documents()
                .accept_upload(upload(name, three_page_pdf(), "t1"))
                .await
                .unwrap(),
        );
    }
    wait_for_status(&h.store, receipts[0].job_id, JobStatus::Processing).await;

    let report = h.state.shutdown().await.unwrap();
    assert_eq!(report.interrupted, 1);
    assert_eq!(report.cancelled, 2);

    let first = h.store.get_job(receipts[0].job_id).unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Failed);
    assert_eq!(first.error.as_deref(), Some("Processing interrupted by shutdown"));
    for receipt in &receipts[1..] {
        let job = h.store.get_job(receipt.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        let doc = h.store.get_document(receipt.document_id).unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    let late = h
        .state
        .documents()
        .accept_upload(upload("d.pdf", three_page_pdf(), "t1"))
        .await;
    assert!(late.is_err());
}
