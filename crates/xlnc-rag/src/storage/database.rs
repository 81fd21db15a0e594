//! SQLite record store for documents, jobs, chunks, alerts and query events

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::AlertSink;
use crate::analytics::{QueryEvent, QueryRecorder};
use crate::error::Result;
use crate::types::{
    Alert, AlertSeverity, AlertType, Chunk, Document, DocumentStatus, Job, JobKind, JobStatus,
    Metadata, ProcessingStage, ResponseSource,
};

/// Durable store for pipeline records
#[derive(Clone)]
pub struct RecordStore {
    conn: Arc<Mutex<Connection>>,
}

/// Job counts by status
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RecordStore {
    /// Create or open the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                tenant TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                categories TEXT NOT NULL,
                scan_result TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                file_path TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                uploaded_at TEXT NOT NULL,
                processed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_tenant ON documents(tenant, uploaded_at);
            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                stage TEXT NOT NULL,
                document_id TEXT NOT NULL,
                parameters TEXT NOT NULL,
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_document_id ON jobs(document_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                category TEXT,
                keywords TEXT NOT NULL,
                vector_id TEXT,
                UNIQUE(document_id, chunk_index)
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS query_events (
                id TEXT PRIMARY KEY,
                tenant TEXT NOT NULL,
                session_id TEXT NOT NULL,
                query TEXT NOT NULL,
                matched_ids TEXT NOT NULL,
                best_score REAL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_query_events_tenant ON query_events(tenant, created_at);
            "#,
        )?;

        Ok(())
    }

    // ==================== Documents ====================

    pub fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO documents (
                id, title, filename, content_type, size_bytes, tenant, status, error,
                categories, scan_result, chunk_count, file_path, content_hash,
                uploaded_at, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                doc.id.to_string(),
                doc.title,
                doc.filename,
                doc.content_type,
                doc.size_bytes as i64,
                doc.tenant,
                doc.status.as_str(),
                doc.error,
                serde_json::to_string(&doc.categories)?,
                doc.scan_result,
                doc.chunk_count as i64,
                doc.file_path.to_string_lossy(),
                doc.content_hash,
                doc.uploaded_at,
                doc.processed_at,
            ],
        )?;
        Ok(())
    }

    /// Persist the mutable fields of a document
    pub fn update_document(&self, doc: &Document) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            UPDATE documents SET
                status = ?2, error = ?3, scan_result = ?4, chunk_count = ?5,
                file_path = ?6, processed_at = ?7
            WHERE id = ?1
            "#,
            params![
                doc.id.to_string(),
                doc.status.as_str(),
                doc.error,
                doc.scan_result,
                doc.chunk_count as i64,
                doc.file_path.to_string_lossy(),
                doc.processed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                "SELECT * FROM documents WHERE id = ?1",
                params![id.to_string()],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    /// A tenant's documents, newest first
    pub fn list_documents(&self, tenant: &str, skip: usize, take: usize) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM documents WHERE tenant = ?1 ORDER BY uploaded_at DESC LIMIT ?2 OFFSET ?3",
        )?;
        let docs = stmt
            .query_map(params![tenant, take as i64, skip as i64], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Delete a document with its chunks and jobs
    pub fn delete_document(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM jobs WHERE document_id = ?1", params![id.to_string()])?;
        let count = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(count > 0)
    }

    // ==================== Jobs ====================

    pub fn insert_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO jobs (
                id, kind, status, stage, document_id, parameters, result, error,
                created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                job.id.to_string(),
                job.kind.as_str(),
                job.status.as_str(),
                job.stage.as_str(),
                job.document_id.to_string(),
                serde_json::to_string(&job.parameters)?,
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_job(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            UPDATE jobs SET
                status = ?2, stage = ?3, result = ?4, error = ?5,
                started_at = ?6, completed_at = ?7
            WHERE id = ?1
            "#,
            params![
                job.id.to_string(),
                job.status.as_str(),
                job.stage.as_str(),
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let conn = self.conn.lock();
        let job = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs in a status, oldest first
    pub fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM jobs WHERE status = ?1 ORDER BY created_at ASC")?;
        let jobs = stmt
            .query_map(params![status.as_str()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Most recent jobs, optionally filtered by status
    pub fn list_jobs(&self, status: Option<JobStatus>, skip: usize, take: usize) -> Result<Vec<Job>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM jobs WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let jobs = stmt
            .query_map(
                params![status.map(|s| s.as_str()), take as i64, skip as i64],
                row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    pub fn job_stats(&self) -> Result<JobStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut stats = JobStats::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Processing) => stats.processing = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                Some(JobStatus::Cancelled) => stats.cancelled = count,
                None => {}
            }
        }
        Ok(stats)
    }

    // ==================== Chunks ====================

    /// Replace a document's chunks in one transaction
    pub fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id.to_string()],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks (
                    id, document_id, chunk_index, content, start_offset, end_offset,
                    category, keywords, vector_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.id.to_string(),
                    chunk.document_id.to_string(),
                    chunk.index as i64,
                    chunk.content,
                    chunk.start as i64,
                    chunk.end as i64,
                    chunk.category,
                    serde_json::to_string(&chunk.keywords)?,
                    chunk.vector_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// A document's chunks in index order
    pub fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC")?;
        let chunks = stmt
            .query_map(params![document_id.to_string()], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    // ==================== Alerts ====================

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO alerts (id, alert_type, severity, title, description, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                alert.id.to_string(),
                alert.alert_type.as_str(),
                alert.severity.as_str(),
                alert.title,
                alert.description,
                serde_json::to_string(&alert.details)?,
                alert.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Unresolved alerts, newest first
    pub fn active_alerts(&self) -> Result<Vec<Alert>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM alerts WHERE resolved = 0 ORDER BY created_at DESC")?;
        let alerts = stmt
            .query_map([], row_to_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    pub fn resolve_alert(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn.execute(
            "UPDATE alerts SET resolved = 1 WHERE id = ?1 AND resolved = 0",
            params![id.to_string()],
        )?;
        Ok(count > 0)
    }

    // ==================== Query events ====================

    pub fn insert_query_event(&self, event: &QueryEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO query_events (
                id, tenant, session_id, query, matched_ids, best_score, source, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.id.to_string(),
                event.tenant,
                event.session_id,
                event.query,
                serde_json::to_string(&event.matched_ids)?,
                event.best_score.map(f64::from),
                event.source.as_str(),
                event.timestamp,
            ],
        )?;
        Ok(())
    }

    /// A tenant's latest query events, newest first
    pub fn recent_queries(&self, tenant: &str, limit: usize) -> Result<Vec<QueryEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM query_events WHERE tenant = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let events = stmt
            .query_map(params![tenant, limit as i64], row_to_query_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

#[async_trait]
impl AlertSink for RecordStore {
    async fn raise(&self, alert: Alert) -> Result<()> {
        tracing::warn!(
            "Security alert created: {} - {}",
            alert.alert_type.as_str(),
            alert.title
        );
        self.insert_alert(&alert)
    }
}

#[async_trait]
impl QueryRecorder for RecordStore {
    async fn record(&self, event: &QueryEvent) -> Result<()> {
        self.insert_query_event(event)
    }
}

// Helper functions

fn invalid(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn uuid_column(row: &Row, name: &str) -> rusqlite::Result<Uuid> {
    let idx = row.as_ref().column_index(name)?;
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| invalid(idx, format!("bad uuid {}: {}", raw, e)))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<T> {
    let idx = row.as_ref().column_index(name)?;
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| invalid(idx, format!("bad json in {}: {}", name, e)))
}

fn enum_column<T>(row: &Row, name: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let idx = row.as_ref().column_index(name)?;
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| invalid(idx, format!("unknown {} value {}", name, raw)))
}

fn row_to_document(row: &Row) -> rusqlite::Result<Document> {
    Ok(Document {
        id: uuid_column(row, "id")?,
        title: row.get("title")?,
        filename: row.get("filename")?,
        content_type: row.get("content_type")?,
        size_bytes: row.get::<_, i64>("size_bytes")? as u64,
        tenant: row.get("tenant")?,
        status: enum_column(row, "status", DocumentStatus::parse)?,
        error: row.get("error")?,
        categories: json_column(row, "categories")?,
        scan_result: row.get("scan_result")?,
        chunk_count: row.get::<_, i64>("chunk_count")? as usize,
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        content_hash: row.get("content_hash")?,
        uploaded_at: row.get::<_, DateTime<Utc>>("uploaded_at")?,
        processed_at: row.get("processed_at")?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let result: Option<String> = row.get("result")?;
    let result = match result {
        Some(raw) => Some(
            serde_json::from_str::<Metadata>(&raw)
                .map_err(|e| invalid(0, format!("bad job result: {}", e)))?,
        ),
        None => None,
    };

    Ok(Job {
        id: uuid_column(row, "id")?,
        kind: enum_column(row, "kind", JobKind::parse)?,
        status: enum_column(row, "status", JobStatus::parse)?,
        stage: enum_column(row, "stage", ProcessingStage::parse)?,
        document_id: uuid_column(row, "document_id")?,
        parameters: json_column(row, "parameters")?,
        result,
        error: row.get("error")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: uuid_column(row, "id")?,
        document_id: uuid_column(row, "document_id")?,
        content: row.get("content")?,
        index: row.get::<_, i64>("chunk_index")? as usize,
        start: row.get::<_, i64>("start_offset")? as usize,
        end: row.get::<_, i64>("end_offset")? as usize,
        category: row.get("category")?,
        keywords: json_column(row, "keywords")?,
        embedding: Vec::new(),
        vector_id: row.get("vector_id")?,
    })
}

fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: uuid_column(row, "id")?,
        alert_type: enum_column(row, "alert_type", AlertType::parse)?,
        severity: enum_column(row, "severity", AlertSeverity::parse)?,
        title: row.get("title")?,
        description: row.get("description")?,
        details: json_column(row, "details")?,
        timestamp: row.get("created_at")?,
    })
}

fn row_to_query_event(row: &Row) -> rusqlite::Result<QueryEvent> {
    Ok(QueryEvent {
        id: uuid_column(row, "id")?,
        tenant: row.get("tenant")?,
        session_id: row.get("session_id")?,
        query: row.get("query")?,
        matched_ids: json_column(row, "matched_ids")?,
        best_score: row.get::<_, Option<f64>>("best_score")?.map(|s| s as f32),
        source: enum_column(row, "source", ResponseSource::parse)?,
        timestamp: row.get("created_at")?,
    })
}
