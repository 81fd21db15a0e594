//! Plain-text extraction for PDF, .doc and .docx uploads

use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCellContent, TableChild,
    TableRowChild,
};
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};
use crate::types::ContentKind;

/// Extracts text by declared content type
pub struct TextExtractor {
    config: ExtractionConfig,
}

impl TextExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract the text of the file at `path`
    pub async fn extract(&self, path: &Path, content_type: &str) -> Result<String> {
        let kind = ContentKind::from_mime(content_type);
        if let ContentKind::Unsupported(declared) = kind {
            return Err(Error::UnsupportedContentType(declared));
        }

        let data = tokio::fs::read(path).await?;
        tracing::info!(
            "[{}] Extracting {} bytes as {}",
            path.display(),
            data.len(),
            kind.label()
        );
        self.extract_bytes(&kind, data).await
    }

    /// Extract from an in-memory payload
    pub async fn extract_bytes(&self, kind: &ContentKind, data: Vec<u8>) -> Result<String> {
        let text = match kind {
            ContentKind::Pdf => {
                let deadline = Duration::from_secs(self.config.pdf_timeout_secs);
                run_blocking(move || extract_pdf(data, deadline)).await?
            }
            ContentKind::ModernWordProcessing => run_blocking(move || extract_docx(&data)).await?,
            ContentKind::LegacyWordProcessing => {
                let converted = self.convert_legacy(data).await?;
                run_blocking(move || extract_docx(&converted)).await?
            }
            ContentKind::Unsupported(declared) => {
                return Err(Error::UnsupportedContentType(declared.clone()))
            }
        };

        if text.trim().is_empty() {
            return Err(Error::NoContentExtracted);
        }
        Ok(text)
    }

    /// Convert a binary .doc into .docx with headless LibreOffice
    async fn convert_legacy(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("input.doc");
        tokio::fs::write(&input, &data).await?;

        let bin = &self.config.libreoffice_bin;
        let mut command = tokio::process::Command::new(bin);
        command
            .args(["--headless", "--convert-to", "docx", "--outdir"])
            .arg(workdir.path())
            .arg(&input)
            .kill_on_drop(true);

        let secs = self.config.conversion_timeout_secs;
        let output = timeout(Duration::from_secs(secs), command.output())
            .await
            .map_err(|_| Error::extraction("doc", format!("conversion timed out after {}s", secs)))?
            .map_err(|e| Error::extraction("doc", format!("failed to run {}: {}", bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::extraction(
                "doc",
                format!("{} exited with {}: {}", bin, output.status, stderr.trim()),
            ));
        }

        tokio::fs::read(workdir.path().join("input.docx"))
            .await
            .map_err(|e| Error::extraction("doc", format!("converter produced no output: {}", e)))
    }
}

async fn run_blocking<F>(f: F) -> Result<String>
where
    F: FnOnce() -> Result<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("Task join error: {}", e)))?
}

/// Primary extraction with pdf-extract, page-by-page lopdf as fallback.
///
/// pdf-extract can hang or panic on unusual fonts, so it runs on its own
/// thread bounded by `deadline`.
fn extract_pdf(data: Vec<u8>, deadline: Duration) -> Result<String> {
    let data = Arc::new(data);
    let (tx, rx) = mpsc::channel();

    let bytes = Arc::clone(&data);
    thread::spawn(move || {
        let _ = tx.send(pdf_extract::extract_text_from_mem(&bytes));
    });

    let primary_failure = match rx.recv_timeout(deadline) {
        Ok(Ok(text)) if !text.trim().is_empty() => return Ok(text.replace('\0', "")),
        Ok(Ok(_)) => "pdf-extract returned no text".to_string(),
        Ok(Err(e)) => format!("pdf-extract failed: {}", e),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            format!("pdf-extract timed out after {}s", deadline.as_secs())
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => "pdf-extract crashed".to_string(),
    };

    tracing::warn!("{}, trying page-by-page fallback", primary_failure);
    extract_pdf_pages(&data)
        .map_err(|fallback| Error::extraction("pdf", format!("{}; {}", primary_failure, fallback)))
}

/// Extract each page with lopdf, one line per page, in page order
fn extract_pdf_pages(data: &[u8]) -> std::result::Result<String, String> {
    let doc = lopdf::Document::load_mem(data)
        .map_err(|e| format!("failed to load PDF: {}", e))?;

    let mut text = String::new();
    for page_number in doc.get_pages().keys() {
        match doc.extract_text(&[*page_number]) {
            Ok(page) => {
                text.push_str(page.trim_end());
                text.push('\n');
            }
            Err(e) => tracing::debug!("Could not extract page {}: {}", page_number, e),
        }
    }

    if text.trim().is_empty() {
        return Err("no extractable text, the PDF may be image-based or encrypted".to_string());
    }
    Ok(text.replace('\0', ""))
}

/// Paragraphs in document order, then every table row with cells joined by tabs
fn extract_docx(data: &[u8]) -> Result<String> {
    let docx = docx_rs::read_docx(data).map_err(|e| Error::extraction("docx", e.to_string()))?;

    let mut text = String::new();
    let mut tables = Vec::new();

    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(p) => {
                text.push_str(&paragraph_text(p));
                text.push('\n');
            }
            DocumentChild::Table(t) => tables.push(t),
            _ => {}
        }
    }

    for table in tables {
        for row in table_rows(table) {
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
    }

    Ok(text)
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    for child in &paragraph.children {
        if let ParagraphChild::Run(run) = child {
            for run_child in &run.children {
                match run_child {
                    RunChild::Text(t) => text.push_str(&t.text),
                    RunChild::Tab(_) => text.push('\t'),
                    _ => {}
                }
            }
        }
    }
    text
}

#[allow(unreachable_patterns)]
fn table_rows(table: &Table) -> Vec<Vec<String>> {
    table
        .rows
        .iter()
        .filter_map(|child| match child {
            TableChild::TableRow(row) => Some(row),
            _ => None,
        })
        .map(|row| {
            row.cells
                .iter()
                .filter_map(|child| match child {
                    TableRowChild::TableCell(cell) => Some(cell),
                    _ => None,
                })
                .map(|cell| cell.children.iter().map(cell_content_text).collect::<String>())
                .collect()
        })
        .collect()
}

/// Inner text of a cell element; nested tables are flattened
fn cell_content_text(content: &TableCellContent) -> String {
    match content {
        TableCellContent::Paragraph(p) => paragraph_text(p),
        TableCellContent::Table(t) => table_rows(t).concat().concat(),
        _ => String::new(),
    }
}
