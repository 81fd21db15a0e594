//! Upload security: validation, malware scanning and quarantine

pub mod quarantine;
pub mod scanner;
pub mod validation;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

pub use quarantine::{Quarantine, QuarantineRecord};
pub use scanner::{parse_response, ClamAvScanner, ScanResult, ScanVerdict};
pub use validation::UploadValidator;

/// Trait for malware scanners
///
/// Implementations:
/// - `ClamAvScanner`: clamd over TCP
#[async_trait]
pub trait MalwareScanner: Send + Sync {
    /// Scan an in-memory payload
    async fn scan_bytes(&self, data: &[u8]) -> Result<ScanResult>;

    /// Scan a file on disk, streaming it to the scanner
    async fn scan_file(&self, path: &Path) -> Result<ScanResult>;

    /// Check if the scanner can currently take requests
    async fn is_available(&self) -> bool;

    /// Get scanner name for logging
    fn name(&self) -> &str;
}
