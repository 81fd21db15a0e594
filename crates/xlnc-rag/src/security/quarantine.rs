//! Quarantine area for infected uploads
//!
//! Files land in `<root>/<YYYY-MM-DD>/<timestamp>_<threat>_<filename>` next to a
//! `.metadata` JSON sidecar describing where they came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const METADATA_SUFFIX: &str = ".metadata";

/// Sidecar describing one quarantined file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuarantineRecord {
    pub original_path: PathBuf,
    pub quarantined_path: PathBuf,
    pub threat_name: String,
    pub size_bytes: u64,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineRecord {
    fn metadata_path(&self) -> PathBuf {
        sidecar_path(&self.quarantined_path)
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(METADATA_SUFFIX);
    PathBuf::from(raw)
}

/// Keep only characters that are safe in a file name
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Move a file, falling back to copy + remove across filesystems
fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

pub struct Quarantine {
    root: PathBuf,
}

impl Quarantine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move `path` into quarantine and write its sidecar
    pub fn quarantine(&self, path: &Path, threat_name: &str) -> Result<QuarantineRecord> {
        let now = Utc::now();
        let day_dir = self.root.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&day_dir)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::internal(format!("no file name in {}", path.display())))?;

        let target = day_dir.join(format!(
            "{}_{}_{}",
            now.format("%Y%m%d_%H%M%S%3f"),
            sanitize(threat_name),
            sanitize(file_name)
        ));

        let size_bytes = fs::metadata(path)?.len();
        move_file(path, &target)?;

        let record = QuarantineRecord {
            original_path: path.to_path_buf(),
            quarantined_path: target,
            threat_name: threat_name.to_string(),
            size_bytes,
            quarantined_at: now,
        };
        fs::write(record.metadata_path(), serde_json::to_vec_pretty(&record)?)?;

        tracing::warn!(
            "Quarantined {} ({}) as {}",
            path.display(),
            threat_name,
            record.quarantined_path.display()
        );
        Ok(record)
    }

    /// All quarantined files, newest first
    pub fn list(&self) -> Result<Vec<QuarantineRecord>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let is_sidecar = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(METADATA_SUFFIX));
            if !entry.file_type().is_file() || !is_sidecar {
                continue;
            }

            match fs::read(entry.path())
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_slice::<QuarantineRecord>(&raw).map_err(Error::from))
            {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable quarantine record {}: {}", entry.path().display(), e),
            }
        }

        records.sort_by(|a, b| b.quarantined_at.cmp(&a.quarantined_at));
        Ok(records)
    }

    /// Move a quarantined file back to `destination` and drop its sidecar
    pub fn restore(&self, record: &QuarantineRecord, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(&record.quarantined_path, destination)?;
        fs::remove_file(record.metadata_path())?;
        tracing::info!(
            "Restored quarantined file {} to {}",
            record.quarantined_path.display(),
            destination.display()
        );
        Ok(())
    }

    /// Permanently remove a quarantined file and its sidecar
    pub fn delete(&self, record: &QuarantineRecord) -> Result<()> {
        fs::remove_file(&record.quarantined_path)?;
        fs::remove_file(record.metadata_path())?;
        tracing::info!("Deleted quarantined file {}", record.quarantined_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarantine_list_restore() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("report.pdf");
        fs::write(&upload, b"%PDF-1.4 infected").unwrap();

        let quarantine = Quarantine::new(dir.path().join("quarantine"));
        let record = quarantine.quarantine(&upload, "Eicar-Test-Signature").unwrap();

        assert!(!upload.exists());
        assert!(record.quarantined_path.exists());
        let name = record.quarantined_path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_Eicar-Test-Signature_report.pdf"));

        let listed = quarantine.list().unwrap();
        assert_eq!(listed, vec![record.clone()]);

        quarantine.restore(&record, &upload).unwrap();
        assert!(upload.exists());
        assert!(quarantine.list().unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let upload = dir.path().join("a b.doc");
        fs::write(&upload, b"data").unwrap();

        let quarantine = Quarantine::new(dir.path().join("q"));
        let record = quarantine.quarantine(&upload, "Bad/Threat").unwrap();
        assert!(record
            .quarantined_path
            .to_str()
            .unwrap()
            .ends_with("_Bad_Threat_a_b.doc"));

        quarantine.delete(&record).unwrap();
        assert!(!record.quarantined_path.exists());
        assert!(quarantine.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_missing_root() {
        let quarantine = Quarantine::new("/nonexistent/xlnc/quarantine");
        assert!(quarantine.list().unwrap().is_empty());
    }
}
