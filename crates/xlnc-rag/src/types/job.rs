//! Background job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::Metadata;
use crate::error::{Error, Result};

/// Kind of background work
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DocumentProcessing,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentProcessing => "document_processing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document_processing" => Some(Self::DocumentProcessing),
            _ => None,
        }
    }
}

/// Job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn can_become(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing | Self::Failed | Self::Cancelled) => true,
            (Self::Processing, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

/// Pipeline stage, persisted before each step runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Queued,
    Scanning,
    Extracting,
    Chunking,
    Embedding,
    Storing,
    Complete,
    Failed,
}

impl ProcessingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scanning => "scanning",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storing => "storing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "scanning" => Some(Self::Scanning),
            "extracting" => Some(Self::Extracting),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "storing" => Some(Self::Storing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A unit of background work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage: ProcessingStage,
    pub document_id: Uuid,
    pub parameters: Metadata,
    pub result: Option<Metadata>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, document_id: Uuid, parameters: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            stage: ProcessingStage::Queued,
            document_id,
            parameters,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next`, stamping start/completion times.
    ///
    /// Terminal states are final; nothing moves back to Pending.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_become(next) {
            return Err(Error::InvalidTransition(format!(
                "job {}: {} -> {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }

        let now = Utc::now();
        match next {
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.completed_at = Some(now)
            }
            JobStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn complete(&mut self, result: Metadata) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.stage = ProcessingStage::Complete;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.stage = ProcessingStage::Failed;
        self.error = Some(error.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(JobKind::DocumentProcessing, Uuid::new_v4(), Metadata::new())
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.transition(JobStatus::Processing).unwrap();
        assert!(job.started_at.is_some());
        job.complete(Metadata::new()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.stage, ProcessingStage::Complete);
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.transition(JobStatus::Processing).unwrap();
        job.fail("boom").unwrap();
        assert!(job.transition(JobStatus::Processing).is_err());
        assert!(job.complete(Metadata::new()).is_err());
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut job = job();
        assert!(job.transition(JobStatus::Completed).is_err());
        assert!(job.transition(JobStatus::Cancelled).is_ok());
    }
}
