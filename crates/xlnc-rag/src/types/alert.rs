//! Operational alerts raised by the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::{Metadata, MetadataValue};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    VirusDetected,
    ProcessingFailure,
    SystemError,
    SecurityThreat,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VirusDetected => "virus_detected",
            Self::ProcessingFailure => "processing_failure",
            Self::SystemError => "system_error",
            Self::SecurityThreat => "security_threat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "virus_detected" => Some(Self::VirusDetected),
            "processing_failure" => Some(Self::ProcessingFailure),
            "system_error" => Some(Self::SystemError),
            "security_threat" => Some(Self::SecurityThreat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub details: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            title: title.into(),
            description: description.into(),
            details: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}
