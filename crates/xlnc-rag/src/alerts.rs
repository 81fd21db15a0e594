//! Alert delivery

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::types::Alert;

/// Destination for operational alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert) -> Result<()>;
}

/// Collects alerts in memory
#[derive(Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

#[async_trait]
impl AlertSink for MemoryAlertSink {
    async fn raise(&self, alert: Alert) -> Result<()> {
        tracing::warn!("Alert raised: {:?} - {}", alert.alert_type, alert.title);
        self.alerts.lock().push(alert);
        Ok(())
    }
}
