//! Query analytics

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::providers::VectorSearchResult;
use crate::types::ResponseSource;

/// One answered query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEvent {
    pub id: Uuid,
    pub tenant: String,
    pub session_id: String,
    pub query: String,
    /// Vector ids of every passage the search returned
    pub matched_ids: Vec<String>,
    pub best_score: Option<f32>,
    pub source: ResponseSource,
    pub timestamp: DateTime<Utc>,
}

impl QueryEvent {
    pub fn new(
        tenant: &str,
        session_id: &str,
        query: &str,
        results: &[VectorSearchResult],
        source: ResponseSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            session_id: session_id.to_string(),
            query: query.to_string(),
            matched_ids: results.iter().map(|r| r.id.clone()).collect(),
            best_score: results.iter().map(|r| r.score).reduce(f32::max),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// Destination for query events
#[async_trait]
pub trait QueryRecorder: Send + Sync {
    async fn record(&self, event: &QueryEvent) -> Result<()>;
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemoryQueryRecorder {
    events: Mutex<Vec<QueryEvent>>,
}

impl MemoryQueryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<QueryEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl QueryRecorder for MemoryQueryRecorder {
    async fn record(&self, event: &QueryEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Metadata;

    #[test]
    fn test_best_score() {
        let hit = |id: &str, score: f32| VectorSearchResult {
            id: id.to_string(),
            content: String::new(),
            score,
            metadata: Metadata::new(),
        };
        let event = QueryEvent::new(
            "t1",
            "s1",
            "q",
            &[hit("a", 0.72), hit("b", 0.91)],
            ResponseSource::KnowledgeBase,
        );
        assert_eq!(event.matched_ids, vec!["a", "b"]);
        assert_eq!(event.best_score, Some(0.91));

        let empty = QueryEvent::new("t1", "s1", "q", &[], ResponseSource::Ai);
        assert_eq!(empty.best_score, None);
    }
}
