//! Vector store provider trait for storing and searching embeddings

use async_trait::async_trait;

use crate::error::Result;
use crate::types::metadata::keys;
use crate::types::{Metadata, MetadataValue};

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct VectorSearchResult {
    /// Point id assigned on store
    pub id: String,
    /// Stored passage text
    pub content: String,
    /// Similarity score (0.0 to 1.0, higher is more similar)
    pub score: f32,
    /// Payload without `content`
    pub metadata: Metadata,
}

impl VectorSearchResult {
    pub fn category(&self) -> Option<&str> {
        self.metadata.get(keys::CATEGORY).and_then(MetadataValue::as_str)
    }

    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get(keys::DOCUMENT_ID).and_then(MetadataValue::as_str)
    }
}

/// Exact-match conjunction over metadata keys.
///
/// A string filter matches a string value equal to it or a list containing
/// it; other values must be equal.
pub fn matches_filters(metadata: &Metadata, filters: &Metadata) -> bool {
    filters.iter().all(|(key, wanted)| match metadata.get(key) {
        None => false,
        Some(actual) => match (wanted, actual) {
            (MetadataValue::String(w), MetadataValue::StringList(list)) => list.contains(w),
            (MetadataValue::StringList(w), actual) => {
                let values = actual.strings();
                w.iter().any(|candidate| values.contains(&candidate.as_str()))
            }
            _ => wanted == actual,
        },
    })
}

/// Trait for vector storage and similarity search
///
/// Implementations:
/// - `InMemoryVectorStore`: brute-force cosine search in process
/// - `QdrantVectorStore`: Qdrant REST API
#[async_trait]
pub trait VectorStoreProvider: Send + Sync {
    /// Store a vector with its text and metadata, returning a fresh id
    async fn store(&self, vector: &[f32], content: &str, metadata: &Metadata) -> Result<String>;

    /// Search for similar vectors, best first, dropping scores below the threshold
    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: &Metadata,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Fetch a stored point
    async fn get(&self, id: &str) -> Result<Option<VectorSearchResult>>;

    /// Merge `metadata` into a point's payload
    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<bool>;

    /// Ids of every point stored for a document
    async fn ids_by_document(&self, document_id: &str) -> Result<Vec<String>>;

    /// Delete a point by id
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every point matching the filters
    async fn delete_by_filter(&self, filters: &Metadata) -> Result<bool>;

    /// Get total number of vectors stored
    async fn collection_size(&self) -> Result<u64>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata;

    #[test]
    fn test_matches_filters() {
        let payload = metadata! {
            "tenant" => "t1",
            "documentId" => "d1",
            "keywords" => vec!["rust".to_string(), "async".to_string()],
        };

        assert!(matches_filters(&payload, &metadata! {"tenant" => "t1"}));
        assert!(matches_filters(&payload, &metadata! {"tenant" => "t1", "documentId" => "d1"}));
        assert!(!matches_filters(&payload, &metadata! {"tenant" => "t2"}));
        assert!(!matches_filters(&payload, &metadata! {"category" => "legal"}));
        assert!(matches_filters(&payload, &metadata! {"keywords" => "rust"}));
        assert!(matches_filters(&payload, &Metadata::new()));
    }
}
