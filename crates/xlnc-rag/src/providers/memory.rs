//! In-process vector store with brute-force cosine search

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::metadata::keys;
use crate::types::{Metadata, MetadataValue};

use super::vector_store::{matches_filters, VectorSearchResult, VectorStoreProvider};

struct StoredPoint {
    vector: Vec<f32>,
    content: String,
    metadata: Metadata,
    /// Insertion order, used to break score ties
    seq: u64,
}

#[derive(Default)]
struct Points {
    by_id: HashMap<String, StoredPoint>,
    next_seq: u64,
}

/// Vector store kept entirely in memory
pub struct InMemoryVectorStore {
    dimensions: usize,
    points: RwLock<Points>,
}

impl InMemoryVectorStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            points: RwLock::new(Points::default()),
        }
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::vector_store(format!(
                "Vector has {} dimensions, collection expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(())
    }

    fn to_result(id: &str, point: &StoredPoint, score: f32) -> VectorSearchResult {
        VectorSearchResult {
            id: id.to_string(),
            content: point.content.clone(),
            score,
            metadata: point.metadata.clone(),
        }
    }
}

/// Cosine similarity clamped to `[0, 1]`; zero vectors score 0
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStoreProvider for InMemoryVectorStore {
    async fn store(&self, vector: &[f32], content: &str, metadata: &Metadata) -> Result<String> {
        self.check_dimensions(vector)?;

        let id = Uuid::new_v4().to_string();
        let mut payload = metadata.clone();
        payload.insert(keys::TIMESTAMP.to_string(), Utc::now().to_rfc3339().into());

        let mut points = self.points.write();
        let seq = points.next_seq;
        points.next_seq += 1;
        points.by_id.insert(
            id.clone(),
            StoredPoint {
                vector: vector.to_vec(),
                content: content.to_string(),
                metadata: payload,
                seq,
            },
        );
        Ok(id)
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: &Metadata,
    ) -> Result<Vec<VectorSearchResult>> {
        self.check_dimensions(query)?;

        let points = self.points.read();
        let mut scored: Vec<(f32, u64, &String, &StoredPoint)> = points
            .by_id
            .iter()
            .filter(|(_, point)| matches_filters(&point.metadata, filters))
            .map(|(id, point)| (cosine_score(query, &point.vector), point.seq, id, point))
            .filter(|(score, ..)| *score >= score_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(score, _, id, point)| Self::to_result(id, point, score))
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<VectorSearchResult>> {
        Ok(self
            .points
            .read()
            .by_id
            .get(id)
            .map(|point| Self::to_result(id, point, 1.0)))
    }

    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<bool> {
        let mut points = self.points.write();
        match points.by_id.get_mut(id) {
            Some(point) => {
                point
                    .metadata
                    .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ids_by_document(&self, document_id: &str) -> Result<Vec<String>> {
        let points = self.points.read();
        let mut matching: Vec<(u64, String)> = points
            .by_id
            .iter()
            .filter(|(_, point)| {
                point.metadata.get(keys::DOCUMENT_ID).and_then(MetadataValue::as_str)
                    == Some(document_id)
            })
            .map(|(id, point)| (point.seq, id.clone()))
            .collect();
        matching.sort();
        Ok(matching.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.points.write().by_id.remove(id).is_some())
    }

    async fn delete_by_filter(&self, filters: &Metadata) -> Result<bool> {
        if filters.is_empty() {
            return Err(Error::vector_store("Refusing to delete with an empty filter"));
        }
        let mut points = self.points.write();
        let before = points.by_id.len();
        points
            .by_id
            .retain(|_, point| !matches_filters(&point.metadata, filters));
        Ok(points.by_id.len() < before)
    }

    async fn collection_size(&self) -> Result<u64> {
        Ok(self.points.read().by_id.len() as u64)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
