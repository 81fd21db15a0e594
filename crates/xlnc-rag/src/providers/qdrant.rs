//! Qdrant vector store over its REST API

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::VectorDbConfig;
use crate::error::{Error, Result};
use crate::types::metadata::{from_json_object, keys, to_json_object};
use crate::types::{Metadata, MetadataValue};

use super::vector_store::{VectorSearchResult, VectorStoreProvider};

/// Payload fields indexed for filtering
const INDEXED_FIELDS: [&str; 3] = [keys::DOCUMENT_ID, keys::CATEGORY, keys::TENANT];
const SCROLL_PAGE: usize = 1000;

/// Qdrant collection client
pub struct QdrantVectorStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimensions: usize,
    ready: OnceCell<()>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    id: Value,
    #[serde(default)]
    payload: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
struct ScrollPage {
    points: Vec<RetrievedPoint>,
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    #[serde(default)]
    points_count: Option<u64>,
}

impl QdrantVectorStore {
    pub fn new(config: &VectorDbConfig, dimensions: usize, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
            dimensions,
            ready: OnceCell::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/collections/{}{}", self.base_url, self.collection, path);
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| Error::vector_store(format!("Qdrant {} failed: {}", operation, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vector_store(format!(
                "Qdrant {} failed ({}): {}",
                operation, status, body
            )));
        }
        Ok(response)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &str,
    ) -> Result<T> {
        let response = self.send(builder, operation).await?;
        let envelope: Envelope<T> = response.json().await.map_err(|e| {
            Error::vector_store(format!("Failed to parse Qdrant {} response: {}", operation, e))
        })?;
        Ok(envelope.result)
    }

    /// Create the collection and its payload indexes on first use
    async fn ensure_collection(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                let exists = self
                    .request(Method::GET, "")
                    .send()
                    .await
                    .map(|r| r.status().is_success())
                    .unwrap_or(false);

                if !exists {
                    tracing::info!(
                        "Creating Qdrant collection {} ({} dimensions)",
                        self.collection,
                        self.dimensions
                    );
                    let body = json!({
                        "vectors": {"size": self.dimensions, "distance": "Cosine"}
                    });
                    self.send(self.request(Method::PUT, "").json(&body), "create collection")
                        .await?;

                    for field in INDEXED_FIELDS {
                        let body = json!({"field_name": field, "field_schema": "keyword"});
                        if let Err(e) = self
                            .send(self.request(Method::PUT, "/index").json(&body), "create index")
                            .await
                        {
                            tracing::warn!("Could not index payload field {}: {}", field, e);
                        }
                    }
                }
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }
}

/// Qdrant filter clause for an exact-match conjunction
fn filter_clause(filters: &Metadata) -> Option<Value> {
    if filters.is_empty() {
        return None;
    }
    let must: Vec<Value> = filters
        .iter()
        .map(|(key, value)| match value {
            MetadataValue::StringList(any) => json!({"key": key, "match": {"any": any}}),
            other => json!({"key": key, "match": {"value": other.to_json()}}),
        })
        .collect();
    Some(json!({"must": must}))
}

fn point_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Split a payload into passage text and metadata
fn split_payload(payload: Option<serde_json::Map<String, Value>>) -> (String, Metadata) {
    let mut payload = payload.unwrap_or_default();
    let content = match payload.remove(keys::CONTENT) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    (content, from_json_object(&payload))
}

#[async_trait]
impl VectorStoreProvider for QdrantVectorStore {
    async fn store(&self, vector: &[f32], content: &str, metadata: &Metadata) -> Result<String> {
        if vector.len() != self.dimensions {
            return Err(Error::vector_store(format!(
                "Vector has {} dimensions, collection expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.ensure_collection().await?;

        let id = Uuid::new_v4().to_string();
        let mut payload = to_json_object(metadata);
        payload.insert(keys::CONTENT.to_string(), Value::String(content.to_string()));
        payload.insert(
            keys::TIMESTAMP.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let body = json!({
            "points": [{"id": id, "vector": vector, "payload": payload}]
        });
        self.send(
            self.request(Method::PUT, "/points?wait=true").json(&body),
            "upsert",
        )
        .await?;
        Ok(id)
    }

    async fn search(
        &self,
        query: &[f32],
        limit: usize,
        score_threshold: f32,
        filters: &Metadata,
    ) -> Result<Vec<VectorSearchResult>> {
        self.ensure_collection().await?;

        let mut body = json!({
            "vector": query,
            "limit": limit,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        if let Some(filter) = filter_clause(filters) {
            body["filter"] = filter;
        }

        let points: Vec<ScoredPoint> = self
            .send_json(self.request(Method::POST, "/points/search").json(&body), "search")
            .await?;

        Ok(points
            .into_iter()
            .map(|point| {
                let (content, metadata) = split_payload(point.payload);
                VectorSearchResult {
                    id: point_id(&point.id),
                    content,
                    score: point.score.clamp(0.0, 1.0),
                    metadata,
                }
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<VectorSearchResult>> {
        self.ensure_collection().await?;

        let response = self
            .request(Method::GET, &format!("/points/{}", id))
            .send()
            .await
            .map_err(|e| Error::vector_store(format!("Qdrant get failed: {}", e)))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::vector_store(format!(
                "Qdrant get failed ({})",
                response.status()
            )));
        }

        let envelope: Envelope<RetrievedPoint> = response
            .json()
            .await
            .map_err(|e| Error::vector_store(format!("Failed to parse Qdrant point: {}", e)))?;
        let (content, metadata) = split_payload(envelope.result.payload);
        Ok(Some(VectorSearchResult {
            id: point_id(&envelope.result.id),
            content,
            score: 1.0,
            metadata,
        }))
    }

    async fn update_metadata(&self, id: &str, metadata: &Metadata) -> Result<bool> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        let body = json!({"payload": to_json_object(metadata), "points": [id]});
        self.send(
            self.request(Method::POST, "/points/payload?wait=true").json(&body),
            "set payload",
        )
        .await?;
        Ok(true)
    }

    async fn ids_by_document(&self, document_id: &str) -> Result<Vec<String>> {
        self.ensure_collection().await?;

        let filter = filter_clause(&crate::metadata! {keys::DOCUMENT_ID => document_id});
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": filter,
                "limit": SCROLL_PAGE,
                "with_payload": false,
                "with_vector": false,
            });
            if let Some(offset) = offset.take() {
                body["offset"] = offset;
            }

            let page: ScrollPage = self
                .send_json(self.request(Method::POST, "/points/scroll").json(&body), "scroll")
                .await?;
            ids.extend(page.points.iter().map(|p| point_id(&p.id)));

            match page.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }
        let body = json!({"points": [id]});
        self.send(
            self.request(Method::POST, "/points/delete?wait=true").json(&body),
            "delete",
        )
        .await?;
        Ok(true)
    }

    async fn delete_by_filter(&self, filters: &Metadata) -> Result<bool> {
        let Some(filter) = filter_clause(filters) else {
            return Err(Error::vector_store("Refusing to delete with an empty filter"));
        };
        self.ensure_collection().await?;

        let body = json!({"filter": filter});
        self.send(
            self.request(Method::POST, "/points/delete?wait=true").json(&body),
            "delete by filter",
        )
        .await?;
        Ok(true)
    }

    async fn collection_size(&self) -> Result<u64> {
        self.ensure_collection().await?;
        let info: CollectionInfo = self
            .send_json(self.request(Method::GET, ""), "collection info")
            .await?;
        Ok(info.points_count.unwrap_or(0))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/collections", self.base_url);
        let mut builder = self.client.get(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        match builder.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "qdrant"
    }
}
