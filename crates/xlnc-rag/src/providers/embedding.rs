//! Embedding provider trait: passages and questions in, vectors out

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Turns chunk text and user questions into vectors of a fixed width
///
/// Implementations:
/// - `OllamaEmbedder`: Local Ollama server (nomic-embed-text)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Raw embedding for one text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding for one text, rejected when its width is not [`dimensions`](Self::dimensions)
    async fn embed_checked(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.embed(text).await?;
        if vector.len() != self.dimensions() {
            return Err(Error::embedding(format!(
                "{} returned {} dimensions, expected {}",
                self.name(),
                vector.len(),
                self.dimensions()
            )));
        }
        Ok(vector)
    }

    /// Vector width (768 for nomic-embed-text)
    fn dimensions(&self) -> usize;

    async fn health_check(&self) -> Result<bool>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
