//! Provider abstractions for embeddings, LLM and vector storage
//!
//! Trait-based so the pipeline and the answer engine can run against a local
//! Ollama and Qdrant, the in-memory store, or test doubles.

pub mod embedding;
pub mod llm;
pub mod memory;
pub mod ollama;
pub mod qdrant;
pub mod vector_store;

pub use embedding::EmbeddingProvider;
pub use llm::{GenerationParams, LlmProvider};
pub use memory::InMemoryVectorStore;
pub use ollama::{OllamaClient, OllamaEmbedder, OllamaLlm};
pub use qdrant::QdrantVectorStore;
pub use vector_store::{VectorSearchResult, VectorStoreProvider};
