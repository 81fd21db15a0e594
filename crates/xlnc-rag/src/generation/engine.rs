//! Retrieval-augmented answering with layered fallbacks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::analytics::{QueryEvent, QueryRecorder};
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::metadata;
use crate::providers::{
    EmbeddingProvider, GenerationParams, LlmProvider, VectorSearchResult, VectorStoreProvider,
};
use crate::retrieval::confidence;
use crate::types::metadata::keys;
use crate::types::{ChatResponse, Metadata, QuickAction, ResponseSource};

use super::actions::suggest_actions;
use super::format::format_paragraphs;
use super::prompt::PromptBuilder;

/// Confidence reported for ungrounded model answers
pub const UNGROUNDED_CONFIDENCE: f64 = 0.6;
/// Confidence reported for the canned apology
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

const FALLBACK_TEXT: &str = "I apologize, but I don't have specific information about that topic in my knowledge base. However, I'd be happy to help you schedule a meeting with our experts who can provide detailed assistance with your inquiry.";
const TECHNICAL_DIFFICULTIES_TEXT: &str = "I apologize, but I'm experiencing technical difficulties. Please try again later or contact our support team for immediate assistance.";
const SERVICE_ERROR: &str = "AI service error";

/// Answers questions from a tenant's knowledge base
pub struct RagEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStoreProvider>,
    llm: Arc<dyn LlmProvider>,
    recorder: Arc<dyn QueryRecorder>,
    prompts: PromptBuilder,
    params: GenerationParams,
    max_search_results: usize,
    similarity_threshold: f32,
    max_context_chunks: usize,
    request_timeout: Duration,
}

impl RagEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStoreProvider>,
        llm: Arc<dyn LlmProvider>,
        recorder: Arc<dyn QueryRecorder>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            llm,
            recorder,
            prompts: PromptBuilder::new(config),
            params: GenerationParams::from_config(config),
            max_search_results: config.max_search_results,
            similarity_threshold: config.similarity_threshold,
            max_context_chunks: config.max_context_chunks,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Answer `query` for `tenant`. Never fails: errors become a response
    /// with `ok == false`. The query is recorded whatever the outcome.
    pub async fn answer(
        &self,
        query: &str,
        tenant: &str,
        session_id: &str,
        context: &Metadata,
    ) -> ChatResponse {
        let (response, results) = self.respond(query, tenant, context).await;

        let event = QueryEvent::new(tenant, session_id, query, &results, response.source);
        if let Err(e) = self.recorder.record(&event).await {
            tracing::warn!("Failed to record query event: {}", e);
        }
        response
    }

    async fn respond(
        &self,
        query: &str,
        tenant: &str,
        context: &Metadata,
    ) -> (ChatResponse, Vec<VectorSearchResult>) {
        let results = match self.retrieve(query, tenant).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("Retrieval failed: {}", e);
                return (technical_difficulties(), Vec::new());
            }
        };

        if results.is_empty() {
            tracing::info!("No passages matched for tenant {}, answering ungrounded", tenant);
        } else {
            match self.grounded(query, &results, context).await {
                Ok(response) => return (response, results),
                Err(e) => tracing::warn!("Grounded generation failed, falling back: {}", e),
            }
        }

        (self.ungrounded(query, context).await, results)
    }

    async fn retrieve(&self, query: &str, tenant: &str) -> Result<Vec<VectorSearchResult>> {
        let vector = self
            .bounded("query embedding", self.embedder.embed_checked(query))
            .await?;
        let filter = metadata! {keys::TENANT => tenant};
        let results = self
            .bounded(
                "vector search",
                self.vector_store.search(
                    &vector,
                    self.max_search_results,
                    self.similarity_threshold,
                    &filter,
                ),
            )
            .await?;
        tracing::debug!("Retrieved {} passages", results.len());
        Ok(results)
    }

    async fn grounded(
        &self,
        query: &str,
        results: &[VectorSearchResult],
        context: &Metadata,
    ) -> Result<ChatResponse> {
        let mut ranked: Vec<&VectorSearchResult> = results.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let context_text = ranked
            .iter()
            .take(self.max_context_chunks)
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let text = self
            .generate(
                &self.prompts.rag_system_prompt(),
                &self.prompts.rag_user_prompt(query, &context_text, context),
                self.params,
            )
            .await?;

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        Ok(ChatResponse::success(
            format_paragraphs(&text),
            suggest_actions(query, results),
            ResponseSource::KnowledgeBase,
            confidence(&scores),
        ))
    }

    async fn ungrounded(&self, query: &str, context: &Metadata) -> ChatResponse {
        let generated = self
            .generate(
                &self.prompts.fallback_system_prompt(),
                &self.prompts.fallback_user_prompt(query, context),
                self.params.warmer(0.1),
            )
            .await;

        match generated {
            Ok(text) => ChatResponse::success(
                format_paragraphs(&text),
                vec![
                    QuickAction::schedule_meeting(),
                    QuickAction::contact_support(),
                    QuickAction::browse_services(),
                ],
                ResponseSource::Ai,
                UNGROUNDED_CONFIDENCE,
            ),
            Err(e) => {
                tracing::error!("Fallback generation failed: {}", e);
                ChatResponse::success(
                    FALLBACK_TEXT.to_string(),
                    vec![
                        QuickAction::new("schedule_meeting", "Schedule Meeting", "📅"),
                        QuickAction::contact_support(),
                    ],
                    ResponseSource::Fallback,
                    FALLBACK_CONFIDENCE,
                )
            }
        }
    }

    async fn generate(&self, system: &str, user: &str, params: GenerationParams) -> Result<String> {
        let text = self
            .bounded("generation", self.llm.generate(system, user, &params))
            .await?;
        if text.trim().is_empty() {
            return Err(Error::llm("Model returned an empty response"));
        }
        Ok(text)
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.request_timeout, call)
            .await
            .map_err(|_| Error::timeout(operation, self.request_timeout.as_secs()))?
    }
}

fn technical_difficulties() -> ChatResponse {
    ChatResponse {
        text: TECHNICAL_DIFFICULTIES_TEXT.to_string(),
        actions: Some(vec![QuickAction::contact_support()]),
        source: ResponseSource::Error,
        confidence: 0.0,
        ok: false,
        error: Some(SERVICE_ERROR.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MemoryQueryRecorder;
    use crate::providers::InMemoryVectorStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Puts texts mentioning "pricing" on one axis and everything else on another
    struct AxisEmbedder {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::embedding("offline"));
            }
            Ok(if text.to_lowercase().contains("pricing") {
                vec![1.0, 0.0]
            } else {
                vec![0.0, 1.0]
            })
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(!self.fail)
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    struct ScriptedLlm {
        reply: Option<&'static str>,
        delay: Duration,
        calls: Mutex<Vec<(String, GenerationParams)>>,
    }

    impl ScriptedLlm {
        fn new(reply: Option<&'static str>) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn generate(&self, _system: &str, user: &str, params: &GenerationParams) -> Result<String> {
            self.calls.lock().push((user.to_string(), *params));
            tokio::time::sleep(self.delay).await;
            self.reply
                .map(str::to_string)
                .ok_or_else(|| Error::llm("model unavailable"))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-1"
        }
    }

    struct Fixture {
        engine: RagEngine,
        llm: Arc<ScriptedLlm>,
        recorder: Arc<MemoryQueryRecorder>,
    }

    async fn fixture(reply: Option<&'static str>, embed_fails: bool) -> Fixture {
        let embedder = AxisEmbedder {
            fail: embed_fails,
            delay: Duration::ZERO,
        };
        fixture_with(embedder, ScriptedLlm::new(reply), GenerationConfig::default()).await
    }

    async fn fixture_with(embedder: AxisEmbedder, llm: ScriptedLlm, config: GenerationConfig) -> Fixture {
        let store = Arc::new(InMemoryVectorStore::new(2));
        store
            .store(
                &[1.0, 0.0],
                "Our pricing starts at $99 per month.",
                &metadata! {"tenant" => "t1", "category" => "business"},
            )
            .await
            .unwrap();

        let llm = Arc::new(llm);
        let recorder = Arc::new(MemoryQueryRecorder::new());
        let engine = RagEngine::new(
            Arc::new(embedder),
            store,
            llm.clone(),
            recorder.clone(),
            &config,
        );
        Fixture {
            engine,
            llm,
            recorder,
        }
    }

    #[tokio::test]
    async fn test_grounded_answer() {
        let f = fixture(Some("Plans start at $99."), false).await;
        let response = f
            .engine
            .answer("What is your pricing?", "t1", "s1", &metadata! {"page" => "plans"})
            .await;

        assert!(response.ok);
        assert_eq!(response.source, ResponseSource::KnowledgeBase);
        assert_eq!(response.text, "Plans start at $99.");
        assert!(response.confidence > 0.8);
        let actions = response.actions.unwrap();
        assert!(actions.iter().any(|a| a.id == "get_quote"));
        assert!(actions.iter().any(|a| a.id == "business_consultation"));

        let calls = f.llm.calls.lock();
        assert!(calls[0].0.contains("Our pricing starts at $99 per month."));
        assert!(calls[0].0.contains("page: plans"));

        let events = f.recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].matched_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_no_match_answers_ungrounded() {
        let f = fixture(Some("We can help with that."), false).await;
        let response = f.engine.answer("Do you build mobile apps?", "t1", "s1", &Metadata::new()).await;

        assert!(response.ok);
        assert_eq!(response.source, ResponseSource::Ai);
        assert_eq!(response.confidence, UNGROUNDED_CONFIDENCE);
        assert_eq!(response.actions.unwrap().len(), 3);

        let calls = f.llm.calls.lock();
        let default_temperature = GenerationConfig::default().temperature;
        assert!((calls[0].1.temperature - (default_temperature + 0.1)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let f = fixture(Some("General answer."), false).await;
        let response = f.engine.answer("What is your pricing?", "t2", "s1", &Metadata::new()).await;
        assert_eq!(response.source, ResponseSource::Ai);
        assert!(f.recorder.events()[0].matched_ids.is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_uses_canned_text() {
        let f = fixture(None, false).await;
        let response = f.engine.answer("What is your pricing?", "t1", "s1", &Metadata::new()).await;

        assert!(response.ok);
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(response.text, FALLBACK_TEXT);
        // grounded attempt, then the ungrounded one
        assert_eq!(f.llm.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_an_error_response() {
        let f = fixture(Some("unused"), true).await;
        let response = f.engine.answer("What is your pricing?", "t1", "s1", &Metadata::new()).await;

        assert!(!response.ok);
        assert_eq!(response.source, ResponseSource::Error);
        assert_eq!(response.error.as_deref(), Some("AI service error"));
        assert!(f.llm.calls.lock().is_empty());
        assert_eq!(f.recorder.events()[0].source, ResponseSource::Error);
    }

    fn one_second_budget() -> GenerationConfig {
        GenerationConfig {
            request_timeout_secs: 1,
            ..GenerationConfig::default()
        }
    }

    #[tokio::test]
    async fn test_slow_embedding_times_out_to_error_response() {
        let embedder = AxisEmbedder {
            fail: false,
            delay: Duration::from_secs(5),
        };
        let f = fixture_with(embedder, ScriptedLlm::new(Some("unused")), one_second_budget()).await;
        let response = f.engine.answer("What is your pricing?", "t1", "s1", &Metadata::new()).await;

        assert!(!response.ok);
        assert_eq!(response.source, ResponseSource::Error);
        assert_eq!(response.error.as_deref(), Some("AI service error"));
        assert!(f.llm.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_slow_generation_times_out_to_canned_text() {
        let embedder = AxisEmbedder {
            fail: false,
            delay: Duration::ZERO,
        };
        let llm = ScriptedLlm {
            delay: Duration::from_secs(5),
            ..ScriptedLlm::new(Some("too late"))
        };
        let f = fixture_with(embedder, llm, one_second_budget()).await;
        let response = f.engine.answer("What is your pricing?", "t1", "s1", &Metadata::new()).await;

        assert!(response.ok);
        assert_eq!(response.source, ResponseSource::Fallback);
        assert_eq!(response.text, FALLBACK_TEXT);
        assert_eq!(f.llm.calls.lock().len(), 2);
        assert_eq!(f.recorder.events()[0].source, ResponseSource::Fallback);
    }
}
