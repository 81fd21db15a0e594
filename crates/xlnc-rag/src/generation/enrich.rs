//! Model-backed content enrichment: keywords, summaries and category picks

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::providers::{GenerationParams, LlmProvider};

/// Category returned when no candidate is offered
pub const DEFAULT_CATEGORY: &str = "general";
/// Summary length used when the caller has no preference
pub const DEFAULT_SUMMARY_CHARS: usize = 500;

const MAX_KEYWORDS: usize = 10;
const KEYWORD_BULLETS: &[char] = &['-', '*', '•'];

/// Keyword, summary and category calls against the answer model.
///
/// None of these fail. A model error or timeout degrades to a local result.
#[derive(Clone)]
pub struct ContentEnricher {
    llm: Arc<dyn LlmProvider>,
    top_p: f32,
    request_timeout: Duration,
}

impl ContentEnricher {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &GenerationConfig) -> Self {
        Self {
            llm,
            top_p: config.top_p,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    /// Up to ten keywords or key phrases, empty when the model is unavailable
    pub async fn keywords(&self, content: &str) -> Vec<String> {
        let system = "Extract the 10 most important keywords and key phrases from the following content. \
                      Return only the keywords, one per line, without any additional text or formatting.";
        let user = format!("Content: {}", content);

        match self.ask(system, &user, 0.3, 200).await {
            Ok(reply) => reply
                .lines()
                .map(|line| line.trim().trim_start_matches(KEYWORD_BULLETS).trim())
                .filter(|line| !line.is_empty())
                .take(MAX_KEYWORDS)
                .map(str::to_string)
                .collect(),
            Err(e) => {
                tracing::error!("Keyword extraction failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Summary of roughly `max_chars` characters.
    ///
    /// Falls back to the first `max_chars` characters of `content` followed by
    /// an ellipsis, or the whole content when it is already short enough.
    pub async fn summarize(&self, content: &str, max_chars: usize) -> String {
        let system = format!(
            "Summarize the following content in approximately {} characters. \
             Make it concise but comprehensive, highlighting the key points.",
            max_chars
        );
        let user = format!("Content to summarize: {}", content);
        let max_tokens = u32::try_from(max_chars / 3).unwrap_or(u32::MAX).max(100);

        match self.ask(&system, &user, 0.3, max_tokens).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                tracing::error!("Summarization failed: {}", e);
                truncate_chars(content, max_chars)
            }
        }
    }

    /// The candidate that best fits `content`.
    ///
    /// The model's pick is matched case-insensitively against `categories`;
    /// anything else resolves to the first candidate.
    pub async fn categorize(&self, content: &str, categories: &[String]) -> String {
        let Some(first) = categories.first() else {
            return DEFAULT_CATEGORY.to_string();
        };

        let system = format!(
            "Categorize the following content into one of these categories: {}. \
             Return only the category name that best fits the content.",
            categories.join(", ")
        );
        let user = format!("Content: {}", content);

        match self.ask(&system, &user, 0.1, 50).await {
            Ok(reply) => {
                let pick = reply.trim();
                categories
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(pick))
                    .unwrap_or(first)
                    .clone()
            }
            Err(e) => {
                tracing::error!("Categorization failed: {}", e);
                first.clone()
            }
        }
    }

    async fn ask(&self, system: &str, user: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let params = GenerationParams {
            temperature,
            max_tokens,
            top_p: self.top_p,
        };
        timeout(self.request_timeout, self.llm.generate(system, user, &params))
            .await
            .map_err(|_| Error::timeout(self.llm.name(), self.request_timeout.as_secs()))?
    }
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
