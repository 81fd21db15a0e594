//! Answer generation: prompts, formatting, follow-up actions, enrichment and the RAG engine

mod actions;
mod enrich;
mod engine;
mod format;
mod prompt;

pub use actions::suggest_actions;
pub use enrich::{ContentEnricher, DEFAULT_CATEGORY, DEFAULT_SUMMARY_CHARS};
pub use engine::{RagEngine, FALLBACK_CONFIDENCE, UNGROUNDED_CONFIDENCE};
pub use format::format_paragraphs;
pub use prompt::PromptBuilder;
