//! Document ingestion: text extraction, chunking and chunk annotation

mod chunker;
mod extractor;
mod keywords;

pub use chunker::{split_sentences, ChunkDraft, TextChunker};
pub use extractor::TextExtractor;
pub use keywords::{categorize, extract_keywords, MAX_KEYWORDS};
