//! Sentence-packing chunker with overlap and byte-span tracking

use std::ops::Range;

use crate::config::ChunkingConfig;
use crate::error::{Error, Result};

use super::keywords::{categorize, extract_keywords, MAX_KEYWORDS};

/// A chunk before it is embedded
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub index: usize,
    pub content: String,
    /// Byte span in the source text, `[start, end)`
    pub start: usize,
    pub end: usize,
    /// Bytes at the start of `content` repeated from the previous chunk
    pub overlap_len: usize,
    pub category: Option<String>,
    pub keywords: Vec<String>,
}

/// Text chunker with configurable size and overlap
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Characters carried into the next chunk
    overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(Error::Config(format!(
                "invalid chunking: size {} overlap {}",
                chunk_size, overlap
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Chunk `text` and annotate each chunk with a category and keywords
    pub fn chunk(&self, text: &str, categories: &[String]) -> Vec<ChunkDraft> {
        self.pack(text)
            .into_iter()
            .enumerate()
            .map(|(index, mut draft)| {
                draft.index = index;
                draft.category = categorize(&draft.content, categories);
                draft.keywords = extract_keywords(&draft.content, MAX_KEYWORDS);
                draft
            })
            .collect()
    }

    /// Pack sentences into chunks without annotation
    fn pack(&self, text: &str) -> Vec<ChunkDraft> {
        let mut drafts = Vec::new();
        let mut buffer: Vec<Range<usize>> = Vec::new();
        let mut buffer_chars = 0usize;
        let mut carried = 0usize;

        for sentence in split_sentences(text) {
            let sentence_chars = text[sentence.clone()].chars().count();

            if !buffer.is_empty() && buffer_chars + 1 + sentence_chars > self.chunk_size {
                drafts.push(render(text, &buffer, carried));

                buffer = self.overlap_tail(text, &buffer);
                buffer_chars = joined_chars(text, &buffer);
                // Drop the overlap rather than exceed the size with it
                if !buffer.is_empty() && buffer_chars + 1 + sentence_chars > self.chunk_size {
                    buffer.clear();
                    buffer_chars = 0;
                }
                carried = joined_len(&buffer);
            }

            buffer_chars += if buffer.is_empty() {
                sentence_chars
            } else {
                1 + sentence_chars
            };
            buffer.push(sentence);
        }

        if !buffer.is_empty() {
            drafts.push(render(text, &buffer, carried));
        }

        drafts
    }

    /// Trailing `overlap` characters of the buffer as source ranges.
    ///
    /// A buffer no longer than `overlap` is carried whole. Otherwise the
    /// window is shortened to start after its last space when that space
    /// lies in the window's second half. Leading whitespace is skipped.
    fn overlap_tail(&self, text: &str, buffer: &[Range<usize>]) -> Vec<Range<usize>> {
        if self.overlap == 0 {
            return Vec::new();
        }

        let content = join(text, buffer);
        let total = content.chars().count();
        let mut start = 0;
        if total > self.overlap {
            let take = self.overlap;
            let window_start = content
                .char_indices()
                .nth(total - take)
                .map(|(i, _)| i)
                .unwrap_or(content.len());

            start = window_start;
            if let Some(space) = content[window_start..].rfind(' ') {
                let space_chars = content[window_start..window_start + space].chars().count();
                if space_chars > take / 2 {
                    start = window_start + space + 1;
                }
            }
        }

        while let Some(c) = content[start..].chars().next() {
            if !c.is_whitespace() {
                break;
            }
            start += c.len_utf8();
        }

        // Map the content offset back onto source ranges
        let mut tail = Vec::new();
        let mut offset = 0usize;
        for piece in buffer {
            let piece_end = offset + piece.len();
            if start < piece_end {
                let from = piece.start + start.saturating_sub(offset);
                tail.push(from..piece.end);
            }
            offset = piece_end + 1;
        }
        tail
    }
}

/// Sentence ranges: a sentence ends at `.`, `!` or `?` followed by whitespace.
/// Whitespace between sentences belongs to none of them.
pub fn split_sentences(text: &str) -> Vec<Range<usize>> {
    let mut sentences = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if start.is_none() {
            if c.is_whitespace() {
                continue;
            }
            start = Some(i);
        }

        if matches!(c, '.' | '!' | '?') {
            let followed_by_space = chars.peek().is_some_and(|(_, next)| next.is_whitespace());
            if followed_by_space {
                if let Some(s) = start.take() {
                    sentences.push(s..i + c.len_utf8());
                }
            }
        }
    }

    if let Some(s) = start {
        let end = s + text[s..].trim_end().len();
        if end > s {
            sentences.push(s..end);
        }
    }

    sentences
}

fn join(text: &str, pieces: &[Range<usize>]) -> String {
    pieces
        .iter()
        .map(|r| &text[r.clone()])
        .collect::<Vec<_>>()
        .join(" ")
}

fn joined_len(pieces: &[Range<usize>]) -> usize {
    let bytes: usize = pieces.iter().map(|r| r.len()).sum();
    bytes + pieces.len().saturating_sub(1)
}

fn joined_chars(text: &str, pieces: &[Range<usize>]) -> usize {
    let chars: usize = pieces.iter().map(|r| text[r.clone()].chars().count()).sum();
    chars + pieces.len().saturating_sub(1)
}

fn render(text: &str, buffer: &[Range<usize>], carried: usize) -> ChunkDraft {
    ChunkDraft {
        index: 0,
        content: join(text, buffer),
        start: buffer.first().map(|r| r.start).unwrap_or(0),
        end: buffer.last().map(|r| r.end).unwrap_or(0),
        overlap_len: carried,
        category: None,
        keywords: Vec::new(),
    }
}
