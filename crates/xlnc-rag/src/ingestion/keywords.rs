//! Category assignment and keyword extraction for chunks

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Keywords returned per chunk
pub const MAX_KEYWORDS: usize = 10;

static CATEGORY_KEYWORDS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            "technical",
            &["api", "code", "programming", "software", "system", "technical", "development"][..],
        ),
        (
            "business",
            &["business", "strategy", "market", "customer", "revenue", "profit", "management"][..],
        ),
        (
            "support",
            &["help", "support", "issue", "problem", "troubleshoot", "fix", "error"][..],
        ),
        (
            "legal",
            &["legal", "contract", "agreement", "terms", "policy", "compliance", "regulation"][..],
        ),
        (
            "finance",
            &["finance", "budget", "cost", "price", "payment", "invoice", "accounting"][..],
        ),
    ])
});

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "is",
        "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did",
        "will", "would", "could", "should", "may", "might", "must", "can", "this", "that",
        "these", "those", "a", "an", "as", "if", "then", "than", "so", "very", "just", "now",
        "here", "there", "where", "when", "why", "how", "all", "any", "both", "each", "few",
        "more", "most", "other", "some", "such", "only", "own", "same", "too", "don",
    ]
    .into_iter()
    .collect()
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w{3,}\b").expect("valid word regex"));

/// Number of a category's keywords that occur in `lowered`
fn category_score(category: &str, lowered: &str) -> usize {
    CATEGORY_KEYWORDS
        .get(category.to_lowercase().as_str())
        .map(|words| words.iter().filter(|w| lowered.contains(*w)).count())
        .unwrap_or(0)
}

/// Pick the candidate whose keywords occur most in `content`.
///
/// Ties go to the earlier candidate. When nothing scores, the first candidate
/// is returned; with no candidates there is no category.
pub fn categorize(content: &str, candidates: &[String]) -> Option<String> {
    let first = candidates.first()?;
    let lowered = content.to_lowercase();

    let mut best: Option<(&String, usize)> = None;
    for candidate in candidates {
        let score = category_score(candidate, &lowered);
        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }

    Some(best.map_or(first, |(candidate, _)| candidate).clone())
}

/// Most frequent non-stop-words of three or more characters.
///
/// Ties keep first-occurrence order.
pub fn extract_keywords(content: &str, limit: usize) -> Vec<String> {
    let lowered = content.to_lowercase();
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, m) in WORD.find_iter(&lowered).enumerate() {
        let word = m.as_str();
        if STOP_WORDS.contains(word) {
            continue;
        }
        counts.entry(word).or_insert((0, position)).0 += 1;
    }

    let mut ranked: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .map(|(word, (count, first))| (word, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _, _)| word.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_categorize_highest_score_wins() {
        let text = "Our invoice and payment terms follow the budget. Contract details apply.";
        // finance: invoice, payment, budget = 3; legal: terms, contract = 2
        assert_eq!(
            categorize(text, &cats(&["legal", "finance"])),
            Some("finance".to_string())
        );
    }

    #[test]
    fn test_categorize_ties_and_defaults() {
        let text = "The API has a bug we need to fix.";
        // technical: api = 1; support: fix = 1
        assert_eq!(
            categorize(text, &cats(&["Support", "technical"])),
            Some("Support".to_string())
        );
        assert_eq!(
            categorize("nothing relevant", &cats(&["legal", "finance"])),
            Some("legal".to_string())
        );
        assert_eq!(categorize("anything", &[]), None);
        assert_eq!(
            categorize("api code", &cats(&["marketing", "technical"])),
            Some("technical".to_string())
        );
    }

    #[test]
    fn test_categorize_is_deterministic() {
        let text = "Customer support for software problems and revenue strategy.";
        let candidates = cats(&["business", "support", "technical"]);
        let first = categorize(text, &candidates);
        for _ in 0..10 {
            assert_eq!(categorize(text, &candidates), first);
        }
    }

    #[test]
    fn test_keywords_frequency_then_first_occurrence() {
        let text = "Rust crates: rust tooling, cargo tooling and rust macros. The end.";
        let keywords = extract_keywords(text, MAX_KEYWORDS);
        assert_eq!(keywords[0], "rust");
        assert_eq!(keywords[1], "tooling");
        assert_eq!(keywords[2], "crates");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"and".to_string()));
    }

    #[test]
    fn test_keywords_limit() {
        let text = (0..30).map(|i| format!("word{:02}", i)).collect::<Vec<_>>().join(" ");
        let keywords = extract_keywords(&text, MAX_KEYWORDS);
        assert_eq!(keywords.len(), MAX_KEYWORDS);
        assert_eq!(keywords[0], "word00");
        assert_eq!(keywords[9], "word09");
    }
}
