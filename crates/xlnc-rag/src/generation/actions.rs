//! Follow-up actions suggested next to an answer

use crate::providers::VectorSearchResult;
use crate::types::QuickAction;

fn mentions(query: &str, words: &[&str]) -> bool {
    words.iter().any(|w| query.contains(w))
}

/// Actions from query intent and the categories of every matched passage.
///
/// Never empty: falls back to contacting support.
pub fn suggest_actions(query: &str, results: &[VectorSearchResult]) -> Vec<QuickAction> {
    let query = query.to_lowercase();
    let mut actions = Vec::new();

    if mentions(&query, &["price", "cost", "quote"]) {
        actions.push(QuickAction::new("get_quote", "Get Custom Quote", "💰"));
    }
    if mentions(&query, &["meeting", "call", "discuss"]) {
        actions.push(QuickAction::new("schedule_meeting", "Schedule Meeting", "📅"));
    }
    if mentions(&query, &["demo", "example", "show"]) {
        actions.push(QuickAction::new("request_demo", "Request Demo", "🎥"));
    }

    let categories: Vec<&str> = results
        .iter()
        .filter_map(VectorSearchResult::category)
        .flat_map(|c| c.split(','))
        .collect();

    if categories.contains(&"technical") {
        actions.push(QuickAction::new("technical_support", "Technical Support", "🔧"));
    }
    if categories.contains(&"business") {
        actions.push(QuickAction::new(
            "business_consultation",
            "Business Consultation",
            "💼",
        ));
    }

    if actions.is_empty() {
        actions.push(QuickAction::contact_support());
    }
    actions
}
