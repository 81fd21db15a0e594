//! Response types for knowledge-base queries

use serde::{Deserialize, Serialize};

/// Where an answer came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Grounded in retrieved passages
    KnowledgeBase,
    /// Ungrounded model answer, no passages matched
    Ai,
    /// Canned answer after generation failed
    Fallback,
    /// Nothing could be produced
    Error,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KnowledgeBase => "knowledge_base",
            Self::Ai => "ai",
            Self::Fallback => "fallback",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "knowledge_base" => Some(Self::KnowledgeBase),
            "ai" => Some(Self::Ai),
            "fallback" => Some(Self::Fallback),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A follow-up action offered next to an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickAction {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl QuickAction {
    pub fn new(id: &str, text: &str, icon: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            icon: Some(icon.to_string()),
        }
    }

    pub fn schedule_meeting() -> Self {
        Self::new("schedule_meeting", "Schedule a Meeting", "📅")
    }

    pub fn contact_support() -> Self {
        Self::new("contact_support", "Contact Support", "💬")
    }

    pub fn browse_services() -> Self {
        Self::new("browse_services", "Browse Our Services", "🛠️")
    }
}

/// Answer to a knowledge-base query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<QuickAction>>,
    pub source: ResponseSource,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn success(
        text: String,
        actions: Vec<QuickAction>,
        source: ResponseSource,
        confidence: f64,
    ) -> Self {
        Self {
            text,
            actions: if actions.is_empty() { None } else { Some(actions) },
            source,
            confidence: confidence.clamp(0.0, 1.0),
            ok: true,
            error: None,
        }
    }
}
