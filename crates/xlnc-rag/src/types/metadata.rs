//! Tagged metadata values carried alongside vectors, jobs and alerts

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered metadata bag
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Well-known metadata keys
pub mod keys {
    pub const TENANT: &str = "tenant";
    pub const DOCUMENT_ID: &str = "documentId";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const CATEGORY: &str = "category";
    pub const KEYWORDS: &str = "keywords";
    pub const CONTENT: &str = "content";
    pub const TIMESTAMP: &str = "timestamp";
}

/// A single metadata value
///
/// Only these shapes cross the vector-store boundary; anything else a
/// backend returns (nested objects, nulls, mixed arrays) is dropped or
/// flattened by [`MetadataValue::from_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
}

impl MetadataValue {
    /// Convert to the JSON representation used in vector-store payloads
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::StringList(list) => serde_json::Value::Array(
                list.iter().cloned().map(serde_json::Value::String).collect(),
            ),
        }
    }

    /// Convert from a JSON payload value. Returns `None` for nulls and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            serde_json::Value::Array(items) => Some(Self::StringList(
                items
                    .iter()
                    .filter_map(|item| match item {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .collect(),
            )),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// All string values: the string itself, or every list entry
    pub fn strings(&self) -> Vec<&str> {
        match self {
            Self::String(s) => vec![s.as_str()],
            Self::StringList(list) => list.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::String(s) => f.write_str(s),
            Self::StringList(list) => f.write_str(&list.join(", ")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<usize> for MetadataValue {
    fn from(value: usize) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        Self::StringList(value)
    }
}

/// Convert a metadata bag into a JSON object
pub fn to_json_object(metadata: &Metadata) -> serde_json::Map<String, serde_json::Value> {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

/// Convert a JSON object into a metadata bag, skipping unrepresentable values
pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Metadata {
    object
        .iter()
        .filter_map(|(k, v)| MetadataValue::from_json(v).map(|value| (k.clone(), value)))
        .collect()
}

/// Build a metadata bag from key/value pairs
#[macro_export]
macro_rules! metadata {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::types::Metadata::new();
        $(map.insert($key.to_string(), $crate::types::MetadataValue::from($value));)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion() {
        let meta = crate::metadata! {
            "tenant" => "t1",
            "chunkIndex" => 3i64,
            "score" => 0.5f64,
            "flag" => true,
            "keywords" => vec!["alpha".to_string(), "beta".to_string()],
        };

        let object = to_json_object(&meta);
        assert_eq!(object["tenant"], serde_json::json!("t1"));
        assert_eq!(object["chunkIndex"], serde_json::json!(3));
        assert_eq!(object["keywords"], serde_json::json!(["alpha", "beta"]));

        let back = from_json_object(&object);
        assert_eq!(back, meta);
    }

    #[test]
    fn test_unrepresentable_values_are_skipped() {
        let object = serde_json::json!({
            "nested": {"a": 1},
            "missing": null,
            "count": 7,
        });
        let meta = from_json_object(object.as_object().unwrap());
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["count"], MetadataValue::Integer(7));
    }

    #[test]
    fn test_display() {
        assert_eq!(MetadataValue::from("web").to_string(), "web");
        assert_eq!(
            MetadataValue::from(vec!["a".to_string(), "b".to_string()]).to_string(),
            "a, b"
        );
    }
}
