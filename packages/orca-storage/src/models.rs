use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A knowledge-base entry whose content is rebuilt into a vector index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
	pub id: String,
	pub name: String,
	/// Text chunks in index order. Empty content is valid and indexes nothing.
	pub content: Vec<String>,
}
impl KnowledgeItem {
	pub fn new(id: impl Into<String>, name: impl Into<String>, content: Vec<String>) -> Self {
		Self { id: id.into(), name: name.into(), content }
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
	pub id: String,
	pub score: f32,
	#[serde(default)]
	pub payload: Map<String, Value>,
}

/// Extracts text chunks from a stored item's `data` document.
///
/// `content` may be an array (one chunk per non-null element) or a single string (one chunk
/// unless blank). Anything else yields no chunks.
pub fn content_chunks(data: &Value) -> Vec<String> {
	match data.get("content") {
		Some(Value::Array(items)) => items
			.iter()
			.filter(|item| !item.is_null())
			.map(|item| match item {
				Value::String(text) => text.clone(),
				other => other.to_string(),
			})
			.collect(),
		Some(Value::String(text)) if !text.trim().is_empty() => vec![text.clone()],
		_ => Vec::new(),
	}
}
