use serde::Serialize;
use serde_json::{Map, Value};

/// Builds a cache key of the form `"{prefix}:{blake3 hex}"` from `params`.
///
/// Object keys are sorted recursively before hashing, so two parameter sets that differ only in
/// field order map to the same key.
pub fn cache_key<T>(prefix: &str, params: &T) -> serde_json::Result<String>
where
	T: Serialize + ?Sized,
{
	let canonical = canonicalize(serde_json::to_value(params)?);
	let raw = serde_json::to_vec(&canonical)?;

	Ok(format!("{prefix}:{}", blake3::hash(&raw).to_hex()))
}

fn canonicalize(value: Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<(String, Value)> = map.into_iter().collect();

			entries.sort_by(|a, b| a.0.cmp(&b.0));

			let mut out = Map::with_capacity(entries.len());

			for (key, value) in entries {
				out.insert(key, canonicalize(value));
			}

			Value::Object(out)
		},
		Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
		other => other,
	}
}
