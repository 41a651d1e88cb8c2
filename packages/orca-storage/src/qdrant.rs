pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

use std::collections::HashMap;

use qdrant_client::{
	client::Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, Document, Filter, Modifier, PointStruct, Query,
		QueryPointsBuilder, ScoredPoint, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
		UpsertPointsBuilder, Value as QdrantValue, Vector, point_id::PointIdOptions, value::Kind,
	},
};
use serde_json::{Map, Number, Value};

use crate::{
	Error, Result,
	models::{KnowledgeItem, SearchHit},
};

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub search_collection: String,
}
impl QdrantStore {
	pub fn new(cfg: &orca_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, search_collection: cfg.search_collection.clone() })
	}

	/// Drops `collection`. A collection that does not exist is not an error.
	pub async fn delete_collection(&self, collection: &str) -> Result<()> {
		if !self.client.collection_exists(collection.to_string()).await? {
			tracing::debug!(collection, "Collection absent, nothing to delete.");

			return Ok(());
		}

		self.client.delete_collection(collection.to_string()).await?;

		Ok(())
	}

	/// Creates `collection` if needed and upserts one BM25 point per chunk of `item`.
	pub async fn index_chunks(&self, collection: &str, item: &KnowledgeItem) -> Result<usize> {
		if !self.client.collection_exists(collection.to_string()).await? {
			let mut sparse_vectors_config = SparseVectorsConfigBuilder::default();

			sparse_vectors_config.add_named_vector_params(
				BM25_VECTOR_NAME,
				SparseVectorParamsBuilder::default().modifier(Modifier::Idf as i32),
			);

			self.client
				.create_collection(
					CreateCollectionBuilder::new(collection)
						.sparse_vectors_config(sparse_vectors_config),
				)
				.await?;
		}

		if item.content.is_empty() {
			return Ok(0);
		}

		let mut points = Vec::with_capacity(item.content.len());

		for (chunk_index, text) in item.content.iter().enumerate() {
			let mut payload = Payload::new();

			payload.insert("item_id", item.id.clone());
			payload.insert("item_name", item.name.clone());
			payload.insert("chunk_index", Value::from(chunk_index));
			payload.insert("text", text.clone());

			let mut vectors = HashMap::new();

			vectors.insert(
				BM25_VECTOR_NAME.to_string(),
				Vector::from(Document::new(text.clone(), BM25_MODEL)),
			);
			points.push(PointStruct::new(chunk_index as u64, vectors, payload));
		}

		let count = points.len();

		self.client.upsert_points(UpsertPointsBuilder::new(collection, points).wait(true)).await?;

		Ok(count)
	}

	/// Runs a BM25 query against the configured search collection.
	pub async fn search(
		&self,
		query: &str,
		limit: u32,
		filters: Option<&Map<String, Value>>,
	) -> Result<Vec<SearchHit>> {
		let mut search = QueryPointsBuilder::new(self.search_collection.clone())
			.query(Query::new_nearest(Document::new(query.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.limit(u64::from(limit))
			.with_payload(true);

		if let Some(filters) = filters
			&& !filters.is_empty()
		{
			search = search.filter(build_filter(filters)?);
		}

		let response = self.client.query(search).await?;

		Ok(response.result.into_iter().map(scored_point_to_hit).collect())
	}
}

fn build_filter(filters: &Map<String, Value>) -> Result<Filter> {
	let mut must = Vec::with_capacity(filters.len());

	for (key, value) in filters {
		let condition = match value {
			Value::String(text) => Condition::matches(key.as_str(), text.clone()),
			Value::Bool(flag) => Condition::matches(key.as_str(), *flag),
			Value::Number(number) => match number.as_i64() {
				Some(int) => Condition::matches(key.as_str(), int),
				None =>
					return Err(Error::InvalidArgument(format!(
						"Filter {key} must be an integer, string, or boolean."
					))),
			},
			_ =>
				return Err(Error::InvalidArgument(format!(
					"Filter {key} must be an integer, string, or boolean."
				))),
		};

		must.push(condition);
	}

	Ok(Filter::must(must))
}

fn scored_point_to_hit(point: ScoredPoint) -> SearchHit {
	let id = match point.id.and_then(|id| id.point_id_options) {
		Some(PointIdOptions::Num(num)) => num.to_string(),
		Some(PointIdOptions::Uuid(uuid)) => uuid,
		None => String::new(),
	};
	let payload = point
		.payload
		.into_iter()
		.map(|(key, value)| (key, qdrant_value_to_json(value)))
		.collect();

	SearchHit { id, score: point.score, payload }
}

fn qdrant_value_to_json(value: QdrantValue) -> Value {
	match value.kind {
		Some(Kind::StringValue(text)) => Value::String(text),
		Some(Kind::IntegerValue(int)) => Value::from(int),
		Some(Kind::DoubleValue(double)) =>
			Number::from_f64(double).map_or(Value::Null, Value::Number),
		Some(Kind::BoolValue(flag)) => Value::Bool(flag),
		Some(Kind::ListValue(list)) => list.values.into_iter().map(qdrant_value_to_json).collect(),
		Some(Kind::StructValue(object)) => Value::Object(
			object
				.fields
				.into_iter()
				.map(|(key, value)| (key, qdrant_value_to_json(value)))
				.collect(),
		),
		Some(Kind::NullValue(_)) | None => Value::Null,
	}
}
