use serde_json::Value;
use sqlx::PgExecutor;

use crate::{
	Result,
	models::{self, KnowledgeItem},
};

#[derive(Debug, sqlx::FromRow)]
struct KnowledgeRow {
	item_id: String,
	name: String,
	data: Value,
}

/// Lists live knowledge items, optionally restricted to `ids`, oldest first.
pub async fn list_items<'e, E>(executor: E, ids: Option<&[String]>) -> Result<Vec<KnowledgeItem>>
where
	E: PgExecutor<'e>,
{
	let rows: Vec<KnowledgeRow> = sqlx::query_as(
		"\
SELECT item_id, name, data
FROM knowledge_items
WHERE is_deleted = false
	AND ($1::text[] IS NULL OR item_id = ANY($1))
ORDER BY created_at ASC, item_id ASC",
	)
	.bind(ids.map(<[String]>::to_vec))
	.fetch_all(executor)
	.await?;

	Ok(rows
		.into_iter()
		.map(|row| KnowledgeItem {
			content: models::content_chunks(&row.data),
			id: row.item_id,
			name: row.name,
		})
		.collect())
}

pub async fn count_items<'e, E>(executor: E, ids: Option<&[String]>) -> Result<u64>
where
	E: PgExecutor<'e>,
{
	let count: i64 = sqlx::query_scalar(
		"\
SELECT COUNT(*)
FROM knowledge_items
WHERE is_deleted = false
	AND ($1::text[] IS NULL OR item_id = ANY($1))",
	)
	.bind(ids.map(<[String]>::to_vec))
	.fetch_one(executor)
	.await?;

	Ok(u64::try_from(count).unwrap_or_default())
}

pub async fn insert_item<'e, E>(executor: E, item: &KnowledgeItem) -> Result<()>
where
	E: PgExecutor<'e>,
{
	let data = serde_json::json!({ "content": item.content });

	sqlx::query(
		"\
INSERT INTO knowledge_items (item_id, name, data)
VALUES ($1, $2, $3)
ON CONFLICT (item_id) DO UPDATE
SET
	name = EXCLUDED.name,
	data = EXCLUDED.data,
	is_deleted = false,
	updated_at = now()",
	)
	.bind(item.id.as_str())
	.bind(item.name.as_str())
	.bind(data)
	.execute(executor)
	.await?;

	Ok(())
}

pub async fn soft_delete_item<'e, E>(executor: E, item_id: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query(
		"UPDATE knowledge_items SET is_deleted = true, updated_at = now() WHERE item_id = $1",
	)
	.bind(item_id)
	.execute(executor)
	.await?;

	Ok(result.rows_affected() > 0)
}
