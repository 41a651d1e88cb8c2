use std::env;

use tokio::runtime::Runtime;
use uuid::Uuid;

use orca_config::Postgres;
use orca_storage::{db::Db, knowledge, models::KnowledgeItem};

#[test]
#[ignore = "Requires external Postgres. Set ORCA_PG_DSN to run."]
fn knowledge_items_round_trip_through_postgres() {
	let Ok(dsn) = env::var("ORCA_PG_DSN") else {
		eprintln!("Skipping knowledge_items_round_trip_through_postgres; set ORCA_PG_DSN.");

		return;
	};
	let rt = Runtime::new().expect("Failed to build runtime.");

	rt.block_on(async {
		let db = Db::connect(&Postgres { dsn, pool_max_conns: 1 })
			.await
			.expect("Failed to connect to Postgres.");

		db.ensure_schema().await.expect("Failed to ensure schema.");
		db.ensure_schema().await.expect("Schema bootstrap must be repeatable.");

		let run = Uuid::new_v4().simple().to_string();
		let first = KnowledgeItem::new(
			format!("{run}-a"),
			"First",
			vec!["one".to_string(), "two".to_string()],
		);
		let second = KnowledgeItem::new(format!("{run}-b"), "Second", Vec::new());
		let ids = vec![first.id.clone(), second.id.clone()];
		let scope = Some(ids.as_slice());

		knowledge::insert_item(&db.pool, &first).await.expect("Failed to insert item.");
		knowledge::insert_item(&db.pool, &second).await.expect("Failed to insert item.");

		let listed = knowledge::list_items(&db.pool, scope).await.expect("Failed to list.");

		assert_eq!(listed, vec![first.clone(), second.clone()]);
		assert_eq!(knowledge::count_items(&db.pool, scope).await.expect("count"), 2);
		assert!(knowledge::soft_delete_item(&db.pool, &second.id).await.expect("delete"));
		assert_eq!(
			knowledge::list_items(&db.pool, scope).await.expect("Failed to list."),
			vec![first]
		);

		sqlx::query("DELETE FROM knowledge_items WHERE item_id = ANY($1)")
			.bind(&ids)
			.execute(&db.pool)
			.await
			.expect("Failed to clean up items.");
	});
}
