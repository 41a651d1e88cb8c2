use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use serde_json::{Map, Value};

use orca_service::{Backends, PerfService};
use orca_storage::{db::Db, qdrant::QdrantStore};

const REBUILD_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(
	version = orca_cli::VERSION,
	rename_all = "kebab",
	styles = orca_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Rebuild the vector collections of every live knowledge item, or of the given ones.
	Rebuild {
		#[arg(long, value_name = "ID")]
		task_id: Option<String>,
		#[arg(long = "item", value_name = "ITEM_ID")]
		items: Vec<String>,
		#[arg(long, default_value = "orca-worker")]
		requester: String,
		/// Print the initial progress and exit without waiting for the task.
		#[arg(long)]
		detach: bool,
	},
	Search {
		query: String,
		#[arg(long)]
		limit: Option<u32>,
		/// Keyword filters as a JSON object, e.g. '{"item_id":"kb-1"}'.
		#[arg(long, value_name = "JSON")]
		filters: Option<String>,
	},
	BatchSearch {
		#[arg(required = true)]
		queries: Vec<String>,
		#[arg(long)]
		limit: Option<u32>,
	},
	/// Populate the search cache for the given queries.
	Warmup {
		#[arg(required = true)]
		queries: Vec<String>,
	},
	Report,
	Metrics,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = orca_config::load(&args.config)?;

	orca_cli::init_tracing(&config.service.log_level);

	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let qdrant = QdrantStore::new(&config.storage.qdrant)?;
	let service = PerfService::new(&config, Backends::from_storage(db, qdrant));
	let output = execute(&service, args.command).await?;

	println!("{}", serde_json::to_string_pretty(&output)?);

	Ok(())
}

/// Runs one command against `service` and returns its JSON output.
pub async fn execute(service: &PerfService, command: Command) -> color_eyre::Result<Value> {
	let output = match command {
		Command::Rebuild { task_id, items, requester, detach } => {
			let item_ids = if items.is_empty() { None } else { Some(items) };
			let started =
				service.start_rebuild(task_id.as_deref(), item_ids, &requester).await?;

			if detach {
				serde_json::to_value(started.to_record())?
			} else {
				let finished = wait_for_rebuild(service, &started.task_id).await?;

				tracing::info!(
					task_id = %finished.task_id,
					status = finished.status.as_str(),
					failed = finished.failed_item_ids.len(),
					"Rebuild finished."
				);

				serde_json::to_value(finished.to_record())?
			}
		},
		Command::Search { query, limit, filters } => {
			let filters = filters.as_deref().map(parse_filters).transpose()?;
			let hits = service.search(&query, limit, filters.as_ref()).await?;

			serde_json::to_value(hits)?
		},
		Command::BatchSearch { queries, limit } =>
			serde_json::to_value(service.batch_search(&queries, limit).await?)?,
		Command::Warmup { queries } => serde_json::to_value(service.warmup(&queries).await)?,
		Command::Report => serde_json::to_value(service.report())?,
		Command::Metrics => serde_json::to_value(service.metrics())?,
	};

	Ok(output)
}

fn parse_filters(raw: &str) -> color_eyre::Result<Map<String, Value>> {
	match serde_json::from_str::<Value>(raw)? {
		Value::Object(map) => Ok(map),
		other => Err(eyre::eyre!("Filters must be a JSON object, got {other}.")),
	}
}

async fn wait_for_rebuild(
	service: &PerfService,
	task_id: &str,
) -> color_eyre::Result<orca_service::RebuildProgress> {
	loop {
		let progress = service.get_progress(task_id)?;

		if progress.status.is_terminal() {
			return Ok(progress);
		}

		tokio::time::sleep(REBUILD_POLL_INTERVAL).await;
	}
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use crate::{Args, Command};

	#[test]
	fn rebuild_collects_repeated_items() {
		let args = Args::parse_from([
			"orca-worker",
			"-c",
			"orca.toml",
			"rebuild",
			"--item",
			"kb-1",
			"--item",
			"kb-2",
		]);

		match args.command {
			Command::Rebuild { task_id, items, requester, detach } => {
				assert_eq!(task_id, None);
				assert_eq!(items, vec!["kb-1", "kb-2"]);
				assert_eq!(requester, "orca-worker");
				assert!(!detach);
			},
			other => panic!("Unexpected command: {other:?}"),
		}
	}

	#[test]
	fn warmup_requires_queries() {
		assert!(Args::try_parse_from(["orca-worker", "-c", "orca.toml", "warmup"]).is_err());
	}

	#[test]
	fn filters_must_be_an_object() {
		assert!(super::parse_filters(r#"{"item_id":"kb-1"}"#).is_ok());
		assert!(super::parse_filters("[1, 2]").is_err());
	}
}
