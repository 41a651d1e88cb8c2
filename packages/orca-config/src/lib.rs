mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, CacheLayer, Config, Pool, Postgres, Qdrant, Rebuild, Report, Search, Service, Storage,
	Tracker,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		Error::ParseConfig { source, .. } =>
			Error::ParseConfig { path: path.to_path_buf(), source },
		other => other,
	})
}

/// Parses, normalizes, and validates a config document that is already in memory.
pub fn parse(raw: &str) -> Result<Config> {
	let mut cfg: Config = toml::from_str(raw)
		.map_err(|err| Error::ParseConfig { path: Default::default(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.url must be non-empty.".to_string(),
		});
	}
	if cfg.storage.qdrant.search_collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.search_collection must be non-empty.".to_string(),
		});
	}

	for (label, layer) in [("cache.main", &cfg.cache.main), ("cache.search", &cfg.cache.search)] {
		if layer.max_size == 0 {
			return Err(Error::Validation {
				message: format!("{label}.max_size must be greater than zero."),
			});
		}
		if layer.ttl_seconds == 0 {
			return Err(Error::Validation {
				message: format!("{label}.ttl_seconds must be greater than zero."),
			});
		}
	}

	if cfg.pool.max_concurrency == 0 {
		return Err(Error::Validation {
			message: "pool.max_concurrency must be greater than zero.".to_string(),
		});
	}
	if !cfg.tracker.slow_threshold_seconds.is_finite() {
		return Err(Error::Validation {
			message: "tracker.slow_threshold_seconds must be a finite number.".to_string(),
		});
	}
	if cfg.tracker.slow_threshold_seconds <= 0.0 {
		return Err(Error::Validation {
			message: "tracker.slow_threshold_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.rebuild.max_history == 0 {
		return Err(Error::Validation {
			message: "rebuild.max_history must be greater than zero.".to_string(),
		});
	}
	if cfg.rebuild.collection_prefix.is_empty() {
		return Err(Error::Validation {
			message: "rebuild.collection_prefix must be non-empty.".to_string(),
		});
	}

	for (label, value) in [
		("search.default_limit", cfg.search.default_limit as usize),
		("search.warmup_limit", cfg.search.warmup_limit as usize),
		("search.max_batch_queries", cfg.search.max_batch_queries),
		("report.max_latency_samples", cfg.report.max_latency_samples),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	let prefix = cfg.rebuild.collection_prefix.trim();

	if prefix.len() != cfg.rebuild.collection_prefix.len() {
		cfg.rebuild.collection_prefix = prefix.to_string();
	}

	let log_level = cfg.service.log_level.trim();

	cfg.service.log_level =
		if log_level.is_empty() { "info".to_string() } else { log_level.to_string() };
}
