#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.brandwire/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".brandwire").join("config.toml"))
}

/// Same as loading from the default path but with an explicit one.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub hub: HubQueueSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

/// Queue sizing for the hub and per-connection outbound queues.
#[derive(Debug, Clone)]
pub struct HubQueueSettings {
	pub event_queue_capacity: usize,
	pub outbound_queue_capacity: usize,
}

impl Default for HubQueueSettings {
	fn default() -> Self {
		Self {
			event_queue_capacity: 256,
			outbound_queue_capacity: 256,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	/// Enable persistence. When off the hub runs on the in-memory store.
	pub enabled: bool,
	/// Database URL (postgres:).
	pub database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	hub: FileHubSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileHubSettings {
	event_queue_capacity: Option<usize>,
	outbound_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = HubQueueSettings::default();
		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
			},
			hub: HubQueueSettings {
				event_queue_capacity: file.hub.event_queue_capacity.filter(|v| *v > 0).unwrap_or(defaults.event_queue_capacity),
				outbound_queue_capacity: file
					.hub
					.outbound_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(defaults.outbound_queue_capacity),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("BRANDWIRE_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BRANDWIRE_EVENT_QUEUE_CAPACITY")
		&& let Ok(cap) = v.trim().parse::<usize>()
		&& cap > 0
	{
		cfg.hub.event_queue_capacity = cap;
		info!(cap, "server config: event_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BRANDWIRE_OUTBOUND_QUEUE_CAPACITY")
		&& let Ok(cap) = v.trim().parse::<usize>()
		&& cap > 0
	{
		cfg.hub.outbound_queue_capacity = cap;
		info!(cap, "server config: outbound_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("BRANDWIRE_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence config: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("BRANDWIRE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence config: database_url overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_file_yields_defaults() {
		let cfg = load_server_config_from_path(Path::new("/nonexistent/brandwire-config.toml")).unwrap();
		assert!(!cfg.persistence.enabled);
		assert_eq!(cfg.hub.event_queue_capacity, 256);
		assert_eq!(cfg.hub.outbound_queue_capacity, 256);
	}

	#[test]
	fn file_values_override_defaults() {
		let file: FileConfig = toml::from_str(
			"[server]\nmetrics_bind = \"127.0.0.1:9401\"\n\n[hub]\noutbound_queue_capacity = 32\n\n[persistence]\nenabled = true\ndatabase_url = \"postgres://localhost/brandwire\"\n",
		)
		.unwrap();
		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.server.metrics_bind.as_deref(), Some("127.0.0.1:9401"));
		assert_eq!(cfg.hub.outbound_queue_capacity, 32);
		assert_eq!(cfg.hub.event_queue_capacity, 256);
		assert!(cfg.persistence.enabled);
		assert_eq!(cfg.persistence.database_url.as_deref(), Some("postgres://localhost/brandwire"));
	}

	#[test]
	fn zero_capacities_fall_back_to_defaults() {
		let file: FileConfig = toml::from_str("[hub]\nevent_queue_capacity = 0\n").unwrap();
		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.hub.event_queue_capacity, 256);
	}

	#[test]
	fn env_bools_parse_loosely() {
		assert_eq!(parse_env_bool(" Yes "), Some(true));
		assert_eq!(parse_env_bool("off"), Some(false));
		assert_eq!(parse_env_bool("maybe"), None);
	}
}
