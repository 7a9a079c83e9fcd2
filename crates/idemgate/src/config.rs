//! Process configuration.
//!
//! Values are layered: defaults, then an optional YAML file, then `IDEMGATE_*`
//! environment variables. Command line flags are applied last by the binary.
//! Environment names are the dotted setting names uppercased with `.`
//! replaced by `_`, e.g. `server.listenAddress` is
//! `IDEMGATE_SERVER_LISTEN_ADDRESS`.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::serdes::serde_dur;
use crate::storage::{StorageConfig, StorageKind};

pub const ENV_PREFIX: &str = "IDEMGATE_";
pub const DEFAULT_TRANSACTION_HEADER: &str = "X-Transaction-ID";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_yaml::Error),
	#[error("invalid value {value:?} for {name}: {reason}")]
	InvalidValue {
		name: String,
		value: String,
		reason: String,
	},
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(default)]
	pub transaction: TransactionConfig,
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServerConfig {
	#[serde(default = "default_listen_address")]
	pub listen_address: SocketAddr,
	/// Reported in the `from` field of error responses.
	#[serde(default = "default_service_name")]
	pub service_name: String,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			listen_address: default_listen_address(),
			service_name: default_service_name(),
		}
	}
}

fn default_listen_address() -> SocketAddr {
	SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_service_name() -> String {
	"idemgate".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransactionConfig {
	/// Request header carrying the transaction ID.
	#[serde(default = "default_header")]
	pub header: String,
	/// Upper bound for response bodies buffered for tracking.
	#[serde(default = "default_max_body_bytes")]
	pub max_body_bytes: usize,
}

impl Default for TransactionConfig {
	fn default() -> Self {
		Self {
			header: default_header(),
			max_body_bytes: default_max_body_bytes(),
		}
	}
}

fn default_header() -> String {
	DEFAULT_TRANSACTION_HEADER.to_string()
}

fn default_max_body_bytes() -> usize {
	4 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

impl std::str::FromStr for LogFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"text" => Ok(LogFormat::Text),
			"json" => Ok(LogFormat::Json),
			other => Err(format!("unknown log format {other:?}, expected text or json")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingConfig {
	/// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` takes precedence.
	#[serde(default = "default_filter")]
	pub filter: String,
	#[serde(default)]
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			filter: default_filter(),
			format: LogFormat::default(),
		}
	}
}

fn default_filter() -> String {
	"info".to_string()
}

impl Config {
	pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
		Ok(serde_yaml::from_str(contents)?)
	}

	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let contents = fs_err::read_to_string(path)?;
		Self::from_yaml(&contents)
	}

	/// Build the configuration from an optional file and the process
	/// environment.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_env(|name| std::env::var(name).ok())?;
		Ok(config)
	}

	/// Override settings from environment variables resolved through `lookup`.
	pub fn apply_env(
		&mut self,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<(), ConfigError> {
		let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

		if let Some(v) = get("SERVER_LISTEN_ADDRESS") {
			self.server.listen_address = parse_value("server.listenAddress", &v, |v| {
				v.parse::<SocketAddr>().map_err(|e| e.to_string())
			})?;
		}
		if let Some(v) = get("SERVER_SERVICE_NAME") {
			self.server.service_name = v;
		}
		if let Some(v) = get("TRANSACTION_HEADER") {
			self.transaction.header = v;
		}
		if let Some(v) = get("TRANSACTION_MAX_BODY_BYTES") {
			self.transaction.max_body_bytes = parse_value("transaction.maxBodyBytes", &v, |v| {
				v.parse::<usize>().map_err(|e| e.to_string())
			})?;
		}
		if let Some(v) = get("STORAGE_KIND") {
			self.storage.kind = parse_value("storage.kind", &v, |v| match v {
				"memory" => Ok(StorageKind::Memory),
				other => Err(format!("unknown storage kind {other:?}")),
			})?;
		}
		if let Some(v) = get("STORAGE_TTL") {
			self.storage.ttl = Some(parse_value("storage.ttl", &v, serde_dur::parse)?);
		}
		if let Some(v) = get("LOGGING_FILTER") {
			self.logging.filter = v;
		}
		if let Some(v) = get("LOGGING_FORMAT") {
			self.logging.format = parse_value("logging.format", &v, |v| v.parse::<LogFormat>())?;
		}
		Ok(())
	}
}

fn parse_value<T>(
	name: &str,
	value: &str,
	parse: impl FnOnce(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
	parse(value).map_err(|reason| ConfigError::InvalidValue {
		name: name.to_string(),
		value: value.to_string(),
		reason,
	})
}
