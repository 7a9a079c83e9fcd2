use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use idemgate::config::{Config, LogFormat};
use idemgate::storage::{Storage, StorageKind};
use tracing::info;

mod app;

#[derive(Parser, Debug)]
#[command(name = "idemgate", version, about = "Exactly once HTTP transactions")]
struct Cli {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the HTTP server.
	Daemon(DaemonArgs),
	/// Print the version.
	Version,
}

#[derive(clap::Args, Debug)]
struct DaemonArgs {
	/// YAML configuration file.
	#[arg(long = "config.file", value_name = "PATH")]
	config_file: Option<PathBuf>,
	#[arg(long = "server.listen.address", value_name = "ADDR")]
	listen_address: Option<SocketAddr>,
	/// Lifetime of stored transaction state, e.g. `24h`.
	#[arg(long = "storage.ttl", value_name = "DUR", value_parser = parse_duration)]
	storage_ttl: Option<Duration>,
	#[arg(long = "log.format", value_name = "FORMAT")]
	log_format: Option<LogFormat>,
}

fn parse_duration(raw: &str) -> Result<Duration, String> {
	idemgate::serde_dur::parse(raw)
}

impl DaemonArgs {
	fn config(&self) -> anyhow::Result<Config> {
		let mut config = Config::load(self.config_file.as_deref()).context("loading config")?;
		if let Some(addr) = self.listen_address {
			config.server.listen_address = addr;
		}
		if let Some(ttl) = self.storage_ttl {
			config.storage.ttl = Some(ttl);
		}
		if let Some(format) = self.log_format {
			config.logging.format = format;
		}
		Ok(config)
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	match Cli::parse().command {
		Command::Daemon(args) => daemon(args).await,
		Command::Version => {
			println!("{} {}", env!("CARGO_BIN_NAME"), env!("CARGO_PKG_VERSION"));
			Ok(())
		},
	}
}

async fn daemon(args: DaemonArgs) -> anyhow::Result<()> {
	let config = args.config()?;
	idemgate::telemetry::init(&config.logging).context("initializing logging")?;

	let storage: Arc<dyn Storage> = match config.storage.kind {
		StorageKind::Memory => {
			let memory = Arc::new(idemgate::storage::new_memory(&config.storage).context("creating storage")?);
			if let Some(ttl) = config.storage.ttl {
				app::spawn_purge(memory.clone(), app::purge_period(ttl));
			}
			memory
		},
	};
	let router = app::router(&config, storage)?;
	info!(
		storage = ?config.storage.kind,
		header = %config.transaction.header,
		"starting idemgate"
	);
	app::serve(&config, router).await
}
