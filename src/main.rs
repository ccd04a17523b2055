mod app;
mod cache;
mod commands;
mod config;
mod db;
mod event;
mod net;
mod sync;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "panelcache")]
#[command(about = "Offline cache and action sync for the bot control panel")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/panelcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache version to run, overriding the config file
  #[arg(long)]
  cache_version: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

/// Log to stderr and to a daily file next to the database.
/// RUST_LOG controls the level (default: warn).
fn init_tracing(log_dir: &Path) -> WorkerGuard {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  let file_appender = tracing_appender::rolling::daily(log_dir, "panelcache.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }

  let log_dir = config
    .database_path()?
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let _guard = init_tracing(&log_dir);

  let app = app::App::new(config)?;
  app.run(args.command).await?;

  Ok(())
}
