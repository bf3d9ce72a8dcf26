//! `ffbridge` CLI
//!
//! Serves a file (or stdin/stdout) on a local endpoint so a media subprocess
//! can open it by URL.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use ffbridge::BridgeFactory;
use ffbridge_cli::bridge_cmd::{self, BridgeAction, BridgeOverrides};

#[derive(Parser, Debug)]
#[command(name = "ffbridge")]
#[command(version, about = "Expose files and stdio to media subprocesses as socket URLs")]
struct Cli {
    #[command(subcommand)]
    action: BridgeAction,

    #[command(flatten)]
    overrides: BridgeOverrides,

    /// Settings file layered over the global one
    #[arg(long, env = "FFBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ffbridge_core::tracing_init::with_bootstrap(|| {
        ffbridge_core::config::load_config(cli.config.as_deref())
    })?;
    cli.overrides.apply(&mut config)?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    let log_filter = format!("ffbridge={}", config.logging.level);
    ffbridge_core::tracing_init::init_tracing(&log_filter, config.logging.json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = %config.bridge.transport,
        buffer_size = config.bridge.buffer_size,
        connect_timeout_secs = config.bridge.connect_timeout_secs,
        "Starting ffbridge"
    );

    let factory = BridgeFactory::from_config(&config);
    let report = bridge_cmd::run(&factory, cli.action).await?;

    info!(
        bytes = report.bytes,
        rejected = report.rejected_connections,
        elapsed_ms = report.elapsed.as_millis(),
        "Transfer complete"
    );
    Ok(())
}
