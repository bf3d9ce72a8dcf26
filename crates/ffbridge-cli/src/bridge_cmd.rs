//! CLI bridge subcommands.
//!
//! The endpoint URL is user-facing output and goes to stdout, unless stdout
//! carries the bridged bytes.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use ffbridge::{BridgeFactory, BridgeHandle, TransferReport};
use ffbridge_core::Config;

/// Bridge subcommand actions.
#[derive(Subcommand, Debug)]
pub enum BridgeAction {
    /// Serve a file (or stdin) as an input URL
    Input {
        /// File to read, `-` for stdin
        file: PathBuf,
    },
    /// Capture an output URL into a file (or stdout)
    Output {
        /// File to write, `-` for stdout
        file: PathBuf,
    },
}

/// Bridge settings that override the loaded configuration.
#[derive(Args, Debug, Default)]
pub struct BridgeOverrides {
    /// Endpoint transport
    #[arg(long, value_parser = ["unix", "tcp"])]
    pub transport: Option<String>,

    /// Directory for unix socket files
    #[arg(long)]
    pub socket_dir: Option<PathBuf>,

    /// Seconds to wait for the subprocess to connect (0 waits forever)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Pump buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,
}

impl BridgeOverrides {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(transport) = &self.transport {
            config.bridge.transport = transport.parse()?;
        }
        if let Some(dir) = &self.socket_dir {
            config.bridge.socket_dir = Some(dir.clone());
        }
        if let Some(secs) = self.connect_timeout {
            config.bridge.connect_timeout_secs = secs;
        }
        if let Some(size) = self.buffer_size {
            config.bridge.buffer_size = size;
        }
        config.validate()?;
        Ok(())
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Execute a bridge subcommand and wait for the transfer to finish.
pub async fn run(
    factory: &BridgeFactory,
    action: BridgeAction,
) -> anyhow::Result<TransferReport> {
    match action {
        BridgeAction::Input { file } => {
            let source: Box<dyn AsyncRead + Unpin + Send> = if is_stdio(&file) {
                Box::new(tokio::io::stdin())
            } else {
                let f = tokio::fs::File::open(&file)
                    .await
                    .with_context(|| format!("Failed to open {}", file.display()))?;
                Box::new(f)
            };
            let handle = factory.input(source)?;
            announce(&handle, &mut io::stdout())?;
            wait(handle).await
        }
        BridgeAction::Output { file } => {
            let to_stdout = is_stdio(&file);
            let sink: Box<dyn AsyncWrite + Unpin + Send> = if to_stdout {
                Box::new(tokio::io::stdout())
            } else {
                let f = tokio::fs::File::create(&file)
                    .await
                    .with_context(|| format!("Failed to create {}", file.display()))?;
                Box::new(f)
            };
            let handle = factory.output(sink)?;
            if to_stdout {
                announce(&handle, &mut io::stderr())?;
            } else {
                announce(&handle, &mut io::stdout())?;
            }
            wait(handle).await
        }
    }
}

fn announce<S>(handle: &BridgeHandle<S>, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "{}", handle.url())?;
    out.flush()
}

/// Wait for the bridge, cancelling it on Ctrl-C.
async fn wait<S>(handle: BridgeHandle<S>) -> anyhow::Result<TransferReport> {
    let cancel = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling bridge");
            cancel.cancel();
        }
    });

    let result = handle.finish().await;
    interrupt.abort();

    let finished = result?;
    Ok(finished.report)
}
