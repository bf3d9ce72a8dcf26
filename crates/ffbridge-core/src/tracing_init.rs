//! Shared tracing/logging initialization.
//!
//! Logs always go to stderr: the `ffbridge` binary prints endpoint URLs on
//! stdout for shell substitution, and bridged data may be streamed there too.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter from `RUST_LOG`, falling back to `default_filter`.
fn env_filter(default_filter: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    )
}

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"ffbridge=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let result = if log_json {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter(default_filter))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Plain subscriber for work done before [`init_tracing`] can run.
fn bootstrap_subscriber<W>(
    filter: tracing_subscriber::EnvFilter,
    make_writer: W,
) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
}

/// Run `f` with warnings going to stderr.
///
/// Loading the configuration that decides the log format can itself warn
/// (ignored `FFBRIDGE_*` values); this keeps those messages visible.
pub fn with_bootstrap<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = bootstrap_subscriber(env_filter("warn"), std::io::stderr);
    tracing::subscriber::with_default(subscriber, f)
}
