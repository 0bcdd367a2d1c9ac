use std::io::IsTerminal as _;

use anyhow::Context as _;

/// Quiet the HTTP stack unless `RUST_LOG` says otherwise.
pub const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn";

pub fn init() -> anyhow::Result<()> {
    init_with_default(DEFAULT_FILTER)
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_with_default(default_filter: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .with_context(|| format!("build log filter (default: {default_filter})"))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
