use std::net::SocketAddr;

use anyhow::Context as _;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct BackendArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    aether::logging::init_with_default("info,tower_http=debug,hyper=warn,reqwest=warn")?;

    let args = BackendArgs::parse();
    tracing::info!(?args, "starting aether-backend");

    let config = aether::config::Config::from_env().context("load config")?;
    if config.gemini.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; generation endpoints will return fallbacks");
    }
    let http = aether::commands::http_client()?;
    let app = aether::backend::router(aether::backend::BackendState::new(config, http));

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
