use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        if aether::error::is_unauthorized(&err) {
            eprintln!("authorization was rejected; run `aether login --access-token <token>` again");
        }
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    aether::logging::init().context("init logging")?;

    let cli = aether::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = aether::config::Config::from_env().context("load config")?;

    match cli.command {
        aether::cli::Command::Login(args) => {
            aether::commands::login(config, args).await.context("login")?;
        }
        aether::cli::Command::Logout => {
            aether::commands::logout(config).await.context("logout")?;
        }
        aether::cli::Command::Whoami => {
            aether::commands::whoami(config).await.context("whoami")?;
        }
        aether::cli::Command::Catalog {
            command: aether::cli::CatalogCommand::List(args),
        } => {
            aether::commands::catalog_list(config, args)
                .await
                .context("catalog list")?;
        }
        aether::cli::Command::Catalog {
            command: aether::cli::CatalogCommand::Sync,
        } => {
            aether::commands::catalog_sync(config)
                .await
                .context("catalog sync")?;
        }
        aether::cli::Command::Catalog {
            command: aether::cli::CatalogCommand::Seed,
        } => {
            aether::commands::catalog_seed(config)
                .await
                .context("catalog seed")?;
        }
        aether::cli::Command::Ingest(args) => {
            aether::commands::ingest(config, args).await.context("ingest")?;
        }
        aether::cli::Command::Read(args) => {
            aether::commands::read(config, args).await.context("read")?;
        }
        aether::cli::Command::Teaser(args) => {
            aether::commands::teaser(config, args).await.context("teaser")?;
        }
    }

    Ok(())
}
