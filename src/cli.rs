use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store an identity for later commands.
    Login(LoginArgs),
    /// Forget the stored identity.
    Logout,
    /// Print the stored identity.
    Whoami,
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    /// Upload a .txt/.md file to the ingestion backend.
    Ingest(IngestArgs),
    /// Open a book in the progressive reader.
    Read(ReadArgs),
    /// Generate a teaser video for a book.
    Teaser(TeaserArgs),
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct LoginArgs {
    /// OAuth access token with Drive file scope.
    #[arg(long)]
    pub access_token: Option<String>,

    /// Continue as the local guest identity (no Drive sync).
    #[arg(long)]
    pub guest: bool,
}

#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    /// Print the reconciled catalog.
    List(ListArgs),
    /// Pull the user catalog from Drive.
    Sync,
    /// Write the built-in starter books to Drive.
    Seed,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Print the catalog as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Text file to ingest.
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    /// Book id from the catalog.
    #[arg(long)]
    pub book: String,

    /// Scenes to request per batch.
    #[arg(long, default_value_t = 3)]
    pub count: usize,

    /// Additional batches to request after opening.
    #[arg(long, default_value_t = 0)]
    pub load_more: usize,

    /// Generate image and narration for the first scene.
    #[arg(long)]
    pub media: bool,

    /// Print the resulting manifest as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct TeaserArgs {
    /// Book id from the catalog.
    #[arg(long)]
    pub book: String,
}
