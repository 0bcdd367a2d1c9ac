use std::time::Duration;

use anyhow::Context as _;

use crate::cli::{IngestArgs, ListArgs, LoginArgs, ReadArgs, TeaserArgs};
use crate::config::Config;
use crate::formats::BookManifest;
use crate::library::Library;
use crate::session::FsKeyValueStore;
use crate::video;
use crate::viewer::{ViewerLoader, ViewerState};

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .user_agent(concat!("aether/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("build http client")
}

async fn open_library(config: Config) -> anyhow::Result<Library<FsKeyValueStore>> {
    let storage = FsKeyValueStore::new(config.data_dir.clone());
    Library::open(config, http_client()?, storage).await
}

pub async fn login(config: Config, args: LoginArgs) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    let user = match args.access_token.as_deref() {
        Some(token) => library.sign_in(token).await?,
        None => library.sign_in_guest()?,
    };
    println!("Signed in as {} <{}>", user.name, user.email);
    Ok(())
}

pub async fn logout(config: Config) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    library.sign_out()?;
    println!("Signed out");
    Ok(())
}

pub async fn whoami(config: Config) -> anyhow::Result<()> {
    let library = open_library(config).await?;
    match library.user() {
        Some(user) => {
            let kind = if user.is_guest() { "guest" } else { "google" };
            println!("{} <{}> ({kind})", user.name, user.email);
        }
        None => println!("Not signed in"),
    }
    Ok(())
}

pub async fn catalog_list(config: Config, args: ListArgs) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    library.sync().await?;

    let books = library.catalog().books();
    if args.json {
        let raw = serde_json::to_string_pretty(books).context("serialize catalog")?;
        println!("{raw}");
        return Ok(());
    }
    for book in books {
        println!(
            "{}\t{} ({})\t{}\t{} scenes",
            book.id,
            book.title,
            book.publication_year,
            book.author,
            book.scenes.len()
        );
    }
    Ok(())
}

pub async fn catalog_sync(config: Config) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    if library.drive().is_none() {
        anyhow::bail!("sync requires a signed-in Google account (run `aether login --access-token ...`)");
    }
    let count = library.sync().await?;
    println!(
        "Synced {count} books from Drive ({} in catalog)",
        library.catalog().books().len()
    );
    Ok(())
}

pub async fn catalog_seed(config: Config) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    let count = library.seed().await?;
    println!("Seeded {count} starter books to Drive");
    Ok(())
}

pub async fn ingest(config: Config, args: IngestArgs) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    library.sync().await?;
    let book = library.ingest(&args.file).await?;
    println!("Ingested {} ({} scenes)", book.id, book.scenes.len());
    Ok(())
}

pub async fn read(config: Config, args: ReadArgs) -> anyhow::Result<()> {
    let mut library = open_library(config).await?;
    library.sync().await?;
    let book = find_book(&library, &args.book)?;

    let mut loader = ViewerLoader::new(book, library.generator());
    let state = loader.open(args.count).await;
    if state != ViewerState::Ready {
        anyhow::bail!("viewer did not become ready: {state:?}");
    }

    for _ in 0..args.load_more {
        if loader.load_more(args.count).await == 0 {
            break;
        }
    }

    if args.media {
        let first = loader.book().scenes.iter().map(|scene| scene.id).min();
        loader.set_active_scene(first);
        loader.refresh_active_media().await;
    }

    let end_of_archive = loader.is_end_of_archive();
    let book = loader.into_book();
    if args.json {
        let raw = serde_json::to_string_pretty(&book).context("serialize book")?;
        println!("{raw}");
    } else {
        print_book(&book, end_of_archive);
    }

    library.persist_book(book).await?;
    Ok(())
}

pub async fn teaser(config: Config, args: TeaserArgs) -> anyhow::Result<()> {
    let library = open_library(config).await?;
    let book = find_book(&library, &args.book)?;
    let url = video::generate_teaser(library.http(), &library.config().gemini, &book).await?;
    println!("{url}");
    Ok(())
}

fn find_book<S>(library: &Library<S>, book_id: &str) -> anyhow::Result<BookManifest>
where
    S: crate::session::KeyValueStore,
{
    library
        .catalog()
        .find(book_id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("book not found in catalog: {book_id}"))
}

fn print_book(book: &BookManifest, end_of_archive: bool) {
    println!("# {} ({})", book.title, book.author);
    for scene in &book.scenes {
        println!();
        println!("## {}. {}", scene.id, scene.heading);
        println!();
        println!("{}", scene.text);
        if scene.generated_image_url.is_some() {
            println!("[image attached]");
        }
        if scene.generated_audio_url.is_some() {
            println!("[narration attached]");
        }
    }
    if end_of_archive {
        println!();
        println!("[end of archive]");
    }
}
