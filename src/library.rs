use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::{auth, error};
use crate::catalog::{Catalog, reconcile};
use crate::config::{Config, GeneratorKind};
use crate::drive::{DriveClient, PublicDriveReader};
use crate::formats::{BookManifest, User};
use crate::generate::{BackendGenerator, ContentGenerator, GeminiGenerator};
use crate::ingest;
use crate::session::{KeyValueStore, SessionStore};
use crate::starter;

/// Application shell: identity, the reconciled catalog and the user's Drive
/// library.
pub struct Library<S> {
    config: Config,
    http: reqwest::Client,
    sessions: SessionStore<S>,
    user: Option<User>,
    catalog: Catalog,
    drive: Option<DriveClient>,
    /// Whether the user list came from a successful Drive read. Catalog
    /// writes replace the whole file, so they wait until this holds.
    user_catalog_loaded: bool,
}

impl<S: KeyValueStore> Library<S> {
    /// Loads the starter catalog and restores any stored session.
    pub async fn open(config: Config, http: reqwest::Client, storage: S) -> anyhow::Result<Self> {
        let starter_books = load_starter(&config, &http).await?;
        let sessions = SessionStore::new(storage);
        let user = sessions.restore()?;

        let mut library = Self {
            config,
            http,
            sessions,
            user: None,
            catalog: Catalog::new(starter_books, Vec::new()),
            drive: None,
            user_catalog_loaded: false,
        };
        library.set_user(user);
        Ok(library)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn drive(&self) -> Option<&DriveClient> {
        self.drive.as_ref()
    }

    pub async fn sign_in(&mut self, access_token: &str) -> anyhow::Result<User> {
        let user = auth::fetch_profile(&self.http, &self.config.userinfo_url, access_token)
            .await
            .context("sign in")?;
        self.sessions.persist(&user)?;
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    pub fn sign_in_guest(&mut self) -> anyhow::Result<User> {
        let user = auth::guest();
        self.sessions.persist(&user)?;
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    pub fn sign_out(&mut self) -> anyhow::Result<()> {
        self.sessions.clear()?;
        self.set_user(None);
        Ok(())
    }

    fn set_user(&mut self, user: Option<User>) {
        self.drive = user
            .as_ref()
            .and_then(|user| user.token.as_deref())
            .map(|token| DriveClient::new(self.http.clone(), self.config.drive.clone(), token));
        self.catalog.set_user(Vec::new());
        self.user_catalog_loaded = false;
        self.user = user;
    }

    /// Pulls the user catalog from Drive. Without a Drive session this is a
    /// no-op.
    ///
    /// A rejected token or a malformed catalog is an error. Other read
    /// failures leave the user list empty and marked unknown, so later writes
    /// re-read it first.
    pub async fn sync(&mut self) -> anyhow::Result<usize> {
        let Some(drive) = &self.drive else {
            tracing::info!("no drive session; skipping sync");
            return Ok(0);
        };
        let loaded = drive.try_get_catalog().await;
        match loaded {
            Ok(books) => Ok(self.apply_user_catalog(books)),
            Err(err) if error::is_unauthorized(&err) || err.is::<serde_json::Error>() => {
                Err(err.context("sync catalog"))
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to read catalog; showing starter books only");
                self.catalog.set_user(Vec::new());
                self.user_catalog_loaded = false;
                Ok(0)
            }
        }
    }

    fn apply_user_catalog(&mut self, books: Vec<BookManifest>) -> usize {
        let count = books.len();
        let attached = self.catalog.attach_cached_scenes(&books);
        if attached > 0 {
            tracing::info!(books = attached, "restored cached scenes for starter books");
        }
        self.catalog.set_user(books);
        self.user_catalog_loaded = true;
        count
    }

    /// Makes sure the user list mirrors Drive before a full catalog write.
    async fn require_user_catalog(&mut self) -> anyhow::Result<()> {
        if self.user_catalog_loaded {
            return Ok(());
        }
        let Some(drive) = &self.drive else {
            return Ok(());
        };
        let books = drive
            .try_get_catalog()
            .await
            .context("drive catalog could not be read; refusing to overwrite it")?;
        self.apply_user_catalog(books);
        Ok(())
    }

    /// Uploads a local file for ingestion and records the resulting book.
    pub async fn ingest(&mut self, path: &Path) -> anyhow::Result<BookManifest> {
        if self.user.is_none() {
            anyhow::bail!("sign in before ingesting books");
        }
        self.require_user_catalog().await?;
        let book = ingest::upload_book(&self.http, &self.config.backend_url, path).await?;
        self.catalog.upsert_user_book(book.clone());

        if let Some(drive) = &self.drive {
            drive.save_book(&book).await?;
            drive.save_catalog(self.catalog.books()).await?;
        }
        Ok(book)
    }

    /// Writes the built-in starter books and the starter catalog to Drive.
    pub async fn seed(&mut self) -> anyhow::Result<usize> {
        self.require_user_catalog().await?;
        let Some(drive) = &self.drive else {
            anyhow::bail!("seeding requires a signed-in Google account");
        };
        let books = starter::builtin_starter()?;
        for book in &books {
            drive.save_book(book).await?;
        }
        let catalog = reconcile(&books, self.catalog.user());
        drive.save_catalog(&catalog).await?;
        tracing::info!(books = books.len(), "seeded drive library");
        Ok(books.len())
    }

    /// Stores a book that gained scenes or media.
    pub async fn persist_book(&mut self, book: BookManifest) -> anyhow::Result<()> {
        self.require_user_catalog().await?;
        self.catalog.upsert_book(book.clone());
        if let Some(drive) = &self.drive {
            drive.save_book(&book).await?;
            drive.save_catalog(self.catalog.books()).await?;
        }
        Ok(())
    }

    pub fn generator(&self) -> Arc<dyn ContentGenerator> {
        build_generator(&self.config, &self.http)
    }
}

pub fn build_generator(config: &Config, http: &reqwest::Client) -> Arc<dyn ContentGenerator> {
    match config.generator {
        GeneratorKind::Gemini => Arc::new(GeminiGenerator::new(http.clone(), config.gemini.clone())),
        GeneratorKind::Backend => Arc::new(BackendGenerator::new(
            http.clone(),
            config.backend_url.clone(),
        )),
    }
}

/// Public Drive folder when configured and non-empty, the built-in list otherwise.
async fn load_starter(config: &Config, http: &reqwest::Client) -> anyhow::Result<Vec<BookManifest>> {
    if let (Some(folder_id), Some(api_key)) = (&config.starter_folder_id, &config.google_api_key) {
        let reader = PublicDriveReader::new(http.clone(), config.drive.clone());
        let books = starter::load_public_starter(&reader, folder_id, api_key).await;
        if !books.is_empty() {
            return Ok(books);
        }
        tracing::warn!(folder_id = %folder_id, "public starter folder is empty; using built-in starter");
    }
    starter::builtin_starter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryKeyValueStore;

    fn offline_config() -> anyhow::Result<Config> {
        Config::from_lookup(|_| None)
    }

    #[tokio::test]
    async fn guest_session_has_no_drive_and_sync_is_noop() -> anyhow::Result<()> {
        let mut library = Library::open(
            offline_config()?,
            reqwest::Client::new(),
            MemoryKeyValueStore::default(),
        )
        .await?;
        assert!(library.user().is_none());
        assert_eq!(library.catalog().books().len(), 6);

        library.sign_in_guest()?;
        assert!(library.user().is_some_and(User::is_guest));
        assert!(library.drive().is_none());
        assert_eq!(library.sync().await?, 0);
        assert!(library.seed().await.is_err());

        library.sign_out()?;
        assert!(library.user().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn ingest_requires_identity() -> anyhow::Result<()> {
        let mut library = Library::open(
            offline_config()?,
            reqwest::Client::new(),
            MemoryKeyValueStore::default(),
        )
        .await?;
        let err = library.ingest(Path::new("story.txt")).await.unwrap_err();
        assert!(format!("{err:#}").contains("sign in"));
        Ok(())
    }

    #[tokio::test]
    async fn persisted_book_replaces_starter_entry_offline() -> anyhow::Result<()> {
        let mut library = Library::open(
            offline_config()?,
            reqwest::Client::new(),
            MemoryKeyValueStore::default(),
        )
        .await?;
        let mut book = library
            .catalog()
            .find("skull")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing starter book"))?;
        book.scenes = crate::generate::placeholder_scenes(1, 2);

        library.persist_book(book).await?;
        assert_eq!(library.catalog().find("skull").map(|b| b.scenes.len()), Some(2));
        assert_eq!(library.catalog().books().len(), 6);
        Ok(())
    }
}
