use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context as _;

use crate::formats::User;

pub const SESSION_KEY: &str = "aether_user_session";

/// Durable string storage keyed by name.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

/// One file per key under `base_dir`.
#[derive(Debug, Clone)]
pub struct FsKeyValueStore {
    base_dir: PathBuf,
}

impl FsKeyValueStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FsKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.key_path(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("create data dir: {}", self.base_dir.display()))?;

        let path = self.key_path(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.base_dir)
            .with_context(|| format!("create temp file in {}", self.base_dir.display()))?;
        tmp.write_all(value.as_bytes())
            .with_context(|| format!("write temp file for {key}"))?;
        tmp.persist(&path)
            .with_context(|| format!("rename temp file to {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.key_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.lock()?.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Persists the single signed-in identity. Last writer wins.
///
/// The record includes the bearer token in plain text; nothing rotates or
/// expires it locally.
pub struct SessionStore<S> {
    storage: S,
}

impl<S: KeyValueStore> SessionStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the stored identity. A record that does not parse is deleted
    /// and treated as signed out.
    pub fn restore(&self) -> anyhow::Result<Option<User>> {
        let Some(raw) = self.storage.get(SESSION_KEY).context("read session")? else {
            return Ok(None);
        };

        match serde_json::from_str::<User>(&raw) {
            Ok(user) => {
                tracing::debug!(user_id = %user.id, "restored session");
                Ok(Some(user))
            }
            Err(err) => {
                tracing::warn!(%err, "discarding unreadable session record");
                self.storage
                    .remove(SESSION_KEY)
                    .context("remove corrupt session")?;
                Ok(None)
            }
        }
    }

    pub fn persist(&self, user: &User) -> anyhow::Result<()> {
        let raw = serde_json::to_string(user).context("serialize session")?;
        self.storage.set(SESSION_KEY, &raw).context("write session")?;
        tracing::info!(user_id = %user.id, email = %user.email, "session persisted");
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        self.storage.remove(SESSION_KEY).context("clear session")?;
        tracing::info!("session cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "1234".to_owned(),
            name: "Ada".to_owned(),
            email: "ada@example.com".to_owned(),
            avatar_url: "https://example.com/a.png".to_owned(),
            token: Some("ya29.token".to_owned()),
        }
    }

    #[test]
    fn restore_without_record_is_none() -> anyhow::Result<()> {
        let sessions = SessionStore::new(MemoryKeyValueStore::default());
        assert_eq!(sessions.restore()?, None);
        Ok(())
    }

    #[test]
    fn persisted_identity_round_trips_with_token() -> anyhow::Result<()> {
        let sessions = SessionStore::new(MemoryKeyValueStore::default());
        sessions.persist(&user())?;
        assert_eq!(sessions.restore()?, Some(user()));

        sessions.clear()?;
        assert_eq!(sessions.restore()?, None);
        Ok(())
    }

    #[test]
    fn corrupt_record_is_discarded() -> anyhow::Result<()> {
        let sessions = SessionStore::new(MemoryKeyValueStore::default());
        sessions.storage().set(SESSION_KEY, "{not json")?;

        assert_eq!(sessions.restore()?, None);
        assert_eq!(sessions.storage().get(SESSION_KEY)?, None);
        Ok(())
    }

    #[test]
    fn fs_store_overwrites_and_removes() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let sessions = SessionStore::new(FsKeyValueStore::new(temp.path().join("data")));

        sessions.persist(&user())?;
        let mut renamed = user();
        renamed.name = "Grace".to_owned();
        sessions.persist(&renamed)?;
        assert_eq!(sessions.restore()?.map(|u| u.name), Some("Grace".to_owned()));

        sessions.clear()?;
        sessions.clear()?;
        assert!(!temp.path().join("data").join("aether_user_session.json").exists());
        Ok(())
    }

    #[test]
    fn fs_store_discards_garbage_file() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = FsKeyValueStore::new(temp.path());
        std::fs::write(temp.path().join("aether_user_session.json"), "garbage")?;

        let sessions = SessionStore::new(store);
        assert_eq!(sessions.restore()?, None);
        assert!(!temp.path().join("aether_user_session.json").exists());
        Ok(())
    }
}
