use anyhow::Context as _;
use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::config::DriveConfig;
use crate::error::{RemoteError, check_status, is_unauthorized};
use crate::formats::{BookManifest, DriveFile};

pub const LIBRARY_FOLDER_NAME: &str = "Project Aether Archive";
pub const CATALOG_FILE_NAME: &str = "_catalog.json";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Drive-backed store for the signed-in user's library folder.
///
/// The folder id is resolved once per client and reused afterwards.
pub struct DriveClient {
    client: reqwest::Client,
    config: DriveConfig,
    token: String,
    folder_id: OnceCell<String>,
}

impl DriveClient {
    pub fn new(client: reqwest::Client, config: DriveConfig, token: impl Into<String>) -> Self {
        Self {
            client,
            config,
            token: token.into(),
            folder_id: OnceCell::new(),
        }
    }

    fn files_endpoint(&self) -> String {
        format!("{}/files", self.config.api_base)
    }

    /// Finds the library folder by exact name, creating it when missing.
    pub async fn ensure_folder(&self) -> anyhow::Result<String> {
        let folder_id = self
            .folder_id
            .get_or_try_init(|| self.find_or_create_folder())
            .await?;
        Ok(folder_id.clone())
    }

    async fn find_or_create_folder(&self) -> anyhow::Result<String> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
            escape_query_literal(LIBRARY_FOLDER_NAME)
        );
        let existing = self
            .search(&query)
            .await
            .context("search library folder")?;
        if let Some(folder) = existing.into_iter().next() {
            tracing::info!(folder_id = %folder.id, name = LIBRARY_FOLDER_NAME, "found library folder");
            return Ok(folder.id);
        }

        let endpoint = self.files_endpoint();
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "name": LIBRARY_FOLDER_NAME,
                "mimeType": FOLDER_MIME_TYPE,
            }))
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("POST {endpoint}"))?;
        let created: CreatedFile = check_status(response)
            .await
            .context("create library folder")?
            .json()
            .await
            .map_err(RemoteError::from)
            .context("parse created folder")?;

        tracing::info!(folder_id = %created.id, name = LIBRARY_FOLDER_NAME, "created library folder");
        Ok(created.id)
    }

    /// Reads `_catalog.json` from the library folder.
    ///
    /// A missing file, or a transient failure to reach Drive, yields an empty
    /// catalog. A rejected token and content that is not a valid catalog are
    /// errors.
    pub async fn get_catalog(&self) -> anyhow::Result<Vec<BookManifest>> {
        match self.fetch_catalog_raw().await {
            Ok(raw) => parse_catalog(raw),
            Err(err) if is_unauthorized(&err) => Err(err),
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "failed to read catalog; using empty catalog");
                Ok(Vec::new())
            }
        }
    }

    /// Like [`DriveClient::get_catalog`], but every read failure is an error.
    /// `Ok` means the returned list is what Drive holds.
    pub async fn try_get_catalog(&self) -> anyhow::Result<Vec<BookManifest>> {
        parse_catalog(self.fetch_catalog_raw().await?)
    }

    async fn fetch_catalog_raw(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(file) = self.find_in_folder(CATALOG_FILE_NAME).await? else {
            return Ok(None);
        };

        let endpoint = file_url(&self.config.api_base, &file.id)?;
        let response = self
            .client
            .get(endpoint.clone())
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("GET {endpoint}"))?;
        let bytes = check_status(response)
            .await
            .context("download catalog")?
            .bytes()
            .await
            .map_err(RemoteError::from)
            .context("read catalog body")?;
        Ok(Some(bytes.to_vec()))
    }

    /// Replaces the whole catalog file. Callers pass the reconciled catalog.
    pub async fn save_catalog(&self, books: &[BookManifest]) -> anyhow::Result<String> {
        let payload = serde_json::to_string_pretty(books).context("serialize catalog")?;
        let file_id = self
            .upsert_json(CATALOG_FILE_NAME, &payload)
            .await
            .context("save catalog")?;
        tracing::info!(file_id = %file_id, books = books.len(), "catalog saved");
        Ok(file_id)
    }

    pub async fn save_book(&self, book: &BookManifest) -> anyhow::Result<String> {
        let payload = serde_json::to_string_pretty(book).context("serialize book")?;
        let file_id = self
            .upsert_json(&book_file_name(&book.id), &payload)
            .await
            .with_context(|| format!("save book {}", book.id))?;
        tracing::info!(file_id = %file_id, book_id = %book.id, "book saved");
        Ok(file_id)
    }

    async fn upsert_json(&self, name: &str, payload: &str) -> anyhow::Result<String> {
        let folder_id = self.ensure_folder().await?;
        let existing = self.find_in_folder(name).await?;

        // Drive rejects `parents` on update; only create may set it.
        let metadata = match &existing {
            Some(_) => serde_json::json!({
                "name": name,
                "mimeType": "application/json",
            }),
            None => serde_json::json!({
                "name": name,
                "mimeType": "application/json",
                "parents": [folder_id],
            }),
        };
        let body = MultipartRelated::new(&metadata.to_string(), payload);

        let request = match &existing {
            Some(file) => {
                tracing::debug!(file_id = %file.id, name, "updating drive file");
                self.client
                    .patch(format!("{}/{}", self.config.upload_base, file.id))
            }
            None => {
                tracing::debug!(name, "creating drive file");
                self.client.post(&self.config.upload_base)
            }
        };

        let response = request
            .query(&[("uploadType", "multipart")])
            .header(reqwest::header::CONTENT_TYPE, body.content_type())
            .body(body.into_bytes())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("upload {name}"))?;
        let response = check_status(response)
            .await
            .with_context(|| format!("upload {name}"))?;

        match existing {
            Some(file) => Ok(file.id),
            None => {
                let created: CreatedFile = response
                    .json()
                    .await
                    .map_err(RemoteError::from)
                    .with_context(|| format!("parse upload response for {name}"))?;
                Ok(created.id)
            }
        }
    }

    async fn find_in_folder(&self, name: &str) -> anyhow::Result<Option<DriveFile>> {
        let folder_id = self.ensure_folder().await?;
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_literal(name),
            escape_query_literal(&folder_id)
        );
        let files = self
            .search(&query)
            .await
            .with_context(|| format!("search {name}"))?;
        Ok(files.into_iter().next())
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<DriveFile>> {
        let endpoint = self.files_endpoint();
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.token)
            .query(&[("q", query), ("fields", "files(id, name, mimeType)")])
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("GET {endpoint}"))?;
        let list: FileList = check_status(response)
            .await?
            .json()
            .await
            .map_err(RemoteError::from)
            .context("parse file list")?;
        Ok(list.files)
    }
}

/// Unauthenticated reader for a publicly shared folder.
#[derive(Clone)]
pub struct PublicDriveReader {
    client: reqwest::Client,
    config: DriveConfig,
}

impl PublicDriveReader {
    pub fn new(client: reqwest::Client, config: DriveConfig) -> Self {
        Self { client, config }
    }

    /// Lists the folder; any failure yields an empty listing.
    pub async fn list_public_folder(&self, folder_id: &str, api_key: &str) -> Vec<DriveFile> {
        match self.try_list(folder_id, api_key).await {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(folder_id, error = %format!("{err:#}"), "failed to list public folder");
                Vec::new()
            }
        }
    }

    async fn try_list(&self, folder_id: &str, api_key: &str) -> anyhow::Result<Vec<DriveFile>> {
        let endpoint = format!("{}/files", self.config.api_base);
        let query = format!(
            "'{}' in parents and trashed = false",
            escape_query_literal(folder_id)
        );
        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("q", query.as_str()),
                ("key", api_key),
                ("fields", "files(id, name, mimeType)"),
            ])
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("GET {endpoint}"))?;
        let list: FileList = check_status(response)
            .await?
            .json()
            .await
            .map_err(RemoteError::from)
            .context("parse public file list")?;
        Ok(list.files)
    }

    /// Downloads one file as JSON; any failure yields `None`.
    pub async fn get_file_content(&self, file_id: &str, api_key: &str) -> Option<serde_json::Value> {
        match self.try_get(file_id, api_key).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(file_id, error = %format!("{err:#}"), "failed to fetch public file");
                None
            }
        }
    }

    async fn try_get(&self, file_id: &str, api_key: &str) -> anyhow::Result<serde_json::Value> {
        let endpoint = file_url(&self.config.api_base, file_id)?;
        let response = self
            .client
            .get(endpoint.clone())
            .query(&[("alt", "media"), ("key", api_key)])
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("GET {endpoint}"))?;
        let value = check_status(response)
            .await?
            .json()
            .await
            .map_err(RemoteError::from)
            .context("parse public file json")?;
        Ok(value)
    }
}

fn parse_catalog(raw: Option<Vec<u8>>) -> anyhow::Result<Vec<BookManifest>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let books: Vec<BookManifest> = serde_json::from_slice(&raw).context("parse catalog json")?;
    tracing::info!(books = books.len(), "loaded catalog from drive");
    Ok(books)
}

/// `{base}/files/{file_id}` with the id encoded as a single path segment.
fn file_url(api_base: &str, file_id: &str) -> anyhow::Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(api_base)
        .with_context(|| format!("invalid drive api base: {api_base}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("drive api base cannot take a path: {api_base}"))?
        .pop_if_empty()
        .extend(["files", file_id]);
    Ok(url)
}

pub fn book_file_name(book_id: &str) -> String {
    format!("{book_id}.json")
}

/// Escapes a value for use inside a single-quoted Drive query literal.
pub fn escape_query_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `multipart/related` body: JSON metadata part followed by the JSON payload.
struct MultipartRelated {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartRelated {
    fn new(metadata_json: &str, payload_json: &str) -> Self {
        let boundary = format!("aether-{}", uuid::Uuid::new_v4().simple());
        let mut body = String::with_capacity(metadata_json.len() + payload_json.len() + 256);
        for part in [metadata_json, payload_json] {
            body.push_str("--");
            body.push_str(&boundary);
            body.push_str("\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n");
            body.push_str(part);
            body.push_str("\r\n");
        }
        body.push_str("--");
        body.push_str(&boundary);
        body.push_str("--\r\n");

        Self {
            boundary,
            body: body.into_bytes(),
        }
    }

    fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    fn into_bytes(self) -> Vec<u8> {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_literals_escape_quotes_and_backslashes() {
        assert_eq!(escape_query_literal("O'Brien"), "O\\'Brien");
        assert_eq!(escape_query_literal("a\\b"), "a\\\\b");
        assert_eq!(escape_query_literal("plain"), "plain");
    }

    #[test]
    fn multipart_body_has_metadata_then_payload() {
        let body = MultipartRelated::new(r#"{"name":"x.json"}"#, r#"{"id":"x"}"#);
        let content_type = body.content_type();
        let boundary = content_type
            .strip_prefix("multipart/related; boundary=")
            .unwrap()
            .to_owned();
        let text = String::from_utf8(body.into_bytes()).unwrap();

        let meta_at = text.find(r#"{"name":"x.json"}"#).unwrap();
        let payload_at = text.find(r#"{"id":"x"}"#).unwrap();
        assert!(meta_at < payload_at);
        assert!(text.starts_with(&format!("--{boundary}\r\n")));
        assert!(text.ends_with(&format!("--{boundary}--\r\n")));
        assert_eq!(text.matches(&format!("--{boundary}")).count(), 3);
    }

    #[test]
    fn file_ids_are_encoded_as_one_path_segment() -> anyhow::Result<()> {
        let url = file_url("https://www.googleapis.com/drive/v3", "a/b?c")?;
        assert_eq!(url.as_str(), "https://www.googleapis.com/drive/v3/files/a%2Fb%3Fc");

        let url = file_url("http://127.0.0.1:9/drive/v3/", "plain")?;
        assert_eq!(url.path(), "/drive/v3/files/plain");
        Ok(())
    }

    #[test]
    fn book_files_are_named_after_the_id() {
        assert_eq!(book_file_name("2br02b"), "2br02b.json");
    }
}
