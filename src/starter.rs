use anyhow::Context as _;

use crate::drive::PublicDriveReader;
use crate::formats::BookManifest;

const BUILTIN_STARTER_JSON: &str = include_str!("../assets/starter_catalog.json");

/// The public-domain books every reader sees, shipped with the binary.
pub fn builtin_starter() -> anyhow::Result<Vec<BookManifest>> {
    serde_json::from_str(BUILTIN_STARTER_JSON).context("parse built-in starter catalog")
}

/// Loads the starter catalog from a publicly shared Drive folder.
///
/// Only `*.json` files are read, names starting with `_` are skipped, and a
/// manifest without an id takes the Drive file id. Unreadable files are
/// skipped with a warning.
pub async fn load_public_starter(
    reader: &PublicDriveReader,
    folder_id: &str,
    api_key: &str,
) -> Vec<BookManifest> {
    let files = reader.list_public_folder(folder_id, api_key).await;

    let mut books = Vec::new();
    for file in files {
        if !file.name.ends_with(".json") || file.name.starts_with('_') {
            continue;
        }
        let Some(mut value) = reader.get_file_content(&file.id, api_key).await else {
            continue;
        };
        fill_missing_id(&mut value, &file.id);

        match serde_json::from_value::<BookManifest>(value) {
            Ok(book) => books.push(book),
            Err(err) => {
                tracing::warn!(file_id = %file.id, name = %file.name, %err, "skipping unreadable starter book");
            }
        }
    }

    tracing::info!(folder_id, books = books.len(), "loaded public starter catalog");
    books
}

fn fill_missing_id(value: &mut serde_json::Value, file_id: &str) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let has_id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        obj.insert("id".to_owned(), serde_json::Value::String(file_id.to_owned()));
    }
}
