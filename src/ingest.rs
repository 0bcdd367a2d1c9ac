use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

use crate::error::{RemoteError, check_status};
use crate::formats::{AudioProfile, BookManifest, Scene, Theme};
use crate::generate::{GeminiGenerator, GeneratedScene};
use crate::gemini;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md"];
pub const CHUNK_CHARS: usize = 1500;
pub const DEFAULT_COVER_IMAGE: &str = "https://picsum.photos/400/600?grayscale";

/// Sends a local text file to the ingestion endpoint and returns the new book.
pub async fn upload_book(
    client: &reqwest::Client,
    backend_url: &str,
    path: &Path,
) -> anyhow::Result<BookManifest> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        anyhow::bail!(
            "unsupported file type: {} (expected .txt or .md)",
            path.display()
        );
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", path.display()))?
        .to_owned();

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    tracing::info!(file = %file_name, bytes = bytes.len(), "uploading book for ingestion");

    let part = reqwest::multipart::Part::bytes(bytes)
        .file_name(file_name.clone())
        .mime_str("text/plain")
        .context("build multipart part")?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let endpoint = format!("{}/api/ingest", backend_url.trim_end_matches('/'));
    let response = client
        .post(&endpoint)
        .multipart(form)
        .send()
        .await
        .map_err(RemoteError::from)
        .with_context(|| format!("POST {endpoint}"))?;
    let book: BookManifest = check_status(response)
        .await
        .with_context(|| format!("ingest {file_name}"))?
        .json()
        .await
        .map_err(RemoteError::from)
        .context("parse ingested manifest")?;

    tracing::info!(book_id = %book.id, scenes = book.scenes.len(), "book ingested");
    Ok(book)
}

/// UTF-8 when valid, otherwise every byte is read as a Latin-1 code point.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

pub fn manifest_id(filename: &str) -> String {
    filename.to_lowercase().replace([' ', '.'], "_")
}

pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars = text.chars().collect::<Vec<_>>();
    chars
        .chunks(chunk_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Whole-book analysis as returned by the model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAnalysis {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub audio_profile: Option<AudioProfile>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scenes: Vec<GeneratedScene>,
}

pub fn analysis_prompt(content: &str) -> String {
    format!(
        "Analyze the following book text.\n\
1. Determine genre, tone and setting.\n\
2. Recommend a theme: primaryColor (hex), font (one of 'Orbitron', 'Share Tech Mono', 'Merriweather', 'Lora'), \
backgroundStyle (one of 'pulp_texture', 'industrial_blueprint', 'noir_shadows', 'clinical_white', 'verdant_forest').\n\
3. Recommend an audioProfile: narratorVoice (one of 'Aoede', 'Charon', 'Fenrir', 'Puck', 'Kore', 'Zephyr') \
and ambientTrack (one of 'desert_wind', 'computer_hum', 'subterranean_rumble', 'wind_leaves', 'dripping_water', 'hospital_beeps', 'silence').\n\
4. Three short tags.\n\
5. Split the story into its key narrative scenes, each with heading, the full text of the scene, \
imagePrompt (a detailed illustration prompt) and videoPrompt (the motion in the scene).\n\
\n\
Return ONLY a JSON object: {{\"theme\": {{...}}, \"audioProfile\": {{...}}, \"tags\": [...], \"scenes\": [...]}}\n\
\n\
TEXT:\n{content}"
    )
}

/// Asks the scene models for a full analysis; `None` when none produce scenes.
pub async fn analyze(generator: &GeminiGenerator, content: &str) -> Option<BookAnalysis> {
    let mut body = gemini::text_request(&analysis_prompt(content), None);
    if let Some(obj) = body.as_object_mut() {
        obj.insert(
            "generationConfig".to_owned(),
            serde_json::json!({ "responseMimeType": "application/json" }),
        );
    }

    match generator.first_json_reply::<BookAnalysis>(&body).await {
        Ok(analysis) if !analysis.scenes.is_empty() => Some(analysis),
        Ok(_) => {
            tracing::warn!("analysis returned no scenes; falling back to chunking");
            None
        }
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "analysis failed; falling back to chunking");
            None
        }
    }
}

/// Builds the manifest for an uploaded file. Without an analysis the text is
/// split into fixed-size parts.
pub fn build_manifest(
    filename: &str,
    content: &str,
    analysis: Option<BookAnalysis>,
) -> BookManifest {
    let analysis = analysis.filter(|analysis| !analysis.scenes.is_empty());

    let (tags, theme, audio_profile, scenes) = match analysis {
        Some(analysis) => {
            let scenes = analysis
                .scenes
                .into_iter()
                .enumerate()
                .map(|(idx, scene)| Scene {
                    id: idx as u32,
                    heading: scene.heading,
                    text: scene.text,
                    image_prompt: scene.image_prompt,
                    audio_mood: scene.audio_mood,
                    video_prompt: scene.video_prompt,
                    generated_image_url: None,
                    generated_audio_url: None,
                })
                .collect::<Vec<_>>();
            let tags = if analysis.tags.is_empty() {
                vec!["Sci-Fi".to_owned()]
            } else {
                analysis.tags
            };
            (
                tags,
                analysis.theme.unwrap_or_default(),
                analysis.audio_profile.unwrap_or_default(),
                scenes,
            )
        }
        None => {
            let tags = vec!["Sci-Fi".to_owned()];
            let style = &tags[0];
            let scenes = chunk_text(content, CHUNK_CHARS)
                .into_iter()
                .enumerate()
                .map(|(idx, chunk)| Scene {
                    id: idx as u32,
                    heading: format!("Part {}", idx + 1),
                    text: chunk,
                    image_prompt: format!("Illustration for part {}: {style} style.", idx + 1),
                    audio_mood: String::new(),
                    video_prompt: Some(format!("Cinematic shot of {style} scene.")),
                    generated_image_url: None,
                    generated_audio_url: None,
                })
                .collect::<Vec<_>>();
            (tags, Theme::default(), AudioProfile::default(), scenes)
        }
    };

    BookManifest {
        id: manifest_id(filename),
        title: filename.to_owned(),
        author: "Unknown".to_owned(),
        publication_year: 2024,
        description: format!("Vibe Coded by Gemini 3. {}", tags.join(", ")),
        cover_image: DEFAULT_COVER_IMAGE.to_owned(),
        tags,
        theme,
        audio_profile,
        scenes,
        reader_content: None,
    }
}
