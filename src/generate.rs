use anyhow::Context as _;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::config::GeminiConfig;
use crate::error::{RemoteError, check_status};
use crate::formats::{BookManifest, Scene};
use crate::gemini;

pub const PLACEHOLDER_HEADING: &str = "Neural Link Offline";
pub const PLACEHOLDER_TEXT: &str = "The connection to the Aether Archives has been interrupted. Displaying cached simulation data...";
pub const PLACEHOLDER_IMAGE_PROMPT: &str = "Static noise";
pub const PLACEHOLDER_AUDIO_MOOD: &str = "Glitch";

/// Source of generated narrative and media.
///
/// Scene generation never fails: implementations fall back to placeholder
/// scenes. Media generation reports failure as `None` and leaves the fallback
/// to the caller.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_book_content(
        &self,
        book: &BookManifest,
        start_id: u32,
        count: usize,
    ) -> Vec<Scene>;

    async fn generate_image(&self, prompt: &str, book_id: &str, scene_id: u32) -> Option<String>;

    async fn generate_audio(
        &self,
        text: &str,
        voice: &str,
        book_id: &str,
        scene_id: u32,
    ) -> Option<String>;

    async fn generate_cover_prompt(&self, book: &BookManifest) -> String {
        format!("Cover art for {}", book.title)
    }
}

pub fn placeholder_scenes(start_id: u32, count: usize) -> Vec<Scene> {
    (0..count)
        .map(|offset| Scene {
            id: start_id + offset as u32,
            heading: PLACEHOLDER_HEADING.to_owned(),
            text: PLACEHOLDER_TEXT.to_owned(),
            image_prompt: PLACEHOLDER_IMAGE_PROMPT.to_owned(),
            audio_mood: PLACEHOLDER_AUDIO_MOOD.to_owned(),
            video_prompt: None,
            generated_image_url: None,
            generated_audio_url: None,
        })
        .collect()
}

/// Scene as produced by a model or the backend, before numbering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedScene {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub audio_mood: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_prompt: Option<String>,
}

/// Assigns ids `start_id..` in order and keeps at most `count` scenes.
pub fn number_scenes(generated: Vec<GeneratedScene>, start_id: u32, count: usize) -> Vec<Scene> {
    generated
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(offset, scene)| Scene {
            id: start_id + offset as u32,
            heading: scene.heading,
            text: scene.text,
            image_prompt: scene.image_prompt,
            audio_mood: scene.audio_mood,
            video_prompt: scene.video_prompt,
            generated_image_url: None,
            generated_audio_url: None,
        })
        .collect()
}

pub fn scene_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "NUMBER" },
                "heading": { "type": "STRING" },
                "text": { "type": "STRING" },
                "imagePrompt": { "type": "STRING" },
                "audioMood": { "type": "STRING" }
            },
            "required": ["heading", "text", "imagePrompt", "audioMood"]
        }
    })
}

pub fn scene_prompt(book: &BookManifest, start_id: u32, count: usize) -> String {
    let mut prompt = format!(
        "You are the narrative engine of a digital archive of public domain books.\n\
The book is \"{title}\" by {author} ({year}). Description: {description}\n\
Tags: {tags}.\n\
\n\
Write the next {count} consecutive sections of the book, numbered from {start_id}.\n\
Each section needs:\n\
- heading: a short section title.\n\
- text: the narrative text of the section (several paragraphs, original formatting preserved).\n\
- imagePrompt: a detailed visual description of the key moment, for an illustrator.\n\
- audioMood: one or two words describing the soundscape.\n",
        title = book.title,
        author = book.author,
        year = book.publication_year,
        description = book.description,
        tags = book.tags.join(", "),
    );

    if let Some(last) = book.scenes.iter().max_by_key(|scene| scene.id) {
        let tail = tail_chars(&last.text, 1200);
        prompt.push_str(&format!(
            "\nThe previous section was \"{}\" and ended with:\n{}\nContinue from there.\n",
            last.heading, tail
        ));
    }

    prompt.push_str("\nReturn ONLY a JSON array of sections.\n");
    prompt
}

fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let skip = total - max_chars;
    let start = text
        .char_indices()
        .nth(skip)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    &text[start..]
}

/// Parses a model reply into scenes; fenced or empty output is an error.
pub fn parse_scene_reply(raw: &str) -> anyhow::Result<Vec<GeneratedScene>> {
    let json = gemini::strip_code_fences(raw);
    let scenes: Vec<GeneratedScene> =
        serde_json::from_str(json).context("parse scene array json")?;
    if scenes.is_empty() {
        anyhow::bail!("model returned no scenes");
    }
    if scenes.iter().all(|scene| scene.text.trim().is_empty()) {
        anyhow::bail!("model returned scenes without text");
    }
    Ok(scenes)
}

/// Calls Gemini directly, walking `scene_models` in order until one answers.
pub struct GeminiGenerator {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn new(client: reqwest::Client, config: GeminiConfig) -> Self {
        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; scene generation will use placeholders");
        }
        Self { client, config }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn scenes_from_model(
        &self,
        api_key: &str,
        model: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<Vec<GeneratedScene>> {
        let raw = gemini::generate_text(&self.client, &self.config.base_url, api_key, model, body)
            .await?;
        parse_scene_reply(&raw)
    }

    /// Runs `body` against each scene model in turn and returns the first
    /// parsed JSON reply.
    pub async fn first_json_reply<T>(&self, body: &serde_json::Value) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;

        let mut last_err = None;
        for model in &self.config.scene_models {
            let attempt = async {
                let raw = gemini::generate_text(
                    &self.client,
                    &self.config.base_url,
                    api_key,
                    model,
                    body,
                )
                .await?;
                serde_json::from_str::<T>(gemini::strip_code_fences(&raw))
                    .context("parse model json")
            };
            match attempt.await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(model = %model, error = %format!("{err:#}"), "model failed; trying next");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no models configured")))
    }
}

#[async_trait]
impl ContentGenerator for GeminiGenerator {
    async fn generate_book_content(
        &self,
        book: &BookManifest,
        start_id: u32,
        count: usize,
    ) -> Vec<Scene> {
        if count == 0 {
            return Vec::new();
        }
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::warn!(book_id = %book.id, "no Gemini API key; returning placeholder scenes");
            return placeholder_scenes(start_id, count);
        };

        let body = gemini::text_request(&scene_prompt(book, start_id, count), Some(scene_schema()));

        for (attempt, model) in self.config.scene_models.iter().enumerate() {
            tracing::info!(book_id = %book.id, model = %model, start_id, count, "requesting scenes");
            match self.scenes_from_model(api_key, model, &body).await {
                Ok(generated) => {
                    let scenes = number_scenes(generated, start_id, count);
                    tracing::info!(
                        book_id = %book.id,
                        model = %model,
                        scenes = scenes.len(),
                        "scenes generated"
                    );
                    return scenes;
                }
                Err(err) => {
                    tracing::warn!(
                        book_id = %book.id,
                        model = %model,
                        attempt = attempt + 1,
                        attempts = self.config.scene_models.len(),
                        error = %format!("{err:#}"),
                        "scene generation failed; trying next model"
                    );
                }
            }
        }

        tracing::warn!(book_id = %book.id, start_id, count, "all models failed; returning placeholder scenes");
        placeholder_scenes(start_id, count)
    }

    async fn generate_image(&self, prompt: &str, book_id: &str, scene_id: u32) -> Option<String> {
        let api_key = self.config.api_key.as_deref()?;
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "16:9" }
            }
        });

        let result = async {
            let value = gemini::generate_content(
                &self.client,
                &self.config.base_url,
                api_key,
                &self.config.image_model,
                &body,
            )
            .await?;
            gemini::extract_inline_data(&value)
        }
        .await;

        match result {
            Ok(inline) => {
                tracing::info!(book_id, scene_id, mime = %inline.mime_type, "image generated");
                Some(inline.to_data_url())
            }
            Err(err) => {
                tracing::error!(book_id, scene_id, error = %format!("{err:#}"), "image generation failed");
                None
            }
        }
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice: &str,
        book_id: &str,
        scene_id: u32,
    ) -> Option<String> {
        let api_key = self.config.api_key.as_deref()?;
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });

        let result = async {
            let value = gemini::generate_content(
                &self.client,
                &self.config.base_url,
                api_key,
                &self.config.tts_model,
                &body,
            )
            .await?;
            let inline = gemini::extract_inline_data(&value)?;
            audio_data_url(&inline)
        }
        .await;

        match result {
            Ok(url) => {
                tracing::info!(book_id, scene_id, voice, "narration generated");
                Some(url)
            }
            Err(err) => {
                tracing::error!(book_id, scene_id, error = %format!("{err:#}"), "narration generation failed");
                None
            }
        }
    }

    async fn generate_cover_prompt(&self, book: &BookManifest) -> String {
        let fallback = format!("Cover art for {}", book.title);
        let prompt = format!(
            "Create a vivid, detailed image prompt for the cover of the book \"{}\" by {}. \
Description: {}. Style: {}. Return ONLY the prompt.",
            book.title,
            book.author,
            book.description,
            book.tags.join(", ")
        );
        let Some(api_key) = self.config.api_key.as_deref() else {
            return fallback;
        };
        let Some(model) = self.config.scene_models.first() else {
            return fallback;
        };

        let body = gemini::text_request(&prompt, None);
        match gemini::generate_text(&self.client, &self.config.base_url, api_key, model, &body)
            .await
        {
            Ok(text) => text.trim().to_owned(),
            Err(err) => {
                tracing::warn!(book_id = %book.id, error = %format!("{err:#}"), "cover prompt generation failed");
                fallback
            }
        }
    }
}

/// Raw PCM (`audio/L16;rate=...`) is wrapped into a WAV container so players
/// can use it directly; other audio types pass through unchanged.
pub fn audio_data_url(inline: &gemini::InlineData) -> anyhow::Result<String> {
    let mime = inline.mime_type.to_ascii_lowercase();
    if !mime.starts_with("audio/l16") && !mime.contains("codec=pcm") {
        return Ok(inline.to_data_url());
    }

    let sample_rate = mime
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse::<u32>().ok())
        .unwrap_or(24_000);
    let pcm = base64::engine::general_purpose::STANDARD
        .decode(inline.data_base64.as_bytes())
        .context("decode pcm base64")?;
    let wav = wav_from_pcm16_mono(&pcm, sample_rate);
    let encoded = base64::engine::general_purpose::STANDARD.encode(wav);
    Ok(format!("data:audio/wav;base64,{encoded}"))
}

fn wav_from_pcm16_mono(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let channels: u16 = 1;
    let bits_per_sample: u16 = 16;
    let block_align = channels * bits_per_sample / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut out = Vec::with_capacity(44 + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Request body shared by the backend generation endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub book_id: String,
    pub scene_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenesResponse {
    #[serde(default)]
    pub scenes: Vec<GeneratedScene>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaResponse {
    #[serde(default)]
    pub url: Option<String>,
}

/// Delegates generation to the backend proxy, which holds the API keys.
///
/// An empty scene list from the backend is passed through: it means the
/// backend has nothing more for this book.
pub struct BackendGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl BackendGenerator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        request: &GenerationRequest,
    ) -> anyhow::Result<T> {
        let endpoint = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("POST {endpoint}"))?;
        let value = check_status(response)
            .await?
            .json()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("parse response from {endpoint}"))?;
        Ok(value)
    }
}

#[async_trait]
impl ContentGenerator for BackendGenerator {
    async fn generate_book_content(
        &self,
        book: &BookManifest,
        start_id: u32,
        count: usize,
    ) -> Vec<Scene> {
        if count == 0 {
            return Vec::new();
        }
        let request = GenerationRequest {
            book_id: book.id.clone(),
            // The backend numbers from `scene_id + 1`.
            scene_id: i64::from(start_id) - 1,
            prompt: Some(format!(
                "The book is \"{}\" by {}. Description: {}.",
                book.title, book.author, book.description
            )),
            voice: None,
            count: Some(count),
        };

        match self
            .post::<ScenesResponse>("/api/generate/scenes", &request)
            .await
        {
            Ok(response) => {
                tracing::info!(book_id = %book.id, scenes = response.scenes.len(), "received scenes from backend");
                number_scenes(response.scenes, start_id, count)
            }
            Err(err) => {
                tracing::warn!(book_id = %book.id, error = %format!("{err:#}"), "backend scene generation failed; using placeholders");
                placeholder_scenes(start_id, count)
            }
        }
    }

    async fn generate_image(&self, prompt: &str, book_id: &str, scene_id: u32) -> Option<String> {
        let request = GenerationRequest {
            book_id: book_id.to_owned(),
            scene_id: i64::from(scene_id),
            prompt: Some(prompt.to_owned()),
            voice: None,
            count: None,
        };
        match self
            .post::<MediaResponse>("/api/generate/image", &request)
            .await
        {
            Ok(response) => response.url,
            Err(err) => {
                tracing::error!(book_id, scene_id, error = %format!("{err:#}"), "backend image generation failed");
                None
            }
        }
    }

    async fn generate_audio(
        &self,
        text: &str,
        voice: &str,
        book_id: &str,
        scene_id: u32,
    ) -> Option<String> {
        let request = GenerationRequest {
            book_id: book_id.to_owned(),
            scene_id: i64::from(scene_id),
            prompt: Some(text.to_owned()),
            voice: Some(voice.to_owned()),
            count: None,
        };
        match self
            .post::<MediaResponse>("/api/generate/audio", &request)
            .await
        {
            Ok(response) => response.url,
            Err(err) => {
                tracing::error!(book_id, scene_id, error = %format!("{err:#}"), "backend audio generation failed");
                None
            }
        }
    }
}
