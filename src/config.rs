use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

pub const DEFAULT_SCENE_MODELS: &[&str] =
    &["gemini-3-flash-preview", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorKind {
    Gemini,
    Backend,
}

impl GeneratorKind {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "gemini" => Ok(Self::Gemini),
            "backend" => Ok(Self::Backend),
            other => anyhow::bail!("unsupported generator: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub scene_models: Vec<String>,
    pub image_model: String,
    pub tts_model: String,
    pub video_model: String,
    pub video_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub api_base: String,
    pub upload_base: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backend_url: String,
    pub userinfo_url: String,
    pub google_api_key: Option<String>,
    pub starter_folder_id: Option<String>,
    pub generator: GeneratorKind,
    pub gemini: GeminiConfig,
    pub drive: DriveConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let scene_models = match get("AETHER_SCENE_MODELS") {
            Some(raw) => parse_model_list(&raw).context("parse AETHER_SCENE_MODELS")?,
            None => DEFAULT_SCENE_MODELS.iter().map(|m| (*m).to_owned()).collect(),
        };

        let video_poll_secs = match get("AETHER_VIDEO_POLL_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .with_context(|| {
                    format!("invalid AETHER_VIDEO_POLL_SECS={raw:?}. expected a positive number of seconds")
                })?,
            None => 5,
        };

        let generator = match get("AETHER_GENERATOR") {
            Some(raw) => GeneratorKind::parse(&raw).with_context(|| {
                format!("invalid AETHER_GENERATOR={raw:?}. expected one of: gemini, backend")
            })?,
            None => GeneratorKind::Gemini,
        };

        let config = Self {
            data_dir: get("AETHER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".aether")),
            backend_url: base_url(
                get("AETHER_BACKEND_URL"),
                "http://localhost:8000",
                "AETHER_BACKEND_URL",
            )?,
            userinfo_url: base_url(
                get("AETHER_USERINFO_URL"),
                "https://www.googleapis.com/oauth2/v3/userinfo",
                "AETHER_USERINFO_URL",
            )?,
            google_api_key: get("GOOGLE_API_KEY"),
            starter_folder_id: get("AETHER_STARTER_FOLDER_ID"),
            generator,
            gemini: GeminiConfig {
                base_url: base_url(
                    get("AETHER_GEMINI_BASE_URL"),
                    "https://generativelanguage.googleapis.com/v1beta",
                    "AETHER_GEMINI_BASE_URL",
                )?,
                api_key: get("GEMINI_API_KEY"),
                scene_models,
                image_model: get("AETHER_IMAGE_MODEL")
                    .unwrap_or_else(|| "gemini-2.5-flash-image".to_owned()),
                tts_model: get("AETHER_TTS_MODEL")
                    .unwrap_or_else(|| "gemini-2.5-flash-preview-tts".to_owned()),
                video_model: get("AETHER_VIDEO_MODEL")
                    .unwrap_or_else(|| "veo-3.1-fast-generate-preview".to_owned()),
                video_poll_interval: Duration::from_secs(video_poll_secs),
            },
            drive: DriveConfig {
                api_base: base_url(
                    get("AETHER_DRIVE_API_BASE"),
                    "https://www.googleapis.com/drive/v3",
                    "AETHER_DRIVE_API_BASE",
                )?,
                upload_base: base_url(
                    get("AETHER_DRIVE_UPLOAD_BASE"),
                    "https://www.googleapis.com/upload/drive/v3/files",
                    "AETHER_DRIVE_UPLOAD_BASE",
                )?,
            },
        };

        Ok(config)
    }
}

fn base_url(raw: Option<String>, default: &str, name: &str) -> anyhow::Result<String> {
    let raw = raw.unwrap_or_else(|| default.to_owned());
    let url = Url::parse(&raw).with_context(|| format!("invalid {name}={raw:?}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{name} must be http/https: {raw}");
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

fn parse_model_list(raw: &str) -> anyhow::Result<Vec<String>> {
    let models = raw
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_owned)
        .collect::<Vec<_>>();
    if models.is_empty() {
        anyhow::bail!("model list is empty");
    }
    Ok(models)
}
