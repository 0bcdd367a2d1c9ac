use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Font {
    Orbitron,
    ShareTechMono,
    Merriweather,
    Lora,
    Other(String),
}

impl From<String> for Font {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Orbitron" => Self::Orbitron,
            "Share Tech Mono" => Self::ShareTechMono,
            "Merriweather" => Self::Merriweather,
            "Lora" => Self::Lora,
            _ => Self::Other(value),
        }
    }
}

impl From<Font> for String {
    fn from(value: Font) -> Self {
        match value {
            Font::Orbitron => "Orbitron".to_owned(),
            Font::ShareTechMono => "Share Tech Mono".to_owned(),
            Font::Merriweather => "Merriweather".to_owned(),
            Font::Lora => "Lora".to_owned(),
            Font::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackgroundStyle {
    PulpTexture,
    IndustrialBlueprint,
    NoirShadows,
    ClinicalWhite,
    VerdantForest,
    Other(String),
}

impl From<String> for BackgroundStyle {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pulp_texture" => Self::PulpTexture,
            "industrial_blueprint" => Self::IndustrialBlueprint,
            "noir_shadows" => Self::NoirShadows,
            "clinical_white" => Self::ClinicalWhite,
            "verdant_forest" => Self::VerdantForest,
            _ => Self::Other(value),
        }
    }
}

impl From<BackgroundStyle> for String {
    fn from(value: BackgroundStyle) -> Self {
        match value {
            BackgroundStyle::PulpTexture => "pulp_texture".to_owned(),
            BackgroundStyle::IndustrialBlueprint => "industrial_blueprint".to_owned(),
            BackgroundStyle::NoirShadows => "noir_shadows".to_owned(),
            BackgroundStyle::ClinicalWhite => "clinical_white".to_owned(),
            BackgroundStyle::VerdantForest => "verdant_forest".to_owned(),
            BackgroundStyle::Other(other) => other,
        }
    }
}

impl BackgroundStyle {
    pub fn as_keyword(&self) -> String {
        String::from(self.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub primary_color: String,
    pub font: Font,
    pub background_style: BackgroundStyle,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary_color: "#FF4500".to_owned(),
            font: Font::Orbitron,
            background_style: BackgroundStyle::PulpTexture,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioProfile {
    pub narrator_voice: String,
    pub ambient_track: String,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            narrator_voice: "Aoede".to_owned(),
            ambient_track: "desert_wind".to_owned(),
        }
    }
}

/// One incrementally generated narrative unit of a book.
///
/// `id` is the sequence position inside the book. The two `generated_*` fields
/// are filled lazily by the viewer and never overwritten once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: u32,
    #[serde(default)]
    pub heading: String,
    pub text: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub audio_mood: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_audio_url: Option<String>,
}

impl Scene {
    pub fn has_all_media(&self) -> bool {
        self.generated_image_url.is_some() && self.generated_audio_url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderScene {
    pub heading: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_cue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderContent {
    pub scenes: Vec<ReaderScene>,
    pub master_image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookManifest {
    pub id: String,
    pub title: String,
    pub author: String,
    pub publication_year: i32,
    pub description: String,
    pub cover_image: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub audio_profile: AudioProfile,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_content: Option<ReaderContent>,
}

impl BookManifest {
    pub fn last_scene_id(&self) -> Option<u32> {
        self.scenes.iter().map(|scene| scene.id).max()
    }

    pub fn scene(&self, scene_id: u32) -> Option<&Scene> {
        self.scenes.iter().find(|scene| scene.id == scene_id)
    }
}

/// Signed-in identity. `token` is only present for real OAuth sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl User {
    pub fn is_guest(&self) -> bool {
        self.id.starts_with("mock-")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}
