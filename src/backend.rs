use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::drive::PublicDriveReader;
use crate::formats::BookManifest;
use crate::generate::{
    ContentGenerator, GeminiGenerator, GeneratedScene, GenerationRequest, MediaResponse,
    ScenesResponse,
};
use crate::{ingest, starter};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;
const DEFAULT_SCENE_BATCH: usize = 3;
const DEFAULT_VOICE: &str = "Aoede";

#[derive(Clone)]
pub struct BackendState {
    config: Arc<Config>,
    generator: Arc<GeminiGenerator>,
    public_drive: PublicDriveReader,
}

impl BackendState {
    pub fn new(config: Config, http: reqwest::Client) -> Self {
        let generator = Arc::new(GeminiGenerator::new(http.clone(), config.gemini.clone()));
        let public_drive = PublicDriveReader::new(http, config.drive.clone());
        Self {
            config: Arc::new(config),
            generator,
            public_drive,
        }
    }
}

pub fn router(state: BackendState) -> Router {
    Router::new()
        .route("/api/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
        .route("/api/library", get(library_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/generate/scenes", post(generate_scenes_handler))
        .route("/api/generate/image", post(generate_image_handler))
        .route("/api/generate/audio", post(generate_audio_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn library_handler(
    State(state): State<BackendState>,
) -> Result<Json<Vec<BookManifest>>, (StatusCode, String)> {
    if let (Some(folder_id), Some(api_key)) = (
        state.config.starter_folder_id.as_deref(),
        state.config.google_api_key.as_deref(),
    ) {
        let books = starter::load_public_starter(&state.public_drive, folder_id, api_key).await;
        if !books.is_empty() {
            return Ok(Json(books));
        }
        tracing::warn!(folder_id, "public starter folder is empty; serving built-in starter");
    }
    let books = starter::builtin_starter()
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")))?;
    Ok(Json(books))
}

async fn ingest_handler(
    State(state): State<BackendState>,
    mut multipart: Multipart,
) -> Result<Json<BookManifest>, (StatusCode, String)> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.txt").to_owned();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| (StatusCode::BAD_REQUEST, format!("read upload: {err}")))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((file_name, bytes)) = upload else {
        return Err((StatusCode::BAD_REQUEST, "missing `file` field".to_owned()));
    };

    let content = ingest::decode_text(&bytes);
    tracing::info!(file = %file_name, chars = content.chars().count(), "ingesting upload");

    let analysis = ingest::analyze(&state.generator, &content).await;
    let book = ingest::build_manifest(&file_name, &content, analysis);
    tracing::info!(book_id = %book.id, scenes = book.scenes.len(), "ingested upload");
    Ok(Json(book))
}

async fn generate_scenes_handler(
    State(state): State<BackendState>,
    Json(request): Json<GenerationRequest>,
) -> Json<ScenesResponse> {
    let start_id = u32::try_from(request.scene_id.saturating_add(1).max(1)).unwrap_or(1);
    let count = request.count.unwrap_or(DEFAULT_SCENE_BATCH);
    let book = context_book(&request);

    let scenes = state
        .generator
        .generate_book_content(&book, start_id, count)
        .await;
    Json(ScenesResponse {
        scenes: scenes
            .into_iter()
            .map(|scene| GeneratedScene {
                heading: scene.heading,
                text: scene.text,
                image_prompt: scene.image_prompt,
                audio_mood: scene.audio_mood,
                video_prompt: scene.video_prompt,
            })
            .collect(),
    })
}

async fn generate_image_handler(
    State(state): State<BackendState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<MediaResponse>, (StatusCode, String)> {
    let prompt = required_prompt(&request)?;
    let scene_id = scene_id(&request)?;
    let url = state
        .generator
        .generate_image(prompt, &request.book_id, scene_id)
        .await;
    Ok(Json(MediaResponse { url }))
}

async fn generate_audio_handler(
    State(state): State<BackendState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<MediaResponse>, (StatusCode, String)> {
    let text = required_prompt(&request)?;
    let scene_id = scene_id(&request)?;
    let voice = request.voice.as_deref().unwrap_or(DEFAULT_VOICE);
    let url = state
        .generator
        .generate_audio(text, voice, &request.book_id, scene_id)
        .await;
    Ok(Json(MediaResponse { url }))
}

fn required_prompt(request: &GenerationRequest) -> Result<&str, (StatusCode, String)> {
    request
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "prompt is required".to_owned()))
}

fn scene_id(request: &GenerationRequest) -> Result<u32, (StatusCode, String)> {
    u32::try_from(request.scene_id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("invalid scene_id: {}", request.scene_id),
        )
    })
}

/// The backend keeps no books; the starter entry (when known) or the request
/// prompt provides the narrative context.
fn context_book(request: &GenerationRequest) -> BookManifest {
    let known = starter::builtin_starter()
        .ok()
        .and_then(|books| books.into_iter().find(|book| book.id == request.book_id));
    known.unwrap_or_else(|| BookManifest {
        id: request.book_id.clone(),
        title: request.book_id.clone(),
        author: "Unknown".to_owned(),
        publication_year: 0,
        description: request
            .prompt
            .clone()
            .unwrap_or_else(|| "Continue the story.".to_owned()),
        cover_image: String::new(),
        tags: Vec::new(),
        theme: Default::default(),
        audio_profile: Default::default(),
        scenes: Vec::new(),
        reader_content: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(book_id: &str, scene_id: i64, prompt: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            book_id: book_id.to_owned(),
            scene_id,
            prompt: prompt.map(str::to_owned),
            voice: None,
            count: None,
        }
    }

    #[test]
    fn context_prefers_starter_entry() {
        assert_eq!(context_book(&request("skull", 0, None)).title, "The Skull");
        let unknown = context_book(&request("mine", 0, Some("A heist.")));
        assert_eq!(unknown.title, "mine");
        assert_eq!(unknown.description, "A heist.");
    }

    #[test]
    fn media_requests_need_prompt_and_valid_scene() {
        assert!(required_prompt(&request("b", 1, Some("  "))).is_err());
        assert_eq!(required_prompt(&request("b", 1, Some(" x "))).ok(), Some("x"));
        assert!(scene_id(&request("b", -1, Some("x"))).is_err());
    }
}
