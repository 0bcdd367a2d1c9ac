mod http_stub;

use std::time::Duration;

use aether::config::GeminiConfig;
use aether::formats::BookManifest;
use aether::generate::{ContentGenerator, GeminiGenerator, PLACEHOLDER_HEADING};
use http_stub::{HttpStub, StubResponse};

fn gemini_config(stub: &HttpStub, models: &[&str]) -> GeminiConfig {
    GeminiConfig {
        base_url: format!("{}/v1beta", stub.base_url),
        api_key: Some("test-key".to_owned()),
        scene_models: models.iter().map(|m| (*m).to_owned()).collect(),
        image_model: "image-model".to_owned(),
        tts_model: "tts-model".to_owned(),
        video_model: "video-model".to_owned(),
        video_poll_interval: Duration::from_millis(10),
    }
}

fn book() -> BookManifest {
    serde_json::from_value(serde_json::json!({
        "id": "skull", "title": "The Skull", "author": "Philip K. Dick",
        "publicationYear": 1952, "description": "A paradox.", "coverImage": ""
    }))
    .expect("build book")
}

fn text_reply(text: &str) -> StubResponse {
    StubResponse::json(serde_json::json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    }))
}

fn model_of(path: &str) -> &str {
    path.trim_start_matches("/v1beta/models/")
        .trim_end_matches(":generateContent")
}

#[tokio::test]
async fn all_models_failing_yields_exactly_count_placeholders() {
    let stub = HttpStub::spawn(|_| StubResponse::status(500, r#"{"error":{"message":"overloaded"}}"#));
    let generator = GeminiGenerator::new(reqwest::Client::new(), gemini_config(&stub, &["m1", "m2", "m3"]));

    let scenes = generator.generate_book_content(&book(), 4, 3).await;
    assert_eq!(scenes.iter().map(|s| s.id).collect::<Vec<_>>(), vec![4, 5, 6]);
    assert!(scenes.iter().all(|s| s.heading == PLACEHOLDER_HEADING));
    assert!(scenes.iter().all(|s| s.image_prompt == "Static noise"));

    let models = stub
        .requests()
        .iter()
        .map(|r| model_of(r.path()).to_owned())
        .collect::<Vec<_>>();
    assert_eq!(models, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn next_model_is_tried_after_a_failure() {
    let stub = HttpStub::spawn(|req| match model_of(req.path()) {
        "primary" => StubResponse::status(503, "unavailable"),
        _ => text_reply(
            "```json\n[\
                {\"id\": 1, \"heading\": \"The Rain\", \"text\": \"It rained.\", \"imagePrompt\": \"alley\", \"audioMood\": \"tense\"},\
                {\"id\": 1, \"heading\": \"The Door\", \"text\": \"A door.\", \"imagePrompt\": \"door\", \"audioMood\": \"calm\"}\
            ]\n```",
        ),
    });
    let generator = GeminiGenerator::new(
        reqwest::Client::new(),
        gemini_config(&stub, &["primary", "secondary"]),
    );

    let scenes = generator.generate_book_content(&book(), 1, 2).await;
    assert_eq!(scenes.len(), 2);
    assert_eq!(scenes[0].id, 1);
    assert_eq!(scenes[1].id, 2);
    assert_eq!(scenes[1].heading, "The Door");

    let requests = stub.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.header("x-goog-api-key") == Some("test-key")));
    let body = requests[1].body_json();
    assert_eq!(
        body.pointer("/generationConfig/responseMimeType").and_then(|v| v.as_str()),
        Some("application/json")
    );
    assert!(body.pointer("/generationConfig/responseSchema").is_some());
}

#[tokio::test]
async fn unparseable_or_empty_replies_advance_the_chain() {
    let stub = HttpStub::spawn(|req| match model_of(req.path()) {
        "garbage" => text_reply("```json\nnot json at all\n```"),
        "empty" => text_reply("[]"),
        _ => text_reply(r#"[{"heading": "Last", "text": "Works.", "imagePrompt": "", "audioMood": ""}]"#),
    });
    let generator = GeminiGenerator::new(
        reqwest::Client::new(),
        gemini_config(&stub, &["garbage", "empty", "good"]),
    );

    let scenes = generator.generate_book_content(&book(), 7, 3).await;
    assert_eq!(scenes.len(), 1);
    assert_eq!(scenes[0].id, 7);
    assert_eq!(scenes[0].heading, "Last");
    assert_eq!(stub.requests().len(), 3);
}

#[tokio::test]
async fn missing_api_key_returns_placeholders_without_requests() {
    let stub = HttpStub::spawn(|_| text_reply("[]"));
    let mut config = gemini_config(&stub, &["m1"]);
    config.api_key = None;
    let generator = GeminiGenerator::new(reqwest::Client::new(), config);

    let scenes = generator.generate_book_content(&book(), 1, 2).await;
    assert_eq!(scenes.len(), 2);
    assert!(stub.requests().is_empty());
    assert!(generator.generate_image("x", "skull", 1).await.is_none());
}

#[tokio::test]
async fn image_is_returned_as_data_url() {
    let stub = HttpStub::spawn(|_| {
        StubResponse::json(serde_json::json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
            ] } }]
        }))
    });
    let generator = GeminiGenerator::new(reqwest::Client::new(), gemini_config(&stub, &["m1"]));

    let url = generator.generate_image("a red desert", "martian_odyssey", 2).await;
    assert_eq!(url.as_deref(), Some("data:image/png;base64,iVBORw0KGgo="));
    assert_eq!(model_of(stub.requests()[0].path()), "image-model");
}

#[tokio::test]
async fn media_failure_is_none() {
    let stub = HttpStub::spawn(|_| StubResponse::status(500, "boom"));
    let generator = GeminiGenerator::new(reqwest::Client::new(), gemini_config(&stub, &["m1"]));

    assert!(generator.generate_image("p", "b", 1).await.is_none());
    assert!(generator.generate_audio("t", "Aoede", "b", 1).await.is_none());
    assert_eq!(
        generator.generate_cover_prompt(&book()).await,
        "Cover art for The Skull"
    );
}

#[tokio::test]
async fn teaser_polls_until_done_and_appends_key() -> anyhow::Result<()> {
    let polls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = std::sync::Arc::clone(&polls);
    let stub = HttpStub::spawn(move |req| {
        if req.path().ends_with(":predictLongRunning") {
            return StubResponse::json(serde_json::json!({ "name": "operations/op-1" }));
        }
        let n = seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if n < 2 {
            return StubResponse::json(serde_json::json!({ "name": "operations/op-1", "done": false }));
        }
        StubResponse::json(serde_json::json!({
            "name": "operations/op-1",
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [
                { "video": { "uri": "https://files.example/v1:download?alt=media" } }
            ] } }
        }))
    });
    let config = gemini_config(&stub, &["m1"]);

    let url = aether::video::generate_teaser(&reqwest::Client::new(), &config, &book()).await?;
    assert_eq!(url, "https://files.example/v1:download?alt=media&key=test-key");
    assert_eq!(polls.load(std::sync::atomic::Ordering::SeqCst), 3);

    let requests = stub.requests();
    assert_eq!(requests[0].path(), "/v1beta/models/video-model:predictLongRunning");
    assert_eq!(requests[1].path(), "/v1beta/operations/op-1");
    Ok(())
}

#[tokio::test]
async fn teaser_without_video_uri_is_an_error() {
    let stub = HttpStub::spawn(|_| {
        StubResponse::json(serde_json::json!({ "name": "operations/op-2", "done": true, "response": {} }))
    });
    let config = gemini_config(&stub, &["m1"]);

    let err = aether::video::generate_teaser(&reqwest::Client::new(), &config, &book())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("without a video uri"));
}
