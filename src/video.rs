use anyhow::Context as _;
use serde::Deserialize;

use crate::config::GeminiConfig;
use crate::error::{RemoteError, check_status};
use crate::formats::BookManifest;

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<OperationError>,
    #[serde(default)]
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

pub fn teaser_prompt(book: &BookManifest) -> String {
    let mut prompt = format!(
        "Cinematic teaser trailer for \"{}\" by {}. {} Visual style: {}.",
        book.title,
        book.author,
        book.description,
        book.theme.background_style.as_keyword().replace('_', " ")
    );
    if let Some(scene) = book.scenes.first()
        && !scene.image_prompt.is_empty()
    {
        prompt.push_str(" Opening shot: ");
        prompt.push_str(&scene.image_prompt);
    }
    prompt
}

/// Starts a video generation operation and polls it until it completes.
///
/// Polling has no overall deadline; the interval comes from configuration.
pub async fn generate_teaser(
    client: &reqwest::Client,
    config: &GeminiConfig,
    book: &BookManifest,
) -> anyhow::Result<String> {
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("GEMINI_API_KEY is required for teaser generation"))?;

    let endpoint = format!(
        "{}/models/{}:predictLongRunning",
        config.base_url, config.video_model
    );
    let body = serde_json::json!({
        "instances": [{ "prompt": teaser_prompt(book) }],
        "parameters": { "aspectRatio": "16:9", "resolution": "720p" }
    });

    let response = client
        .post(&endpoint)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await
        .map_err(RemoteError::from)
        .with_context(|| format!("POST {endpoint}"))?;
    let mut operation: Operation = check_status(response)
        .await
        .context("start teaser generation")?
        .json()
        .await
        .map_err(RemoteError::from)
        .context("parse teaser operation")?;
    tracing::info!(book_id = %book.id, operation = %operation.name, "teaser generation started");

    while !operation.done {
        tokio::time::sleep(config.video_poll_interval).await;
        let poll_endpoint = format!("{}/{}", config.base_url, operation.name);
        let response = client
            .get(&poll_endpoint)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(RemoteError::from)
            .with_context(|| format!("GET {poll_endpoint}"))?;
        operation = check_status(response)
            .await
            .context("poll teaser operation")?
            .json()
            .await
            .map_err(RemoteError::from)
            .context("parse teaser operation")?;
        tracing::debug!(book_id = %book.id, operation = %operation.name, done = operation.done, "polled teaser operation");
    }

    if let Some(err) = operation.error {
        anyhow::bail!("teaser generation failed: {}", err.message);
    }
    let uri = operation
        .response
        .as_ref()
        .and_then(video_uri)
        .ok_or_else(|| anyhow::anyhow!("teaser operation finished without a video uri"))?;

    tracing::info!(book_id = %book.id, "teaser generation finished");
    Ok(with_api_key(uri, api_key))
}

fn video_uri(response: &serde_json::Value) -> Option<&str> {
    response
        .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
        .or_else(|| response.pointer("/generatedVideos/0/video/uri"))
        .and_then(|v| v.as_str())
}

/// Download URIs require the key as a query parameter.
pub fn with_api_key(uri: &str, api_key: &str) -> String {
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{separator}key={api_key}")
}
