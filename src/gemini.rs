use anyhow::Context as _;

use crate::error::RemoteError;

pub fn generate_content_endpoint(base_url: &str, model: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models/{model}:generateContent")
}

/// Calls `models/{model}:generateContent` and returns the raw response JSON.
pub async fn generate_content(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    body: &serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let endpoint = generate_content_endpoint(base_url, model);
    let response = client
        .post(&endpoint)
        .header("x-goog-api-key", api_key)
        .json(body)
        .send()
        .await
        .map_err(RemoteError::from)
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response
        .text()
        .await
        .map_err(RemoteError::from)
        .context("read Gemini response body")?;
    if !status.is_success() {
        return Err(RemoteError::from_status(status, &raw)).context("Gemini API error");
    }

    let value = serde_json::from_str(&raw)
        .map_err(RemoteError::from)
        .context("parse Gemini response")?;
    Ok(value)
}

/// Plain-text prompt, optionally constrained to JSON output matching `schema`.
pub fn text_request(prompt: &str, schema: Option<serde_json::Value>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
    });
    if let Some(schema) = schema
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert(
            "generationConfig".to_owned(),
            serde_json::json!({
                "responseMimeType": "application/json",
                "responseSchema": schema,
            }),
        );
    }
    body
}

pub async fn generate_text(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    body: &serde_json::Value,
) -> anyhow::Result<String> {
    let value = generate_content(client, base_url, api_key, model, body).await?;
    extract_text(&value).context("extract Gemini text")
}

pub fn extract_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let parts = first_candidate_parts(value)?;

    let mut text = String::new();
    for part in parts {
        let Some(part_text) = part.get("text").and_then(|v| v.as_str()) else {
            continue;
        };
        text.push_str(part_text);
    }

    if text.trim().is_empty() {
        anyhow::bail!("Gemini output text is empty");
    }
    Ok(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data_base64: String,
}

impl InlineData {
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data_base64)
    }
}

/// First inline binary part of the first candidate (images, audio).
pub fn extract_inline_data(value: &serde_json::Value) -> anyhow::Result<InlineData> {
    let parts = first_candidate_parts(value)?;
    for part in parts {
        let Some(inline) = part.get("inlineData") else {
            continue;
        };
        let Some(data) = inline.get("data").and_then(|v| v.as_str()) else {
            continue;
        };
        let mime_type = inline
            .get("mimeType")
            .and_then(|v| v.as_str())
            .unwrap_or("application/octet-stream");
        return Ok(InlineData {
            mime_type: mime_type.to_owned(),
            data_base64: data.to_owned(),
        });
    }
    anyhow::bail!("no inline data in Gemini response")
}

fn first_candidate_parts(value: &serde_json::Value) -> anyhow::Result<&Vec<serde_json::Value>> {
    value
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.pointer("/content/parts"))
        .and_then(|parts| parts.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `candidates[0].content.parts` in response"))
}

/// Removes a surrounding Markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
