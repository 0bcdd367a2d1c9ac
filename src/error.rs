use reqwest::StatusCode;
use thiserror::Error;

/// Failure talking to a remote service (Drive, userinfo, generation backend).
///
/// Wrapped inside `anyhow::Error` by callers; use [`is_unauthorized`] to
/// recognise an expired or revoked bearer token anywhere in a chain.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authorization rejected ({status}): {message}")]
    Unauthorized { status: StatusCode, message: String },

    #[error("remote returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl RemoteError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = parse_google_error_message(body).unwrap_or_else(|| body.trim().to_owned());
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Self::Unauthorized { status, message }
        } else {
            Self::Status { status, message }
        }
    }
}

pub fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RemoteError>(),
            Some(RemoteError::Unauthorized { .. })
        )
    })
}

/// Google APIs wrap failures as `{"error": {"message": ...}}`.
fn parse_google_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

/// Turns a non-success response into a [`RemoteError`]; passes successes through.
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::from_status(status, &body))
}
