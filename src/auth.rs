use anyhow::Context as _;
use serde::Deserialize;

use crate::error::{RemoteError, check_status};
use crate::formats::User;

pub const GUEST_USER_ID: &str = "mock-user-001";

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    picture: String,
}

/// Exchanges an OAuth access token for the account profile.
pub async fn fetch_profile(
    client: &reqwest::Client,
    userinfo_url: &str,
    access_token: &str,
) -> anyhow::Result<User> {
    let response = client
        .get(userinfo_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(RemoteError::from)
        .with_context(|| format!("GET {userinfo_url}"))?;
    let info: UserInfo = check_status(response)
        .await
        .context("fetch user profile")?
        .json()
        .await
        .map_err(RemoteError::from)
        .context("parse user profile")?;

    tracing::info!(user_id = %info.sub, email = %info.email, "signed in");
    Ok(User {
        id: info.sub,
        name: info.name,
        email: info.email,
        avatar_url: info.picture,
        token: Some(access_token.to_owned()),
    })
}

pub fn guest() -> User {
    User {
        id: GUEST_USER_ID.to_owned(),
        name: "Guest Archivist".to_owned(),
        email: "guest@project-aether.local".to_owned(),
        avatar_url: "https://api.dicebear.com/7.x/bottts/svg?seed=AetherGuest".to_owned(),
        token: None,
    }
}
