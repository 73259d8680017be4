//! GitHub device-code authentication.
//!
//! The flow (device code → user authorizes in a browser → poll for the
//! token → fetch the login) runs on its own task per request, pushing
//! progress notices straight onto the requesting client's queue. The
//! endpoints come from config so tests can stand in for GitHub.
//!
//! The OAuth app must have the Device Flow enabled in its settings.

use std::time::Duration;

use serde::Deserialize;

use super::client::ClientRef;
use super::message::Message;
use crate::config::AuthConfig;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("could not get device code: {0}")]
    DeviceCode(#[source] reqwest::Error),
    #[error("failed to get access token: {0}")]
    TokenExchange(#[source] reqwest::Error),
    #[error("could not fetch user info: {0}")]
    UserInfo(#[source] reqwest::Error),
    #[error("authorization was denied")]
    Denied,
    #[error("the device code expired before authorization")]
    Expired,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("no login in the provider response")]
    MissingLogin,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(default)]
    login: String,
}

/// Run the device flow to completion and return the verified login.
///
/// Progress instructions go to `client` as system notices; the caller
/// turns the returned login into an authenticated name claim.
pub async fn device_flow(cfg: &AuthConfig, client: &ClientRef) -> Result<String, AuthError> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("estuary/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(AuthError::DeviceCode)?;

    let code: DeviceCodeResponse = http
        .post(&cfg.device_code_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", cfg.client_id.as_str()),
            ("scope", "read:user"),
        ])
        .send()
        .await
        .map_err(AuthError::DeviceCode)?
        .error_for_status()
        .map_err(AuthError::DeviceCode)?
        .json()
        .await
        .map_err(AuthError::DeviceCode)?;

    notify(
        client,
        format!(
            "To log in, please visit {} in your browser",
            code.verification_uri
        ),
    );
    notify(client, format!("And enter the code: {}", code.user_code));
    notify(client, "Waiting for authorization...");

    let mut poll_every = Duration::from_secs(code.interval.unwrap_or(5));
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(code.expires_in.unwrap_or(900));

    let token = loop {
        tokio::time::sleep(poll_every).await;
        if tokio::time::Instant::now() >= deadline {
            return Err(AuthError::Expired);
        }

        let resp: TokenResponse = http
            .post(&cfg.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", cfg.client_id.as_str()),
                ("device_code", code.device_code.as_str()),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .map_err(AuthError::TokenExchange)?
            .json()
            .await
            .map_err(AuthError::TokenExchange)?;

        if let Some(token) = resp.access_token {
            break token;
        }
        match resp.error.as_deref() {
            // Keep polling at the agreed pace.
            Some("authorization_pending") | None => {}
            Some("slow_down") => poll_every += Duration::from_secs(5),
            Some("access_denied") => return Err(AuthError::Denied),
            Some("expired_token") => return Err(AuthError::Expired),
            Some(other) => return Err(AuthError::Provider(other.to_string())),
        }
    };

    notify(client, "Authentication successful! Fetching user info...");

    let user: UserResponse = http
        .get(&cfg.user_api_url)
        .bearer_auth(&token)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .map_err(AuthError::UserInfo)?
        .error_for_status()
        .map_err(AuthError::UserInfo)?
        .json()
        .await
        .map_err(AuthError::UserInfo)?;

    if user.login.is_empty() {
        return Err(AuthError::MissingLogin);
    }
    Ok(user.login)
}

fn notify(client: &ClientRef, content: impl Into<String>) {
    // Best-effort: a dead client just misses its progress notices.
    let _ = client.try_enqueue(Message::system(content));
}
