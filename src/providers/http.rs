use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{Result, SyncError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque auth material handed over by the credential collaborator.
#[derive(Clone)]
pub enum Credentials {
    /// `Authorization: Basic base64(username:secret)` (Jira, Azure DevOps).
    Basic { username: String, secret: String },
    /// `Authorization: Bearer token` (GitHub).
    Bearer { token: String },
}

impl Credentials {
    pub fn auth_header(&self) -> String {
        match self {
            Credentials::Basic { username, secret } => {
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{username}:{secret}"));
                format!("Basic {encoded}")
            }
            Credentials::Bearer { token } => format!("Bearer {token}"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("secret", &"***")
                .finish(),
            Credentials::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
        }
    }
}

pub fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("worksync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(SyncError::from)
}

/// Send a request and map non-success statuses onto typed errors.
pub async fn send(request: RequestBuilder, resource: &str) -> Result<Response> {
    let response = request.send().await?;
    check_status(response, resource).await
}

pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder, resource: &str) -> Result<T> {
    let response = send(request, resource).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| SyncError::Decode(format!("{resource}: {e}")))
}

async fn check_status(response: Response, resource: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(&response);
    let budget_spent = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::NOT_FOUND => Err(SyncError::not_found(resource)),
        StatusCode::TOO_MANY_REQUESTS => Err(SyncError::RateLimited { retry_after }),
        StatusCode::FORBIDDEN if budget_spent => Err(SyncError::RateLimited { retry_after }),
        _ => {
            let body = response.text().await.unwrap_or_default();
            let message = body.lines().next().unwrap_or("").chars().take(300).collect::<String>();
            Err(SyncError::api(status.as_u16(), format!("{resource}: {message}")))
        }
    }
}

/// RFC 3339, or Jira's `2024-01-15T10:30:00.000+0000`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
