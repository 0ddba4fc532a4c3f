use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{
    consts::{DEFAULT_MARK_READ_PATH, DEFAULT_POLL_INTERVAL_MS, DEFAULT_UNREAD_PATH},
    error::ClientError,
    model::RetrySchedule,
};

/// Client configuration, stored as a JSON file.
///
/// Unknown and missing fields are tolerated so older config files keep
/// loading after upgrades.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    /// `http(s)` origin of the marketplace backend.
    pub base_url: String,
    /// User whose notification channel to subscribe to.
    pub user_id: Option<u64>,
    /// Path of the unread-counts endpoint, relative to `base_url`.
    pub unread_path: String,
    /// Path of the mark-all-read endpoint, relative to `base_url`.
    pub mark_read_path: String,
    /// Session cookie sent with every HTTP request and the WebSocket
    /// handshake, e.g. `sessionid=abc123`.
    pub session_cookie: Option<String>,
    /// CSRF token sent as `X-CSRFToken` on mutating requests.
    pub csrf_token: Option<String>,
    pub poll_interval_ms: u64,
    pub retry: RetrySchedule,
    /// Mark every conversation read once at startup, like the inbox page does
    /// on load.
    pub mark_read_on_start: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user_id: None,
            unread_path: DEFAULT_UNREAD_PATH.to_string(),
            mark_read_path: DEFAULT_MARK_READ_PATH.to_string(),
            session_cookie: None,
            csrf_token: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetrySchedule::default(),
            mark_read_on_start: false,
        }
    }
}

impl ClientConfig {
    /// Read a config file; a missing file yields the defaults so the CLI can
    /// fill in the rest.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str::<Self>(&content).map_err(ClientError::Decode)
    }

    pub(crate) fn unread_url(&self) -> Result<String, ClientError> {
        join_endpoint(&self.base_url, &self.unread_path)
    }

    pub(crate) fn mark_read_url(&self) -> Result<String, ClientError> {
        join_endpoint(&self.base_url, &self.mark_read_path)
    }
}

pub(crate) fn normalize_base_url(input: &str) -> Result<String, ClientError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ClientError::Config("server URL is required".to_string()));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|error| ClientError::Config(format!("invalid server URL: {error}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(ClientError::Config(
            "server URL must start with http:// or https://".to_string(),
        ));
    }

    Ok(trimmed.to_string())
}

/// Derive the push-channel URL from the http(s) base:
/// `ws(s)://<host>/ws/user/<user_id>/notifications/`.
pub(crate) fn build_notifications_ws_url(
    base_url: &str,
    user_id: u64,
) -> Result<String, ClientError> {
    let mut ws_url = reqwest::Url::parse(base_url)
        .map_err(|error| ClientError::Config(format!("invalid server URL: {error}")))?;

    match ws_url.scheme() {
        "http" => {
            ws_url
                .set_scheme("ws")
                .map_err(|_| ClientError::Config("unable to convert URL scheme to ws".to_string()))?;
        }
        "https" => {
            ws_url.set_scheme("wss").map_err(|_| {
                ClientError::Config("unable to convert URL scheme to wss".to_string())
            })?;
        }
        _ => {
            return Err(ClientError::Config(
                "server URL must start with http:// or https://".to_string(),
            ))
        }
    }

    ws_url.set_path(&format!("/ws/user/{user_id}/notifications/"));
    Ok(ws_url.to_string())
}

fn join_endpoint(base_url: &str, path: &str) -> Result<String, ClientError> {
    let base = reqwest::Url::parse(base_url)
        .map_err(|error| ClientError::Config(format!("invalid server URL: {error}")))?;
    let joined = base
        .join(path)
        .map_err(|error| ClientError::Config(format!("invalid endpoint path: {error}")))?;
    Ok(joined.to_string())
}
