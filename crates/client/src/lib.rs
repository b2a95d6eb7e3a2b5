//! HTTP layer for the share service.
//!
//! [`ServiceClient`] speaks to the share service's metadata API (sessions,
//! links, short codes). [`StorageClient`] speaks to the object store that
//! holds the bytes. The [`transports`] module plugs the latter into the
//! transfer engine.

#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod service;
mod storage;
pub mod transports;

use std::time::Duration;

use cowshare_transfer::BlockError;

pub use service::{DEFAULT_SERVICE_URL, ServiceClient};
pub use storage::{DEFAULT_STORAGE_URL, RemoteObject, StorageClient};
pub use transports::{BlockUploader, MultipartCommitter, RangeFetcher};

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const REFERER: &str = "https://cowtransfer.com/";
const USER_AGENT: &str = "Chrome/80.0.3987.149 CowTransfer-Uploader";

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("service error: {0}")]
    Service(String),

    #[error("invalid upload token")]
    InvalidToken,
}

impl From<Error> for BlockError {
    fn from(e: Error) -> Self {
        match e {
            Error::Api { status, .. } => BlockError::Status(status),
            Error::Json(e) => BlockError::Decode(e.to_string()),
            other => BlockError::Transport(other.to_string()),
        }
    }
}

/// Settings shared by both clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Timeout for metadata calls and block uploads. Range downloads are
    /// not bounded by it.
    pub timeout: Duration,
    /// Account cookie; when empty, cookies issued by the service are adopted.
    pub cookie: String,
    /// Optional `cow-auth-token` value.
    pub auth_code: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cookie: String::new(),
            auth_code: None,
        }
    }
}

fn build_http() -> Result<reqwest::Client, Error> {
    Ok(reqwest::Client::builder().user_agent(USER_AGENT).build()?)
}

/// Fails with [`Error::Api`] unless the response status is a success.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Api {
        status: status.as_u16(),
        body,
    })
}
