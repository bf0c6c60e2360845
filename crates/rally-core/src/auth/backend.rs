//! Rally REST API client for the two registration endpoints.

use std::fmt;
use std::future::Future;

use anyhow::{Context, Result};
use rally_types::{BackendUserRecord, CheckUserResponse, Role};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;

/// Error categories for backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendErrorKind {
    /// Connection failure
    Transport,
    /// Connection/request timeout
    Timeout,
    /// HTTP status error without a structured reason
    HttpStatus,
    /// Response body did not match the contract
    Parse,
    /// Backend refused the request with an `{"error": ...}` body
    Rejected,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Transport => write!(f, "transport"),
            BackendErrorKind::Timeout => write!(f, "timeout"),
            BackendErrorKind::HttpStatus => write!(f, "http_status"),
            BackendErrorKind::Parse => write!(f, "parse"),
            BackendErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Structured error from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// HTTP status, when the backend answered at all.
    pub status: Option<u16>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Creates an error from a non-success response, preferring the `error` field of the body.
    pub fn http_status(status: u16, body: &str) -> Self {
        let reason = serde_json::from_str::<Value>(body).ok().and_then(|json| {
            json.get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        match reason {
            Some(reason) => Self {
                kind: BackendErrorKind::Rejected,
                message: reason,
                status: Some(status),
            },
            None => Self {
                kind: BackendErrorKind::HttpStatus,
                message: format!("HTTP {status}"),
                status: Some(status),
            },
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            BackendErrorKind::Transport | BackendErrorKind::Timeout => true,
            BackendErrorKind::HttpStatus | BackendErrorKind::Rejected => {
                self.status.is_some_and(|s| s >= 500)
            }
            BackendErrorKind::Parse => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(BackendErrorKind::Timeout, "Backend request timed out")
        } else if err.is_decode() {
            Self::new(BackendErrorKind::Parse, format!("Invalid backend response: {err}"))
        } else {
            Self::new(
                BackendErrorKind::Transport,
                format!("Backend unreachable: {err}"),
            )
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// The two backend endpoints the access core depends on.
pub trait BackendApi: Send + Sync {
    /// `POST /auth/check-user/`. `Ok` with `exists: false` is an explicit negative.
    fn check_user(
        &self,
        access_token: &str,
    ) -> impl Future<Output = BackendResult<CheckUserResponse>> + Send;

    /// `POST /auth/register/`.
    fn register(
        &self,
        access_token: &str,
        role: Role,
    ) -> impl Future<Output = BackendResult<BackendUserRecord>> + Send;
}

/// reqwest-backed [`BackendApi`].
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    /// # Errors
    /// Returns an error if the API URL is malformed or the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.api_url().context("resolve api url")?;
        let http = reqwest::Client::builder()
            .timeout(config.backend.timeout())
            .build()
            .context("build backend http client")?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    async fn post(
        &self,
        path: &str,
        access_token: &str,
        body: Value,
    ) -> BackendResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "backend request");
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::http_status(status.as_u16(), &body))
    }
}

impl BackendApi for HttpBackend {
    async fn check_user(&self, access_token: &str) -> BackendResult<CheckUserResponse> {
        let response = self.post("/auth/check-user/", access_token, json!({})).await?;
        let parsed: CheckUserResponse = response.json().await.map_err(|err| {
            BackendError::new(
                BackendErrorKind::Parse,
                format!("Failed to parse check-user response: {err}"),
            )
        })?;
        if parsed.exists && parsed.user.is_none() {
            return Err(BackendError::new(
                BackendErrorKind::Parse,
                "check-user reported exists without a user record",
            ));
        }
        Ok(parsed)
    }

    async fn register(&self, access_token: &str, role: Role) -> BackendResult<BackendUserRecord> {
        let response = self
            .post("/auth/register/", access_token, json!({ "role": role.id() }))
            .await?;
        response.json().await.map_err(|err| {
            BackendError::new(
                BackendErrorKind::Parse,
                format!("Failed to parse register response: {err}"),
            )
        })
    }
}
