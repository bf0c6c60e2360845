//! Auth provider contract and its error type.

use std::fmt;
use std::future::Future;

use rally_types::{Role, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pkce::Pkce;

/// Error categories for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Credentials or tokens rejected (400/401/403). The session is gone.
    Unauthorized,
    /// Other HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection/request timeout
    Timeout,
    /// Could not reach the provider
    Transport,
    /// Response parsing failed
    Parse,
    /// Persisted session could not be read or written
    Storage,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Unauthorized => write!(f, "unauthorized"),
            ProviderErrorKind::HttpStatus => write!(f, "http_status"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Transport => write!(f, "transport"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Structured error from the auth provider with kind and details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw error body)
    pub details: Option<String>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an error from a non-success HTTP response.
    ///
    /// 400/401/403 are classified as `Unauthorized`; GoTrue answers bad
    /// credentials and dead refresh tokens with 400.
    pub fn http_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 | 401 | 403 => ProviderErrorKind::Unauthorized,
            _ => ProviderErrorKind::HttpStatus,
        };
        let details = (!body.is_empty()).then(|| body.to_string());
        let message = match extract_error_message(body) {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self {
            kind,
            message,
            details,
        }
    }

    pub fn storage(err: &anyhow::Error) -> Self {
        Self::new(ProviderErrorKind::Storage, format!("{err:#}"))
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ProviderErrorKind::Unauthorized
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(ProviderErrorKind::Timeout, "Auth provider request timed out")
        } else if err.is_decode() {
            Self::new(ProviderErrorKind::Parse, format!("Invalid auth response: {err}"))
        } else {
            Self::new(
                ProviderErrorKind::Transport,
                format!("Auth provider unreachable: {err}"),
            )
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// GoTrue error bodies come in several shapes depending on the endpoint.
fn extract_error_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| json.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

/// External auth provider.
///
/// The provider owns its own session persistence: successful sign-ins,
/// code exchanges, refreshes and metadata updates persist the resulting
/// session, and `get_session` reads it back without network I/O.
pub trait AuthProvider: Send + Sync {
    /// Email/password sign-in.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = ProviderResult<Session>> + Send;

    /// Builds the OAuth authorize URL for a third-party identity provider.
    ///
    /// # Errors
    /// Returns an error if the provider base URL is malformed.
    fn authorize_url(
        &self,
        identity_provider: &str,
        redirect_to: &str,
        pkce: &Pkce,
    ) -> ProviderResult<String>;

    /// Completes an OAuth redirect by exchanging the authorization code.
    fn exchange_code(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> impl Future<Output = ProviderResult<Session>> + Send;

    /// Returns the persisted session, if any. Does not refresh.
    fn get_session(&self) -> impl Future<Output = ProviderResult<Option<Session>>> + Send;

    /// Rotates the access token.
    fn refresh_session(
        &self,
        refresh_token: &str,
    ) -> impl Future<Output = ProviderResult<Session>> + Send;

    /// Stores `role` in the user's metadata and returns the updated session.
    fn update_user_metadata(
        &self,
        session: &Session,
        role: Role,
    ) -> impl Future<Output = ProviderResult<Session>> + Send;

    /// Revokes the session remotely.
    ///
    /// Implementations must drop any persisted session even when the remote
    /// call fails.
    fn sign_out(&self, access_token: &str) -> impl Future<Output = ProviderResult<()>> + Send;
}
