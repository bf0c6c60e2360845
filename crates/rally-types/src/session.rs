use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::Role;

/// Seconds before `expires_at` at which a session already counts as expired.
const EXPIRY_LEEWAY_SECS: u64 = 60;

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// The auth provider's live login record.
///
/// Tokens are excluded from `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Provider subject identifier (opaque).
    pub subject: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry as unix seconds.
    pub expires_at: u64,
    /// Third-party identity provider used to sign in (`google`, ...), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,
    /// Role stored in provider user metadata. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_hint: Option<Role>,
}

impl Session {
    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }

    /// Expiry check against an explicit clock value.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now.saturating_add(EXPIRY_LEEWAY_SECS) >= self.expires_at
    }

    /// Whether both sessions belong to the same provider subject.
    pub fn same_identity(&self, other: &Session) -> bool {
        self.subject == other.subject
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("email", &self.email)
            .field("expires_at", &self.expires_at)
            .field("identity_provider", &self.identity_provider)
            .field("role_hint", &self.role_hint)
            .finish_non_exhaustive()
    }
}

/// Session transition published by the session tracker.
///
/// Each event carries the snapshot that was current when it was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session loaded from persisted state at start-up.
    SessionRestored(Arc<Session>),
    /// Fresh sign-in (password or OAuth completion).
    SessionEstablished(Arc<Session>),
    /// Access token rotated for the same subject.
    TokenRefreshed(Arc<Session>),
    /// Logout or provider-side invalidation.
    SessionCleared,
}

impl SessionEvent {
    /// The session carried by this event, if any.
    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            SessionEvent::SessionRestored(s)
            | SessionEvent::SessionEstablished(s)
            | SessionEvent::TokenRefreshed(s) => Some(s),
            SessionEvent::SessionCleared => None,
        }
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::SessionRestored(_) => "restored",
            SessionEvent::SessionEstablished(_) => "established",
            SessionEvent::TokenRefreshed(_) => "token_refreshed",
            SessionEvent::SessionCleared => "cleared",
        }
    }
}
