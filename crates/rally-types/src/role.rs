use std::fmt;

use serde::{Deserialize, Serialize};

/// Account role confirmed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Individual donor / volunteer.
    User,
    /// Organization running campaigns.
    Organization,
}

impl Role {
    /// Returns all roles.
    pub fn all() -> &'static [Role] {
        &[Role::User, Role::Organization]
    }

    /// Returns the wire identifier (`"user"` / `"organization"`).
    pub fn id(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Organization => "organization",
        }
    }

    /// Parses a wire identifier. Anything outside the closed set is `None`.
    pub fn from_id(id: &str) -> Option<Role> {
        match id.trim().to_lowercase().as_str() {
            "user" => Some(Role::User),
            "organization" => Some(Role::Organization),
            _ => None,
        }
    }

    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Organization => "Organization",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
