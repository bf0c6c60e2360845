use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::Role;

/// The backend's confirmation that a person completed role registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendUserRecord {
    /// Backend user id. Accepts numeric or string ids on the wire.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /auth/check-user/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckUserResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<BackendUserRecord>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Number(n) => n.to_string(),
        RawId::Text(s) => s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_user_response_with_numeric_id() {
        let body = r#"{"exists": true, "user": {"id": 42, "email": "org@example.org", "role": "organization", "created_at": "2024-03-01T10:00:00Z"}}"#;
        let parsed: CheckUserResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.exists);
        let user = parsed.user.unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.role, Role::Organization);
        assert!(user.created_at.is_some());
    }

    #[test]
    fn test_check_user_response_negative() {
        let parsed: CheckUserResponse = serde_json::from_str(r#"{"exists": false}"#).unwrap();
        assert!(!parsed.exists);
        assert!(parsed.user.is_none());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let body = r#"{"id": "u1", "role": "admin"}"#;
        assert!(serde_json::from_str::<BackendUserRecord>(body).is_err());
    }
}
