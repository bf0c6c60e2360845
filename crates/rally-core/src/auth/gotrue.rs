//! GoTrue (Supabase Auth) REST client.

use std::time::Duration;

use anyhow::{Context, Result};
use rally_types::{Role, Session, now_secs};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::pkce::Pkce;
use super::provider::{AuthProvider, ProviderError, ProviderErrorKind, ProviderResult};
use super::store::SessionStore;
use crate::config::Config;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Used when the token response carries neither `expires_at` nor `expires_in`.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// GoTrue-backed auth provider persisting its session to a [`SessionStore`].
pub struct GoTrueProvider {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    store: SessionStore,
}

impl GoTrueProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        store: SessionStore,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            store,
        }
    }

    /// Builds the provider from config, persisting to the default session file.
    ///
    /// # Errors
    /// Returns an error if the configured auth URL is malformed.
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config.auth_url().context("resolve auth url")?;
        Ok(Self::new(
            base_url,
            config.auth_api_key(),
            SessionStore::default_location(),
        ))
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> ProviderResult<Session> {
        let url = format!("{}/token?grant_type={grant_type}", self.base_url);
        debug!(grant_type, "auth token request");
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let token: TokenResponse = read_json(response).await?;
        let session = token.into_session();
        self.persist(&session);
        Ok(session)
    }

    fn persist(&self, session: &Session) {
        if let Err(err) = self.store.save(session) {
            warn!(error = %format!("{err:#}"), "failed to persist session");
        }
    }
}

impl AuthProvider for GoTrueProvider {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> ProviderResult<Session> {
        self.token_request(
            "password",
            json!({ "email": email, "password": password }),
        )
        .await
    }

    fn authorize_url(
        &self,
        identity_provider: &str,
        redirect_to: &str,
        pkce: &Pkce,
    ) -> ProviderResult<String> {
        let params = [
            ("provider", identity_provider),
            ("redirect_to", redirect_to),
            ("code_challenge", pkce.challenge.as_str()),
            ("code_challenge_method", "s256"),
        ];

        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        let authorize = format!("{}/authorize?{query}", self.base_url);
        url::Url::parse(&authorize).map_err(|err| {
            ProviderError::new(
                ProviderErrorKind::Parse,
                format!("Invalid authorize URL {authorize}: {err}"),
            )
        })?;
        Ok(authorize)
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> ProviderResult<Session> {
        self.token_request(
            "pkce",
            json!({ "auth_code": auth_code, "code_verifier": code_verifier }),
        )
        .await
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        self.store.load().map_err(|err| ProviderError::storage(&err))
    }

    async fn refresh_session(&self, refresh_token: &str) -> ProviderResult<Session> {
        let result = self
            .token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await;
        if let Err(err) = &result
            && err.is_unauthorized()
            && let Err(clear_err) = self.store.clear()
        {
            warn!(error = %format!("{clear_err:#}"), "failed to remove revoked session");
        }
        result
    }

    async fn update_user_metadata(&self, session: &Session, role: Role) -> ProviderResult<Session> {
        let url = format!("{}/user", self.base_url);
        let response = self
            .http
            .put(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .json(&json!({ "data": { "role": role.id() } }))
            .send()
            .await?;

        let user: GoTrueUser = read_json(response).await?;
        let mut updated = session.clone();
        updated.role_hint = user.role_hint().or(Some(role));
        if let Some(email) = user.email {
            updated.email = Some(email);
        }
        self.persist(&updated);
        Ok(updated)
    }

    async fn sign_out(&self, access_token: &str) -> ProviderResult<()> {
        let url = format!("{}/logout", self.base_url);
        let result = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .send()
            .await;

        if let Err(err) = self.store.clear() {
            warn!(error = %format!("{err:#}"), "failed to remove persisted session");
        }

        let response = result?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::http_status(status, &body))
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> ProviderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::http_status(status.as_u16(), &body));
    }
    response.json::<T>().await.map_err(|err| {
        ProviderError::new(
            ProviderErrorKind::Parse,
            format!("Failed to parse auth response: {err}"),
        )
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    expires_at: Option<u64>,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self.expires_at.unwrap_or_else(|| {
            now_secs() + self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS)
        });
        let role_hint = self.user.role_hint();
        let identity_provider = self
            .user
            .app_metadata
            .provider
            .filter(|p| p != "email");
        Session {
            subject: self.user.id,
            email: self.user.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            identity_provider,
            role_hint,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
    #[serde(default)]
    user_metadata: Map<String, Value>,
}

impl GoTrueUser {
    /// Metadata is free-form; only the closed role set survives.
    fn role_hint(&self) -> Option<Role> {
        self.user_metadata
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::from_id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    provider: Option<String>,
}
