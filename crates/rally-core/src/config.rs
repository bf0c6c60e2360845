//! Configuration management for Rally.
//!
//! Loads configuration from ${RALLY_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Env var overriding `auth.url`.
pub const AUTH_URL_ENV: &str = "RALLY_AUTH_URL";
/// Env var overriding `auth.api_key`.
pub const AUTH_KEY_ENV: &str = "RALLY_AUTH_KEY";
/// Env var overriding `backend.url`.
pub const API_URL_ENV: &str = "RALLY_API_URL";

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! Path resolution for Rally configuration and data files.
    //!
    //! RALLY_HOME resolution order:
    //! 1. RALLY_HOME environment variable (if set)
    //! 2. ~/.config/rally (default)

    use std::path::PathBuf;

    /// Returns the Rally home directory.
    pub fn rally_home() -> PathBuf {
        if let Ok(home) = std::env::var("RALLY_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".rally"),
            |h| h.join(".config").join("rally"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        rally_home().join("config.toml")
    }

    /// Persisted provider session.
    pub fn session_path() -> PathBuf {
        rally_home().join("session.json")
    }

    /// Local advisory role hint.
    pub fn role_hint_path() -> PathBuf {
        rally_home().join("role_hint.json")
    }

    /// Directory for rolling log files.
    pub fn logs_dir() -> PathBuf {
        rally_home().join("logs")
    }
}

/// Auth provider (GoTrue) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub url: String,
    pub api_key: Option<String>,
    /// Port for the local OAuth redirect listener; 0 picks a random high port.
    pub redirect_port: u16,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: Config::DEFAULT_AUTH_URL.to_string(),
            api_key: None,
            redirect_port: 0,
        }
    }
}

/// Rally REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub timeout_secs: u64,
    /// Extra attempts when a registration check fails in transport.
    pub check_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: Config::DEFAULT_API_URL.to_string(),
            timeout_secs: 10,
            check_retries: 1,
            retry_delay_ms: 500,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive.
    pub filter: String,
    /// Log to a rolling file under `$RALLY_HOME/logs` instead of stderr.
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: true,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

impl Config {
    const DEFAULT_AUTH_URL: &str = "http://localhost:54321/auth/v1";
    const DEFAULT_API_URL: &str = "http://localhost:8000/api";

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Writes the default template to `path`. Refuses to overwrite.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, default_config_template())
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }

    /// Auth service base URL with precedence: env > config > default.
    ///
    /// # Errors
    /// Returns an error if the chosen URL is malformed.
    pub fn auth_url(&self) -> Result<String> {
        resolve_base_url(
            Some(&self.auth.url),
            AUTH_URL_ENV,
            Self::DEFAULT_AUTH_URL,
            "auth",
        )
    }

    /// Backend API base URL with precedence: env > config > default.
    ///
    /// # Errors
    /// Returns an error if the chosen URL is malformed.
    pub fn api_url(&self) -> Result<String> {
        resolve_base_url(
            Some(&self.backend.url),
            API_URL_ENV,
            Self::DEFAULT_API_URL,
            "backend",
        )
    }

    /// Auth API key: config value first, then `RALLY_AUTH_KEY`. Empty when neither is set.
    pub fn auth_api_key(&self) -> String {
        if let Some(key) = self.auth.api_key.as_deref() {
            let trimmed = key.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        std::env::var(AUTH_KEY_ENV)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

/// Resolves a base URL with precedence: env > config > default.
fn resolve_base_url(
    config_base_url: Option<&str>,
    env_var: &str,
    default_url: &str,
    service_name: &str,
) -> Result<String> {
    if let Ok(env_url) = std::env::var(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, service_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, service_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    Ok(default_url.to_string())
}

fn validate_url(url: &str, service_name: &str) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("Invalid {service_name} base URL: {url}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config.auth.url, "http://localhost:54321/auth/v1");
        assert_eq!(config.backend.timeout_secs, 10);
        assert!(config.logging.file);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "[backend]\nurl = \"https://api.example.org\"\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.backend.url, "https://api.example.org");
        assert_eq!(config.backend.check_retries, 1);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_init_writes_parseable_template() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("[backend]"));
        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.backend.retry_delay_ms, 500);
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_resolve_base_url_rejects_garbage() {
        let result = resolve_base_url(Some("not a url"), "RALLY_TEST_UNSET_URL", "x", "backend");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_base_url_trims_trailing_slash() {
        let url = resolve_base_url(
            Some("https://api.example.org/"),
            "RALLY_TEST_UNSET_URL",
            "x",
            "backend",
        )
        .unwrap();
        assert_eq!(url, "https://api.example.org");
    }
}
