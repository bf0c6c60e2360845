//! Config command handlers.

use anyhow::{Context, Result};
use rally_core::auth::pkce::mask_token;
use rally_core::config::{self, Config};

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

/// Prints the effective endpoints after env overrides.
pub fn show(config: &Config) -> Result<()> {
    let api_key = config.auth_api_key();
    println!("Auth URL:     {}", config.auth_url()?);
    println!(
        "Auth key:     {}",
        if api_key.is_empty() { "(not set)".to_string() } else { mask_token(&api_key) }
    );
    println!("Backend URL:  {}", config.api_url()?);
    println!(
        "Check:        timeout {}s, {} retr{}",
        config.backend.timeout_secs,
        config.backend.check_retries,
        if config.backend.check_retries == 1 { "y" } else { "ies" }
    );
    println!("Log filter:   {}", config.logging.filter);
    Ok(())
}
