//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use rally_core::{config, logging};
use rally_types::Role;

mod commands;

#[derive(Parser)]
#[command(name = "rally")]
#[command(version)]
#[command(about = "Sign in to Rally and inspect account access")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign in with email/password or a third-party identity provider
    Login {
        /// Account email (password sign-in)
        #[arg(long, conflicts_with = "oauth", required_unless_present = "oauth")]
        email: Option<String>,

        /// Password; read from stdin when omitted
        #[arg(long, requires = "email", env = "RALLY_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Identity provider for OAuth sign-in (e.g. google)
        #[arg(long, value_name = "PROVIDER")]
        oauth: Option<String>,
    },

    /// Sign out and forget the local session
    Logout,

    /// Show the session and reconciled access state
    Status {
        /// Evaluate access for a route restricted to these roles
        #[arg(long, value_name = "ROLE", value_parser = parse_role)]
        require: Vec<Role>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Complete registration by choosing a role
    Register {
        /// user or organization
        #[arg(long, value_parser = parse_role)]
        role: Role,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Show the effective endpoints and settings
    Show,
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::from_id(value).ok_or_else(|| {
        let known: Vec<&str> = Role::all().iter().map(Role::id).collect();
        format!("unknown role '{value}' (expected one of: {})", known.join(", "))
    })
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;
    let _log_guard = logging::init(&config.logging);

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli, &config).await })
}

async fn dispatch(cli: Cli, config: &config::Config) -> Result<()> {
    match cli.command {
        Commands::Login {
            email,
            password,
            oauth,
        } => match (email, oauth) {
            (Some(email), None) => commands::auth::login_password(config, &email, password).await,
            (None, Some(provider)) => commands::auth::login_oauth(config, &provider).await,
            _ => anyhow::bail!("Please specify either --email or --oauth <provider>"),
        },
        Commands::Logout => commands::auth::logout(config).await,
        Commands::Status { require, json } => commands::status::run(config, require, json).await,
        Commands::Register { role } => commands::register::run(config, role).await,
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Show => commands::config::show(config),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("Organization"), Ok(Role::Organization));
        let err = parse_role("admin").unwrap_err();
        assert!(err.contains("user, organization"));
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
