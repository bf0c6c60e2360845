//! Register command: choose a role for a signed-in account.

use anyhow::{Context, Result};
use rally_core::auth::{AccessError, GuardDecision, RouteRequirement, evaluate};
use rally_core::config::Config;
use rally_types::Role;

use super::{access_core, reconcile};

pub async fn run(config: &Config, role: Role) -> Result<()> {
    let reconciler = access_core(config)?;
    let mut events = reconciler.tracker().subscribe();

    if reconciler.tracker().restore().await.is_none() {
        anyhow::bail!("Not signed in. Run `rally login` first.");
    }
    reconcile(&reconciler, &mut events).await;

    match evaluate(&reconciler.snapshot(), &RouteRequirement::Registration) {
        GuardDecision::Home => {
            let current = reconciler
                .resolved_role()
                .map_or("unknown", |r| r.label());
            println!("Already registered as {current}.");
            return Ok(());
        }
        GuardDecision::SignIn => anyhow::bail!("Session expired. Run `rally login` again."),
        _ => {}
    }

    let record = match reconciler.register_role(role).await {
        Ok(record) => record,
        Err(AccessError::RegistrationFailed(err)) => {
            return Err(err).context("Registration rejected by backend");
        }
        Err(err) => return Err(err.into()),
    };

    println!("✓ Registered as {}", record.role.label());
    if let Some(email) = &record.email {
        println!("  Account: {email}");
    }
    if !reconciler.is_fully_authenticated() {
        println!("  Registration saved; access will update on the next `rally status`.");
    }
    Ok(())
}
