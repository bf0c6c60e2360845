//! Status command: restore the session and report reconciled access.

use anyhow::Result;
use rally_core::auth::pkce::mask_token;
use rally_core::auth::{CheckOutcome, GuardDecision, RouteRequirement, evaluate};
use rally_core::config::Config;
use rally_types::{AccessPhase, AccessState, Role};
use serde::Serialize;

use super::{access_core, reconcile};

#[derive(Serialize)]
struct StatusReport<'a> {
    subject: Option<&'a str>,
    email: Option<&'a str>,
    backend_id: Option<String>,
    phase: AccessPhase,
    access: AccessState,
    decision: &'static str,
    backend_check_failed: bool,
}

pub async fn run(config: &Config, require: Vec<Role>, json: bool) -> Result<()> {
    let reconciler = access_core(config)?;
    let tracker = reconciler.tracker();
    let mut events = tracker.subscribe();

    let session = tracker.restore().await;
    let outcome = if session.is_some() {
        reconcile(&reconciler, &mut events).await
    } else {
        CheckOutcome::NoSession
    };
    // A refresh during the check may have rotated or dropped the session.
    let session = tracker.cached_session();

    let state = reconciler.snapshot();
    let record = reconciler.record();
    let requirement = if require.is_empty() {
        RouteRequirement::SignedIn
    } else {
        RouteRequirement::Roles(require)
    };
    let decision = evaluate(&state, &requirement);

    if json {
        let report = StatusReport {
            subject: session.as_deref().map(|s| s.subject.as_str()),
            email: session.as_deref().and_then(|s| s.email.as_deref()),
            backend_id: record.map(|r| r.id),
            phase: state.phase(),
            access: state,
            decision: decision.label(),
            backend_check_failed: outcome == CheckOutcome::Failed,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match session.as_deref() {
            Some(session) => {
                println!(
                    "Signed in:    {}",
                    session.email.as_deref().unwrap_or(&session.subject)
                );
                if let Some(provider) = &session.identity_provider {
                    println!("Provider:     {provider}");
                }
                println!("Token:        {}", mask_token(&session.access_token));
            }
            None => println!("Not signed in."),
        }
        println!("Access:       {}", state.phase().label());
        if let Some(role) = state.resolved_role {
            println!("Role:         {}", role.label());
        }
        if let Some(record) = &record {
            println!("Backend id:   {}", record.id);
        }
        if outcome == CheckOutcome::Failed {
            println!("Warning:      backend unreachable, registration could not be confirmed");
        }
        println!("Decision:     {}", decision.label());
    }

    if matches!(requirement, RouteRequirement::Roles(_)) && decision != GuardDecision::Allow {
        anyhow::bail!("Access denied for required role ({})", decision.label());
    }
    Ok(())
}
