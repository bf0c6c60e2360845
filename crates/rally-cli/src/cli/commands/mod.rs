//! CLI command handlers.

use std::sync::Arc;

use anyhow::Result;
use rally_core::auth::{
    AccessReconciler, CheckOutcome, GoTrueProvider, HttpBackend, RoleHintStore, SessionEventRx,
    SessionTracker,
};
use rally_core::config::Config;

pub mod auth;
pub mod config;
pub mod register;
pub mod status;

pub type Reconciler = AccessReconciler<GoTrueProvider, HttpBackend>;

/// Wires the session tracker and access reconciler from config.
pub fn access_core(config: &Config) -> Result<Reconciler> {
    let provider = GoTrueProvider::from_config(config)?;
    let tracker = SessionTracker::new(provider)
        .with_role_hint_store(RoleHintStore::default_location());
    let backend = HttpBackend::from_config(config)?;
    Ok(
        AccessReconciler::new(Arc::new(tracker), backend).with_check_retries(
            config.backend.check_retries,
            config.backend.retry_delay(),
        ),
    )
}

/// Applies the tracker's queued session events, then runs one backend check.
///
/// A one-shot command has no long-lived event loop, so the events published
/// while restoring or signing in are drained here.
pub async fn reconcile(reconciler: &Reconciler, events: &mut SessionEventRx) -> CheckOutcome {
    while let Ok(event) = events.try_recv() {
        reconciler.apply_session_event(&event);
    }
    reconciler.refresh_backend_record().await
}
