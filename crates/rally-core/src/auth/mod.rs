//! Authentication and access reconciliation.
//!
//! - [`tracker::SessionTracker`] owns the provider session and publishes
//!   [`rally_types::SessionEvent`]s.
//! - [`reconciler::AccessReconciler`] turns session plus backend record into
//!   an [`rally_types::AccessState`].
//! - [`guard`] maps that state to route decisions.

pub mod backend;
pub mod gotrue;
pub mod guard;
pub mod pkce;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendApi, BackendError, BackendErrorKind, HttpBackend};
pub use gotrue::GoTrueProvider;
pub use guard::{AccessView, GuardDecision, RouteRequirement, evaluate};
pub use provider::{AuthProvider, ProviderError, ProviderErrorKind};
pub use reconciler::{AccessError, AccessReconciler, CheckOutcome};
pub use store::{RoleHint, RoleHintStore, SessionStore};
pub use tracker::{SessionEventRx, SessionTracker};
