//! Route guard contract.
//!
//! Guards only read access state; they never mutate the session or record.

use rally_types::{AccessPhase, AccessState, Role};

use super::backend::BackendApi;
use super::provider::AuthProvider;
use super::reconciler::AccessReconciler;

/// Read-only view of the reconciled access state.
pub trait AccessView {
    fn access_state(&self) -> AccessState;

    fn is_fully_authenticated(&self) -> bool {
        self.access_state().is_fully_authenticated()
    }

    fn needs_registration(&self) -> bool {
        self.access_state().needs_registration()
    }

    fn resolved_role(&self) -> Option<Role> {
        self.access_state().resolved_role
    }
}

impl AccessView for AccessState {
    fn access_state(&self) -> AccessState {
        *self
    }
}

impl<P: AuthProvider, B: BackendApi> AccessView for AccessReconciler<P, B> {
    fn access_state(&self) -> AccessState {
        self.snapshot()
    }
}

/// What a route demands of the visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRequirement {
    /// Any signed-in, registered user.
    SignedIn,
    /// The role-selection page itself.
    Registration,
    /// Registered with one of these roles.
    Roles(Vec<Role>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    /// Backend check still running; show a loading state.
    Loading,
    SignIn,
    Register,
    Forbidden,
    /// Already registered; leave the registration page.
    Home,
}

impl GuardDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GuardDecision::Allow => "allow",
            GuardDecision::Loading => "loading",
            GuardDecision::SignIn => "sign in",
            GuardDecision::Register => "register",
            GuardDecision::Forbidden => "forbidden",
            GuardDecision::Home => "home",
        }
    }
}

pub fn evaluate(view: &impl AccessView, requirement: &RouteRequirement) -> GuardDecision {
    let state = view.access_state();
    match (state.phase(), requirement) {
        (AccessPhase::NoSession, _) => GuardDecision::SignIn,
        (AccessPhase::CheckPending, _) => GuardDecision::Loading,
        (AccessPhase::NeedsRegistration, RouteRequirement::Registration) => GuardDecision::Allow,
        (AccessPhase::NeedsRegistration, _) => GuardDecision::Register,
        (AccessPhase::Registered, RouteRequirement::Registration) => GuardDecision::Home,
        (AccessPhase::Registered, RouteRequirement::SignedIn) => GuardDecision::Allow,
        (AccessPhase::Registered, RouteRequirement::Roles(roles)) => match state.resolved_role {
            Some(role) if roles.contains(&role) => GuardDecision::Allow,
            _ => GuardDecision::Forbidden,
        },
    }
}
