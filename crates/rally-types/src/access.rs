use serde::Serialize;

use crate::Role;

/// Where a session currently stands in the access state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPhase {
    NoSession,
    CheckPending,
    Registered,
    NeedsRegistration,
}

impl AccessPhase {
    pub fn label(&self) -> &'static str {
        match self {
            AccessPhase::NoSession => "signed out",
            AccessPhase::CheckPending => "checking registration",
            AccessPhase::Registered => "registered",
            AccessPhase::NeedsRegistration => "registration required",
        }
    }
}

/// Derived access snapshot. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessState {
    pub has_session: bool,
    pub has_backend_record: bool,
    pub backend_check_in_progress: bool,
    pub resolved_role: Option<Role>,
}

impl AccessState {
    pub fn is_fully_authenticated(&self) -> bool {
        self.has_session && self.has_backend_record && !self.backend_check_in_progress
    }

    pub fn needs_registration(&self) -> bool {
        self.has_session && !self.has_backend_record && !self.backend_check_in_progress
    }

    pub fn phase(&self) -> AccessPhase {
        if !self.has_session {
            AccessPhase::NoSession
        } else if self.backend_check_in_progress {
            AccessPhase::CheckPending
        } else if self.has_backend_record {
            AccessPhase::Registered
        } else {
            AccessPhase::NeedsRegistration
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_flags_are_exclusive() {
        for bits in 0u8..8 {
            let state = AccessState {
                has_session: bits & 1 != 0,
                has_backend_record: bits & 2 != 0,
                backend_check_in_progress: bits & 4 != 0,
                resolved_role: None,
            };
            assert!(
                !(state.is_fully_authenticated() && state.needs_registration()),
                "both flags set for {state:?}"
            );
        }
    }

    #[test]
    fn test_phase_mapping() {
        let mut state = AccessState::default();
        assert_eq!(state.phase(), AccessPhase::NoSession);

        state.has_session = true;
        state.backend_check_in_progress = true;
        assert_eq!(state.phase(), AccessPhase::CheckPending);
        assert!(!state.needs_registration());

        state.backend_check_in_progress = false;
        assert_eq!(state.phase(), AccessPhase::NeedsRegistration);
        assert!(state.needs_registration());

        state.has_backend_record = true;
        assert_eq!(state.phase(), AccessPhase::Registered);
        assert!(state.is_fully_authenticated());
    }
}
