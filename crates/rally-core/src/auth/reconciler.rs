//! Access reconciler.
//!
//! Combines the tracker's session with the backend user record into an
//! [`AccessState`]. Every backend check runs under its own generation number;
//! a result is applied only if its generation is still current, so stale
//! checks (superseded by a newer check, a new identity or a logout) never
//! overwrite fresher state.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rally_types::{AccessState, BackendUserRecord, CheckUserResponse, Role, Session, SessionEvent};
use tracing::{debug, info, warn};

use super::backend::{BackendApi, BackendError, BackendResult};
use super::provider::AuthProvider;
use super::tracker::{SessionEventRx, SessionTracker};

/// Result of one backend check, as seen by its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Registered(Role),
    NotRegistered,
    /// Backend failed; the state fell back to "not registered".
    Failed,
    NoSession,
    /// A newer check, identity change or logout made this result stale.
    Superseded,
}

/// Errors surfaced by explicit access operations.
#[derive(Debug)]
pub enum AccessError {
    NoSession,
    ConcurrentRegistration,
    RegistrationFailed(BackendError),
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::NoSession => write!(f, "not signed in"),
            AccessError::ConcurrentRegistration => {
                write!(f, "a registration is already in progress")
            }
            AccessError::RegistrationFailed(err) => write!(f, "registration failed: {err}"),
        }
    }
}

impl std::error::Error for AccessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AccessError::RegistrationFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Counters for check results. Failures are kept apart from genuine negatives.
#[derive(Debug, Default)]
pub struct CheckStats {
    confirmed: AtomicU64,
    absent: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckStatsSnapshot {
    pub confirmed: u64,
    pub absent: u64,
    pub failed: u64,
    pub superseded: u64,
}

impl CheckStats {
    pub fn snapshot(&self) -> CheckStatsSnapshot {
        CheckStatsSnapshot {
            confirmed: self.confirmed.load(Ordering::Relaxed),
            absent: self.absent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct ReconcilerState {
    generation: u64,
    session: Option<Arc<Session>>,
    role_hint: Option<Role>,
    record: Option<BackendUserRecord>,
    in_progress: bool,
    check_completed: bool,
}

impl ReconcilerState {
    fn reset(&mut self) {
        let generation = self.generation + 1;
        *self = Self {
            generation,
            ..Self::default()
        };
    }

    fn resolved_role(&self) -> Option<Role> {
        match &self.record {
            Some(record) => Some(record.role),
            None if self.in_progress || !self.check_completed => self.role_hint,
            None => None,
        }
    }

    fn access_state(&self) -> AccessState {
        AccessState {
            has_session: self.session.is_some(),
            has_backend_record: self.record.is_some(),
            backend_check_in_progress: self.in_progress,
            resolved_role: self.session.as_ref().and(self.resolved_role()),
        }
    }
}

/// Clears `in_progress` on every exit path of a check, including when its
/// future is dropped, unless a newer generation has taken over.
struct CheckGuard<'a> {
    state: &'a Mutex<ReconcilerState>,
    generation: u64,
    finished: bool,
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.state.lock();
        if state.generation == self.generation {
            state.in_progress = false;
        }
    }
}

/// Releases the registration claim on drop.
struct RegistrationClaim<'a>(&'a AtomicBool);

impl<'a> RegistrationClaim<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RegistrationClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AccessReconciler<P, B> {
    tracker: Arc<SessionTracker<P>>,
    backend: B,
    state: Mutex<ReconcilerState>,
    registering: AtomicBool,
    stats: CheckStats,
    check_retries: u32,
    retry_delay: Duration,
}

impl<P: AuthProvider, B: BackendApi> AccessReconciler<P, B> {
    pub fn new(tracker: Arc<SessionTracker<P>>, backend: B) -> Self {
        Self {
            tracker,
            backend,
            state: Mutex::new(ReconcilerState::default()),
            registering: AtomicBool::new(false),
            stats: CheckStats::default(),
            check_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// Retries transient check failures `retries` times, `delay` apart,
    /// before falling back to "not registered".
    #[must_use]
    pub fn with_check_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.check_retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn tracker(&self) -> &Arc<SessionTracker<P>> {
        &self.tracker
    }

    pub fn stats(&self) -> CheckStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn snapshot(&self) -> AccessState {
        self.state.lock().access_state()
    }

    /// Backend record confirmed for the current session, if any.
    pub fn record(&self) -> Option<BackendUserRecord> {
        self.state.lock().record.clone()
    }

    pub fn is_fully_authenticated(&self) -> bool {
        self.snapshot().is_fully_authenticated()
    }

    pub fn needs_registration(&self) -> bool {
        self.snapshot().needs_registration()
    }

    /// Record role if present; otherwise the role hint while no check has
    /// completed for this session.
    pub fn resolved_role(&self) -> Option<Role> {
        self.snapshot().resolved_role
    }

    /// Applies one session event.
    ///
    /// Returns true when the event calls for a backend check. In that case
    /// the state is already marked as checking and the caller must follow up
    /// with [`Self::refresh_backend_record`].
    pub fn apply_session_event(&self, event: &SessionEvent) -> bool {
        let session = match event {
            SessionEvent::SessionCleared => {
                self.state.lock().reset();
                debug!("session cleared, access state reset");
                return false;
            }
            SessionEvent::SessionRestored(session)
            | SessionEvent::SessionEstablished(session)
            | SessionEvent::TokenRefreshed(session) => session,
        };

        let role_hint = self.tracker.role_hint_for(session);
        let mut state = self.state.lock();
        let same_identity = state
            .session
            .as_ref()
            .is_some_and(|current| current.same_identity(session));

        let needs_check = match event {
            SessionEvent::SessionEstablished(_) => true,
            _ => !same_identity,
        };

        if !same_identity {
            state.record = None;
            state.check_completed = false;
        }
        state.session = Some(Arc::clone(session));
        state.role_hint = role_hint;

        if needs_check {
            state.generation += 1;
            state.in_progress = true;
        }
        debug!(
            kind = event.kind(),
            subject = %session.subject,
            same_identity,
            needs_check,
            "session event applied"
        );
        needs_check
    }

    /// Processes session events in order until the channel closes.
    ///
    /// A burst already queued is applied as a whole and followed by at most
    /// one check. A check still running when the next event arrives is
    /// dropped if that event restarts or clears the session.
    pub async fn run(&self, mut events: SessionEventRx) {
        let mut check: Option<Pin<Box<dyn Future<Output = CheckOutcome> + Send + '_>>> = None;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        if let Some(pending) = check.take() {
                            let outcome = pending.await;
                            debug!(?outcome, "session check finished");
                        }
                        break;
                    };
                    let mut restart = self.apply_session_event(&event);
                    let mut cleared = matches!(event, SessionEvent::SessionCleared);
                    while let Ok(next) = events.try_recv() {
                        let next_cleared = matches!(next, SessionEvent::SessionCleared);
                        restart = self.apply_session_event(&next) || (restart && !next_cleared);
                        cleared |= next_cleared;
                    }
                    if cleared {
                        check = None;
                    }
                    if restart {
                        check = Some(Box::pin(self.refresh_backend_record()));
                    }
                }
                outcome = async {
                    match check.as_mut() {
                        Some(pending) => pending.await,
                        None => std::future::pending().await,
                    }
                }, if check.is_some() => {
                    check = None;
                    debug!(?outcome, "session check finished");
                }
            }
        }
    }

    /// Asks the backend whether the current session has a user record.
    ///
    /// Transport and backend failures fall back to "not registered" so the
    /// state never stays in checking; they are logged and counted apart from
    /// genuine negatives.
    pub async fn refresh_backend_record(&self) -> CheckOutcome {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.in_progress = true;
            state.generation
        };
        let mut guard = CheckGuard {
            state: &self.state,
            generation,
            finished: false,
        };

        let Some(session) = self.tracker.current_session().await else {
            let mut state = self.state.lock();
            if state.generation == generation {
                // Signed out or invalidated by the provider while we looked.
                state.reset();
            }
            debug!(generation, "no session to check");
            return CheckOutcome::NoSession;
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return self.superseded(generation);
            }
            if !state
                .session
                .as_ref()
                .is_some_and(|current| current.same_identity(&session))
            {
                state.record = None;
                state.check_completed = false;
            }
            state.role_hint = self.tracker.role_hint_for(&session);
            state.session = Some(Arc::clone(&session));
        }

        let result = self.check_with_retries(&session, generation).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            drop(state);
            return self.superseded(generation);
        }
        guard.finished = true;
        state.in_progress = false;
        state.check_completed = true;

        match result {
            Ok(CheckUserResponse {
                exists: true,
                user: Some(record),
            }) => {
                let role = record.role;
                info!(
                    subject = %session.subject,
                    generation,
                    outcome = "registered",
                    role = %role,
                    "backend check"
                );
                CheckStats::bump(&self.stats.confirmed);
                state.record = Some(record);
                CheckOutcome::Registered(role)
            }
            Ok(CheckUserResponse { exists: false, .. }) => {
                info!(subject = %session.subject, generation, outcome = "absent", "backend check");
                CheckStats::bump(&self.stats.absent);
                state.record = None;
                CheckOutcome::NotRegistered
            }
            Ok(CheckUserResponse {
                exists: true,
                user: None,
            }) => {
                warn!(
                    subject = %session.subject,
                    generation,
                    outcome = "error",
                    "backend reported a user without a record"
                );
                CheckStats::bump(&self.stats.failed);
                state.record = None;
                CheckOutcome::Failed
            }
            Err(err) => {
                warn!(
                    subject = %session.subject,
                    generation,
                    outcome = "error",
                    kind = %err.kind,
                    error = %err,
                    "backend check failed, falling back to not registered"
                );
                CheckStats::bump(&self.stats.failed);
                state.record = None;
                CheckOutcome::Failed
            }
        }
    }

    fn superseded(&self, generation: u64) -> CheckOutcome {
        debug!(generation, outcome = "superseded", "backend check discarded");
        CheckStats::bump(&self.stats.superseded);
        CheckOutcome::Superseded
    }

    async fn check_with_retries(
        &self,
        session: &Session,
        generation: u64,
    ) -> BackendResult<CheckUserResponse> {
        let mut attempt = 0;
        loop {
            match self.backend.check_user(&session.access_token).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < self.check_retries => {
                    attempt += 1;
                    debug!(generation, attempt, error = %err, "retrying backend check");
                    tokio::time::sleep(self.retry_delay).await;
                    if self.state.lock().generation != generation {
                        return Err(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Creates the backend record for the current session with `role`.
    ///
    /// On success the role is also stored as the session's role hint and the
    /// backend record is re-fetched before returning.
    ///
    /// # Errors
    /// - [`AccessError::ConcurrentRegistration`] while another registration runs.
    /// - [`AccessError::NoSession`] without a session; the backend is not called.
    /// - [`AccessError::RegistrationFailed`] when the backend rejects the call.
    ///   Nothing local changes in that case.
    pub async fn register_role(&self, role: Role) -> Result<BackendUserRecord, AccessError> {
        let _claim = RegistrationClaim::acquire(&self.registering)
            .ok_or(AccessError::ConcurrentRegistration)?;
        let session = self
            .tracker
            .current_session()
            .await
            .ok_or(AccessError::NoSession)?;

        let record = self
            .backend
            .register(&session.access_token, role)
            .await
            .map_err(|err| {
                warn!(
                    subject = %session.subject,
                    role = %role,
                    error = %err,
                    "registration rejected"
                );
                AccessError::RegistrationFailed(err)
            })?;
        info!(subject = %session.subject, role = %role, backend_id = %record.id, "registered");

        if let Err(err) = self.tracker.update_role_hint(&session, role).await {
            warn!(kind = %err.kind, error = %err, "failed to store role hint in session metadata");
        }

        match self.refresh_backend_record().await {
            CheckOutcome::Registered(_) | CheckOutcome::Superseded | CheckOutcome::NoSession => {}
            outcome => warn!(?outcome, "record not confirmed right after registration"),
        }
        Ok(record)
    }

    /// Discards any running check, resets to signed out, then signs out
    /// through the tracker.
    ///
    /// The state is reset again once the tracker is done, since a check may
    /// start while the tracker waits for an earlier provider call.
    pub async fn logout(&self) {
        self.state.lock().reset();
        self.tracker.logout().await;
        self.state.lock().reset();
    }
}
