//! Identity session tracker.
//!
//! Owns the session obtained from the [`AuthProvider`] and publishes every
//! transition as a [`SessionEvent`] to all subscribers. State changes and the
//! matching publish happen under one lock, so subscribers observe events in
//! the same order the tracker applied them.

use std::sync::Arc;

use parking_lot::Mutex;
use rally_types::{Role, Session, SessionEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::pkce::Pkce;
use super::provider::{AuthProvider, ProviderResult};
use super::store::{RoleHint, RoleHintStore};

pub type SessionEventTx = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventRx = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Default)]
struct TrackerInner {
    session: Option<Arc<Session>>,
    subscribers: Vec<SessionEventTx>,
}

pub struct SessionTracker<P> {
    provider: P,
    hints: Option<RoleHintStore>,
    inner: Mutex<TrackerInner>,
    /// Serializes refresh, restore and logout so a rotated refresh token is
    /// never used twice and logout cannot be undone by a late refresh.
    pub(super) provider_lock: tokio::sync::Mutex<()>,
}

impl<P: AuthProvider> SessionTracker<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            hints: None,
            inner: Mutex::new(TrackerInner::default()),
            provider_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Keeps a local, advisory copy of the chosen role next to the session.
    #[must_use]
    pub fn with_role_hint_store(mut self, store: RoleHintStore) -> Self {
        self.hints = Some(store);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Registers a new subscriber. Every subscriber receives every event.
    pub fn subscribe(&self) -> SessionEventRx {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Session currently held in memory, without any provider call.
    pub fn cached_session(&self) -> Option<Arc<Session>> {
        self.inner.lock().session.clone()
    }

    /// Loads the persisted session at start-up.
    ///
    /// Publishes `SessionRestored`, followed by `TokenRefreshed` when the
    /// stored token had to be rotated.
    pub async fn restore(&self) -> Option<Arc<Session>> {
        let _serial = self.provider_lock.lock().await;
        self.restore_locked().await
    }

    async fn restore_locked(&self) -> Option<Arc<Session>> {
        if let Some(session) = self.cached_session() {
            return Some(session);
        }

        let stored = match self.provider.get_session().await {
            Ok(stored) => stored?,
            Err(err) => {
                warn!(kind = %err.kind, error = %err, "session lookup failed");
                return None;
            }
        };

        let restored = Arc::new(stored);
        info!(subject = %restored.subject, "session restored");
        self.replace(
            Some(Arc::clone(&restored)),
            SessionEvent::SessionRestored(Arc::clone(&restored)),
        );

        if restored.is_expired() {
            return self.refresh_locked(&restored).await;
        }
        Some(restored)
    }

    /// Returns a valid session, or `None`.
    ///
    /// A valid cached session is returned without I/O. An expired one is
    /// refreshed; with nothing cached the persisted session is restored.
    /// Provider errors are logged and reported as `None`.
    pub async fn current_session(&self) -> Option<Arc<Session>> {
        if let Some(session) = self.cached_session()
            && !session.is_expired()
        {
            return Some(session);
        }

        let _serial = self.provider_lock.lock().await;
        match self.cached_session() {
            Some(session) if !session.is_expired() => Some(session),
            Some(stale) => self.refresh_locked(&stale).await,
            None => self.restore_locked().await,
        }
    }

    /// Bearer token for outbound calls.
    pub async fn access_token(&self) -> Option<String> {
        self.current_session()
            .await
            .map(|session| session.access_token.clone())
    }

    async fn refresh_locked(&self, stale: &Arc<Session>) -> Option<Arc<Session>> {
        let Some(refresh_token) = stale.refresh_token.as_deref() else {
            warn!(subject = %stale.subject, "session expired without refresh token");
            self.invalidate();
            return None;
        };

        match self.provider.refresh_session(refresh_token).await {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                let event = if fresh.same_identity(stale) {
                    SessionEvent::TokenRefreshed(Arc::clone(&fresh))
                } else {
                    SessionEvent::SessionEstablished(Arc::clone(&fresh))
                };
                debug!(subject = %fresh.subject, expires_at = fresh.expires_at, "token refreshed");
                self.replace(Some(Arc::clone(&fresh)), event);
                Some(fresh)
            }
            Err(err) if err.is_unauthorized() => {
                warn!(
                    subject = %stale.subject,
                    error = %err,
                    "refresh rejected, session invalidated"
                );
                self.invalidate();
                None
            }
            Err(err) => {
                warn!(kind = %err.kind, error = %err, "token refresh failed");
                None
            }
        }
    }

    /// Email/password sign-in. Publishes `SessionEstablished`.
    ///
    /// # Errors
    /// Returns the provider error when the credentials are rejected or the
    /// provider is unreachable.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> ProviderResult<Arc<Session>> {
        let session = Arc::new(self.provider.sign_in_with_password(email, password).await?);
        info!(subject = %session.subject, method = "password", "signed in");
        self.establish(&session);
        Ok(session)
    }

    /// OAuth authorize URL for `identity_provider`.
    ///
    /// # Errors
    /// Returns an error when the provider URL cannot be built.
    pub fn authorize_url(
        &self,
        identity_provider: &str,
        redirect_to: &str,
        pkce: &Pkce,
    ) -> ProviderResult<String> {
        self.provider
            .authorize_url(identity_provider, redirect_to, pkce)
    }

    /// Completes an OAuth redirect. Publishes `SessionEstablished`.
    ///
    /// # Errors
    /// Returns the provider error when the code exchange fails.
    pub async fn complete_oauth(
        &self,
        auth_code: &str,
        code_verifier: &str,
    ) -> ProviderResult<Arc<Session>> {
        let session = Arc::new(self.provider.exchange_code(auth_code, code_verifier).await?);
        info!(
            subject = %session.subject,
            method = session.identity_provider.as_deref().unwrap_or("oauth"),
            "signed in"
        );
        self.establish(&session);
        Ok(session)
    }

    fn establish(&self, session: &Arc<Session>) {
        self.replace(
            Some(Arc::clone(session)),
            SessionEvent::SessionEstablished(Arc::clone(session)),
        );
    }

    /// Role hint for `session`: provider metadata first, then the local hint
    /// recorded for the same subject.
    pub fn role_hint_for(&self, session: &Session) -> Option<Role> {
        session.role_hint.or_else(|| {
            let store = self.hints.as_ref()?;
            match store.load() {
                Ok(Some(hint)) if hint.subject == session.subject => Some(hint.role),
                Ok(_) => None,
                Err(err) => {
                    debug!(error = %format!("{err:#}"), "role hint unreadable");
                    None
                }
            }
        })
    }

    /// Stores `role` as session metadata and as the local hint.
    ///
    /// The local hint is written even when the provider update fails.
    ///
    /// # Errors
    /// Returns the provider error from the metadata update.
    pub async fn update_role_hint(&self, session: &Session, role: Role) -> ProviderResult<()> {
        if let Some(store) = &self.hints {
            let hint = RoleHint {
                subject: session.subject.clone(),
                role,
            };
            if let Err(err) = store.save(&hint) {
                warn!(error = %format!("{err:#}"), "failed to save role hint");
            }
        }

        let updated = self.provider.update_user_metadata(session, role).await?;
        let mut inner = self.inner.lock();
        if inner
            .session
            .as_ref()
            .is_some_and(|current| current.access_token == session.access_token)
        {
            // Metadata edits are not a session transition; no event.
            inner.session = Some(Arc::new(updated));
        }
        Ok(())
    }

    /// Signs out.
    ///
    /// The local session is dropped and `SessionCleared` published before the
    /// provider is contacted, so the local state ends up signed out even when
    /// the provider call fails or is cancelled.
    pub async fn logout(&self) {
        let _serial = self.provider_lock.lock().await;

        let session = match self.cached_session() {
            Some(session) => Some(session),
            None => match self.provider.get_session().await {
                Ok(stored) => stored.map(Arc::new),
                Err(err) => {
                    warn!(kind = %err.kind, error = %err, "session lookup failed during logout");
                    None
                }
            },
        };

        self.replace(None, SessionEvent::SessionCleared);

        if let Some(session) = session {
            match self.provider.sign_out(&session.access_token).await {
                Ok(()) => info!(subject = %session.subject, "signed out"),
                Err(err) => warn!(
                    subject = %session.subject,
                    kind = %err.kind,
                    error = %err,
                    "remote sign-out failed, local session cleared anyway"
                ),
            }
        }

        self.clear_hint();
    }

    fn invalidate(&self) {
        self.replace(None, SessionEvent::SessionCleared);
        self.clear_hint();
    }

    fn clear_hint(&self) {
        if let Some(store) = &self.hints
            && let Err(err) = store.clear()
        {
            warn!(error = %format!("{err:#}"), "failed to remove role hint");
        }
    }

    fn replace(&self, session: Option<Arc<Session>>, event: SessionEvent) {
        let mut inner = self.inner.lock();
        inner.session = session;
        debug!(kind = event.kind(), subscribers = inner.subscribers.len(), "session event");
        inner
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use rally_types::now_secs;
    use tempfile::tempdir;

    use super::*;
    use crate::auth::provider::{ProviderError, ProviderErrorKind};
    use crate::auth::testing::{FakeProvider, expired_session, session};

    fn drain(rx: &mut SessionEventRx) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[tokio::test]
    async fn test_restore_publishes_restored() {
        let tracker = SessionTracker::new(FakeProvider::with_persisted(session("a")));
        let mut rx = tracker.subscribe();

        let restored = tracker.restore().await.unwrap();
        assert_eq!(restored.subject, "a");
        assert_eq!(drain(&mut rx), vec!["restored"]);

        // Cached now: no second event.
        assert!(tracker.current_session().await.is_some());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_restore_of_expired_session_refreshes() {
        let provider = FakeProvider::with_persisted(expired_session("a"));
        provider.push_refresh(Ok(session("a")));
        let tracker = SessionTracker::new(provider.clone());
        let mut rx = tracker.subscribe();

        let current = tracker.restore().await.unwrap();
        assert!(current.expires_at > now_secs());
        assert_eq!(drain(&mut rx), vec!["restored", "token_refreshed"]);
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_invalidates_session() {
        let provider = FakeProvider::with_persisted(expired_session("a"));
        let tracker = SessionTracker::new(provider.clone());
        let mut rx = tracker.subscribe();

        assert!(tracker.current_session().await.is_none());
        assert!(tracker.cached_session().is_none());
        assert!(provider.persisted().is_none());
        assert_eq!(drain(&mut rx), vec!["restored", "cleared"]);
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let provider = FakeProvider::with_persisted(expired_session("a"));
        provider.push_refresh(Err(ProviderError::new(
            ProviderErrorKind::Transport,
            "unreachable",
        )));
        let tracker = SessionTracker::new(provider);

        assert!(tracker.access_token().await.is_none());
        assert!(tracker.cached_session().is_some());
    }

    #[tokio::test]
    async fn test_provider_error_reads_as_no_session() {
        let provider = FakeProvider::with_persisted(session("a"));
        provider.fail_get_session(ProviderError::new(ProviderErrorKind::Storage, "corrupt"));
        let tracker = SessionTracker::new(provider);

        assert!(tracker.current_session().await.is_none());
        assert!(tracker.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_all_subscribers_receive_events_and_closed_ones_are_pruned() {
        let provider = FakeProvider::default();
        provider.push_sign_in(Ok(session("a")));
        let tracker = SessionTracker::new(provider);
        let mut first = tracker.subscribe();
        let mut second = tracker.subscribe();
        let dropped = tracker.subscribe();
        drop(dropped);

        tracker.sign_in_with_password("a@example.org", "pw").await.unwrap();

        for rx in [&mut first, &mut second] {
            match rx.try_recv().unwrap() {
                SessionEvent::SessionEstablished(s) => assert_eq!(s.subject, "a"),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(tracker.inner.lock().subscribers.len(), 2);
    }

    #[tokio::test]
    async fn test_logout_clears_locally_when_sign_out_fails() {
        let dir = tempdir().unwrap();
        let hints = RoleHintStore::new(dir.path().join("role_hint.json"));
        let provider = FakeProvider::with_persisted(session("a"));
        provider.fail_sign_out(ProviderError::new(ProviderErrorKind::Transport, "offline"));
        let tracker = SessionTracker::new(provider.clone()).with_role_hint_store(hints.clone());

        let current = tracker.restore().await.unwrap();
        tracker.update_role_hint(&current, Role::User).await.unwrap();
        assert!(hints.load().unwrap().is_some());

        let mut rx = tracker.subscribe();
        tracker.logout().await;

        assert!(tracker.cached_session().is_none());
        assert!(hints.load().unwrap().is_none());
        assert_eq!(provider.sign_out_calls(), 1);
        assert_eq!(drain(&mut rx), vec!["cleared"]);
    }

    #[tokio::test]
    async fn test_logout_without_cached_session_uses_persisted_token() {
        let provider = FakeProvider::with_persisted(session("a"));
        let tracker = SessionTracker::new(provider.clone());

        tracker.logout().await;
        assert_eq!(provider.sign_out_calls(), 1);
        assert!(provider.persisted().is_none());
    }

    #[tokio::test]
    async fn test_role_hint_falls_back_to_local_hint_for_same_subject() {
        let dir = tempdir().unwrap();
        let hints = RoleHintStore::new(dir.path().join("role_hint.json"));
        hints
            .save(&RoleHint {
                subject: "a".to_string(),
                role: Role::Organization,
            })
            .unwrap();
        let tracker = SessionTracker::new(FakeProvider::default()).with_role_hint_store(hints);

        assert_eq!(tracker.role_hint_for(&session("a")), Some(Role::Organization));
        assert_eq!(tracker.role_hint_for(&session("b")), None);

        let mut hinted = session("b");
        hinted.role_hint = Some(Role::User);
        assert_eq!(tracker.role_hint_for(&hinted), Some(Role::User));
    }
}
