//! Scriptable provider and backend fakes shared by the auth unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rally_types::{BackendUserRecord, CheckUserResponse, Role, Session, now_secs};
use tokio::sync::oneshot;

use super::backend::{BackendApi, BackendError, BackendErrorKind, BackendResult};
use super::pkce::Pkce;
use super::provider::{AuthProvider, ProviderError, ProviderErrorKind, ProviderResult};

pub(crate) fn session(subject: &str) -> Session {
    Session {
        subject: subject.to_string(),
        email: Some(format!("{subject}@example.org")),
        access_token: format!("token-{subject}"),
        refresh_token: Some(format!("refresh-{subject}")),
        expires_at: now_secs() + 3600,
        identity_provider: None,
        role_hint: None,
    }
}

pub(crate) fn expired_session(subject: &str) -> Session {
    Session {
        expires_at: now_secs().saturating_sub(10),
        ..session(subject)
    }
}

pub(crate) fn record(role: Role) -> BackendUserRecord {
    BackendUserRecord {
        id: "7".to_string(),
        email: Some("member@example.org".to_string()),
        role,
        created_at: None,
    }
}

pub(crate) fn exists(role: Role) -> CheckUserResponse {
    CheckUserResponse {
        exists: true,
        user: Some(record(role)),
    }
}

pub(crate) fn absent() -> CheckUserResponse {
    CheckUserResponse {
        exists: false,
        user: None,
    }
}

pub(crate) fn timeout() -> BackendError {
    BackendError::new(BackendErrorKind::Timeout, "Backend request timed out")
}

/// Polls `cond` while yielding to spawned tasks.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[derive(Clone, Default)]
pub(crate) struct FakeProvider {
    inner: Arc<FakeProviderInner>,
}

#[derive(Default)]
struct FakeProviderInner {
    persisted: Mutex<Option<Session>>,
    sign_ins: Mutex<VecDeque<ProviderResult<Session>>>,
    refreshes: Mutex<VecDeque<ProviderResult<Session>>>,
    get_session_error: Mutex<Option<ProviderError>>,
    sign_out_error: Mutex<Option<ProviderError>>,
    metadata_roles: Mutex<Vec<Role>>,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn with_persisted(session: Session) -> Self {
        let provider = Self::default();
        *provider.inner.persisted.lock() = Some(session);
        provider
    }

    pub(crate) fn push_sign_in(&self, result: ProviderResult<Session>) {
        self.inner.sign_ins.lock().push_back(result);
    }

    pub(crate) fn push_refresh(&self, result: ProviderResult<Session>) {
        self.inner.refreshes.lock().push_back(result);
    }

    pub(crate) fn fail_get_session(&self, err: ProviderError) {
        *self.inner.get_session_error.lock() = Some(err);
    }

    pub(crate) fn fail_sign_out(&self, err: ProviderError) {
        *self.inner.sign_out_error.lock() = Some(err);
    }

    pub(crate) fn persisted(&self) -> Option<Session> {
        self.inner.persisted.lock().clone()
    }

    pub(crate) fn metadata_roles(&self) -> Vec<Role> {
        self.inner.metadata_roles.lock().clone()
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sign_out_calls(&self) -> usize {
        self.inner.sign_out_calls.load(Ordering::SeqCst)
    }

    fn persist(&self, session: &Session) {
        *self.inner.persisted.lock() = Some(session.clone());
    }
}

impl AuthProvider for FakeProvider {
    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> ProviderResult<Session> {
        let result = self.inner.sign_ins.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::new(ProviderErrorKind::Unauthorized, "no scripted sign-in"))
        });
        if let Ok(session) = &result {
            self.persist(session);
        }
        result
    }

    fn authorize_url(
        &self,
        identity_provider: &str,
        redirect_to: &str,
        pkce: &Pkce,
    ) -> ProviderResult<String> {
        Ok(format!(
            "https://auth.test/authorize?provider={identity_provider}&redirect_to={redirect_to}&code_challenge={}",
            pkce.challenge
        ))
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> ProviderResult<Session> {
        self.sign_in_with_password(auth_code, code_verifier).await
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        if let Some(err) = self.inner.get_session_error.lock().clone() {
            return Err(err);
        }
        Ok(self.persisted())
    }

    async fn refresh_session(&self, _refresh_token: &str) -> ProviderResult<Session> {
        self.inner.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let result = self.inner.refreshes.lock().pop_front().unwrap_or_else(|| {
            Err(ProviderError::new(ProviderErrorKind::Unauthorized, "refresh token revoked"))
        });
        match &result {
            Ok(session) => self.persist(session),
            Err(err) if err.is_unauthorized() => *self.inner.persisted.lock() = None,
            Err(_) => {}
        }
        result
    }

    async fn update_user_metadata(&self, session: &Session, role: Role) -> ProviderResult<Session> {
        self.inner.metadata_roles.lock().push(role);
        let mut updated = session.clone();
        updated.role_hint = Some(role);
        self.persist(&updated);
        Ok(updated)
    }

    async fn sign_out(&self, _access_token: &str) -> ProviderResult<()> {
        self.inner.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.inner.persisted.lock() = None;
        match self.inner.sign_out_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A scripted backend answer: immediate, or released later through a oneshot.
pub(crate) enum Reply<T> {
    Now(BackendResult<T>),
    Later(oneshot::Receiver<BackendResult<T>>),
}

pub(crate) fn later<T>() -> (oneshot::Sender<BackendResult<T>>, Reply<T>) {
    let (tx, rx) = oneshot::channel();
    (tx, Reply::Later(rx))
}

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    inner: Arc<FakeBackendInner>,
}

#[derive(Default)]
struct FakeBackendInner {
    checks: Mutex<VecDeque<Reply<CheckUserResponse>>>,
    registrations: Mutex<VecDeque<Reply<BackendUserRecord>>>,
    check_calls: AtomicUsize,
    register_calls: AtomicUsize,
}

impl FakeBackend {
    pub(crate) fn push_check(&self, reply: Reply<CheckUserResponse>) {
        self.inner.checks.lock().push_back(reply);
    }

    pub(crate) fn push_register(&self, reply: Reply<BackendUserRecord>) {
        self.inner.registrations.lock().push_back(reply);
    }

    pub(crate) fn check_calls(&self) -> usize {
        self.inner.check_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn register_calls(&self) -> usize {
        self.inner.register_calls.load(Ordering::SeqCst)
    }
}

async fn resolve<T>(reply: Option<Reply<T>>) -> BackendResult<T> {
    match reply {
        Some(Reply::Now(result)) => result,
        Some(Reply::Later(rx)) => rx.await.unwrap_or_else(|_| {
            Err(BackendError::new(BackendErrorKind::Transport, "reply dropped"))
        }),
        None => Err(BackendError::new(
            BackendErrorKind::Transport,
            "no scripted reply",
        )),
    }
}

impl BackendApi for FakeBackend {
    async fn check_user(&self, _access_token: &str) -> BackendResult<CheckUserResponse> {
        self.inner.check_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.inner.checks.lock().pop_front();
        resolve(reply).await
    }

    async fn register(&self, _access_token: &str, _role: Role) -> BackendResult<BackendUserRecord> {
        self.inner.register_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.inner.registrations.lock().pop_front();
        resolve(reply).await
    }
}
