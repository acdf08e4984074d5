//! Client-side session: who is signed in, persisted across restarts.
//!
//! State moves `Anonymous -> Authenticating -> Authenticated -> Anonymous`.
//! Only one authentication attempt may be in flight; a second one is
//! rejected with `AttemptInProgress`. A failed or cancelled attempt always
//! lands back in `Anonymous` with nothing persisted.

pub mod storage;

pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage, TOKEN_KEY, USER_KEY};

use crate::auth::{AuthGrant, LoginForm, SignupForm};
use crate::common::{AuthError, Result};
use crate::core::{PublicUser, Role};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

/// Anything that can sign users up and in: the in-process `AuthService` or
/// the HTTP `ApiClient`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn signup(&self, form: SignupForm) -> Result<AuthGrant>;

    async fn login(&self, form: LoginForm) -> Result<AuthGrant>;

    async fn profile(&self, token: &str) -> Result<PublicUser>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub has_face_id: bool,
    pub auth_token: Option<String>,
}

impl Session {
    fn from_user(user: PublicUser, auth_token: Option<String>) -> Self {
        Self {
            user_id: user.id,
            email: user.email,
            display_name: user.name,
            role: user.role,
            has_face_id: user.has_face_id,
            auth_token,
        }
    }

    pub fn user(&self) -> PublicUser {
        PublicUser {
            id: self.user_id.clone(),
            email: self.email.clone(),
            name: self.display_name.clone(),
            role: self.role,
            has_face_id: self.has_face_id,
        }
    }
}

impl From<AuthGrant> for Session {
    fn from(grant: AuthGrant) -> Self {
        Session::from_user(grant.user, Some(grant.token))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated(Session),
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    // Bumped by logout so an attempt that outlives it cannot sign back in.
    generation: u64,
}

pub struct SessionManager {
    auth: Arc<dyn Authenticator>,
    storage: Arc<dyn SessionStorage>,
    inner: Mutex<Inner>,
}

/// Resets the manager to `Anonymous` unless the attempt completed.
struct AttemptGuard<'a> {
    manager: &'a SessionManager,
    generation: u64,
    armed: bool,
}

impl AttemptGuard<'_> {
    /// Persists and publishes the session, unless a logout or another
    /// sign-in has superseded this attempt. Storage is only written while
    /// the state lock is held, so a concurrent `logout` always wins.
    fn complete(mut self, session: &Session) -> Result<()> {
        self.armed = false;
        let manager = self.manager;
        let mut inner = manager.lock();
        if inner.generation != self.generation {
            return Err(AuthError::SessionExpired("Signed out during authentication".into()));
        }
        if let Err(e) = manager.persist(session) {
            manager.discard_storage();
            inner.state = SessionState::Anonymous;
            return Err(e);
        }
        inner.state = SessionState::Authenticated(session.clone());
        Ok(())
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.manager.lock();
        if inner.generation == self.generation {
            inner.state = SessionState::Anonymous;
            tracing::debug!("Authentication attempt ended without a session");
        }
    }
}

impl SessionManager {
    pub fn new(auth: Arc<dyn Authenticator>, storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            auth,
            storage,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is plain data; a panic elsewhere cannot leave it half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn current(&self) -> Option<Session> {
        match &self.lock().state {
            SessionState::Authenticated(session) => Some(session.clone()),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current().is_some()
    }

    /// Loads the persisted session, if any. Unreadable data is discarded.
    pub fn restore(&self) -> Result<Option<Session>> {
        let mut inner = self.lock();
        if inner.state == SessionState::Authenticating {
            return Err(AuthError::AttemptInProgress);
        }
        let user = match self.storage.get(USER_KEY)? {
            Some(user) => user,
            None => return Ok(None),
        };
        let user: PublicUser = match serde_json::from_str(&user) {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("Discarding unreadable stored session: {}", e);
                self.clear_storage()?;
                return Ok(None);
            }
        };
        let token = self.storage.get(TOKEN_KEY)?;
        let session = Session::from_user(user, token);

        inner.state = SessionState::Authenticated(session.clone());
        tracing::debug!("Restored session for {}", session.email);
        Ok(Some(session))
    }

    pub async fn login(&self, form: LoginForm) -> Result<Session> {
        let auth = Arc::clone(&self.auth);
        self.attempt(async move { auth.login(form).await }).await
    }

    pub async fn signup(&self, form: SignupForm) -> Result<Session> {
        let auth = Arc::clone(&self.auth);
        self.attempt(async move { auth.signup(form).await }).await
    }

    pub fn logout(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.state = SessionState::Anonymous;
        self.clear_storage()?;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Re-checks the token with the authenticator. A rejected or expired
    /// token signs the user out and yields `SessionExpired`. If the session
    /// changed while the check was running, nothing is written and the
    /// result is `None`.
    pub async fn validate(&self) -> Result<Option<Session>> {
        let (session, generation) = {
            let inner = self.lock();
            match &inner.state {
                SessionState::Authenticated(session) => (session.clone(), inner.generation),
                _ => return Ok(None),
            }
        };
        let token = match &session.auth_token {
            Some(token) => token.clone(),
            None => return Ok(Some(session)),
        };

        match self.auth.profile(&token).await {
            Ok(user) => {
                let refreshed = Session::from_user(user, Some(token));
                let mut inner = self.lock();
                if inner.generation != generation || inner.state != SessionState::Authenticated(session) {
                    tracing::debug!("Session changed during validation; discarding refresh");
                    return Ok(None);
                }
                self.storage.set(USER_KEY, &encode_user(&refreshed)?)?;
                inner.state = SessionState::Authenticated(refreshed.clone());
                Ok(Some(refreshed))
            }
            Err(AuthError::SessionExpired(_)) | Err(AuthError::InvalidCredentials) => {
                let mut inner = self.lock();
                if inner.generation != generation {
                    return Ok(None);
                }
                inner.generation += 1;
                inner.state = SessionState::Anonymous;
                self.clear_storage()?;
                tracing::info!("Stored session is no longer valid; signed out");
                Err(AuthError::SessionExpired("Please sign in again".into()))
            }
            Err(e) => Err(e),
        }
    }

    async fn attempt<F>(&self, request: F) -> Result<Session>
    where
        F: Future<Output = Result<AuthGrant>>,
    {
        let guard = self.begin()?;
        let session = Session::from(request.await?);
        guard.complete(&session)?;

        tracing::info!("Signed in as {} ({})", session.email, session.role);
        Ok(session)
    }

    fn begin(&self) -> Result<AttemptGuard<'_>> {
        let mut inner = self.lock();
        let replacing = match inner.state {
            SessionState::Authenticating => return Err(AuthError::AttemptInProgress),
            SessionState::Authenticated(_) => true,
            SessionState::Anonymous => false,
        };
        // Signing in again drops the previous session first.
        if replacing {
            inner.generation += 1;
            inner.state = SessionState::Anonymous;
            self.clear_storage()?;
        }
        inner.state = SessionState::Authenticating;
        Ok(AttemptGuard { manager: self, generation: inner.generation, armed: true })
    }

    /// Token first, user last: `restore` keys off the user record, so a
    /// write that fails part way never yields a session.
    fn persist(&self, session: &Session) -> Result<()> {
        match &session.auth_token {
            Some(token) => self.storage.set(TOKEN_KEY, token)?,
            None => self.storage.remove(TOKEN_KEY)?,
        }
        self.storage.set(USER_KEY, &encode_user(session)?)
    }

    fn clear_storage(&self) -> Result<()> {
        self.storage.remove(USER_KEY)?;
        self.storage.remove(TOKEN_KEY)
    }

    fn discard_storage(&self) {
        if let Err(e) = self.clear_storage() {
            tracing::error!("Failed to clear partially written session: {}", e);
        }
    }
}

fn encode_user(session: &Session) -> Result<String> {
    serde_json::to_string(&session.user())
        .map_err(|e| AuthError::Storage(format!("Failed to encode session: {}", e)))
}
