//! Identity backend contract
//!
//! The identity gateway talks to its backend only through this trait, so a
//! REST client, an in-memory fake, or a native SDK binding can sit behind it.

use crate::auth::types::{AuthProvider, AuthResult, Session};
use crate::error::AuthError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Session state as broadcast to subscribers
pub type SessionState = Option<Arc<Session>>;

/// Managed authentication backend
///
/// Backends own the session state: every successful sign-in, sign-out, or
/// external expiry updates [`current_session`](Self::current_session) and is
/// broadcast to [`subscribe`](Self::subscribe) receivers.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Inline interactive sign-in; resolves once the user finishes
    async fn sign_in_with_popup(&self, provider: &AuthProvider) -> Result<AuthResult, AuthError>;

    /// Start a deferred interactive sign-in
    ///
    /// Returns once the flow is started; the result is collected with
    /// [`get_redirect_result`](Self::get_redirect_result).
    async fn sign_in_with_redirect(&self, provider: &AuthProvider) -> Result<(), AuthError>;

    /// Create or resume an anonymous account
    async fn sign_in_anonymously(&self) -> Result<AuthResult, AuthError>;

    /// Drop the current session; succeeds when none is active
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Locally cached session; never touches the network
    fn current_session(&self) -> SessionState;

    /// ID token of the current session for authenticating backend requests
    ///
    /// Backends that can renew tokens do so here without a session-change
    /// notification. `Ok(None)` when no session is active or the session
    /// carries no token.
    async fn id_token(&self) -> Result<Option<String>, AuthError> {
        Ok(self
            .current_session()
            .and_then(|session| session.fresh_id_token().map(str::to_string)))
    }

    /// Receive every session transition
    fn subscribe(&self) -> broadcast::Receiver<SessionState>;

    /// Complete a deferred sign-in
    ///
    /// Yields the session once; later calls, and calls with nothing pending,
    /// yield `None`.
    async fn get_redirect_result(&self) -> Result<Option<AuthResult>, AuthError>;
}

/// Session state holder for backend implementations
///
/// Keeps the cached session and broadcasts every change. Shared by the
/// bundled backends; custom backends may use it too.
pub struct SessionCell {
    current: std::sync::RwLock<SessionState>,
    state_tx: broadcast::Sender<SessionState>,
}

impl SessionCell {
    /// Create an empty cell (capacity: 16 pending notifications per receiver)
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(16);
        Self {
            current: std::sync::RwLock::new(None),
            state_tx,
        }
    }

    /// Cached session
    pub fn get(&self) -> SessionState {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the session and notify subscribers
    pub fn set(&self, session: SessionState) {
        {
            let mut current = match self.current.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *current = session.clone();
        }

        // Broadcast state change (ignore error if no listeners)
        let _ = self.state_tx.send(session);
    }

    /// Clear the session if one is set; returns whether anything changed
    pub fn clear(&self) -> bool {
        if self.get().is_none() {
            return false;
        }
        self.set(None);
        true
    }

    /// Swap in renewed tokens for the same principal without notifying
    ///
    /// Returns `false` (and changes nothing) when the cached session belongs
    /// to someone else or was cleared meanwhile.
    pub fn replace_tokens(&self, session: Arc<Session>) -> bool {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if current.is_none() || !Session::same_principal(current.as_ref(), Some(&session)) {
            return false;
        }
        *current = Some(session);
        true
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.state_tx.subscribe()
    }
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}
