//! In-memory identity backend
//!
//! A scripted stand-in for the managed identity service. Useful for tests and
//! for running an application offline.

use crate::auth::backend::{IdentityBackend, SessionCell, SessionState};
use crate::auth::types::{AdditionalUserInfo, AuthProvider, AuthResult, Session};
use crate::error::AuthError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

/// What the simulated user does when an interactive flow is shown
#[derive(Debug, Clone)]
pub enum InteractiveOutcome {
    /// Complete the flow with a fresh provider account
    Approve,
    /// Complete the flow as this session
    ApproveAs(Session),
    /// Close the window
    Cancel,
    /// Provider reports an error
    Fail(AuthError),
}

/// In-memory identity backend
pub struct MemoryIdentity {
    session: SessionCell,
    state: Mutex<MemoryState>,
}

struct MemoryState {
    interactive: InteractiveOutcome,
    anonymous_enabled: bool,
    pending_redirect: Option<AuthProvider>,
}

impl MemoryIdentity {
    /// Create a backend that approves every interactive flow
    pub fn new() -> Self {
        Self {
            session: SessionCell::new(),
            state: Mutex::new(MemoryState {
                interactive: InteractiveOutcome::Approve,
                anonymous_enabled: true,
                pending_redirect: None,
            }),
        }
    }

    /// Script the next interactive flows
    pub fn set_interactive_outcome(&self, outcome: InteractiveOutcome) {
        self.lock().interactive = outcome;
    }

    /// Enable or disable anonymous sign-in (disabled reports `OPERATION_NOT_ALLOWED`)
    pub fn set_anonymous_enabled(&self, enabled: bool) {
        self.lock().anonymous_enabled = enabled;
    }

    /// Simulate the service expiring or revoking the current session
    pub fn expire_session(&self) {
        if self.session.clear() {
            tracing::debug!("session expired");
        }
    }

    /// Whether a redirect flow is waiting for its result
    pub fn has_pending_redirect(&self) -> bool {
        self.lock().pending_redirect.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run_interactive(&self, provider: &AuthProvider) -> Result<AuthResult, AuthError> {
        let outcome = self.lock().interactive.clone();

        let session = match outcome {
            InteractiveOutcome::Cancel => return Err(AuthError::Cancelled),
            InteractiveOutcome::Fail(err) => return Err(err),
            InteractiveOutcome::ApproveAs(session) => session,
            InteractiveOutcome::Approve => {
                Session::provider(uuid::Uuid::new_v4().simple().to_string(), provider.provider_id())
            }
        };

        let session = Arc::new(session);
        self.session.set(Some(Arc::clone(&session)));

        Ok(AuthResult {
            session,
            additional_user_info: Some(AdditionalUserInfo {
                provider_id: provider.provider_id().to_string(),
                is_new_user: false,
            }),
        })
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentity {
    async fn sign_in_with_popup(&self, provider: &AuthProvider) -> Result<AuthResult, AuthError> {
        self.run_interactive(provider)
    }

    async fn sign_in_with_redirect(&self, provider: &AuthProvider) -> Result<(), AuthError> {
        self.lock().pending_redirect = Some(provider.clone());
        Ok(())
    }

    async fn sign_in_anonymously(&self) -> Result<AuthResult, AuthError> {
        // Error-first: sign-in method disabled
        if !self.lock().anonymous_enabled {
            return Err(AuthError::from_error_code("OPERATION_NOT_ALLOWED"));
        }

        // An anonymous session is resumed rather than replaced
        if let Some(current) = self.session.get().filter(|s| s.is_anonymous) {
            return Ok(AuthResult {
                session: current,
                additional_user_info: Some(AdditionalUserInfo {
                    provider_id: crate::auth::types::ANONYMOUS_PROVIDER_ID.to_string(),
                    is_new_user: false,
                }),
            });
        }

        let session = Arc::new(Session::anonymous(uuid::Uuid::new_v4().simple().to_string()));
        self.session.set(Some(Arc::clone(&session)));

        Ok(AuthResult {
            session,
            additional_user_info: Some(AdditionalUserInfo {
                provider_id: crate::auth::types::ANONYMOUS_PROVIDER_ID.to_string(),
                is_new_user: true,
            }),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.clear();
        Ok(())
    }

    fn current_session(&self) -> SessionState {
        self.session.get()
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.session.subscribe()
    }

    async fn get_redirect_result(&self) -> Result<Option<AuthResult>, AuthError> {
        let Some(provider) = self.lock().pending_redirect.take() else {
            return Ok(None);
        };
        self.run_interactive(&provider).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_anonymous_session_is_resumed() {
        let backend = MemoryIdentity::new();

        let first = backend.sign_in_anonymously().await.unwrap();
        let second = backend.sign_in_anonymously().await.unwrap();

        assert_eq!(first.session.uid, second.session.uid);
        assert!(first.additional_user_info.unwrap().is_new_user);
        assert!(!second.additional_user_info.unwrap().is_new_user);
    }

    #[tokio::test]
    async fn test_approve_as_uses_given_session() {
        let backend = MemoryIdentity::new();
        let alice = Session::provider("alice", "google.com").with_email("alice@example.com");
        backend.set_interactive_outcome(InteractiveOutcome::ApproveAs(alice));

        let result = backend.sign_in_with_popup(&AuthProvider::Google).await.unwrap();
        assert_eq!(result.session.uid, "alice");
        assert_eq!(backend.current_session().unwrap().email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_failed_redirect_is_consumed() {
        let backend = MemoryIdentity::new();
        backend.set_interactive_outcome(InteractiveOutcome::Fail(AuthError::provider(
            "INVALID_IDP_RESPONSE",
            "rejected",
        )));

        backend.sign_in_with_redirect(&AuthProvider::Google).await.unwrap();
        assert!(backend.has_pending_redirect());

        assert!(backend.get_redirect_result().await.is_err());
        assert!(!backend.has_pending_redirect());
        assert!(backend.get_redirect_result().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_session_notifies() {
        let backend = MemoryIdentity::new();
        backend.sign_in_anonymously().await.unwrap();
        let mut rx = backend.subscribe();

        backend.expire_session();

        assert!(rx.recv().await.unwrap().is_none());
        assert!(backend.current_session().is_none());
    }
}
