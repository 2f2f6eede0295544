//! Identity gateway
//!
//! Entry point for sign-in, sign-out, session lookup and session-change
//! notification. The gateway is a thin layer over an [`IdentityBackend`]
//! handle injected at construction; it adds flow selection, the
//! unavailable-backend check, and the listener cancellation guarantees.

use crate::auth::backend::{IdentityBackend, SessionState};
use crate::auth::flow::{Environment, FlowMode};
use crate::auth::types::{AuthResult, Session, SignInMethod, SignInOutcome};
use crate::error::AuthError;
use crate::listener::{self, ListenerRegistration};
use async_stream::stream;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Stream of session states, starting with the current one
pub type SessionStream = Pin<Box<dyn Stream<Item = SessionState> + Send>>;

/// Identity gateway
///
/// Cheap to clone; clones share the backend handle.
#[derive(Clone)]
pub struct IdentityGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    backend: Option<Arc<dyn IdentityBackend>>,
    environment: Environment,
}

impl IdentityGateway {
    /// Create a gateway over the given backend
    ///
    /// # Example
    /// ```
    /// use record_sync::auth::{IdentityGateway, MemoryIdentity};
    /// use std::sync::Arc;
    ///
    /// let gateway = IdentityGateway::new(Arc::new(MemoryIdentity::new()));
    /// assert!(gateway.current_session().is_none());
    /// ```
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                backend: Some(backend),
                environment: Environment::default(),
            }),
        }
    }

    /// Create a gateway with no backend configured
    ///
    /// Every network-bound operation fails with [`AuthError::Unavailable`].
    pub fn unconfigured() -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                backend: None,
                environment: Environment::default(),
            }),
        }
    }

    /// Use `environment` for the interactive flow capability check
    pub fn with_environment(self, environment: Environment) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                backend: self.inner.backend.clone(),
                environment,
            }),
        }
    }

    /// The environment used for flow selection
    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    fn backend(&self) -> Result<&Arc<dyn IdentityBackend>, AuthError> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| AuthError::Unavailable("identity backend not initialized".to_string()))
    }

    /// Sign in
    ///
    /// Interactive sign-in runs inline on desktop environments and as a
    /// deferred redirect on mobile ones. A redirect yields
    /// [`SignInOutcome::Redirecting`]; collect the session with
    /// [`pending_redirect_result`](Self::pending_redirect_result) or through
    /// session-change notifications.
    ///
    /// # Example
    /// ```
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::auth::{IdentityGateway, MemoryIdentity, SignInMethod};
    /// use std::sync::Arc;
    ///
    /// let gateway = IdentityGateway::new(Arc::new(MemoryIdentity::new()));
    /// let outcome = gateway.sign_in(SignInMethod::Anonymous).await?;
    /// assert!(outcome.session().unwrap().is_anonymous);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn sign_in(&self, method: SignInMethod) -> Result<SignInOutcome, AuthError> {
        let backend = self.backend()?;

        let provider = match method {
            SignInMethod::Anonymous => {
                let result = backend.sign_in_anonymously().await?;
                return Ok(SignInOutcome::SignedIn(result));
            }
            SignInMethod::Interactive(provider) => provider,
        };

        let mode = self.inner.environment.flow_mode();
        tracing::debug!(
            provider = provider.provider_id(),
            scopes = ?provider.scopes(),
            ?mode,
            "starting interactive sign-in"
        );

        match mode {
            FlowMode::Popup => {
                let result = backend.sign_in_with_popup(&provider).await?;
                Ok(SignInOutcome::SignedIn(result))
            }
            FlowMode::Redirect => {
                backend.sign_in_with_redirect(&provider).await?;
                Ok(SignInOutcome::Redirecting)
            }
        }
    }

    /// Sign out the current session
    ///
    /// Idempotent: succeeds when no session is active.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.backend()?.sign_out().await
    }

    /// Get the current session
    ///
    /// Reads locally cached state only. Returns `None` when signed out or
    /// when no backend is configured.
    pub fn current_session(&self) -> Option<Arc<Session>> {
        self.inner.backend.as_ref()?.current_session()
    }

    /// Register a session-change handler
    ///
    /// `handler` runs once with the current state before this call returns,
    /// then once per transition (sign-in, sign-out, external expiry).
    /// After [`ListenerRegistration::remove`] returns the handler is never
    /// invoked again.
    ///
    /// # Example
    /// ```
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::auth::{IdentityGateway, MemoryIdentity};
    /// use std::sync::Arc;
    ///
    /// let gateway = IdentityGateway::new(Arc::new(MemoryIdentity::new()));
    /// let registration = gateway
    ///     .on_session_changed(|session| match session {
    ///         Some(s) => println!("signed in: {}", s.uid),
    ///         None => println!("signed out"),
    ///     })
    ///     .await?;
    /// registration.remove();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn on_session_changed<F>(&self, handler: F) -> Result<ListenerRegistration, AuthError>
    where
        F: FnMut(SessionState) + Send + 'static,
    {
        let backend = Arc::clone(self.backend()?);

        // Subscribe before reading the snapshot so no transition slips between
        let mut rx = backend.subscribe();
        let (registration, mut dispatcher, mut cancel_rx) = listener::register(handler);

        let mut last = backend.current_session();
        if !dispatcher.deliver(last.clone()) {
            return Ok(registration);
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    next = next_transition(&mut rx, backend.as_ref(), &last) => {
                        let Some(state) = next else {
                            break;
                        };
                        last = state.clone();
                        if !dispatcher.deliver(state) {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("session listener closed");
        });

        Ok(registration)
    }

    /// Subscribe to session changes as a stream
    ///
    /// The stream yields the current state first, then every transition.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::auth::{IdentityGateway, MemoryIdentity};
    /// use futures::StreamExt;
    /// use std::sync::Arc;
    ///
    /// let gateway = IdentityGateway::new(Arc::new(MemoryIdentity::new()));
    /// let mut stream = gateway.session_changes()?;
    ///
    /// while let Some(session) = stream.next().await {
    ///     match session {
    ///         Some(s) => println!("signed in: {}", s.uid),
    ///         None => println!("signed out"),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn session_changes(&self) -> Result<SessionStream, AuthError> {
        let backend = Arc::clone(self.backend()?);
        let mut rx = backend.subscribe();
        let initial = backend.current_session();

        Ok(Box::pin(stream! {
            let mut last = initial.clone();
            yield initial;

            while let Some(state) = next_transition(&mut rx, backend.as_ref(), &last).await {
                last = state.clone();
                yield state;
            }
        }))
    }

    /// Collect the result of a deferred (redirect) sign-in
    ///
    /// Resolves to the session once; afterwards, and when no redirect was
    /// pending, resolves to `None`.
    pub async fn pending_redirect_result(&self) -> Result<Option<AuthResult>, AuthError> {
        self.backend()?.get_redirect_result().await
    }
}

impl std::fmt::Debug for IdentityGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGateway")
            .field("configured", &self.inner.backend.is_some())
            .field("environment", &self.inner.environment)
            .finish()
    }
}

/// Wait for the next session transition
///
/// Repeats for the same principal (token refreshes, duplicate broadcasts) are
/// skipped. Returns `None` once the backend closes its channel.
async fn next_transition(
    rx: &mut broadcast::Receiver<SessionState>,
    backend: &dyn IdentityBackend,
    last: &SessionState,
) -> Option<SessionState> {
    loop {
        let state = match rx.recv().await {
            Ok(state) => state,
            Err(RecvError::Lagged(skipped)) => {
                tracing::trace!(skipped, "session listener lagged, resyncing");
                backend.current_session()
            }
            Err(RecvError::Closed) => return None,
        };

        if !Session::same_principal(last.as_ref(), state.as_ref()) {
            return Some(state);
        }
    }
}
