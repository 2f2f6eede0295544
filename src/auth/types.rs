//! Authentication types
//!
//! Sessions, sign-in methods, provider descriptions and credentials shared by
//! the identity gateway and its backends.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Timestamp when the account was created (Unix timestamp in milliseconds)
    pub creation_timestamp: i64,

    /// Timestamp of last sign-in (Unix timestamp in milliseconds)
    pub last_sign_in_timestamp: i64,
}

/// An authenticated principal
///
/// Created on successful sign-in and dropped on sign-out or external expiry.
/// The `uid` doubles as the owner identifier for record store calls. Use
/// `Arc<Session>` for shared ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable owner identifier
    pub uid: String,

    /// Display name (if available)
    pub display_name: Option<String>,

    /// Email address (if available)
    pub email: Option<String>,

    /// Whether the session was created by anonymous sign-in
    pub is_anonymous: bool,

    /// Provider that backs the identity (`"anonymous"`, `"google.com"`, ...)
    pub provider_id: String,

    /// Session metadata
    pub metadata: SessionMetadata,

    /// ID token (JWT) - internal use
    #[serde(skip)]
    pub(crate) id_token: Option<String>,

    /// Refresh token - internal use
    #[serde(skip)]
    pub(crate) refresh_token: Option<String>,

    /// Token expiration timestamp (seconds since epoch) - internal use
    #[serde(skip)]
    pub(crate) token_expiration: Option<i64>,
}

impl Session {
    /// Create a session for an anonymous principal
    pub fn anonymous(uid: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            uid: uid.into(),
            display_name: None,
            email: None,
            is_anonymous: true,
            provider_id: ANONYMOUS_PROVIDER_ID.to_string(),
            metadata: SessionMetadata {
                creation_timestamp: now,
                last_sign_in_timestamp: now,
            },
            id_token: None,
            refresh_token: None,
            token_expiration: None,
        }
    }

    /// Create a session backed by an identity provider
    pub fn provider(uid: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            is_anonymous: false,
            provider_id: provider_id.into(),
            ..Self::anonymous(uid)
        }
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the email address
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// The owner identifier used to scope records
    pub fn owner_id(&self) -> &str {
        &self.uid
    }

    /// ID token for backend requests, if it has not expired
    pub(crate) fn fresh_id_token(&self) -> Option<&str> {
        let token = self.id_token.as_deref()?;
        match self.token_expiration {
            Some(expires_at) if chrono::Utc::now().timestamp() >= expires_at => None,
            _ => Some(token),
        }
    }

    /// Whether two sessions describe the same signed-in principal
    pub(crate) fn same_principal(a: Option<&Arc<Session>>, b: Option<&Arc<Session>>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => a.uid == b.uid && a.is_anonymous == b.is_anonymous,
            _ => false,
        }
    }
}

/// Provider ID reported for anonymous sessions
pub const ANONYMOUS_PROVIDER_ID: &str = "anonymous";

/// Interactive identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// Google Sign-In
    Google,
    /// Generic OAuth2/OIDC provider (e.g. "apple.com", "github.com")
    OAuth {
        /// Provider ID
        provider_id: String,
        /// Extra scopes to request
        scopes: Vec<String>,
    },
}

impl AuthProvider {
    /// Get the provider ID
    pub fn provider_id(&self) -> &str {
        match self {
            AuthProvider::Google => "google.com",
            AuthProvider::OAuth { provider_id, .. } => provider_id,
        }
    }

    /// Extra scopes a [`ProviderFlow`](crate::auth::ProviderFlow) should
    /// request on top of the provider's defaults
    pub fn scopes(&self) -> &[String] {
        match self {
            AuthProvider::Google => &[],
            AuthProvider::OAuth { scopes, .. } => scopes,
        }
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        AuthProvider::Google
    }
}

/// How to sign in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInMethod {
    /// Interactive provider flow (popup or redirect, chosen by the gateway)
    Interactive(AuthProvider),
    /// Anonymous account
    Anonymous,
}

/// Provider credential produced by an interactive flow
///
/// Exchanged with the identity backend for a session.
#[derive(Debug, Clone)]
pub struct Credential {
    /// Provider ID this credential belongs to
    pub provider_id: String,
    /// OIDC ID token
    pub id_token: Option<String>,
    /// OAuth access token
    pub access_token: Option<String>,
    /// Raw nonce used for the ID token
    pub raw_nonce: Option<String>,
}

impl Credential {
    /// Check that the credential carries at least one token
    pub fn has_token(&self) -> bool {
        self.id_token.is_some() || self.access_token.is_some()
    }
}

/// Result of a completed sign-in
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// The signed-in session
    pub session: Arc<Session>,

    /// Additional user info from the provider
    pub additional_user_info: Option<AdditionalUserInfo>,
}

/// Additional user info
#[derive(Debug, Clone)]
pub struct AdditionalUserInfo {
    /// Provider ID
    pub provider_id: String,

    /// Whether this is a new user
    pub is_new_user: bool,
}

/// Outcome of [`IdentityGateway::sign_in`](crate::auth::IdentityGateway::sign_in)
#[derive(Debug, Clone)]
pub enum SignInOutcome {
    /// Flow completed inline
    SignedIn(AuthResult),
    /// Flow deferred; the session arrives through
    /// `pending_redirect_result` and session-change notifications
    Redirecting,
}

impl SignInOutcome {
    /// The session, if the flow already completed
    pub fn session(&self) -> Option<&Arc<Session>> {
        match self {
            SignInOutcome::SignedIn(result) => Some(&result.session),
            SignInOutcome::Redirecting => None,
        }
    }
}
