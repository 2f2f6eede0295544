//! Error types
//!
//! Provides a typed error hierarchy for the identity and record gateways.
//!
//! # Design
//! Uses thiserror for ergonomic error definitions. Each gateway returns its own
//! error enum so callers can branch on the kind; both convert into
//! [`SyncError`] via `From` for code that mixes the two.

use thiserror::Error;

/// Top-level facade error type
///
/// Wraps the gateway-specific error types into a unified type.
///
/// # Example
/// ```
/// use record_sync::{SyncError, AuthError};
///
/// let err: SyncError = AuthError::Cancelled.into();
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum SyncError {
    /// Identity gateway errors
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Record store gateway errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Identity gateway errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No identity backend is configured for this gateway
    #[error("Auth backend unavailable: {0}")]
    Unavailable(String),

    /// The user aborted an interactive sign-in flow
    #[error("Sign-in cancelled by user")]
    Cancelled,

    /// Failure reported by the identity provider
    #[error("Auth provider error [{code}]: {message}")]
    Provider {
        /// Provider error code (e.g. `OPERATION_NOT_ALLOWED`)
        code: String,
        /// Human readable detail
        message: String,
    },
}

/// Record store gateway errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Local precondition failure; the backend was never called
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No database backend is configured for this gateway
    #[error("Store backend unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected or failed a write
    #[error("Write failed: {0}")]
    WriteFailed(#[source] BackendError),

    /// Backend failed a read or a live subscription
    #[error("Read failed: {0}")]
    ReadFailed(#[source] BackendError),

    /// Backend failed a delete
    #[error("Delete failed: {0}")]
    DeleteFailed(#[source] BackendError),
}

/// Transport-level failure reported by a backend implementation
///
/// Gateways never surface this directly; they wrap it in the
/// operation-specific [`StoreError`] variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Error body returned by the backend
        message: String,
    },

    /// Request never completed (DNS, TLS, timeout, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Backend refused the operation (permission rules, revoked auth)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Live channel was closed by the backend
    #[error("Channel closed")]
    Closed,

    /// Backend is not reachable or not set up
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl SyncError {
    /// Create a configuration error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if the caller may reasonably retry the operation
    ///
    /// This crate never retries on its own; the caller owns retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(
                StoreError::WriteFailed(cause)
                | StoreError::ReadFailed(cause)
                | StoreError::DeleteFailed(cause),
            ) => cause.is_transient(),
            Self::Auth(AuthError::Provider { code, .. }) => {
                matches!(code.as_str(), "TOO_MANY_ATTEMPTS_TRY_LATER" | "NETWORK_REQUEST_FAILED")
            }
            _ => false,
        }
    }

    /// Check if error indicates authentication is required
    pub fn requires_auth(&self) -> bool {
        match self {
            Self::Store(
                StoreError::WriteFailed(cause)
                | StoreError::ReadFailed(cause)
                | StoreError::DeleteFailed(cause),
            ) => matches!(cause, BackendError::Http { status: 401, .. } | BackendError::Rejected(_)),
            Self::Auth(AuthError::Provider { code, .. }) => {
                matches!(
                    code.as_str(),
                    "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_DISABLED" | "USER_NOT_FOUND" | "INVALID_REFRESH_TOKEN"
                )
            }
            _ => false,
        }
    }
}

impl BackendError {
    /// Whether the failure is likely to go away on its own
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Closed => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::Decode(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl AuthError {
    /// Create from an Identity Toolkit REST error code or a provider flow code
    ///
    /// Codes may carry a trailing detail (`"OPERATION_NOT_ALLOWED : disabled"`),
    /// which is kept as the message.
    pub fn from_error_code(raw: &str) -> Self {
        let (code, detail) = match raw.split_once(" : ") {
            Some((code, detail)) => (code.trim(), detail.trim()),
            None => (raw.trim(), ""),
        };

        match code {
            "popup-closed-by-user" | "cancelled-popup-request" | "user-cancelled"
            | "USER_CANCELLED" | "access_denied" => Self::Cancelled,
            _ => {
                let message = match (detail.is_empty(), describe_code(code)) {
                    (false, _) => detail.to_string(),
                    (true, Some(text)) => text.to_string(),
                    (true, None) => "Unknown provider error".to_string(),
                };
                Self::Provider {
                    code: code.to_string(),
                    message,
                }
            }
        }
    }

    /// Build a provider error from a code and message
    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
        }
    }
}

fn describe_code(code: &str) -> Option<&'static str> {
    let text = match code {
        "OPERATION_NOT_ALLOWED" => "Sign-in method is disabled for this project",
        "ADMIN_ONLY_OPERATION" => "Anonymous sign-up is restricted to admins",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many requests, try again later",
        "INVALID_IDP_RESPONSE" => "Provider credential was rejected",
        "INVALID_ID_TOKEN" => "Session token is invalid",
        "TOKEN_EXPIRED" => "Session token expired",
        "USER_DISABLED" => "User account disabled",
        "USER_NOT_FOUND" => "User account no longer exists",
        "INVALID_REFRESH_TOKEN" => "Refresh token is invalid",
        "INVALID_API_KEY" => "Invalid API key",
        "FEDERATED_USER_ID_ALREADY_LINKED" => "Provider account already linked",
        "NETWORK_REQUEST_FAILED" => "Network request failed",
        _ => return None,
    };
    Some(text)
}
