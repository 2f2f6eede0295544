//! Interactive sign-in flow selection
//!
//! The gateway picks between an inline popup flow and a deferred redirect flow
//! from a capability check on the host environment. Obtaining the provider
//! credential itself is delegated to a [`ProviderFlow`] implementation.

use crate::auth::types::{AuthProvider, Credential};
use crate::error::AuthError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

static MOBILE_USER_AGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini")
        .expect("mobile user agent pattern is valid")
});

/// How an interactive flow completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowMode {
    /// Completes within the sign-in call
    Popup,
    /// Completes later, across a reload; see `pending_redirect_result`
    Redirect,
}

/// Device class derived from the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Desktop browsers, native desktop apps, CLIs
    Desktop,
    /// Phones and tablets
    Mobile,
}

/// Host environment facts used for the capability check
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// User agent of the embedding client, if any
    pub user_agent: Option<String>,
}

impl Environment {
    /// Environment with a known user agent
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: Some(user_agent.into()),
        }
    }

    /// Classify the device
    ///
    /// Without a user agent the host is treated as a desktop.
    pub fn device_class(&self) -> DeviceClass {
        match &self.user_agent {
            Some(ua) if MOBILE_USER_AGENT.is_match(ua) => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        }
    }

    /// Pick the flow mode for interactive sign-in
    pub fn flow_mode(&self) -> FlowMode {
        match self.device_class() {
            DeviceClass::Mobile => FlowMode::Redirect,
            DeviceClass::Desktop => FlowMode::Popup,
        }
    }
}

/// Obtains a provider credential from the user
///
/// Implementations open a browser window, show a device code, hand off to a
/// native SDK, and so on, asking for [`AuthProvider::scopes`] in addition to
/// the provider's defaults. Return [`AuthError::Cancelled`] when the user
/// aborts.
#[async_trait]
pub trait ProviderFlow: Send + Sync {
    /// Run the provider's interactive flow and return its credential
    async fn obtain_credential(&self, provider: &AuthProvider) -> Result<Credential, AuthError>;
}
