//! Identity Toolkit REST backend
//!
//! # REST Reference
//! - `POST accounts:signUp` - anonymous account creation
//! - `POST accounts:signInWithIdp` - exchange a provider credential for a session
//! - `POST securetoken.googleapis.com/v1/token` - renew the ID token with the
//!   refresh token
//!
//! Interactive credential collection is delegated to a [`ProviderFlow`].
//! ID tokens live for an hour; they are renewed on demand by
//! [`IdentityBackend::id_token`] while the session itself stays put. The
//! session only ends when the refresh token is rejected.

use crate::auth::backend::{IdentityBackend, SessionCell, SessionState};
use crate::auth::flow::ProviderFlow;
use crate::auth::types::{AdditionalUserInfo, AuthProvider, AuthResult, Credential, Session, SessionMetadata};
use crate::error::{AuthError, SyncError};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Production Identity Toolkit endpoint
pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

/// Production secure token endpoint
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1";

/// Tokens this close to expiry are renewed before use (seconds)
const TOKEN_REFRESH_MARGIN: i64 = 60;

/// Identity backend speaking the Identity Toolkit REST API
pub struct RestIdentity {
    api_key: String,
    endpoint: String,
    token_endpoint: String,
    http_client: reqwest::Client,
    flow: Arc<dyn ProviderFlow>,
    session: SessionCell,
    pending_redirect: Mutex<Option<AuthProvider>>,
    /// Serializes refreshes so concurrent requests share one renewal
    refresh_lock: tokio::sync::Mutex<()>,
}

impl RestIdentity {
    /// Create a backend for the given API key
    ///
    /// # Example
    /// ```no_run
    /// # use record_sync::auth::ProviderFlow;
    /// # fn example(flow: std::sync::Arc<dyn ProviderFlow>) -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::auth::{IdentityGateway, RestIdentity};
    /// use std::sync::Arc;
    ///
    /// let backend = RestIdentity::new("YOUR_API_KEY", flow)?;
    /// let gateway = IdentityGateway::new(Arc::new(backend));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(api_key: impl Into<String>, flow: Arc<dyn ProviderFlow>) -> Result<Self, SyncError> {
        let api_key = api_key.into();

        // Validate API key (error case first)
        if api_key.is_empty() {
            return Err(SyncError::config("API key not configured"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            http_client,
            flow,
            session: SessionCell::new(),
            pending_redirect: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Point the backend at another endpoint (e.g. the local auth emulator)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Point token renewal at another endpoint
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Get the API key for this backend
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn url(&self, method: &str) -> String {
        format!("{}/accounts:{}?key={}", self.endpoint, method, self.api_key)
    }

    /// POST to an Identity Toolkit method and decode the session response
    async fn call(&self, method: &str, body: serde_json::Value) -> Result<SignInResponse, AuthError> {
        let request = self.http_client.post(self.url(method)).json(&body);
        decode_response(request).await
    }

    /// Renew the ID token of `session` with its refresh token
    ///
    /// A rejected refresh token ends the session; transport failures leave it
    /// in place.
    async fn refresh(&self, session: &Session) -> Result<Option<Arc<Session>>, AuthError> {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            self.session.clear();
            return Err(AuthError::from_error_code("TOKEN_EXPIRED"));
        };

        let request = self
            .http_client
            .post(format!("{}/token?key={}", self.token_endpoint, self.api_key))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]);

        match decode_response::<RefreshResponse>(request).await {
            Ok(response) => {
                let renewed = Arc::new(response.renew(session));
                // Signed out while the request was in flight
                if !self.session.replace_tokens(Arc::clone(&renewed)) {
                    return Ok(None);
                }
                tracing::debug!(uid = %session.uid, "id token refreshed");
                Ok(Some(renewed))
            }
            Err(err) => {
                if refresh_rejected(&err) {
                    self.session.clear();
                }
                Err(err)
            }
        }
    }

    /// Exchange a provider credential for a session
    async fn sign_in_with_credential(&self, credential: Credential) -> Result<AuthResult, AuthError> {
        // Error-first: validate at least one token provided
        if !credential.has_token() {
            return Err(AuthError::provider(
                "INVALID_IDP_RESPONSE",
                "Credential requires id_token or access_token",
            ));
        }

        let body = serde_json::json!({
            "postBody": idp_post_body(&credential),
            "requestUri": "http://localhost",
            "returnSecureToken": true,
            "returnIdpCredential": true
        });

        let response = self.call("signInWithIdp", body).await?;
        let is_new_user = response.is_new_user.unwrap_or(false);
        let session = Arc::new(response.into_session(&credential.provider_id));

        // Update current session
        self.session.set(Some(Arc::clone(&session)));

        Ok(AuthResult {
            session,
            additional_user_info: Some(AdditionalUserInfo {
                provider_id: credential.provider_id,
                is_new_user,
            }),
        })
    }

    fn take_pending_redirect(&self) -> Option<AuthProvider> {
        self.pending_redirect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl IdentityBackend for RestIdentity {
    async fn sign_in_with_popup(&self, provider: &AuthProvider) -> Result<AuthResult, AuthError> {
        let credential = self.flow.obtain_credential(provider).await?;
        self.sign_in_with_credential(credential).await
    }

    async fn sign_in_with_redirect(&self, provider: &AuthProvider) -> Result<(), AuthError> {
        *self
            .pending_redirect
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(provider.clone());
        Ok(())
    }

    async fn sign_in_anonymously(&self) -> Result<AuthResult, AuthError> {
        // signUp with no email/password creates an anonymous user
        let response = self.call("signUp", serde_json::json!({ "returnSecureToken": true })).await?;
        let session = Arc::new(response.into_session(crate::auth::types::ANONYMOUS_PROVIDER_ID));

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

    async fn id_token(&self) -> Result<Option<String>, AuthError> {
        let Some(session) = self.session.get() else {
            return Ok(None);
        };
        if !needs_refresh(&session) {
            return Ok(session.id_token.clone());
        }

        let _refreshing = self.refresh_lock.lock().await;

        // Another caller may have renewed it while we waited
        let Some(session) = self.session.get() else {
            return Ok(None);
        };
        if !needs_refresh(&session) {
            return Ok(session.id_token.clone());
        }

        let renewed = self.refresh(&session).await?;
        Ok(renewed.and_then(|session| session.id_token.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.session.subscribe()
    }

    async fn get_redirect_result(&self) -> Result<Option<AuthResult>, AuthError> {
        let Some(provider) = self.take_pending_redirect() else {
            return Ok(None);
        };

        let credential = self.flow.obtain_credential(&provider).await?;
        self.sign_in_with_credential(credential).await.map(Some)
    }
}

impl std::fmt::Debug for RestIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestIdentity")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Send a request and decode its JSON answer, mapping error bodies to codes
async fn decode_response<T: serde::de::DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, AuthError> {
    let response = request
        .send()
        .await
        .map_err(|e| AuthError::provider("NETWORK_REQUEST_FAILED", e.to_string()))?;

    // Handle error responses first
    if !response.status().is_success() {
        let error_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuthError::provider("NETWORK_REQUEST_FAILED", e.to_string()))?;
        let error_message = error_body["error"]["message"].as_str().unwrap_or("UNKNOWN_ERROR");
        return Err(AuthError::from_error_code(error_message));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AuthError::provider("INVALID_RESPONSE", e.to_string()))
}

fn needs_refresh(session: &Session) -> bool {
    match (&session.id_token, session.token_expiration) {
        (Some(_), Some(expires_at)) => chrono::Utc::now().timestamp() + TOKEN_REFRESH_MARGIN >= expires_at,
        _ => false,
    }
}

/// Refresh answers that mean the session is gone for good
fn refresh_rejected(err: &AuthError) -> bool {
    matches!(
        err,
        AuthError::Provider { code, .. } if matches!(
            code.as_str(),
            "TOKEN_EXPIRED" | "USER_DISABLED" | "USER_NOT_FOUND" | "INVALID_REFRESH_TOKEN"
        )
    )
}

/// Form-encoded `postBody` for `signInWithIdp`
fn idp_post_body(credential: &Credential) -> String {
    let mut post_body = format!("providerId={}", urlencode(&credential.provider_id));
    if let Some(id_token) = &credential.id_token {
        post_body.push_str(&format!("&id_token={}", urlencode(id_token)));
    }
    if let Some(access_token) = &credential.access_token {
        post_body.push_str(&format!("&access_token={}", urlencode(access_token)));
    }
    if let Some(nonce) = &credential.raw_nonce {
        post_body.push_str(&format!("&nonce={}", urlencode(nonce)));
    }
    post_body
}

fn urlencode(value: &str) -> String {
    reqwest::Url::parse_with_params("http://localhost", &[("v", value)])
        .ok()
        .and_then(|url| url.query().map(|q| q.trim_start_matches("v=").to_string()))
        .unwrap_or_else(|| value.to_string())
}

/// Identity Toolkit session response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
    is_new_user: Option<bool>,
}

/// Secure token refresh response (snake_case, unlike Identity Toolkit)
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

impl RefreshResponse {
    fn renew(self, session: &Session) -> Session {
        Session {
            id_token: Some(self.id_token),
            refresh_token: Some(self.refresh_token),
            token_expiration: Some(chrono::Utc::now().timestamp() + token_lifetime(self.expires_in.as_deref())),
            ..session.clone()
        }
    }
}

/// Token lifetime in seconds (`expiresIn` is a string, default 1 hour)
fn token_lifetime(expires_in: Option<&str>) -> i64 {
    expires_in.and_then(|s| s.parse::<i64>().ok()).unwrap_or(3600)
}

impl SignInResponse {
    fn into_session(self, provider_id: &str) -> Session {
        let now = chrono::Utc::now();
        let lifetime = token_lifetime(self.expires_in.as_deref());

        Session {
            uid: self.local_id,
            display_name: self.display_name,
            email: self.email,
            is_anonymous: provider_id == crate::auth::types::ANONYMOUS_PROVIDER_ID,
            provider_id: provider_id.to_string(),
            metadata: SessionMetadata {
                creation_timestamp: now.timestamp_millis(),
                last_sign_in_timestamp: now.timestamp_millis(),
            },
            id_token: Some(self.id_token),
            refresh_token: Some(self.refresh_token),
            token_expiration: Some(now.timestamp() + lifetime),
        }
    }
}
