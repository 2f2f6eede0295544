//! Realtime Database REST backend
//!
//! # REST Reference
//! - `POST {path}.json` - push a child, answers `{"name": "<generated id>"}`
//! - `GET {path}.json` - read a location
//! - `PATCH {path}.json` - merge children
//! - `DELETE {path}.json` - remove a location
//! - `GET {path}.json` with `Accept: text/event-stream` - live stream
//!
//! Requests carry `?auth=<id token>` when an identity backend is attached and
//! a session is signed in. The token comes from
//! [`IdentityBackend::id_token`], which renews it once it runs out.

use super::backend::{DatabaseBackend, SnapshotFeed, SnapshotStream};
use super::event_stream::{EventStreamParser, StreamEvent};
use super::path::DatabasePath;
use super::snapshot::DataSnapshot;
use super::tree;
use crate::auth::backend::IdentityBackend;
use crate::error::{AuthError, BackendError, SyncError};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to one-shot requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Database backend speaking the Realtime Database REST API
#[derive(Clone)]
pub struct RestDatabase {
    base_url: reqwest::Url,
    http_client: reqwest::Client,
    request_timeout: Duration,
    auth: Option<Arc<dyn IdentityBackend>>,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl RestDatabase {
    /// Create a backend for the database at `database_url`
    ///
    /// # Example
    /// ```no_run
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::database::{RecordStore, RestDatabase};
    /// use std::sync::Arc;
    ///
    /// let backend = RestDatabase::new("https://my-project-default-rtdb.firebaseio.com")?;
    /// let store = RecordStore::new(Arc::new(backend));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(database_url: &str) -> Result<Self, SyncError> {
        // Validate URL (error case first)
        if database_url.trim().is_empty() {
            return Err(SyncError::config("database URL not configured"));
        }

        let base_url = reqwest::Url::parse(database_url.trim())
            .map_err(|e| SyncError::config(format!("Invalid database URL '{}': {}", database_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(SyncError::config(format!(
                "Invalid database URL '{}': expected an http(s) URL",
                database_url
            )));
        }

        // No client-wide timeout: it would cut live streams
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SyncError::config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            http_client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth: None,
        })
    }

    /// Authenticate requests with the session of `identity`
    pub fn with_auth(mut self, identity: Arc<dyn IdentityBackend>) -> Self {
        self.auth = Some(identity);
        self
    }

    /// Override the timeout of one-shot requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Database URL this backend talks to
    pub fn database_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `{base}/{segments...}.json` with the auth token attached
    async fn url(&self, path: &DatabasePath) -> Result<reqwest::Url, BackendError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| BackendError::Unavailable("database URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{}.json", last));
                }
                None => {
                    segments.push(".json");
                }
            }
        }

        if let Some(auth) = &self.auth {
            if let Some(token) = auth.id_token().await.map_err(token_error)? {
                url.query_pairs_mut().append_pair("auth", &token);
            }
        }
        Ok(url)
    }

    /// Send a one-shot request and decode the JSON answer
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = request.timeout(self.request_timeout).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<Value>().await?)
    }
}

/// A token that cannot be obtained fails the request before it is sent
fn token_error(err: AuthError) -> BackendError {
    match err {
        AuthError::Provider { code, message } if code == "NETWORK_REQUEST_FAILED" => BackendError::Network(message),
        other => BackendError::Rejected(format!("auth token unavailable: {}", other)),
    }
}

/// Turn non-success answers into errors
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    // Error bodies look like {"error": "Permission denied"}
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(body);

    if status == reqwest::StatusCode::FORBIDDEN {
        return Err(BackendError::Rejected(message));
    }
    Err(BackendError::Http {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DatabaseBackend for RestDatabase {
    async fn push(&self, path: &DatabasePath, value: Value) -> Result<String, BackendError> {
        let request = self.http_client.post(self.url(path).await?).json(&value);
        let body = self.send(request).await?;
        let PushResponse { name } = serde_json::from_value(body)?;
        Ok(name)
    }

    async fn get(&self, path: &DatabasePath) -> Result<DataSnapshot, BackendError> {
        let request = self.http_client.get(self.url(path).await?);
        let value = self.send(request).await?;
        Ok(DataSnapshot::new(path.key().map(str::to_string), value))
    }

    async fn update(&self, path: &DatabasePath, fields: Map<String, Value>) -> Result<(), BackendError> {
        let request = self.http_client.patch(self.url(path).await?).json(&fields);
        self.send(request).await?;
        Ok(())
    }

    async fn remove(&self, path: &DatabasePath) -> Result<(), BackendError> {
        let request = self.http_client.delete(self.url(path).await?);
        self.send(request).await?;
        Ok(())
    }

    async fn subscribe(&self, path: &DatabasePath) -> Result<SnapshotStream, BackendError> {
        let response = self
            .http_client
            .get(self.url(path).await?)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;

        let (feed, stream) = SnapshotStream::channel();
        tokio::spawn(pump_events(response, path.key().map(str::to_string), feed));

        tracing::debug!(%path, "event stream opened");
        Ok(stream)
    }
}

/// Apply stream events to a local copy and forward full snapshots
async fn pump_events(response: reqwest::Response, key: Option<String>, feed: SnapshotFeed) {
    let mut body = response.bytes_stream();
    let mut parser = EventStreamParser::new();
    let mut cache = Value::Null;
    let mut established = false;
    let mut last_sent: Option<Value> = None;

    let failure = loop {
        let chunk = tokio::select! {
            _ = feed.cancelled() => break None,
            chunk = body.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => break Some(BackendError::from(e)),
            None => break Some(BackendError::Closed),
        };

        match apply_events(&mut parser, &mut cache, &bytes) {
            Ok(saw_data) => established |= saw_data,
            Err(e) => break Some(e),
        }

        // Nothing is sent before the first data event
        if !established || last_sent.as_ref() == Some(&cache) {
            continue;
        }
        last_sent = Some(cache.clone());
        if !feed.send(Ok(DataSnapshot::new(key.clone(), cache.clone()))) {
            break None;
        }
    };

    if let Some(error) = failure {
        feed.send(Err(error));
    }
    tracing::debug!("event stream closed");
}

/// Feed `bytes` through the parser and apply the completed events
///
/// Returns whether any data event was applied.
fn apply_events(parser: &mut EventStreamParser, cache: &mut Value, bytes: &[u8]) -> Result<bool, BackendError> {
    let mut saw_data = false;

    for raw in parser.push(bytes) {
        match StreamEvent::decode(&raw)? {
            Some(StreamEvent::Put { path, data }) => {
                tree::set_at(cache, path.segments(), data);
                saw_data = true;
            }
            Some(StreamEvent::Patch { path, data }) => {
                tree::update_at(cache, path.segments(), data);
                saw_data = true;
            }
            Some(StreamEvent::Cancel(reason)) => {
                return Err(BackendError::Rejected(format!("listen cancelled: {}", reason)));
            }
            Some(StreamEvent::AuthRevoked(reason)) => {
                return Err(BackendError::Rejected(format!("auth revoked: {}", reason)));
            }
            Some(StreamEvent::KeepAlive) | None => {}
        }
    }
    Ok(saw_data)
}

impl std::fmt::Debug for RestDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDatabase")
            .field("database_url", &self.base_url.as_str())
            .field("request_timeout", &self.request_timeout)
            .field("authenticated", &self.auth.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::SessionState;
    use crate::auth::types::{AuthProvider, AuthResult, Session};
    use crate::error::AuthError;
    use serde_json::json;
    use tokio::sync::broadcast;

    fn db() -> RestDatabase {
        RestDatabase::new("https://demo-default-rtdb.firebaseio.com/").unwrap()
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(RestDatabase::new(""), Err(SyncError::Config(_))));
        assert!(matches!(RestDatabase::new("not a url"), Err(SyncError::Config(_))));
        assert!(matches!(RestDatabase::new("ftp://example.com"), Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn test_url_building() {
        let db = db();
        let url = db.url(&DatabasePath::new("users/alice/records")).await.unwrap();
        assert_eq!(url.as_str(), "https://demo-default-rtdb.firebaseio.com/users/alice/records.json");

        let root = db.url(&DatabasePath::root()).await.unwrap();
        assert_eq!(root.as_str(), "https://demo-default-rtdb.firebaseio.com/.json");
    }

    #[tokio::test]
    async fn test_url_keeps_namespace_query() {
        let db = RestDatabase::new("http://127.0.0.1:9000?ns=demo").unwrap();
        let url = db.url(&DatabasePath::new("users/a")).await.unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/users/a.json?ns=demo");
    }

    struct SignedIn(SessionState);

    #[async_trait]
    impl IdentityBackend for SignedIn {
        async fn sign_in_with_popup(&self, _: &AuthProvider) -> Result<AuthResult, AuthError> {
            Err(AuthError::Cancelled)
        }
        async fn sign_in_with_redirect(&self, _: &AuthProvider) -> Result<(), AuthError> {
            Ok(())
        }
        async fn sign_in_anonymously(&self) -> Result<AuthResult, AuthError> {
            Err(AuthError::Cancelled)
        }
        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
        fn current_session(&self) -> SessionState {
            self.0.clone()
        }
        fn subscribe(&self) -> broadcast::Receiver<SessionState> {
            broadcast::channel(1).1
        }
        async fn get_redirect_result(&self) -> Result<Option<AuthResult>, AuthError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_url_carries_id_token() {
        let mut session = Session::anonymous("u1");
        session.id_token = Some("tok en".to_string());
        let db = db().with_auth(Arc::new(SignedIn(Some(Arc::new(session)))));

        let url = db.url(&DatabasePath::new("users/u1")).await.unwrap();
        assert_eq!(url.query(), Some("auth=tok+en"));

        let anonymous = db.with_auth(Arc::new(SignedIn(None)));
        assert_eq!(anonymous.url(&DatabasePath::new("users/u1")).await.unwrap().query(), None);
    }

    /// Identity whose tokens always need renewing
    struct Renewing(Result<Option<String>, AuthError>);

    #[async_trait]
    impl IdentityBackend for Renewing {
        async fn sign_in_with_popup(&self, _: &AuthProvider) -> Result<AuthResult, AuthError> {
            Err(AuthError::Cancelled)
        }
        async fn sign_in_with_redirect(&self, _: &AuthProvider) -> Result<(), AuthError> {
            Ok(())
        }
        async fn sign_in_anonymously(&self) -> Result<AuthResult, AuthError> {
            Err(AuthError::Cancelled)
        }
        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
        fn current_session(&self) -> SessionState {
            let mut session = Session::anonymous("u1");
            session.id_token = Some("expired".to_string());
            session.token_expiration = Some(0);
            Some(Arc::new(session))
        }
        fn subscribe(&self) -> broadcast::Receiver<SessionState> {
            broadcast::channel(1).1
        }
        async fn get_redirect_result(&self) -> Result<Option<AuthResult>, AuthError> {
            Ok(None)
        }
        async fn id_token(&self) -> Result<Option<String>, AuthError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_url_uses_renewed_token() {
        let db = db().with_auth(Arc::new(Renewing(Ok(Some("renewed".to_string())))));
        let url = db.url(&DatabasePath::new("users/u1")).await.unwrap();
        assert_eq!(url.query(), Some("auth=renewed"));
    }

    #[tokio::test]
    async fn test_failed_renewal_fails_request_locally() {
        let rejected = db().with_auth(Arc::new(Renewing(Err(AuthError::from_error_code("TOKEN_EXPIRED")))));
        let err = rejected.get(&DatabasePath::new("users/u1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(ref msg) if msg.contains("expired")));

        let offline = db().with_auth(Arc::new(Renewing(Err(AuthError::provider("NETWORK_REQUEST_FAILED", "offline")))));
        let err = offline.get(&DatabasePath::new("users/u1")).await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }

    #[test]
    fn test_apply_events_builds_cache() {
        let mut parser = EventStreamParser::new();
        let mut cache = Value::Null;

        let initial = b"event: put\ndata: {\"path\":\"/\",\"data\":{\"-A\":{\"n\":1}}}\n\n";
        assert!(apply_events(&mut parser, &mut cache, initial).unwrap());
        assert_eq!(cache, json!({"-A": {"n": 1}}));

        let patch = b"event: patch\ndata: {\"path\":\"/-A\",\"data\":{\"n\":2,\"m\":3}}\n\n";
        assert!(apply_events(&mut parser, &mut cache, patch).unwrap());
        assert_eq!(cache, json!({"-A": {"n": 2, "m": 3}}));

        let delete = b"event: put\ndata: {\"path\":\"/-A\",\"data\":null}\n\n";
        assert!(apply_events(&mut parser, &mut cache, delete).unwrap());
        assert_eq!(cache, Value::Null);

        let keep_alive = b"event: keep-alive\ndata: null\n\n";
        assert!(!apply_events(&mut parser, &mut cache, keep_alive).unwrap());
    }

    #[test]
    fn test_apply_events_control_errors() {
        let mut parser = EventStreamParser::new();
        let mut cache = Value::Null;

        let revoked = b"event: auth_revoked\ndata: \"token expired\"\n\n";
        let err = apply_events(&mut parser, &mut cache, revoked).unwrap_err();
        assert!(matches!(err, BackendError::Rejected(msg) if msg.contains("token expired")));

        let cancel = b"event: cancel\ndata: null\n\n";
        assert!(apply_events(&mut parser, &mut cache, cancel).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_network_error() {
        let db = RestDatabase::new("http://127.0.0.1:9")
            .unwrap()
            .with_request_timeout(Duration::from_secs(2));
        let err = db.get(&DatabasePath::new("users/a")).await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
        assert!(err.is_transient());
    }
}
