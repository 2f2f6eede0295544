//! Integration tests against a real Firebase project
//!
//! These tests interact with real Firebase services and require:
//! 1. A Firebase project with anonymous Authentication and a Realtime Database
//! 2. Database rules letting `users/$uid` be read and written by `auth.uid == $uid`
//! 3. Environment variables set in .env file:
//!    `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID`, optionally `FIREBASE_DATABASE_URL`
//! 4. Run with: cargo test --features integration-tests -- --test-threads=1

#![cfg(feature = "integration-tests")]

use async_trait::async_trait;
use futures::StreamExt;
use record_sync::auth::{Credential, ProviderFlow};
use record_sync::{App, AuthError, AuthProvider, RecordPatch, SignInMethod, StoreError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Interactive flows cannot run unattended
struct NoInteractiveFlow;

#[async_trait]
impl ProviderFlow for NoInteractiveFlow {
    async fn obtain_credential(&self, _provider: &AuthProvider) -> Result<Credential, AuthError> {
        Err(AuthError::Cancelled)
    }
}

/// Load environment variables from .env file
fn app() -> App {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    App::from_env().expect("FIREBASE_API_KEY and FIREBASE_PROJECT_ID must be set in .env file")
}

/// Test: Anonymous sign-in and full record lifecycle over REST
#[tokio::test]
async fn test_rest_record_lifecycle() {
    let (identity, store) = app()
        .connect(Arc::new(NoInteractiveFlow))
        .expect("Failed to build gateways");

    let outcome = identity
        .sign_in(SignInMethod::Anonymous)
        .await
        .expect("Failed to sign in anonymously");
    let session = outcome.session().expect("No session").clone();
    let owner = session.owner_id();

    let id = store
        .create(owner, &json!({"score": 10}))
        .await
        .expect("Failed to create record");

    let records = store.read_all(owner).await.expect("Failed to read records");
    let record = records.iter().find(|r| r.id() == id).expect("Created record missing");
    assert_eq!(record.get("score"), Some(&json!(10)));
    assert!(record.server_timestamp().is_some());

    store
        .update(owner, &id, RecordPatch::new().set("score", 20))
        .await
        .expect("Failed to update record");
    let records = store.read_all(owner).await.expect("Failed to read records");
    let record = records.iter().find(|r| r.id() == id).expect("Updated record missing");
    assert_eq!(record.get("score"), Some(&json!(20)));
    assert!(record.created_at().is_some());

    store.delete(owner, &id).await.expect("Failed to delete record");
    store.delete(owner, &id).await.expect("Second delete should succeed");
    let records = store.read_all(owner).await.expect("Failed to read records");
    assert!(records.iter().all(|r| r.id() != id));

    identity.sign_out().await.expect("Failed to sign out");
}

/// Test: Live stream delivers the initial collection and later writes
#[tokio::test]
async fn test_rest_record_stream() {
    let (identity, store) = app()
        .connect(Arc::new(NoInteractiveFlow))
        .expect("Failed to build gateways");

    let session = identity
        .sign_in(SignInMethod::Anonymous)
        .await
        .expect("Failed to sign in anonymously")
        .session()
        .cloned()
        .expect("No session");
    let owner = session.owner_id().to_string();

    let mut stream = store.record_changes(&owner).await.expect("Failed to open stream");
    let initial = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("No initial snapshot")
        .expect("Stream ended")
        .expect("Stream failed");

    let id = store.create(&owner, &json!({"n": 1})).await.expect("Failed to create record");

    let updated = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("No update")
        .expect("Stream ended")
        .expect("Stream failed");
    assert_eq!(updated.len(), initial.len() + 1);
    assert!(updated.iter().any(|r| r.id() == id));

    drop(stream);
    store.delete(&owner, &id).await.expect("Failed to delete record");
    identity.sign_out().await.expect("Failed to sign out");
}

/// Test: Interactive sign-in without a flow reports cancellation
#[tokio::test]
async fn test_rest_interactive_cancelled() {
    let (identity, _) = app()
        .connect(Arc::new(NoInteractiveFlow))
        .expect("Failed to build gateways");

    let err = identity
        .sign_in(SignInMethod::Interactive(AuthProvider::Google))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::Cancelled);
}

/// Test: Writes without a session are refused by the database rules
#[tokio::test]
async fn test_rest_unauthenticated_write_is_refused() {
    let app = app();
    let store = record_sync::RecordStore::new(Arc::new(app.rest_database(None).expect("Failed to build backend")));

    let err = store
        .create("nobody", &json!({"n": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::WriteFailed(_)));
}
