//! Record Sync
//!
//! Account and record sync facade over a managed identity service and a
//! realtime database. Two gateways, each constructed with an explicit backend
//! handle:
//!
//! - [`IdentityGateway`] - sign-in (interactive or anonymous), sign-out,
//!   current session and session-change notification
//! - [`RecordStore`] - create, read, update, delete and live listening on
//!   per-owner record collections
//!
//! Backends for the Firebase REST APIs ([`RestIdentity`], [`RestDatabase`])
//! and in-memory ones for tests ([`MemoryIdentity`], [`MemoryDatabase`]) are
//! included.
//!
//! # Example
//! ```
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use record_sync::{IdentityGateway, MemoryDatabase, MemoryIdentity, RecordPatch, RecordStore, SignInMethod};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let identity = IdentityGateway::new(Arc::new(MemoryIdentity::new()));
//! let store = RecordStore::new(Arc::new(MemoryDatabase::new()));
//!
//! let outcome = identity.sign_in(SignInMethod::Anonymous).await?;
//! let owner = outcome.session().unwrap().owner_id().to_string();
//!
//! let id = store.create(&owner, &json!({"score": 10})).await?;
//! store.update(&owner, &id, RecordPatch::new().set("score", 20)).await?;
//! assert_eq!(store.read_all(&owner).await?[0].get("score"), Some(&json!(20)));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod database;
pub mod error;
pub mod listener;

// Auth module
pub mod auth {
    //! Identity gateway and backends

    pub mod backend;
    pub mod flow;
    pub mod gateway;
    pub mod memory;
    pub mod rest;
    pub mod types;

    pub use backend::{IdentityBackend, SessionCell, SessionState};
    pub use flow::{DeviceClass, Environment, FlowMode, ProviderFlow};
    pub use gateway::{IdentityGateway, SessionStream};
    pub use memory::{InteractiveOutcome, MemoryIdentity};
    pub use rest::{RestIdentity, DEFAULT_IDENTITY_ENDPOINT, DEFAULT_TOKEN_ENDPOINT};
    pub use types::{
        AdditionalUserInfo, AuthProvider, AuthResult, Credential, Session, SessionMetadata, SignInMethod,
        SignInOutcome, ANONYMOUS_PROVIDER_ID,
    };
}

// Re-exports for convenience
pub use app::{App, AppOptions};
pub use error::{AuthError, BackendError, StoreError, SyncError};
pub use listener::{ListenerRegistration, ListenerStream};

// Auth re-exports
pub use auth::{
    AuthProvider, AuthResult, Environment, IdentityBackend, IdentityGateway, MemoryIdentity, ProviderFlow,
    RestIdentity, Session, SignInMethod, SignInOutcome,
};

// Database re-exports
pub use database::{
    DatabaseBackend, MemoryDatabase, Record, RecordPatch, RecordStore, RestDatabase, Settings,
};
