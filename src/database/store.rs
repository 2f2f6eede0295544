//! Record store gateway
//!
//! CRUD over per-owner record collections plus live collection listeners.
//! Records of an owner live under `users/{owner}/records/{id}` (see
//! [`Settings`]). The gateway validates its arguments locally, stamps the
//! timestamp fields and maps backend failures onto [`StoreError`]; all
//! storage work is done by the injected [`DatabaseBackend`].

use super::backend::DatabaseBackend;
use super::patch::{type_name, RecordPatch};
use super::path::validate_key;
use super::record::{iso_now, Record, CREATED_AT_FIELD, TIMESTAMP_FIELD, UPDATED_AT_FIELD};
use super::settings::Settings;
use super::snapshot::records_from_snapshot;
use crate::error::StoreError;
use crate::listener::{self, ListenerRegistration, ListenerStream};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

fn validate_fields(kind: &str, fields: &Map<String, Value>) -> Result<(), StoreError> {
    fields.keys().try_for_each(|field| validate_key(kind, field))
}

/// Stream of collection states, see [`RecordStore::record_changes`]
pub type RecordStream = ListenerStream<Result<Vec<Record>, StoreError>>;

/// Record store gateway
///
/// Cheap to clone; clones share the backend handle.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Option<Arc<dyn DatabaseBackend>>,
    settings: Settings,
}

impl RecordStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Some(backend),
                settings: Settings::default(),
            }),
        }
    }

    /// Create a store with no backend configured
    ///
    /// Argument checks still run; everything else fails with
    /// [`StoreError::Unavailable`].
    pub fn unconfigured() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: None,
                settings: Settings::default(),
            }),
        }
    }

    /// Use a different keyspace layout
    pub fn with_settings(self, settings: Settings) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: self.inner.backend.clone(),
                settings,
            }),
        }
    }

    /// Keyspace layout in use
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    fn backend(&self) -> Result<&Arc<dyn DatabaseBackend>, StoreError> {
        self.inner
            .backend
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("database backend not initialized".to_string()))
    }

    /// Create a record
    ///
    /// `payload` must serialize to a JSON object. The stored record also gets
    /// `timestamp` (server clock) and `createdAt` (client clock, ISO-8601).
    /// Returns the generated record id.
    ///
    /// # Example
    /// ```
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::database::{MemoryDatabase, RecordStore};
    /// use serde_json::json;
    /// use std::sync::Arc;
    ///
    /// let store = RecordStore::new(Arc::new(MemoryDatabase::new()));
    /// let id = store.create("alice", &json!({"score": 10})).await?;
    ///
    /// let records = store.read_all("alice").await?;
    /// assert_eq!(records[0].id(), id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create<T>(&self, owner: &str, payload: &T) -> Result<String, StoreError>
    where
        T: Serialize + ?Sized,
    {
        validate_key("owner", owner)?;

        let mut fields = match serde_json::to_value(payload) {
            Ok(Value::Object(fields)) => fields,
            Ok(other) => {
                return Err(StoreError::InvalidArgument(format!(
                    "payload must be an object, got {}",
                    type_name(&other)
                )))
            }
            Err(e) => {
                return Err(StoreError::InvalidArgument(format!("payload is not serializable: {}", e)))
            }
        };

        validate_fields("payload field", &fields)?;

        let backend = self.backend()?;
        fields.insert(TIMESTAMP_FIELD.to_string(), backend.server_timestamp());
        fields.insert(CREATED_AT_FIELD.to_string(), Value::String(iso_now()));

        let path = self.inner.settings.records_path(owner);
        let id = backend
            .push(&path, Value::Object(fields))
            .await
            .map_err(StoreError::WriteFailed)?;

        tracing::trace!(%path, %id, "record created");
        Ok(id)
    }

    /// Read every record of `owner`
    ///
    /// Records come back in the backend's key order, which for generated ids
    /// is creation order. A missing collection reads as empty.
    pub async fn read_all(&self, owner: &str) -> Result<Vec<Record>, StoreError> {
        validate_key("owner", owner)?;
        let backend = self.backend()?;

        let snapshot = backend
            .get(&self.inner.settings.records_path(owner))
            .await
            .map_err(StoreError::ReadFailed)?;

        Ok(records_from_snapshot(owner, &snapshot))
    }

    /// Merge `patch` into record `id`
    ///
    /// Fields in the patch overwrite, all others are preserved; `updatedAt`
    /// is stamped. The record is not checked for existence, so updating a
    /// missing id creates a partial record.
    ///
    /// Every patch field must name a single top-level field; an empty name or
    /// one containing `/` would address the record itself and is rejected.
    pub async fn update(&self, owner: &str, id: &str, patch: RecordPatch) -> Result<(), StoreError> {
        validate_key("owner", owner)?;
        validate_key("record id", id)?;
        validate_fields("patch field", patch.fields())?;
        let backend = self.backend()?;

        let mut fields = patch.into_fields();
        fields.insert(UPDATED_AT_FIELD.to_string(), Value::String(iso_now()));

        let path = self.inner.settings.record_path(owner, id);
        backend.update(&path, fields).await.map_err(StoreError::WriteFailed)?;

        tracing::trace!(%path, "record updated");
        Ok(())
    }

    /// Delete record `id`
    ///
    /// Deleting an id that does not exist succeeds.
    pub async fn delete(&self, owner: &str, id: &str) -> Result<(), StoreError> {
        validate_key("owner", owner)?;
        validate_key("record id", id)?;
        let backend = self.backend()?;

        let path = self.inner.settings.record_path(owner, id);
        backend.remove(&path).await.map_err(StoreError::DeleteFailed)?;

        tracing::trace!(%path, "record deleted");
        Ok(())
    }

    /// Listen to the collection of `owner`
    ///
    /// `callback` receives the full collection once the channel is open and
    /// again after every change. A backend failure is delivered once as
    /// [`StoreError::ReadFailed`] and ends the subscription. After
    /// [`ListenerRegistration::remove`] returns, `callback` is never invoked
    /// again and the backend channel is released.
    ///
    /// # Example
    /// ```
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::database::{MemoryDatabase, RecordStore};
    /// use std::sync::Arc;
    ///
    /// let store = RecordStore::new(Arc::new(MemoryDatabase::new()));
    /// let registration = store
    ///     .listen("alice", |result| match result {
    ///         Ok(records) => println!("{} records", records.len()),
    ///         Err(e) => eprintln!("listener failed: {}", e),
    ///     })
    ///     .await?;
    ///
    /// registration.remove();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn listen<F>(&self, owner: &str, callback: F) -> Result<ListenerRegistration, StoreError>
    where
        F: FnMut(Result<Vec<Record>, StoreError>) + Send + 'static,
    {
        validate_key("owner", owner)?;
        let backend = self.backend()?;

        let path = self.inner.settings.records_path(owner);
        let mut snapshots = backend.subscribe(&path).await.map_err(StoreError::ReadFailed)?;
        let (registration, mut dispatcher, mut cancel_rx) = listener::register(callback);
        let owner = owner.to_string();

        tracing::debug!(%path, "record listener opened");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    next = snapshots.next() => {
                        let result = match next {
                            Some(Ok(snapshot)) => Ok(records_from_snapshot(&owner, &snapshot)),
                            Some(Err(e)) => Err(StoreError::ReadFailed(e)),
                            // Backend ended the channel
                            None => break,
                        };
                        let terminal = result.is_err();
                        if !dispatcher.deliver(result) || terminal {
                            break;
                        }
                    }
                }
            }
            drop(snapshots);
            tracing::debug!(%path, "record listener closed");
        });

        Ok(registration)
    }

    /// Listen to the collection of `owner` as a stream
    ///
    /// Dropping the stream removes the listener.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// use record_sync::database::{MemoryDatabase, RecordStore};
    /// use futures::StreamExt;
    /// use std::sync::Arc;
    ///
    /// let store = RecordStore::new(Arc::new(MemoryDatabase::new()));
    /// let mut stream = store.record_changes("alice").await?;
    ///
    /// while let Some(result) = stream.next().await {
    ///     println!("{} records", result?.len());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn record_changes(&self, owner: &str) -> Result<RecordStream, StoreError> {
        let (forward, receiver) = RecordStream::channel();
        let registration = self.listen(owner, forward).await?;
        Ok(ListenerStream::attach(receiver, registration))
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("configured", &self.inner.backend.is_some())
            .field("settings", &self.inner.settings)
            .finish()
    }
}
