//! In-memory database backend
//!
//! Keeps the whole keyspace in a single JSON tree with realtime-database
//! semantics (push ids, server timestamps, null deletes). Every call is
//! counted and individual operations can be scripted to fail, which is what
//! the record store tests rely on.

use super::backend::{DatabaseBackend, SnapshotFeed, SnapshotStream};
use super::path::DatabasePath;
use super::push_id::PushIdGenerator;
use super::server_value;
use super::snapshot::DataSnapshot;
use super::tree;
use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast::{self, error::RecvError};

/// Backend operations, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`DatabaseBackend::push`]
    Push,
    /// [`DatabaseBackend::get`]
    Get,
    /// [`DatabaseBackend::update`]
    Update,
    /// [`DatabaseBackend::remove`]
    Remove,
    /// [`DatabaseBackend::subscribe`]
    Subscribe,
}

#[derive(Debug, Clone)]
enum Change {
    Data,
    Fault(BackendError),
    Shutdown,
}

/// In-memory database backend
///
/// Cheap to clone; clones share the keyspace. Live subscriptions end when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
///
/// # Example
/// ```
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use record_sync::database::{DatabaseBackend, DatabasePath, MemoryDatabase};
/// use serde_json::json;
///
/// let db = MemoryDatabase::new();
/// let id = db.push(&DatabasePath::new("items"), json!({"n": 1})).await?;
/// let snapshot = db.get(&DatabasePath::new("items").child(id)).await?;
/// assert_eq!(snapshot.value(), &json!({"n": 1}));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryDatabase {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: Mutex<MemoryState>,
    push_ids: PushIdGenerator,
    calls: AtomicUsize,
    changes: broadcast::Sender<Change>,
}

#[derive(Default)]
struct MemoryState {
    root: Value,
    failures: HashMap<Operation, BackendError>,
    shut_down: bool,
}

impl MemoryDatabase {
    /// Create an empty keyspace
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(MemoryInner {
                state: Mutex::new(MemoryState::default()),
                push_ids: PushIdGenerator::new(),
                calls: AtomicUsize::new(0),
                changes,
            }),
        }
    }

    /// Number of backend calls made so far
    pub fn call_count(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: Operation, error: BackendError) {
        self.inner.lock().failures.insert(operation, error);
    }

    /// Terminate every live subscription with `error`
    pub fn break_subscriptions(&self, error: BackendError) {
        let _ = self.inner.changes.send(Change::Fault(error));
    }

    /// End every live subscription and refuse further calls
    pub fn shutdown(&self) {
        self.inner.lock().shut_down = true;
        let _ = self.inner.changes.send(Change::Shutdown);
        tracing::debug!("memory database shut down");
    }

    /// Write `value` at `path` directly, bypassing call counting
    pub fn seed(&self, path: &str, value: Value) {
        let path = DatabasePath::new(path);
        tree::set_at(&mut self.inner.lock().root, path.segments(), value);
        self.inner.notify();
    }

    /// Current value at `path`, bypassing call counting
    pub fn value_at(&self, path: &str) -> Option<Value> {
        let path = DatabasePath::new(path);
        tree::value_at(&self.inner.lock().root, path.segments()).cloned()
    }

    /// Count the call and apply shutdown and scripted failures
    fn begin(&self, operation: Operation) -> Result<MutexGuard<'_, MemoryState>, BackendError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.lock();
        if state.shut_down {
            return Err(BackendError::Unavailable("database shut down".to_string()));
        }
        if let Some(error) = state.failures.remove(&operation) {
            return Err(error);
        }
        Ok(state)
    }
}

impl MemoryInner {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self) {
        // No receivers is fine
        let _ = self.changes.send(Change::Data);
    }

    fn snapshot(&self, path: &DatabasePath) -> DataSnapshot {
        let value = tree::value_at(&self.lock().root, path.segments())
            .cloned()
            .unwrap_or(Value::Null);
        DataSnapshot::new(path.key().map(str::to_string), value)
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseBackend for MemoryDatabase {
    async fn push(&self, path: &DatabasePath, value: Value) -> Result<String, BackendError> {
        let id = {
            let mut state = self.begin(Operation::Push)?;
            let now = chrono::Utc::now().timestamp_millis();
            let id = self.inner.push_ids.next_id_at(now);
            let target = path.child(id.as_str());
            tree::set_at(&mut state.root, target.segments(), server_value::resolve(value, now));
            id
        };
        self.inner.notify();
        Ok(id)
    }

    async fn get(&self, path: &DatabasePath) -> Result<DataSnapshot, BackendError> {
        drop(self.begin(Operation::Get)?);
        Ok(self.inner.snapshot(path))
    }

    async fn update(&self, path: &DatabasePath, fields: Map<String, Value>) -> Result<(), BackendError> {
        {
            let mut state = self.begin(Operation::Update)?;
            let now = chrono::Utc::now().timestamp_millis();
            let fields = match server_value::resolve(Value::Object(fields), now) {
                Value::Object(fields) => fields,
                _ => Map::new(),
            };
            tree::update_at(&mut state.root, path.segments(), fields);
        }
        self.inner.notify();
        Ok(())
    }

    async fn remove(&self, path: &DatabasePath) -> Result<(), BackendError> {
        {
            let mut state = self.begin(Operation::Remove)?;
            tree::remove_at(&mut state.root, path.segments());
        }
        self.inner.notify();
        Ok(())
    }

    async fn subscribe(&self, path: &DatabasePath) -> Result<SnapshotStream, BackendError> {
        drop(self.begin(Operation::Subscribe)?);

        // Subscribe before taking the initial snapshot so no write slips between
        let changes = self.inner.changes.subscribe();
        let initial = self.inner.snapshot(path);

        let (feed, stream) = SnapshotStream::channel();
        tokio::spawn(pump_changes(
            Arc::downgrade(&self.inner),
            path.clone(),
            initial,
            changes,
            feed,
        ));

        Ok(stream)
    }
}

/// Forward a full snapshot of `path` whenever it changes
async fn pump_changes(
    inner: Weak<MemoryInner>,
    path: DatabasePath,
    initial: DataSnapshot,
    mut changes: broadcast::Receiver<Change>,
    feed: SnapshotFeed,
) {
    let mut last = initial.clone();
    if !feed.send(Ok(initial)) {
        return;
    }

    loop {
        tokio::select! {
            _ = feed.cancelled() => break,
            change = changes.recv() => {
                match change {
                    Ok(Change::Data) | Err(RecvError::Lagged(_)) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        let snapshot = inner.snapshot(&path);
                        if snapshot == last {
                            continue;
                        }
                        last = snapshot.clone();
                        if !feed.send(Ok(snapshot)) {
                            break;
                        }
                    }
                    Ok(Change::Fault(error)) => {
                        feed.send(Err(error));
                        break;
                    }
                    Ok(Change::Shutdown) | Err(RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::trace!(%path, "memory subscription ended");
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn records() -> DatabasePath {
        DatabasePath::new("users/alice/records")
    }

    async fn next(stream: &mut SnapshotStream) -> Option<Result<DataSnapshot, BackendError>> {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream stalled")
    }

    #[tokio::test]
    async fn test_push_resolves_server_timestamp() {
        let db = MemoryDatabase::new();
        let id = assert_ok!(db.push(&records(), json!({"score": 1, "timestamp": {".sv": "timestamp"}})).await);

        let stored = db.value_at(&format!("users/alice/records/{}", id)).unwrap();
        assert_eq!(stored["score"], json!(1));
        assert!(stored["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(db.call_count(), 1);
    }

    #[tokio::test]
    async fn test_push_ids_follow_insertion_order() {
        let db = MemoryDatabase::new();
        let mut ids = Vec::new();
        for n in 0..20 {
            ids.push(db.push(&records(), json!({"n": n})).await.unwrap());
        }

        let snapshot = db.get(&records()).await.unwrap();
        let keys: Vec<String> = snapshot.children().filter_map(|c| c.key().map(str::to_string)).collect();
        assert_eq!(keys, ids);
    }

    #[tokio::test]
    async fn test_get_missing_is_null() {
        let db = MemoryDatabase::new();
        let snapshot = assert_ok!(db.get(&records()).await);
        assert!(!snapshot.exists());
        assert_eq!(snapshot.key(), Some("records"));
    }

    #[tokio::test]
    async fn test_remove_missing_succeeds() {
        let db = MemoryDatabase::new();
        assert_ok!(db.remove(&records().child("nope")).await);
        assert_ok!(db.remove(&records().child("nope")).await);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let db = MemoryDatabase::new();
        db.fail_next(Operation::Get, BackendError::Network("offline".into()));

        assert_err!(db.get(&records()).await);
        assert_ok!(db.get(&records()).await);
        assert_eq!(db.call_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_calls() {
        let db = MemoryDatabase::new();
        db.shutdown();
        let err = db.get(&records()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_subscribe_emits_initial_and_changes() {
        let db = MemoryDatabase::new();
        let mut stream = db.subscribe(&records()).await.unwrap();

        let initial = next(&mut stream).await.unwrap().unwrap();
        assert!(!initial.exists());

        let id = db.push(&records(), json!({"n": 1})).await.unwrap();
        let after_push = next(&mut stream).await.unwrap().unwrap();
        assert_eq!(after_push.value()[&id], json!({"n": 1}));

        // Writes elsewhere do not produce a snapshot
        db.push(&DatabasePath::new("users/bob/records"), json!({"n": 2})).await.unwrap();
        db.remove(&records().child(id.as_str())).await.unwrap();
        let after_remove = next(&mut stream).await.unwrap().unwrap();
        assert!(!after_remove.exists());
    }

    #[tokio::test]
    async fn test_subscription_fault_is_terminal() {
        let db = MemoryDatabase::new();
        let mut stream = db.subscribe(&records()).await.unwrap();
        next(&mut stream).await.unwrap().unwrap();

        db.break_subscriptions(BackendError::Rejected("permission denied".into()));

        let err = next(&mut stream).await.unwrap().unwrap_err();
        assert_eq!(err, BackendError::Rejected("permission denied".into()));
        assert!(next(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscription() {
        let db = MemoryDatabase::new();
        let mut stream = db.subscribe(&records()).await.unwrap();
        next(&mut stream).await.unwrap().unwrap();

        db.shutdown();
        assert!(next(&mut stream).await.is_none());
    }
}
