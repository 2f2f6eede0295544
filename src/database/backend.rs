//! Database backend abstraction
//!
//! The record store talks to a hierarchical JSON keyspace through
//! [`DatabaseBackend`]. Two implementations ship with the crate:
//! [`MemoryDatabase`](super::memory::MemoryDatabase) for tests and local use,
//! and [`RestDatabase`](super::rest::RestDatabase) for the realtime database
//! REST API with server-sent events.

use super::path::DatabasePath;
use super::server_value::ServerValue;
use super::snapshot::DataSnapshot;
use crate::error::BackendError;
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Hierarchical keyspace operations
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Append `value` under `path` with a backend-generated key
    ///
    /// Returns the generated key. Server value placeholders inside `value`
    /// are resolved by the backend.
    async fn push(&self, path: &DatabasePath, value: Value) -> Result<String, BackendError>;

    /// Read the data at `path`
    async fn get(&self, path: &DatabasePath) -> Result<DataSnapshot, BackendError>;

    /// Merge `fields` into the data at `path`
    ///
    /// Present fields overwrite, absent fields are preserved, `null` removes.
    async fn update(&self, path: &DatabasePath, fields: Map<String, Value>) -> Result<(), BackendError>;

    /// Delete the data at `path`; deleting a missing location succeeds
    async fn remove(&self, path: &DatabasePath) -> Result<(), BackendError>;

    /// Watch `path`
    ///
    /// The stream yields the current snapshot first, then a full snapshot
    /// after every change. An `Err` item is terminal. Dropping the stream
    /// releases the backend subscription.
    async fn subscribe(&self, path: &DatabasePath) -> Result<SnapshotStream, BackendError>;

    /// Placeholder resolved to the backend clock on write
    fn server_timestamp(&self) -> Value {
        ServerValue::Timestamp.to_value()
    }
}

/// Stream of snapshots from a backend subscription
///
/// When dropped, the producing side observes the cancellation through
/// [`SnapshotFeed::cancelled`].
pub struct SnapshotStream {
    receiver: mpsc::UnboundedReceiver<Result<DataSnapshot, BackendError>>,
}

/// Producing half of a [`SnapshotStream`]
#[derive(Clone)]
pub struct SnapshotFeed {
    sender: mpsc::UnboundedSender<Result<DataSnapshot, BackendError>>,
}

impl SnapshotStream {
    /// Create a connected feed and stream
    pub fn channel() -> (SnapshotFeed, SnapshotStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SnapshotFeed { sender }, SnapshotStream { receiver })
    }
}

impl SnapshotFeed {
    /// Queue an item; returns `false` once the stream is gone
    pub fn send(&self, item: Result<DataSnapshot, BackendError>) -> bool {
        self.sender.send(item).is_ok()
    }

    /// Completes when the stream has been dropped
    pub async fn cancelled(&self) {
        self.sender.closed().await
    }

    /// Whether the stream has been dropped
    pub fn is_cancelled(&self) -> bool {
        self.sender.is_closed()
    }
}

impl Stream for SnapshotStream {
    type Item = Result<DataSnapshot, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        // Wakes the producer waiting in `cancelled`
        self.receiver.close();
    }
}

impl std::fmt::Debug for SnapshotStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_feed_delivers_in_order() {
        let (feed, mut stream) = SnapshotStream::channel();
        assert!(feed.send(Ok(DataSnapshot::new(None, json!(1)))));
        assert!(feed.send(Err(BackendError::Closed)));
        drop(feed);

        assert_eq!(stream.next().await.unwrap().unwrap().value(), &json!(1));
        assert_eq!(stream.next().await.unwrap().unwrap_err(), BackendError::Closed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_cancels_feed() {
        let (feed, stream) = SnapshotStream::channel();
        assert!(!feed.is_cancelled());

        drop(stream);

        tokio::time::timeout(std::time::Duration::from_secs(1), feed.cancelled())
            .await
            .expect("feed should observe cancellation");
        assert!(!feed.send(Ok(DataSnapshot::new(None, Value::Null))));
    }

    #[test]
    fn test_default_server_timestamp() {
        struct Noop;

        #[async_trait]
        impl DatabaseBackend for Noop {
            async fn push(&self, _: &DatabasePath, _: Value) -> Result<String, BackendError> {
                Ok(String::new())
            }
            async fn get(&self, _: &DatabasePath) -> Result<DataSnapshot, BackendError> {
                Ok(DataSnapshot::new(None, Value::Null))
            }
            async fn update(&self, _: &DatabasePath, _: Map<String, Value>) -> Result<(), BackendError> {
                Ok(())
            }
            async fn remove(&self, _: &DatabasePath) -> Result<(), BackendError> {
                Ok(())
            }
            async fn subscribe(&self, _: &DatabasePath) -> Result<SnapshotStream, BackendError> {
                Ok(SnapshotStream::channel().1)
            }
        }

        assert_eq!(Noop.server_timestamp(), json!({".sv": "timestamp"}));
    }
}
