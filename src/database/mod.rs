//! Realtime record storage
//!
//! - `store.rs` - [`RecordStore`] gateway (create, read_all, update, delete, listen)
//! - `backend.rs` - [`DatabaseBackend`] trait and [`SnapshotStream`]
//! - `memory.rs` - in-process [`MemoryDatabase`]
//! - `rest.rs` - [`RestDatabase`] over the REST API and server-sent events
//! - `record.rs`, `patch.rs`, `snapshot.rs` - data types
//! - `path.rs`, `tree.rs`, `push_id.rs`, `server_value.rs` - keyspace plumbing

pub mod backend;
mod event_stream;
pub mod memory;
pub mod patch;
pub mod path;
pub mod push_id;
pub mod record;
pub mod rest;
pub mod server_value;
pub mod settings;
pub mod snapshot;
pub mod store;
mod tree;

// Re-export gateway
pub use store::{RecordStore, RecordStream};

// Re-export backends
pub use backend::{DatabaseBackend, SnapshotFeed, SnapshotStream};
pub use memory::{MemoryDatabase, Operation};
pub use rest::{RestDatabase, DEFAULT_REQUEST_TIMEOUT};

// Re-export data types
pub use patch::RecordPatch;
pub use path::DatabasePath;
pub use push_id::PushIdGenerator;
pub use record::{Record, CREATED_AT_FIELD, TIMESTAMP_FIELD, UPDATED_AT_FIELD};
pub use server_value::ServerValue;
pub use settings::Settings;
pub use snapshot::{records_from_snapshot, DataSnapshot};
