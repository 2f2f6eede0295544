//! Data snapshots delivered by database backends

use super::record::Record;
use serde_json::Value;

/// Immutable copy of the data at a location
///
/// A location that does not exist is represented by `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSnapshot {
    key: Option<String>,
    value: Value,
}

impl DataSnapshot {
    /// Create a snapshot of `value` at the location named `key`
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self { key, value }
    }

    /// Last segment of the snapshot location (`None` at the root)
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Raw value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether the location holds data
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }

    /// Direct children in key order
    pub fn children(&self) -> impl Iterator<Item = DataSnapshot> + '_ {
        self.value
            .as_object()
            .into_iter()
            .flat_map(|map| map.iter())
            .map(|(k, v)| DataSnapshot::new(Some(k.clone()), v.clone()))
    }

    /// Number of direct children
    pub fn children_count(&self) -> usize {
        self.value.as_object().map_or(0, |m| m.len())
    }
}

/// Convert a collection snapshot into records
///
/// Each object child becomes one record whose id is the child key. Children
/// that are not objects cannot be records and are skipped. A missing
/// collection yields an empty list.
pub fn records_from_snapshot(owner: &str, snapshot: &DataSnapshot) -> Vec<Record> {
    let Some(children) = snapshot.value().as_object() else {
        return Vec::new();
    };

    children
        .iter()
        .filter_map(|(id, value)| {
            let payload = value.as_object()?;
            Some(Record::new(id.clone(), owner, payload.clone()))
        })
        .collect()
}
