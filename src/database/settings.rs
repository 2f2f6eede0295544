//! Record store settings

use super::path::DatabasePath;

/// Where records live in the database keyspace
///
/// Records of an owner are stored under `{root}/{owner}/{collection}/{id}`.
/// The defaults give `users/{owner}/records/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Top-level node holding every owner
    ///
    /// Default: "users"
    pub root: String,

    /// Per-owner node holding the records
    ///
    /// Default: "records"
    pub collection: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: "users".to_string(),
            collection: "records".to_string(),
        }
    }
}

impl Settings {
    /// Creates default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Location of an owner's collection
    pub fn records_path(&self, owner: &str) -> DatabasePath {
        DatabasePath::new(&self.root)
            .child(owner)
            .child(self.collection.as_str())
    }

    /// Location of a single record
    pub fn record_path(&self, owner: &str, id: &str) -> DatabasePath {
        self.records_path(owner).child(id)
    }
}
