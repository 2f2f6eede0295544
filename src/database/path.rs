//! Database paths and key validation

use crate::error::StoreError;
use std::fmt;

/// Maximum key length accepted by the realtime database (bytes)
pub const MAX_KEY_BYTES: usize = 768;

/// Location in the hierarchical keyspace, e.g. `users/alice/records`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DatabasePath {
    segments: Vec<String>,
}

impl DatabasePath {
    /// The root of the keyspace
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path; empty segments are ignored
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path of a direct child
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Path segments from the root
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment (`None` at the root)
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether this is the keyspace root
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for DatabasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Check that `value` can be used as a single path segment
///
/// `kind` names the argument in the error message.
pub(crate) fn validate_key(kind: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::InvalidArgument(format!("{} is required", kind)));
    }
    if value.len() > MAX_KEY_BYTES {
        return Err(StoreError::InvalidArgument(format!(
            "{} exceeds {} bytes",
            kind, MAX_KEY_BYTES
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '.' | '#' | '$' | '[' | ']' | '/') || c.is_ascii_control())
    {
        return Err(StoreError::InvalidArgument(format!(
            "{} contains forbidden character {:?}",
            kind, c
        )));
    }
    Ok(())
}
