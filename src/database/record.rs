//! Owner-scoped records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload field holding the server-assigned creation time (millis)
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Payload field holding the client ISO-8601 creation time
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Payload field holding the client ISO-8601 time of the last update
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A structured document in an owner's collection
///
/// The identifier and owner never change; the payload is whatever the store
/// currently holds, including the stamped timestamp fields. Serializes flat:
/// `{"id": "...", "score": 10, "timestamp": ..., "createdAt": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    #[serde(skip)]
    owner: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Record {
    /// Create a record view
    pub fn new(id: impl Into<String>, owner: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            payload,
        }
    }

    /// Store-assigned identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owner identifier
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Payload fields
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Consume the record, keeping the payload
    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }

    /// Single payload field
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Server-assigned creation time in milliseconds
    pub fn server_timestamp(&self) -> Option<i64> {
        self.payload.get(TIMESTAMP_FIELD)?.as_i64()
    }

    /// Client-observed creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_time(self.payload.get(CREATED_AT_FIELD)?)
    }

    /// Client-observed time of the last update
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_time(self.payload.get(UPDATED_AT_FIELD)?)
    }

    /// Payload without the stamped timestamp fields
    pub fn user_fields(&self) -> Map<String, Value> {
        self.payload
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), TIMESTAMP_FIELD | CREATED_AT_FIELD | UPDATED_AT_FIELD))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Deserialize the payload into a typed value
    pub fn to_typed<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }
}

/// Client clock formatted like `2024-05-01T12:00:00.000Z`
pub(crate) fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
