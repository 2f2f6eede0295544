//! Server-assigned values
//!
//! # REST Reference
//! - `{".sv": "timestamp"}` - replaced by the server with its clock in
//!   milliseconds since the Unix epoch

use serde_json::{json, Map, Value};

/// Placeholder the backend resolves at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerValue {
    /// Server clock, milliseconds since the Unix epoch
    Timestamp,
}

impl ServerValue {
    /// Wire representation of the placeholder
    pub fn to_value(self) -> Value {
        match self {
            ServerValue::Timestamp => json!({ ".sv": "timestamp" }),
        }
    }

    /// Recognize a placeholder
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 1 {
            return None;
        }
        match map.get(".sv")?.as_str()? {
            "timestamp" => Some(ServerValue::Timestamp),
            _ => None,
        }
    }
}

/// Replace every placeholder inside `value` with its resolved value
pub(crate) fn resolve(value: Value, now_millis: i64) -> Value {
    if let Some(ServerValue::Timestamp) = ServerValue::from_value(&value) {
        return Value::from(now_millis);
    }

    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve(v, now_millis)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| resolve(v, now_millis)).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_round_trip() {
        let value = ServerValue::Timestamp.to_value();
        assert_eq!(value, json!({".sv": "timestamp"}));
        assert_eq!(ServerValue::from_value(&value), Some(ServerValue::Timestamp));
        assert_eq!(ServerValue::from_value(&json!({".sv": "increment"})), None);
        assert_eq!(ServerValue::from_value(&json!({".sv": "timestamp", "x": 1})), None);
    }

    #[test]
    fn test_resolve_nested() {
        let value = json!({
            "score": 1,
            "timestamp": {".sv": "timestamp"},
            "history": [{"at": {".sv": "timestamp"}}]
        });

        let resolved = resolve(value, 1_700_000_000_000);
        assert_eq!(
            resolved,
            json!({
                "score": 1,
                "timestamp": 1_700_000_000_000i64,
                "history": [{"at": 1_700_000_000_000i64}]
            })
        );
    }
}
