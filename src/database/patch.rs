//! Partial record updates

use crate::error::StoreError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Fields to change on an existing record
///
/// Applied with merge semantics: fields present in the patch overwrite,
/// fields absent are left untouched. Setting a field to `null` removes it,
/// matching the realtime database.
///
/// # Example
/// ```
/// use record_sync::database::RecordPatch;
/// use serde_json::json;
///
/// let patch = RecordPatch::new().set("score", 20).set("label", "gold");
/// let mut fields = json!({"score": 10, "name": "x"}).as_object().unwrap().clone();
/// patch.apply_to(&mut fields);
/// assert_eq!(serde_json::Value::Object(fields), json!({"score": 20, "name": "x", "label": "gold"}));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    fields: Map<String, Value>,
}

impl RecordPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field` to `value`
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Remove `field` from the record
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.set(field, Value::Null)
    }

    /// Build a patch from any value serializing to a JSON object
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, StoreError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StoreError::InvalidArgument(format!("patch is not serializable: {}", e)))?;
        Self::try_from(value)
    }

    /// Whether the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields in the patch
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Fields in the patch
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the patch
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Merge into `target`
    pub fn apply_to(&self, target: &mut Map<String, Value>) {
        for (field, value) in &self.fields {
            if value.is_null() {
                target.remove(field);
            } else {
                target.insert(field.clone(), value.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for RecordPatch {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for RecordPatch {
    type Error = StoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(StoreError::InvalidArgument(format!(
                "patch must be an object, got {}",
                type_name(&other)
            ))),
        }
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
