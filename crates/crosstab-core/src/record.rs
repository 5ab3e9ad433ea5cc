//! Persisted record format: `{ "data": <value> }` stored under the channel key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::types::StateValue;

/// The record written by the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub data: StateValue,
}

impl PersistedRecord {
    pub fn new(data: StateValue) -> Self {
        Self { data }
    }

    /// Encode to the stored text form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode stored text. A record must be an object with a `data` field.
    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CoreError::MalformedRecord(e.to_string()))?;
        match value {
            Value::Object(mut obj) => match obj.remove("data") {
                Some(data) => Ok(Self { data }),
                None => Err(CoreError::MalformedRecord("missing `data` field".into())),
            },
            other => Err(CoreError::MalformedRecord(format!(
                "expected object, got {}",
                json_type(&other)
            ))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_shape() {
        let raw = PersistedRecord::new(json!({ "a": 1 })).encode().unwrap();
        assert_eq!(raw, "{\"data\":{\"a\":1}}");
    }

    #[test]
    fn test_null_data_is_present() {
        let record = PersistedRecord::decode("{\"data\":null}").unwrap();
        assert_eq!(record.data, Value::Null);
    }

    #[test]
    fn test_malformed_records() {
        for raw in ["", "{", "[1]", "{\"value\":1}", "\"data\""] {
            let err = PersistedRecord::decode(raw).unwrap_err();
            assert!(matches!(err, CoreError::MalformedRecord(_)), "{raw}: {err}");
        }
    }
}
