//! Forward-compatible decoding of persisted JSON documents
//!
//! Archived documents may carry keys written by newer releases. Decoding
//! reads only the fields the target type declares and reports the rest,
//! instead of rejecting the document.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Document decoding errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Malformed {kind} document: {message}")]
    Malformed { kind: String, message: String },

    #[error("Missing required field(s): {0}")]
    MissingField(String),
}

/// Decode a JSON document, ignoring keys `T` does not declare
pub fn decode_document<T>(bytes: &[u8], kind: &str) -> Result<T, DocumentError>
where
    T: DeserializeOwned + Serialize,
{
    let value: Value = serde_json::from_slice(bytes).map_err(|e| DocumentError::Malformed {
        kind: kind.to_string(),
        message: e.to_string(),
    })?;
    decode_value(value, kind)
}

/// Decode an already-parsed document, ignoring keys `T` does not declare
pub fn decode_value<T>(value: Value, kind: &str) -> Result<T, DocumentError>
where
    T: DeserializeOwned + Serialize,
{
    let decoded: T = serde_json::from_value(value.clone()).map_err(|e| DocumentError::Malformed {
        kind: kind.to_string(),
        message: e.to_string(),
    })?;

    // Keys that vanish on a re-encode were not read by T.
    if let Ok(known) = serde_json::to_value(&decoded) {
        let ignored = unknown_keys(&value, &known);
        if !ignored.is_empty() {
            tracing::debug!(kind, ignored = ?ignored, "Ignoring unknown document fields");
        }
    }

    Ok(decoded)
}

/// Top-level keys present in `input` but absent from `known`
pub fn unknown_keys(input: &Value, known: &Value) -> Vec<String> {
    match (input, known) {
        (Value::Object(input), Value::Object(known)) => input
            .keys()
            .filter(|key| !known.contains_key(*key))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}
