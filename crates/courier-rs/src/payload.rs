//! Parsed response payloads.
//!
//! The engine classifies every successful body by MIME type: JSON types are
//! parsed into a [`serde_json::Value`], text types are decoded as UTF-8, and
//! everything else is handed back as raw bytes. Streaming messages use the
//! same type, parsed best-effort.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A response body (or stream message) after parsing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No body: 204 responses, `ignore_body`, or an empty JSON body.
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Parse a streaming message body: JSON when it parses, text otherwise.
    pub fn from_message(data: &str) -> Self {
        match serde_json::from_str::<Value>(data) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(data.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Deserialize a JSON payload (or a text payload holding JSON) into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = match self {
            Payload::Json(v) => T::deserialize(v),
            Payload::Text(s) => serde_json::from_str(s),
            Payload::Empty => serde_json::from_value(Value::Null),
            Payload::Binary(b) => serde_json::from_slice(b),
        };
        parsed.map_err(|e| Error::Unsupported(format!("payload does not deserialize: {e}")))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}
