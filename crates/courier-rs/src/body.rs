//! Request bodies and their wire encoding.

use crate::error::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=UTF-8";
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// A request body as configured on a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    /// Ordered form fields, encoded as `application/x-www-form-urlencoded`.
    UrlEncoded(Vec<(String, String)>),
    Bytes(Bytes),
}

/// A body ready for the transport, with the content type it implies.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub bytes: Bytes,
    pub content_type: &'static str,
}

impl RequestBody {
    /// Serialize any value as a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(RequestBody::Json)
            .map_err(|e| Error::Encode(e.to_string()))
    }

    /// A JSON body that must satisfy `schema` before it is sent.
    pub fn validated_json(value: Value, schema: &Value) -> Result<Self> {
        validate_json(&value, schema)?;
        Ok(RequestBody::Json(value))
    }

    pub fn text(text: impl Into<String>) -> Self {
        RequestBody::Text(text.into())
    }

    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        RequestBody::Bytes(bytes.into())
    }

    pub fn form<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestBody::UrlEncoded(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The content type set when the caller did not set one.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            RequestBody::Json(_) => JSON_CONTENT_TYPE,
            RequestBody::Text(_) => TEXT_CONTENT_TYPE,
            RequestBody::UrlEncoded(_) => FORM_CONTENT_TYPE,
            RequestBody::Bytes(_) => BINARY_CONTENT_TYPE,
        }
    }

    pub fn encode(&self) -> Result<EncodedBody> {
        let bytes = match self {
            RequestBody::Json(value) => {
                Bytes::from(serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?)
            }
            RequestBody::Text(text) => Bytes::from(text.clone()),
            RequestBody::UrlEncoded(fields) => {
                let mut form = ::url::form_urlencoded::Serializer::new(String::new());
                for (k, v) in fields {
                    form.append_pair(k, v);
                }
                Bytes::from(form.finish())
            }
            RequestBody::Bytes(bytes) => bytes.clone(),
        };
        Ok(EncodedBody {
            bytes,
            content_type: self.default_content_type(),
        })
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::Text(text.to_string())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Bytes(Bytes::from(bytes))
    }
}

/// Validate a JSON value against a JSON Schema, collecting every violation.
pub fn validate_json(value: &Value, schema: &Value) -> Result<()> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::Encode(format!("invalid schema: {e}")))?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Encode(format!(
            "body does not match schema: {}",
            errors.join("; ")
        )))
    }
}
