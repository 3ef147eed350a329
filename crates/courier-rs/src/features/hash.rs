//! Request hashing: a stable identity for caching and deduplication.
//!
//! The hash covers the method, the provisional URL, the headers (minus
//! credentials) and the body. JSON bodies are canonicalized with sorted
//! keys, so `{"a":1,"b":2}` and `{"b":2,"a":1}` hash the same.

use super::{Feature, RequestDelegates, RequestHasher};
use crate::body::RequestBody;
use crate::config::ConfigView;
use crate::error::{Error, Result};
use crate::factory::FactoryContext;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::sync::Arc;

pub const FEATURE_NAME: &str = "request-hash";

/// Headers that never contribute to the hash.
pub const EXCLUDED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestHashFeature;

impl Feature for RequestHashFeature {
    fn name(&self) -> &str {
        FEATURE_NAME
    }

    fn request_delegates(&self, _ctx: &FactoryContext) -> RequestDelegates {
        RequestDelegates {
            hasher: Some(Arc::new(Sha256RequestHasher)),
            ..Default::default()
        }
    }
}

/// SHA-256 over a canonical rendering of the request, hex-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256RequestHasher;

impl RequestHasher for Sha256RequestHasher {
    fn hash(&self, config: &ConfigView) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(config.method().as_str());
        hasher.update(b"\n");
        hasher.update(config.provisional_url()?);
        hasher.update(b"\n");

        let mut headers: Vec<(String, String)> = config
            .headers()
            .into_iter()
            .filter(|(name, _)| !EXCLUDED_HEADERS.contains(&name.as_str()))
            .collect();
        headers.sort();
        for (name, value) in headers {
            hasher.update(name);
            hasher.update(b":");
            hasher.update(value);
            hasher.update(b"\n");
        }

        if let Some(body) = config.body() {
            hasher.update(canonical_body(&body)?);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

fn canonical_body(body: &RequestBody) -> Result<Vec<u8>> {
    match body {
        RequestBody::Json(value) => Ok(canonical_json(value).into_bytes()),
        RequestBody::Text(text) => Ok(text.clone().into_bytes()),
        RequestBody::UrlEncoded(fields) => {
            let mut sorted = fields.clone();
            sorted.sort();
            Ok(RequestBody::UrlEncoded(sorted).encode()?.bytes.to_vec())
        }
        RequestBody::Bytes(_) => Err(Error::Unsupported(
            "binary request bodies cannot be hashed".into(),
        )),
    }
}

/// Serialize JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
