//! Convenience re-exports for common `courier-rs` types.
//!
//! ```ignore
//! use courier_rs::prelude::*;
//! ```
//!
//! Covers building factories and requests, interceptors, the shipped
//! features and the result types. Transport internals and the SSE parser
//! are left out; import those from [`crate::transport`].

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    ConfigView, Credentials, Deferred, Error, Payload, QueryValue, RequestBody, RequestError,
    RequestMode, Result,
};

// ── Factory and requests ────────────────────────────────────────────
pub use crate::engine::{
    AbortSignal, Intercept, Plain, Request, RequestBuilder, RequestControl, StreamRequest,
    Subscription, Wrapped, WrappedResponse,
};
pub use crate::factory::{Factory, FactoryConfig, RequestInfo};
pub use crate::log::LogLevel;

// ── Features ────────────────────────────────────────────────────────
pub use crate::features::Feature;
pub use crate::features::adapters::{Adapter, AdapterFeature, PriorityOverride};
pub use crate::features::hash::RequestHashFeature;
pub use crate::features::progress::{
    DownloadProgressFeature, FallThrough, ProgressEvent, UploadProgressFeature,
};
pub use crate::features::retry::{RetryFeature, RetryPolicy, exponential_backoff, linear_backoff};

pub use std::time::Duration;
