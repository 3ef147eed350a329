//! Error types for request execution.
//!
//! Two layers:
//!
//! - [`RequestError`] is the structured outcome of a failed execution. Its
//!   `code` is the HTTP status for non-2xx responses and `-1` for aborts and
//!   transport-level failures. This is what error interceptors observe.
//! - [`Error`] is the crate-level error returned by `execute()` and by the
//!   builder/registry operations that can be misused (re-execution, mutating
//!   a finalized URL, requiring a missing feature).

use crate::payload::Payload;
use http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Code carried by both abort and transport-failure errors.
pub const SENTINEL_CODE: i32 = -1;

/// Message carried by every abort error, whatever triggered the abort.
pub const ABORTED_MESSAGE: &str = "Request aborted";

/// Crate-level error.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("request already executed; build a new request instead")]
    AlreadyExecuted,

    #[error("cannot {0} after the URL has been finalized")]
    Finalized(&'static str),

    #[error("feature `{0}` is not registered on this factory")]
    FeatureNotRegistered(String),

    #[error("feature `{0}` is already registered on this factory")]
    FeatureAlreadyRegistered(String),

    #[error("adapter `{0}` is already attached")]
    AdapterAlreadyAttached(String),

    #[error("adapter `{0}` is not attached")]
    AdapterNotAttached(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header `{0}`")]
    InvalidHeader(String),

    #[error("failed to encode request body: {0}")]
    Encode(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The structured request error, if this is one.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            Error::Request(e) => Some(e),
            _ => None,
        }
    }

    /// The error code as error interceptors saw it.
    ///
    /// Non-request errors report the sentinel code since they surface from
    /// execution the same way a transport failure does.
    pub fn code(&self) -> i32 {
        self.as_request().map_or(SENTINEL_CODE, |e| e.code)
    }
}

/// Coarse classification of a [`RequestError`].
///
/// Aborts and network failures share code `-1`; the kind lets Rust callers
/// tell them apart without inspecting the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The server answered with a non-2xx status.
    Status,
    /// The request was aborted (explicitly, by timeout, or by closing a stream).
    Aborted,
    /// The transport failed or the pipeline raised an error.
    Network,
}

/// Extra information attached to a [`RequestError`].
#[derive(Debug, Clone, Default)]
pub enum ErrorContext {
    #[default]
    None,
    /// The parsed body of a non-2xx response.
    Body(Payload),
    /// The underlying error that caused a transport failure.
    Source(Arc<dyn std::error::Error + Send + Sync>),
    /// Why the request was aborted.
    Reason(String),
}

/// Structured error produced by the request and streaming engines.
#[derive(Error, Debug, Clone)]
#[error("{message} (code {code})")]
pub struct RequestError {
    /// HTTP status code, or `-1` for aborts and transport failures.
    pub code: i32,
    /// Status text, `"Request aborted"`, or the underlying error message.
    pub message: String,
    pub context: ErrorContext,
    kind: ErrorKind,
}

impl RequestError {
    /// Error for a non-2xx response.
    pub fn status(status: StatusCode, status_text: impl Into<String>, body: Payload) -> Self {
        Self {
            code: i32::from(status.as_u16()),
            message: status_text.into(),
            context: ErrorContext::Body(body),
            kind: ErrorKind::Status,
        }
    }

    /// Abort sentinel.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            code: SENTINEL_CODE,
            message: ABORTED_MESSAGE.to_string(),
            context: ErrorContext::Reason(reason.into()),
            kind: ErrorKind::Aborted,
        }
    }

    /// Transport-failure sentinel wrapping the original error.
    pub fn network<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            code: SENTINEL_CODE,
            message: source.to_string(),
            context: ErrorContext::Source(Arc::new(source)),
            kind: ErrorKind::Network,
        }
    }

    /// Transport-failure sentinel with only a message.
    pub fn network_message(message: impl Into<String>) -> Self {
        Self {
            code: SENTINEL_CODE,
            message: message.into(),
            context: ErrorContext::None,
            kind: ErrorKind::Network,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_aborted(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }

    pub fn is_status(&self) -> bool {
        self.kind == ErrorKind::Status
    }

    /// The HTTP status for [`ErrorKind::Status`] errors.
    pub fn status_code(&self) -> Option<StatusCode> {
        if !self.is_status() {
            return None;
        }
        u16::try_from(self.code)
            .ok()
            .and_then(|c| StatusCode::from_u16(c).ok())
    }

    /// The parsed response body attached to a status error.
    pub fn body(&self) -> Option<&Payload> {
        match &self.context {
            ErrorContext::Body(body) => Some(body),
            _ => None,
        }
    }

    /// Normalize any crate error into the structured form.
    pub(crate) fn from_error(err: Error) -> Self {
        match err {
            Error::Request(e) => e,
            other => Self::network(other),
        }
    }
}
