//! The seam between the engines and the network.
//!
//! - [`Transport`] sends one fully-prepared request and yields a
//!   [`Response`]. [`ReqwestTransport`] is the default; tests and features
//!   substitute their own.
//! - [`StreamConnector`] opens a server-sent-events stream and yields parsed
//!   [`SseEvent`]s. [`ReqwestEventSource`] is the default.
//!
//! Any `Fn(String, TransportInit) -> impl Future<Output = Result<Response, RequestError>>`
//! closure is a transport; use [`transport_fn`] to get closure argument
//! inference.

pub mod reqwest_client;
pub mod response;
pub mod sse;

pub use reqwest_client::ReqwestTransport;
pub use response::{ByteStream, Response, ResponseHead};
pub use sse::{
    EventStream, ReqwestEventSource, SseEvent, SseParser, StreamConnector, StreamInit,
    connector_fn, event_stream,
};

use crate::config::{Credentials, RequestMode};
use crate::engine::signal::AbortSignal;
use crate::error::{Error, RequestError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by [`Transport::send`].
pub type TransportFuture = BoxFuture<'static, std::result::Result<Response, RequestError>>;

/// Sends a prepared request.
///
/// Implementations should observe `init.signal` where they can; the engine
/// also races every send against the signal and drops the future on abort.
pub trait Transport: Send + Sync {
    fn send(&self, url: String, init: TransportInit) -> TransportFuture;
}

impl<F, Fut> Transport for F
where
    F: Fn(String, TransportInit) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Response, RequestError>> + Send + 'static,
{
    fn send(&self, url: String, init: TransportInit) -> TransportFuture {
        Box::pin(self(url, init))
    }
}

/// Wrap a closure as a shared transport.
pub fn transport_fn<F, Fut>(f: F) -> Arc<dyn Transport>
where
    F: Fn(String, TransportInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Response, RequestError>> + Send + 'static,
{
    Arc::new(f)
}

// ── Request envelope ──────────────────────────────────────────────────

/// Request body as handed to the transport.
pub enum TransportBody {
    Full(Bytes),
    /// A body produced incrementally, with its total length.
    Stream { stream: ByteStream, length: u64 },
}

impl TransportBody {
    pub fn len(&self) -> u64 {
        match self {
            TransportBody::Full(bytes) => bytes.len() as u64,
            TransportBody::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect the body into memory.
    pub async fn collect(self) -> std::result::Result<Bytes, RequestError> {
        match self {
            TransportBody::Full(bytes) => Ok(bytes),
            TransportBody::Stream { mut stream, length } => {
                let mut buf = BytesMut::with_capacity(usize::try_from(length).unwrap_or(0));
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for TransportBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            TransportBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

/// Everything a transport needs besides the URL.
///
/// Pre-transport hooks receive this mutably; replacing `transport` swaps
/// the transport used for this one send.
pub struct TransportInit {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<TransportBody>,
    pub credentials: Credentials,
    pub mode: RequestMode,
    pub signal: AbortSignal,
    pub transport: Arc<dyn Transport>,
}

impl TransportInit {
    /// Clone the envelope, unless the body is a one-shot stream.
    pub fn try_clone(&self) -> Option<Self> {
        let body = match &self.body {
            None => None,
            Some(TransportBody::Full(bytes)) => Some(TransportBody::Full(bytes.clone())),
            Some(TransportBody::Stream { .. }) => return None,
        };
        Some(Self {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body,
            credentials: self.credentials,
            mode: self.mode,
            signal: self.signal.clone(),
            transport: Arc::clone(&self.transport),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl fmt::Debug for TransportInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportInit")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Build a header map from resolved name/value pairs.
pub(crate) fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(name.to_string()))?;
        map.append(name, value);
    }
    Ok(map)
}
