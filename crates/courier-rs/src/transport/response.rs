//! Transport-neutral HTTP response.

use crate::error::RequestError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Response body as a stream of chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, RequestError>>;

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub status_text: String,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
        }
    }

    /// Whether the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The content type without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        let raw = self.header(CONTENT_TYPE.as_str())?;
        let essence = raw.split(';').next().unwrap_or(raw).trim();
        Some(essence.to_ascii_lowercase())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
    }
}

/// A response whose body has not been read yet.
pub struct Response {
    head: ResponseHead,
    body: ByteStream,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl Response {
    pub fn new(head: ResponseHead, body: ByteStream) -> Self {
        Self { head, body }
    }

    /// A response with an in-memory body. Sets `content-length` if absent.
    pub fn from_bytes(status: StatusCode, mut headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        if !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
        }
        Self::new(
            ResponseHead::new(status, headers),
            Box::pin(stream::once(async move { Ok::<_, RequestError>(body) })),
        )
    }

    /// A response whose body arrives in the given chunks.
    pub fn from_chunks(status: StatusCode, headers: HeaderMap, chunks: Vec<Bytes>) -> Self {
        Self::new(
            ResponseHead::new(status, headers),
            Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, RequestError>))),
        )
    }

    /// A JSON response.
    pub fn from_json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::from_bytes(status, headers, value.to_string())
    }

    /// A `text/plain` response.
    pub fn from_text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self::from_bytes(status, headers, text.into())
    }

    /// A bodiless response with the given status.
    pub fn empty(status: StatusCode) -> Self {
        Self::from_bytes(status, HeaderMap::new(), Bytes::new())
    }

    /// Override the status text.
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.head.status_text = text.into();
        self
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn ok(&self) -> bool {
        self.head.ok()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn into_parts(self) -> (ResponseHead, ByteStream) {
        (self.head, self.body)
    }

    /// The body as a chunk stream, leaving the head behind.
    pub fn into_stream(self) -> ByteStream {
        self.body
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Bytes, RequestError> {
        let mut stream = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read the whole body as UTF-8, replacing invalid sequences.
    pub async fn text(self) -> Result<String, RequestError> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read and parse the whole body as JSON.
    pub async fn json(self) -> Result<serde_json::Value, RequestError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(RequestError::network)
    }

    /// Adapt a reqwest response without reading its body.
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let head = ResponseHead::new(status, response.headers().clone());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RequestError::network));
        Self::new(head, Box::pin(body))
    }
}
