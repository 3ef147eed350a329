//! Server-sent events: an incremental parser and the connector seam.

use super::{ByteStream, Response};
use crate::config::Credentials;
use crate::engine::signal::AbortSignal;
use crate::error::{Error, RequestError, Result};
use crate::payload::Payload;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use http::HeaderMap;
use http::header::{ACCEPT, HeaderValue};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// One dispatched event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server named the event.
    pub event: Option<String>,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
    /// The last `id:` seen on the stream.
    pub id: Option<String>,
    /// A reconnection hint in milliseconds.
    pub retry: Option<u64>,
}

/// Parsed events as they arrive.
pub type EventStream = BoxStream<'static, std::result::Result<SseEvent, RequestError>>;

/// Future returned by [`StreamConnector::connect`].
pub type ConnectFuture = BoxFuture<'static, std::result::Result<EventStream, RequestError>>;

/// What a connector needs besides the URL.
#[derive(Debug, Clone)]
pub struct StreamInit {
    pub headers: HeaderMap,
    pub credentials: Credentials,
    pub signal: AbortSignal,
}

/// Opens an event stream.
///
/// The returned future resolves once the stream is open; its events follow
/// on the returned [`EventStream`].
pub trait StreamConnector: Send + Sync {
    fn connect(&self, url: String, init: StreamInit) -> ConnectFuture;
}

impl<F, Fut> StreamConnector for F
where
    F: Fn(String, StreamInit) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<EventStream, RequestError>> + Send + 'static,
{
    fn connect(&self, url: String, init: StreamInit) -> ConnectFuture {
        Box::pin(self(url, init))
    }
}

/// Wrap a closure as a shared connector.
pub fn connector_fn<F, Fut>(f: F) -> Arc<dyn StreamConnector>
where
    F: Fn(String, StreamInit) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<EventStream, RequestError>> + Send + 'static,
{
    Arc::new(f)
}

// ── Parser ────────────────────────────────────────────────────────────

/// Incremental `text/event-stream` parser.
///
/// Feed raw chunks with [`push`](Self::push); chunk boundaries may fall
/// anywhere, including inside a UTF-8 sequence. Handles `data`, `event`,
/// `id` and `retry` fields, comment lines, CRLF line endings and multi-line
/// data.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing unterminated event at end of stream.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse() {
                    self.retry = Some(ms);
                }
            }
            other => trace!(field = other, "ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let retry = self.retry.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.last_id.clone(),
            retry,
        })
    }
}

/// Parse a byte stream into events.
pub fn event_stream(bytes: ByteStream) -> EventStream {
    let state = (bytes, SseParser::new(), VecDeque::new(), false);
    Box::pin(stream::unfold(
        state,
        |(mut bytes, mut parser, mut queue, mut done)| async move {
            loop {
                if let Some(event) = queue.pop_front() {
                    return Some((Ok(event), (bytes, parser, queue, done)));
                }
                if done {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => queue.extend(parser.push(&chunk)),
                    Some(Err(e)) => {
                        done = true;
                        return Some((Err(e), (bytes, parser, queue, done)));
                    }
                    None => {
                        done = true;
                        queue.extend(parser.finish());
                    }
                }
            }
        },
    ))
}

// ── reqwest connector ─────────────────────────────────────────────────

/// Default [`StreamConnector`]: a GET request over `reqwest` whose body is
/// parsed as `text/event-stream`.
#[derive(Clone, Debug)]
pub struct ReqwestEventSource {
    client: reqwest::Client,
}

impl ReqwestEventSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(super::reqwest_client::DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl StreamConnector for ReqwestEventSource {
    fn connect(&self, url: String, init: StreamInit) -> ConnectFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let StreamInit {
                mut headers,
                signal,
                ..
            } = init;
            if !headers.contains_key(ACCEPT) {
                headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
            }
            debug!(%url, "opening event stream");

            let response = signal
                .guard(client.get(&url).headers(headers).send())
                .await?
                .map_err(RequestError::network)?;
            let response = Response::from_reqwest(response);

            if !response.ok() {
                let head = response.head().clone();
                let text = response.text().await.unwrap_or_default();
                return Err(RequestError::status(
                    head.status,
                    head.status_text,
                    Payload::from_message(&text),
                ));
            }
            let (_, body) = response.into_parts();
            Ok(event_stream(body))
        })
    }
}
