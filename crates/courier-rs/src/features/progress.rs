//! Upload and download progress.
//!
//! Handlers are registered per request with a throttle interval. All
//! handlers for one phase share a single emitter whose interval is the
//! smallest among them. A handler stops propagation to later handlers
//! unless it calls [`FallThrough::fall_through`].
//!
//! Percentages are floored and capped at 99 until the transfer completes;
//! the completion event reports 100 and always passes the throttle.

use super::{DownloadHandler, Feature, RequestDelegates, TransportSelector};
use crate::config::ConfigView;
use crate::error::RequestError;
use crate::factory::FactoryContext;
use crate::transport::{Response, Transport, TransportBody, TransportFuture, TransportInit};
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

pub const UPLOAD_FEATURE_NAME: &str = "upload-progress";
pub const DOWNLOAD_FEATURE_NAME: &str = "download-progress";

/// Size of the chunks an upload body is split into.
pub const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: ProgressPhase,
    /// Floored percentage; 0 while the total is unknown.
    pub percent: u8,
    pub loaded: u64,
    pub total: Option<u64>,
}

/// Passed to each handler; calling `fall_through` lets the next handler run.
#[derive(Debug, Default)]
pub struct FallThrough(AtomicBool);

impl FallThrough {
    pub fn fall_through(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    fn requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent, &FallThrough) + Send + Sync>;

/// A progress handler registered on a request.
#[derive(Clone)]
pub struct ProgressHandler {
    pub phase: ProgressPhase,
    pub throttle: Duration,
    pub callback: ProgressCallback,
}

impl ProgressHandler {
    pub fn new<F>(phase: ProgressPhase, throttle: Duration, f: F) -> Self
    where
        F: Fn(&ProgressEvent, &FallThrough) + Send + Sync + 'static,
    {
        Self {
            phase,
            throttle,
            callback: Arc::new(f),
        }
    }
}

// ── Emitter ───────────────────────────────────────────────────────────

pub(crate) struct ProgressEmitter {
    phase: ProgressPhase,
    handlers: Vec<ProgressHandler>,
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressEmitter {
    /// `None` when the request has no handlers for `phase`.
    pub(crate) fn for_phase(phase: ProgressPhase, config: &ConfigView) -> Option<Self> {
        let handlers: Vec<ProgressHandler> = config
            .shared()
            .lock()
            .progress_handlers
            .iter()
            .filter(|h| h.phase == phase)
            .cloned()
            .collect();
        let interval = handlers.iter().map(|h| h.throttle).min()?;
        Some(Self {
            phase,
            handlers,
            interval,
            last: None,
        })
    }

    /// An intermediate event, subject to the throttle.
    pub(crate) fn progress(&mut self, loaded: u64, total: Option<u64>) {
        let now = Instant::now();
        if let Some(last) = self.last
            && now.duration_since(last) < self.interval
        {
            return;
        }
        self.last = Some(now);
        let percent = match total {
            Some(total) if total > 0 => (loaded.saturating_mul(100) / total).min(99) as u8,
            _ => 0,
        };
        self.dispatch(loaded, total, percent);
    }

    /// The initial 0% event; bypasses the throttle.
    pub(crate) fn start(&mut self, total: Option<u64>) {
        self.last = Some(Instant::now());
        self.dispatch(0, total, 0);
    }

    /// The final 100% event; bypasses the throttle.
    pub(crate) fn complete(&mut self, loaded: u64, total: Option<u64>) {
        self.last = Some(Instant::now());
        self.dispatch(loaded, total, 100);
    }

    fn dispatch(&self, loaded: u64, total: Option<u64>, percent: u8) {
        let event = ProgressEvent {
            phase: self.phase,
            percent,
            loaded,
            total,
        };
        trace!(phase = ?event.phase, percent, loaded, "progress");
        for handler in &self.handlers {
            let fall_through = FallThrough::default();
            (handler.callback)(&event, &fall_through);
            if !fall_through.requested() {
                break;
            }
        }
    }
}

// ── Download ──────────────────────────────────────────────────────────

/// Reads binary bodies chunk by chunk, reporting download progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadProgressFeature;

impl Feature for DownloadProgressFeature {
    fn name(&self) -> &str {
        DOWNLOAD_FEATURE_NAME
    }

    fn request_delegates(&self, _ctx: &FactoryContext) -> RequestDelegates {
        RequestDelegates {
            download: Some(Arc::new(StreamedDownload)),
            ..Default::default()
        }
    }
}

struct StreamedDownload;

impl DownloadHandler for StreamedDownload {
    fn read(
        &self,
        response: Response,
        config: ConfigView,
    ) -> BoxFuture<'static, Result<Bytes, RequestError>> {
        Box::pin(async move {
            let total = response.head().content_length();
            let signal = config.signal();
            let mut emitter = ProgressEmitter::for_phase(ProgressPhase::Download, &config);
            let (_, mut body) = response.into_parts();
            let mut buf = BytesMut::new();

            if let Some(emitter) = emitter.as_mut() {
                emitter.start(total);
            }
            loop {
                let next = tokio::select! {
                    biased;
                    reason = signal.aborted() => Err(reason),
                    chunk = body.next() => Ok(chunk),
                };
                match next {
                    Err(reason) => {
                        // Dropping the stream cancels the underlying read.
                        drop(body);
                        return Err(RequestError::aborted(reason.to_string()));
                    }
                    Ok(None) => break,
                    Ok(Some(chunk)) => {
                        buf.extend_from_slice(&chunk?);
                        if let Some(emitter) = emitter.as_mut() {
                            emitter.progress(buf.len() as u64, total);
                        }
                    }
                }
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.complete(buf.len() as u64, total);
            }
            Ok(buf.freeze())
        })
    }
}

// ── Upload ────────────────────────────────────────────────────────────

/// Sends request bodies in chunks, reporting upload progress.
///
/// Only requests with upload handlers are affected; others keep the default
/// transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadProgressFeature;

impl Feature for UploadProgressFeature {
    fn name(&self) -> &str {
        UPLOAD_FEATURE_NAME
    }

    fn request_delegates(&self, _ctx: &FactoryContext) -> RequestDelegates {
        RequestDelegates {
            transport: Some(Arc::new(UploadProgressFeature)),
            ..Default::default()
        }
    }
}

impl TransportSelector for UploadProgressFeature {
    fn select(
        &self,
        default: &Arc<dyn Transport>,
        config: &ConfigView,
    ) -> Option<Arc<dyn Transport>> {
        let has_handlers = config
            .shared()
            .lock()
            .progress_handlers
            .iter()
            .any(|h| h.phase == ProgressPhase::Upload);
        has_handlers.then(|| {
            Arc::new(ChunkedUpload {
                base: Arc::clone(default),
                config: config.clone(),
            }) as Arc<dyn Transport>
        })
    }
}

struct ChunkedUpload {
    base: Arc<dyn Transport>,
    config: ConfigView,
}

impl Transport for ChunkedUpload {
    fn send(&self, url: String, mut init: TransportInit) -> TransportFuture {
        if let Some(TransportBody::Full(bytes)) = init.body.take() {
            init.body = Some(chunked_body(bytes, &self.config));
        }
        self.base.send(url, init)
    }
}

fn chunked_body(bytes: Bytes, config: &ConfigView) -> TransportBody {
    let total = bytes.len() as u64;
    let emitter = ProgressEmitter::for_phase(ProgressPhase::Upload, config);
    let chunks = stream::unfold(
        (bytes, 0usize, emitter),
        move |(bytes, offset, mut emitter)| async move {
            if offset >= bytes.len() {
                // An empty body still completes once.
                if let Some(mut emitter) = emitter.take() {
                    emitter.complete(0, Some(0));
                }
                return None;
            }
            let end = (offset + UPLOAD_CHUNK_SIZE).min(bytes.len());
            let chunk = bytes.slice(offset..end);
            let loaded = end as u64;
            if loaded == total {
                if let Some(mut emitter) = emitter.take() {
                    emitter.complete(loaded, Some(total));
                }
            } else if let Some(emitter) = emitter.as_mut() {
                emitter.progress(loaded, Some(total));
            }
            Some((Ok::<_, RequestError>(chunk), (bytes, end, emitter)))
        },
    );
    TransportBody::Stream {
        stream: Box::pin(chunks),
        length: total,
    }
}
