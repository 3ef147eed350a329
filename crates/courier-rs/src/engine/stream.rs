//! The server-sent-events engine.
//!
//! A [`StreamRequest`] runs the same request interceptors as a plain
//! request, then opens the stream through the factory's
//! [`StreamConnector`](crate::transport::StreamConnector). The timeout only
//! covers connecting. Once open, a background task parses each message
//! (JSON when it parses, text otherwise), runs the transformers and hands
//! the result to every listener.
//!
//! An interceptor that produces a value delivers it to the listeners once;
//! the returned [`Subscription`] is already closed.

use super::control::RequestControl;
use super::interceptor::{apply_transformers, run_error_interceptors};
use super::mode::{Plain, ResultMode, WrappedResponse};
use super::signal::{AbortReason, AbortSignal, TimeoutGuard};
use super::{ConfigOp, RequestBuilder, assemble_config, normalize, run_request_interceptors};
use crate::config::{ConfigView, RequestConfig, SharedConfig};
use crate::error::{Error, Result};
use crate::factory::FactoryContext;
use crate::factory::defaults::{DefaultBuilder, RequestInfo};
use crate::payload::Payload;
use crate::transport::{EventStream, StreamInit, header_map};
use futures::StreamExt;
use http::Method;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Receives every message of a stream.
pub trait StreamListener: Send + Sync {
    fn on_message(&self, payload: &Payload);
}

impl<F> StreamListener for F
where
    F: Fn(&Payload) + Send + Sync,
{
    fn on_message(&self, payload: &Payload) {
        self(payload)
    }
}

/// What a wrapped-mode stream request returns.
pub type WrappedSubscription = WrappedResponse<Subscription>;

/// Handle to an open (or finished) stream.
#[derive(Clone, Debug)]
pub struct Subscription {
    signal: AbortSignal,
    finished: watch::Receiver<bool>,
}

impl Subscription {
    fn closed_now(signal: AbortSignal) -> Self {
        let (_, finished) = watch::channel(true);
        Self { signal, finished }
    }

    /// Close the stream. Safe to call repeatedly, and after the stream ended.
    pub fn close(&self) {
        if self.signal.abort(AbortReason::Closed) {
            debug!("subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.finished.borrow() || self.signal.is_aborted()
    }

    /// Resolve once no more messages will be delivered.
    pub async fn closed(&self) {
        let mut finished = self.finished.clone();
        // An error means the pump is gone, which also means closed.
        let _ = finished.wait_for(|done| *done).await;
    }
}

fn fan_out(listeners: &[Arc<dyn StreamListener>], payload: &Payload) {
    for (index, listener) in listeners.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| listener.on_message(payload))).is_err() {
            warn!(listener = index, "stream listener panicked");
        }
    }
}

enum Opened {
    Produced(Payload),
    Stream(EventStream),
}

/// A one-shot server-sent-events request.
pub struct StreamRequest<M: ResultMode = Plain> {
    ctx: Arc<FactoryContext>,
    info: RequestInfo,
    ops: Mutex<Vec<ConfigOp>>,
    post_construct: Vec<Arc<dyn DefaultBuilder>>,
    listeners: Vec<Arc<dyn StreamListener>>,
    used: AtomicBool,
    signal: AbortSignal,
    _mode: PhantomData<fn() -> M>,
}

impl<M: ResultMode> std::fmt::Debug for StreamRequest<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("url", &self.info.url)
            .field("listeners", &self.listeners.len())
            .field("used", &self.used.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<M: ResultMode> RequestBuilder for StreamRequest<M> {
    fn configure<F>(mut self, op: F) -> Self
    where
        F: FnOnce(&mut RequestConfig) + Send + 'static,
    {
        self.ops
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(op));
        self
    }

    fn request_info_mut(&mut self) -> &mut RequestInfo {
        &mut self.info
    }
}

impl<M: ResultMode> StreamRequest<M> {
    pub(crate) fn new(ctx: Arc<FactoryContext>, url: String) -> Self {
        let post_construct = ctx.commands().post_construct();
        Self {
            ctx,
            info: RequestInfo {
                method: Method::GET,
                url,
                meta: Default::default(),
            },
            ops: Mutex::new(Vec::new()),
            post_construct,
            listeners: Vec::new(),
            used: AtomicBool::new(false),
            signal: AbortSignal::new(),
            _mode: PhantomData,
        }
    }

    /// Add a message listener. Listeners run in registration order.
    pub fn on_message<F>(self, f: F) -> Self
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.listener(Arc::new(f))
    }

    pub fn listener(mut self, listener: Arc<dyn StreamListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn abort_handle(&self) -> AbortSignal {
        self.signal.clone()
    }

    pub fn abort(&self, reason: impl Into<String>) {
        self.signal.abort(AbortReason::Explicit(reason.into()));
    }

    /// Open the stream. Resolves once it is open, or fails if it could not
    /// be opened.
    pub async fn execute(&self) -> M::StreamOutput {
        M::complete_stream(self.run().await)
    }

    async fn run(&self) -> Result<Subscription> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyExecuted);
        }
        let ops = std::mem::take(&mut *self.ops.lock().unwrap_or_else(|e| e.into_inner()));
        let config = assemble_config(self.ctx.commands(), &self.info, &self.post_construct, ops);
        let delegates = self.ctx.request_delegates();

        let shared = Arc::new(SharedConfig::new(config, self.signal.clone()));
        let view = ConfigView::new(Arc::clone(&shared));
        let control = RequestControl::new(shared, delegates.hasher.clone());

        let mut timeout = TimeoutGuard::arm(&self.signal, view.timeout());
        let outcome = self.open(&view, &control).await;
        timeout.clear();

        match outcome {
            Ok(Opened::Produced(payload)) => {
                fan_out(&self.listeners, &payload);
                Ok(Subscription::closed_now(self.signal.clone()))
            }
            Ok(Opened::Stream(events)) => Ok(self.pump(events, view, control)),
            Err(error) => {
                let error = normalize(error, &self.signal);
                debug!(code = error.code, message = %error.message, "stream failed to open");
                run_error_interceptors(&error, &view).await;
                Err(error.into())
            }
        }
    }

    async fn open(&self, view: &ConfigView, control: &RequestControl) -> Result<Opened> {
        if let Some(payload) = run_request_interceptors(view, control).await? {
            return Ok(Opened::Produced(payload));
        }
        let url = control.finalize_url()?;
        let init = StreamInit {
            headers: header_map(&view.headers())?,
            credentials: view.credentials(),
            signal: self.signal.clone(),
        };
        view.logger().debug("opening event stream");
        let events = self
            .signal
            .guard(self.ctx.connector().connect(url, init))
            .await??;
        Ok(Opened::Stream(events))
    }

    fn pump(
        &self,
        mut events: EventStream,
        view: ConfigView,
        control: RequestControl,
    ) -> Subscription {
        let (finished_tx, finished) = watch::channel(false);
        let listeners = self.listeners.clone();
        let signal = self.signal.clone();
        let subscription = Subscription {
            signal: signal.clone(),
            finished,
        };

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    reason = signal.aborted() => Err(reason),
                    event = events.next() => Ok(event),
                };
                match next {
                    Err(AbortReason::Closed) => break,
                    Err(reason) => {
                        let error = crate::error::RequestError::aborted(reason.to_string());
                        run_error_interceptors(&error, &view).await;
                        break;
                    }
                    Ok(None) => {
                        debug!("event stream ended");
                        break;
                    }
                    Ok(Some(Err(error))) => {
                        let error = normalize(error.into(), &signal);
                        if !matches!(signal.reason(), Some(AbortReason::Closed)) {
                            run_error_interceptors(&error, &view).await;
                        }
                        break;
                    }
                    Ok(Some(Ok(event))) => {
                        trace!(event = ?event.event, bytes = event.data.len(), "stream message");
                        let payload = Payload::from_message(&event.data);
                        let payload = if control.transformers_skipped() {
                            payload
                        } else {
                            match apply_transformers(payload, &view) {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(
                                        error = %e,
                                        "dropping stream message that failed to transform"
                                    );
                                    continue;
                                }
                            }
                        };
                        fan_out(&listeners, &payload);
                    }
                }
            }
            // Dropping the event stream closes the connection.
            drop(events);
            let _ = finished_tx.send(true);
        });
        subscription
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explode(_: &Payload) {
        panic!("listener failure");
    }

    #[test]
    fn panicking_listener_does_not_block_later_ones() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let first: Arc<dyn StreamListener> = Arc::new(explode);
        let second: Arc<dyn StreamListener> =
            Arc::new(move |p: &Payload| sink.lock().unwrap().push(p.clone()));
        let listeners = vec![first, second];
        fan_out(&listeners, &Payload::Text("hello".into()));
        assert_eq!(*seen.lock().unwrap(), vec![Payload::Text("hello".into())]);
    }

    #[tokio::test]
    async fn closed_subscription_is_idempotent() {
        let subscription = Subscription::closed_now(AbortSignal::new());
        assert!(subscription.is_closed());
        subscription.closed().await;
        subscription.close();
        subscription.close();
        assert!(subscription.is_closed());
    }
}
