//! The request execution engine.
//!
//! One [`Request`] runs exactly once through this pipeline:
//!
//! 1. Assemble the configuration: factory defaults, post-construction
//!    hooks, request metadata, then the request's own builder calls.
//! 2. Arm the timeout.
//! 3. Run request interceptors in order. One that produces a value ends
//!    the request without touching the network.
//! 4. Encode the body, fill in `content-type` and `accept`.
//! 5. Finalize the URL. From here on URL, header and body mutations fail.
//! 6. Resolve the transport (feature selection, then decorators), run
//!    pre-transport hooks, send.
//! 7. Run response interceptors with the response head.
//! 8. Non-2xx becomes a status error. 204 and `ignore_body` yield
//!    [`Payload::Empty`]. Otherwise the body is read by MIME class and run
//!    through the transformers.
//!
//! Every failure is normalized to a [`RequestError`] and handed to the
//! error interceptors before it is returned.

pub mod control;
pub mod interceptor;
pub mod mode;
pub mod signal;
pub mod stream;

pub use control::RequestControl;
pub use interceptor::{
    ErrorInterceptor, Intercept, InterceptFuture, RequestInterceptor, ResponseInterceptor,
    ResponseInterceptorEntry, Transformer,
};
pub use mode::{Plain, ResultMode, Wrapped, WrappedResponse};
pub use signal::{AbortReason, AbortSignal};
pub use stream::{StreamListener, StreamRequest, Subscription, WrappedSubscription};

use crate::body::RequestBody;
use crate::config::{
    ConfigView, Credentials, Deferred, QueryValue, RequestConfig, RequestMode, SharedConfig,
};
use crate::error::{Error, RequestError, Result};
use crate::factory::FactoryContext;
use crate::factory::defaults::{DefaultBuilder, RequestInfo};
use crate::features::progress::{FallThrough, ProgressEvent, ProgressHandler, ProgressPhase};
use crate::features::retry::RetryPolicy;
use crate::features::{FeatureCommands, RequestDelegates};
use crate::log::LogLevel;
use crate::payload::Payload;
use crate::transport::{Response, ResponseHead, TransportBody, TransportInit, header_map};
use http::{Method, StatusCode};
use interceptor::{apply_transformers, run_error_interceptors};
use regex::RegexSet;
use serde::Serialize;
use serde_json::Value;
use signal::TimeoutGuard;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub(crate) type ConfigOp = Box<dyn FnOnce(&mut RequestConfig) + Send>;

// ── Builder surface ───────────────────────────────────────────────────

/// Builder methods shared by [`Request`] and [`StreamRequest`].
///
/// Everything except [`meta`](Self::meta) is recorded and applied when the
/// request executes, after the factory defaults, so per-request settings
/// win. Metadata is recorded eagerly because `when` predicates read it.
pub trait RequestBuilder: Sized {
    /// Record an arbitrary configuration change.
    fn configure<F>(self, op: F) -> Self
    where
        F: FnOnce(&mut RequestConfig) + Send + 'static;

    fn request_info_mut(&mut self) -> &mut RequestInfo;

    fn header(self, name: impl Into<String>, value: impl Into<Deferred<String>>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.configure(move |c| c.set_header(name, value))
    }

    /// A header computed at read time; `None` drops it.
    fn computed_header<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ConfigView) -> Option<String> + Send + Sync + 'static,
    {
        self.header(name, Deferred::computed(f))
    }

    fn remove_header(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.configure(move |c| c.remove_header(&name))
    }

    /// Value for a `{{name}}` placeholder in the URL template.
    fn path_param(self, name: impl Into<String>, value: impl Into<Deferred<String>>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.configure(move |c| c.set_path_param(name, value))
    }

    fn query(self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        let (name, value) = (name.into(), Deferred::Literal(value.into()));
        self.configure(move |c| c.set_query_param(name, value))
    }

    fn computed_query<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ConfigView) -> Option<QueryValue> + Send + Sync + 'static,
    {
        let (name, value) = (name.into(), Deferred::computed(f));
        self.configure(move |c| c.set_query_param(name, value))
    }

    fn body(self, body: impl Into<Deferred<RequestBody>>) -> Self {
        let body = body.into();
        self.configure(move |c| c.set_body(Some(body)))
    }

    /// Serialize `value` as a JSON body.
    fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = RequestBody::json(value)?;
        Ok(self.body(body))
    }

    /// A body produced after request interceptors have run.
    fn computed_body<F>(self, f: F) -> Self
    where
        F: Fn(&ConfigView) -> Option<RequestBody> + Send + Sync + 'static,
    {
        self.body(Deferred::computed(f))
    }

    fn timeout(self, timeout: Duration) -> Self {
        self.configure(move |c| c.set_timeout(timeout))
    }

    fn credentials(self, credentials: Credentials) -> Self {
        self.configure(move |c| c.set_credentials(credentials))
    }

    fn mode(self, mode: RequestMode) -> Self {
        self.configure(move |c| c.set_mode(mode))
    }

    fn accept(self, mime: impl Into<String>) -> Self {
        let mime = mime.into();
        self.configure(move |c| c.add_accept(mime))
    }

    /// Add a content-type regex that selects JSON parsing.
    fn json_type(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.configure(move |c| c.add_json_type(pattern))
    }

    /// Add a content-type regex that selects text decoding.
    fn text_type(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.configure(move |c| c.add_text_type(pattern))
    }

    fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request_info_mut().meta.insert(key.into(), value.into());
        self
    }

    fn log_level(self, level: LogLevel) -> Self {
        self.configure(move |c| c.set_log_level(level))
    }

    /// Per-request retry policy; used when the retry feature is registered.
    fn retry(self, policy: RetryPolicy) -> Self {
        self.configure(move |c| c.set_retry(Some(policy)))
    }

    /// Resolve with [`Payload::Empty`] without reading the body.
    fn ignore_body(self) -> Self {
        self.configure(|c| c.set_ignore_body(true))
    }

    fn on_request<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ConfigView, RequestControl) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Intercept>> + Send + 'static,
    {
        self.request_interceptor(Arc::new(f))
    }

    fn request_interceptor(self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.configure(move |c| c.add_request_interceptor(interceptor))
    }

    fn on_response<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ConfigView, ResponseHead, RequestControl) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Intercept>> + Send + 'static,
    {
        self.response_interceptor(ResponseInterceptorEntry::new(Arc::new(f)))
    }

    /// Like [`on_response`](Self::on_response), but a produced value skips
    /// the transformers.
    fn on_response_untransformed<F, Fut>(self, f: F) -> Self
    where
        F: Fn(ConfigView, ResponseHead, RequestControl) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Intercept>> + Send + 'static,
    {
        self.response_interceptor(ResponseInterceptorEntry::untransformed(Arc::new(f)))
    }

    fn response_interceptor(self, entry: ResponseInterceptorEntry) -> Self {
        self.configure(move |c| c.add_response_interceptor(entry))
    }

    fn on_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RequestError, ConfigView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.error_interceptor(Arc::new(f))
    }

    fn error_interceptor(self, interceptor: Arc<dyn ErrorInterceptor>) -> Self {
        self.configure(move |c| c.add_error_interceptor(interceptor))
    }

    fn transform<F>(self, f: F) -> Self
    where
        F: Fn(Payload, &ConfigView) -> Result<Payload> + Send + Sync + 'static,
    {
        self.transformer(Arc::new(f))
    }

    fn transformer(self, transformer: Arc<dyn Transformer>) -> Self {
        self.configure(move |c| c.add_transformer(transformer))
    }

    fn on_upload_progress<F>(self, throttle: Duration, f: F) -> Self
    where
        F: Fn(&ProgressEvent, &FallThrough) + Send + Sync + 'static,
    {
        let handler = ProgressHandler::new(ProgressPhase::Upload, throttle, f);
        self.configure(move |c| c.add_progress_handler(handler))
    }

    fn on_download_progress<F>(self, throttle: Duration, f: F) -> Self
    where
        F: Fn(&ProgressEvent, &FallThrough) + Send + Sync + 'static,
    {
        let handler = ProgressHandler::new(ProgressPhase::Download, throttle, f);
        self.configure(move |c| c.add_progress_handler(handler))
    }
}

// ── Shared execution helpers ──────────────────────────────────────────

/// Build the configuration a request executes with.
pub(crate) fn assemble_config(
    commands: &FeatureCommands,
    info: &RequestInfo,
    post_construct: &[Arc<dyn DefaultBuilder>],
    ops: Vec<ConfigOp>,
) -> RequestConfig {
    let mut config = RequestConfig::new(info.method.clone(), info.url.clone());
    for builder in commands.defaults() {
        builder.apply(&mut config, info);
    }
    for hook in post_construct {
        hook.apply(&mut config, info);
    }
    config.merge_meta(info.meta.clone());
    for op in ops {
        op(&mut config);
    }
    config
}

/// Map any failure to its structured form.
///
/// Once the signal has fired, everything except a status error reports as
/// an abort, whatever the transport happened to return.
pub(crate) fn normalize(error: Error, signal: &AbortSignal) -> RequestError {
    let error = RequestError::from_error(error);
    if error.is_status() || error.is_aborted() {
        return error;
    }
    match signal.reason() {
        Some(reason) => RequestError::aborted(reason.to_string()),
        None => error,
    }
}

fn check_aborted(signal: &AbortSignal) -> Result<()> {
    match signal.reason() {
        Some(reason) => Err(RequestError::aborted(reason.to_string()).into()),
        None => Ok(()),
    }
}

/// Run request interceptors. `Some` means one of them produced the result.
pub(crate) async fn run_request_interceptors(
    view: &ConfigView,
    control: &RequestControl,
) -> Result<Option<Payload>> {
    let signal = view.signal();
    let interceptors = view.shared().lock().request_interceptors.clone();
    for (index, interceptor) in interceptors.iter().enumerate() {
        let decision = signal
            .guard(interceptor.intercept(view.clone(), control.clone()))
            .await??;
        if let Intercept::Produce(payload) = decision {
            trace!(index, "request interceptor produced the result");
            return finish(payload, view, control).map(Some);
        }
        check_aborted(&signal)?;
    }
    Ok(None)
}

/// Apply transformers unless an interceptor opted out.
pub(crate) fn finish(
    payload: Payload,
    view: &ConfigView,
    control: &RequestControl,
) -> Result<Payload> {
    if control.transformers_skipped() {
        return Ok(payload);
    }
    apply_transformers(payload, view)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyClass {
    Json,
    Text,
    Binary,
}

fn pattern_set(patterns: &[String]) -> Result<RegexSet> {
    RegexSet::new(patterns).map_err(|e| Error::Config(format!("invalid MIME pattern: {e}")))
}

/// JSON patterns are tried before text patterns; unmatched types are binary.
fn classify(head: &ResponseHead, view: &ConfigView) -> Result<BodyClass> {
    let Some(content_type) = head.content_type() else {
        return Ok(BodyClass::Binary);
    };
    if pattern_set(&view.json_types())?.is_match(&content_type) {
        Ok(BodyClass::Json)
    } else if pattern_set(&view.text_types())?.is_match(&content_type) {
        Ok(BodyClass::Text)
    } else {
        Ok(BodyClass::Binary)
    }
}

/// Best-effort parse of a non-2xx body for the error context.
async fn read_error_body(response: Response, view: &ConfigView) -> Payload {
    let class = classify(response.head(), view).unwrap_or(BodyClass::Text);
    let Ok(Ok(bytes)) = view.signal().guard(response.bytes()).await else {
        return Payload::Empty;
    };
    if bytes.is_empty() {
        return Payload::Empty;
    }
    match class {
        BodyClass::Json => serde_json::from_slice(&bytes)
            .map(Payload::Json)
            .unwrap_or_else(|_| Payload::Text(String::from_utf8_lossy(&bytes).into_owned())),
        BodyClass::Text => Payload::Text(String::from_utf8_lossy(&bytes).into_owned()),
        BodyClass::Binary => Payload::Binary(bytes),
    }
}

// ── Request ───────────────────────────────────────────────────────────

/// A one-shot HTTP request.
///
/// Built by a [`Factory`](crate::factory::Factory), configured through
/// [`RequestBuilder`], run with [`execute`](Self::execute). A second
/// `execute` fails with [`Error::AlreadyExecuted`].
pub struct Request<M: ResultMode = Plain> {
    ctx: Arc<FactoryContext>,
    info: RequestInfo,
    ops: Mutex<Vec<ConfigOp>>,
    post_construct: Vec<Arc<dyn DefaultBuilder>>,
    used: AtomicBool,
    signal: AbortSignal,
    _mode: PhantomData<fn() -> M>,
}

impl<M: ResultMode> std::fmt::Debug for Request<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.info.method)
            .field("url", &self.info.url)
            .field("used", &self.used.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<M: ResultMode> RequestBuilder for Request<M> {
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

impl<M: ResultMode> Request<M> {
    pub(crate) fn new(ctx: Arc<FactoryContext>, method: Method, url: String) -> Self {
        let post_construct = ctx.commands().post_construct();
        Self {
            ctx,
            info: RequestInfo {
                method,
                url,
                meta: Default::default(),
            },
            ops: Mutex::new(Vec::new()),
            post_construct,
            used: AtomicBool::new(false),
            signal: AbortSignal::new(),
            _mode: PhantomData,
        }
    }

    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    /// The request's abort signal, for aborting from another task.
    pub fn abort_handle(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort the request. Only the first abort has any effect.
    pub fn abort(&self, reason: impl Into<String>) {
        self.signal.abort(AbortReason::Explicit(reason.into()));
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    /// Run the request.
    pub async fn execute(&self) -> M::Output {
        M::complete(self.run().await)
    }

    async fn run(&self) -> Result<Payload> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyExecuted);
        }
        let ops = std::mem::take(&mut *self.ops.lock().unwrap_or_else(|e| e.into_inner()));
        let config = assemble_config(self.ctx.commands(), &self.info, &self.post_construct, ops);
        let delegates = self.ctx.request_delegates();

        let shared = Arc::new(SharedConfig::new(config, self.signal.clone()));
        let view = ConfigView::new(Arc::clone(&shared));
        let control = RequestControl::new(shared, delegates.hasher.clone());
        let logger = view.logger();

        let started = Instant::now();
        let mut timeout = TimeoutGuard::arm(&self.signal, view.timeout());
        let outcome = self.pipeline(&delegates, &view, &control).await;
        timeout.clear();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(payload) => {
                logger.debug(format_args!("completed in {elapsed_ms}ms"));
                Ok(payload)
            }
            Err(error) => {
                let error = normalize(error, &self.signal);
                debug!(code = error.code, message = %error.message, elapsed_ms, "request failed");
                run_error_interceptors(&error, &view).await;
                Err(error.into())
            }
        }
    }

    async fn pipeline(
        &self,
        delegates: &RequestDelegates,
        view: &ConfigView,
        control: &RequestControl,
    ) -> Result<Payload> {
        let signal = &self.signal;
        check_aborted(signal)?;

        if let Some(payload) = run_request_interceptors(view, control).await? {
            return Ok(payload);
        }

        // Body and derived headers, read only after every interceptor ran.
        let body = view.body().map(|body| body.encode()).transpose()?;
        {
            let mut config = view.shared().lock();
            if let Some(body) = &body
                && config.header_entry("content-type").is_none()
            {
                config.set_header("content-type", body.content_type);
            }
            if !config.accept().is_empty() && config.header_entry("accept").is_none() {
                let accept = config.accept().join(", ");
                config.set_header("accept", accept);
            }
        }

        let url = control.finalize_url()?;
        let transport = delegates.resolve_transport(self.ctx.transport(), view);
        let mut init = TransportInit {
            method: view.method(),
            headers: header_map(&view.headers())?,
            body: body.map(|body| TransportBody::Full(body.bytes)),
            credentials: view.credentials(),
            mode: view.mode(),
            signal: signal.clone(),
            transport,
        };
        for hook in self.ctx.commands().pre_transport() {
            hook.before_send(&mut init, view);
        }

        let logger = view.logger();
        logger.debug(format_args!(
            "sending {} bytes",
            init.body.as_ref().map_or(0, TransportBody::len)
        ));
        let started = Instant::now();
        let transport = Arc::clone(&init.transport);
        let response = signal.guard(transport.send(url, init)).await??;
        let head = response.head().clone();
        logger.debug(format_args!(
            "{} {} in {}ms",
            head.status.as_u16(),
            head.status_text,
            started.elapsed().as_millis()
        ));

        let entries = view.shared().lock().response_interceptors.clone();
        for entry in entries {
            let decision = signal
                .guard(entry.interceptor.intercept(view.clone(), head.clone(), control.clone()))
                .await??;
            if let Intercept::Produce(payload) = decision {
                if entry.skip_transformers {
                    control.skip_transformers();
                }
                return finish(payload, view, control);
            }
            check_aborted(signal)?;
        }

        if !head.ok() {
            let body = read_error_body(response, view).await;
            check_aborted(signal)?;
            return Err(RequestError::status(head.status, head.status_text.clone(), body).into());
        }
        if head.status == StatusCode::NO_CONTENT || view.ignore_body() {
            return Ok(Payload::Empty);
        }

        let payload = match classify(&head, view)? {
            BodyClass::Json => {
                let bytes = signal.guard(response.bytes()).await??;
                if bytes.is_empty() {
                    Payload::Empty
                } else {
                    Payload::Json(serde_json::from_slice(&bytes).map_err(RequestError::network)?)
                }
            }
            BodyClass::Text => {
                let text = signal.guard(response.text()).await??;
                Payload::Text(text)
            }
            BodyClass::Binary => {
                let has_handlers = view
                    .shared()
                    .lock()
                    .progress_handlers
                    .iter()
                    .any(|h| h.phase == ProgressPhase::Download);
                let bytes = match &delegates.download {
                    Some(download) if has_handlers => download.read(response, view.clone()).await?,
                    _ => signal.guard(response.bytes()).await??,
                };
                Payload::Binary(bytes)
            }
        };
        finish(payload, view, control)
    }
}
