//! Interceptor and transformer traits.
//!
//! Every hook is a trait with a blanket impl for matching closures, so both
//! plain closures and named structs can be registered:
//!
//! - [`RequestInterceptor`]: runs before the transport; may mutate the
//!   request through [`RequestControl`] or short-circuit with
//!   [`Intercept::Produce`].
//! - [`ResponseInterceptor`]: runs after the transport, before the body is
//!   read; may short-circuit the same way.
//! - [`ErrorInterceptor`]: observes the normalized error; returning `true`
//!   stops the chain (the error is still returned to the caller).
//! - [`Transformer`]: maps the parsed payload, in registration order.

use super::control::RequestControl;
use crate::config::ConfigView;
use crate::error::{RequestError, Result};
use crate::payload::Payload;
use crate::transport::ResponseHead;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// What an interceptor decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Intercept {
    /// Carry on with the pipeline.
    Continue,
    /// Finish the request with this value; later stages are skipped.
    Produce(Payload),
}

pub type InterceptFuture = BoxFuture<'static, Result<Intercept>>;

// ── Request interceptors ──────────────────────────────────────────────

pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, config: ConfigView, control: RequestControl) -> InterceptFuture;
}

impl<F, Fut> RequestInterceptor for F
where
    F: Fn(ConfigView, RequestControl) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Intercept>> + Send + 'static,
{
    fn intercept(&self, config: ConfigView, control: RequestControl) -> InterceptFuture {
        Box::pin(self(config, control))
    }
}

// ── Response interceptors ─────────────────────────────────────────────

/// Sees the response head before the body is read; producing a value
/// replaces the parsed body.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(
        &self,
        config: ConfigView,
        response: ResponseHead,
        control: RequestControl,
    ) -> InterceptFuture;
}

impl<F, Fut> ResponseInterceptor for F
where
    F: Fn(ConfigView, ResponseHead, RequestControl) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Intercept>> + Send + 'static,
{
    fn intercept(
        &self,
        config: ConfigView,
        response: ResponseHead,
        control: RequestControl,
    ) -> InterceptFuture {
        Box::pin(self(config, response, control))
    }
}

/// A registered response interceptor.
///
/// With `skip_transformers`, a value it produces is returned as-is instead
/// of running through the transformer chain.
#[derive(Clone)]
pub struct ResponseInterceptorEntry {
    pub interceptor: Arc<dyn ResponseInterceptor>,
    pub skip_transformers: bool,
}

impl ResponseInterceptorEntry {
    pub fn new(interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        Self {
            interceptor,
            skip_transformers: false,
        }
    }

    pub fn untransformed(interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        Self {
            interceptor,
            skip_transformers: true,
        }
    }
}

// ── Error interceptors ────────────────────────────────────────────────

pub trait ErrorInterceptor: Send + Sync {
    /// Return `true` to stop later error interceptors from running.
    fn on_error(&self, error: RequestError, config: ConfigView) -> BoxFuture<'static, bool>;
}

impl<F, Fut> ErrorInterceptor for F
where
    F: Fn(RequestError, ConfigView) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn on_error(&self, error: RequestError, config: ConfigView) -> BoxFuture<'static, bool> {
        Box::pin(self(error, config))
    }
}

// ── Transformers ──────────────────────────────────────────────────────

pub trait Transformer: Send + Sync {
    fn transform(&self, payload: Payload, config: &ConfigView) -> Result<Payload>;
}

impl<F> Transformer for F
where
    F: Fn(Payload, &ConfigView) -> Result<Payload> + Send + Sync,
{
    fn transform(&self, payload: Payload, config: &ConfigView) -> Result<Payload> {
        self(payload, config)
    }
}

/// Run the transformer chain in order.
pub(crate) fn apply_transformers(payload: Payload, config: &ConfigView) -> Result<Payload> {
    let transformers = config.shared().lock().transformers.clone();
    transformers
        .iter()
        .try_fold(payload, |payload, t| t.transform(payload, config))
}

/// Run the error chain until one interceptor asks to stop.
pub(crate) async fn run_error_interceptors(error: &RequestError, config: &ConfigView) {
    let interceptors = config.shared().lock().error_interceptors.clone();
    for interceptor in interceptors {
        if interceptor.on_error(error.clone(), config.clone()).await {
            break;
        }
    }
}
