//! Automatic retry around the transport.
//!
//! The policy for an execution is resolved in order of precedence:
//!
//! 1. an explicit per-request policy (`RequestBuilder::retry`);
//! 2. a metadata-driven policy, when the feature's evaluator accepts the
//!    request's metadata;
//! 3. the feature's defaults.
//!
//! Each attempt goes through the inner transport with a fresh copy of the
//! envelope. Between attempts the decorator sleeps for the policy's delay;
//! the sleep ends early (with the abort error) if the request is aborted,
//! and no attempt starts once the signal has fired.

use super::{Feature, RequestDelegates, TransportDecorator};
use crate::config::{ConfigView, Meta};
use crate::error::RequestError;
use crate::factory::FactoryContext;
use crate::transport::{ResponseHead, Transport, TransportFuture, TransportInit};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const FEATURE_NAME: &str = "retry";

// ── Policy ────────────────────────────────────────────────────────────

/// What the retry condition sees after each attempt.
pub struct RetryContext<'a> {
    /// The transport error, if the attempt failed.
    pub error: Option<&'a RequestError>,
    /// The response, if the attempt produced one (of any status).
    pub response: Option<&'a ResponseHead>,
    /// 1-based number of the attempt that just finished.
    pub attempt: u32,
    pub policy: &'a RetryPolicy,
    pub config: &'a ConfigView,
}

pub type RetryCondition = Arc<dyn Fn(&RetryContext<'_>) -> bool + Send + Sync>;
pub type DelayFn = Arc<dyn Fn(u32, Option<&RequestError>) -> Duration + Send + Sync>;
pub type RetryCallback = Arc<dyn Fn(u32, Option<&RequestError>, Duration) + Send + Sync>;
pub type RetrySuccessCallback = Arc<dyn Fn(u32, &ResponseHead) + Send + Sync>;
pub type ExhaustedCallback = Arc<dyn Fn(&RequestError, u32) + Send + Sync>;
pub type MetaEvaluator = Arc<dyn Fn(&Meta) -> bool + Send + Sync>;

/// Delay before a retry, given the 1-based retry number.
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(Duration),
    Computed(DelayFn),
}

impl RetryDelay {
    pub fn delay_for(&self, retry: u32, error: Option<&RequestError>) -> Duration {
        match self {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Computed(f) => f(retry, error),
        }
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            RetryDelay::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// How many times to retry, how long to wait, and when.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub attempts: u32,
    pub delay: RetryDelay,
    condition: Option<RetryCondition>,
    on_retry: Option<RetryCallback>,
    on_retry_success: Option<RetrySuccessCallback>,
    on_max_attempts_exceeded: Option<ExhaustedCallback>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("custom_condition", &self.condition.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

impl RetryPolicy {
    /// A policy with `attempts` retries and exponential backoff from 500ms.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            delay: ExponentialBackoff::default().into(),
            condition: None,
            on_retry: None,
            on_retry_success: None,
            on_max_attempts_exceeded: None,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = RetryDelay::Fixed(delay);
        self
    }

    pub fn backoff(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }

    /// Replace the default condition (retry transport errors that are not aborts).
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Also retry responses with a transient status (408, 429, 500, 502, 503, 504).
    pub fn retry_transient_statuses(self) -> Self {
        self.condition(|ctx| {
            default_condition(ctx)
                || ctx
                    .response
                    .is_some_and(|r| is_transient_status(r.status.as_u16()))
        })
    }

    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, Option<&RequestError>, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(f));
        self
    }

    /// Called with the number of retries it took once an attempt succeeds.
    pub fn on_retry_success<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &ResponseHead) + Send + Sync + 'static,
    {
        self.on_retry_success = Some(Arc::new(f));
        self
    }

    /// Called with the last error and the retry budget when retries run out.
    pub fn on_max_attempts_exceeded<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestError, u32) + Send + Sync + 'static,
    {
        self.on_max_attempts_exceeded = Some(Arc::new(f));
        self
    }

    pub fn should_retry(&self, ctx: &RetryContext<'_>) -> bool {
        match &self.condition {
            Some(condition) => condition(ctx),
            None => default_condition(ctx),
        }
    }
}

fn default_condition(ctx: &RetryContext<'_>) -> bool {
    ctx.error.is_some_and(|e| !e.is_aborted())
}

/// Statuses worth retrying: timeouts, rate limits and gateway failures.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

// ── Backoff helpers ───────────────────────────────────────────────────

/// Exponential backoff with an optional ±10% jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl ExponentialBackoff {
    /// Delay before the given 1-based retry.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());

        if self.jitter {
            // Deterministic spread by retry number; keeps the crate free of an RNG.
            let factor = match retry % 4 {
                0 => 0.95,
                1 => 1.05,
                2 => 0.90,
                _ => 1.10,
            };
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl From<ExponentialBackoff> for RetryDelay {
    fn from(backoff: ExponentialBackoff) -> Self {
        RetryDelay::Computed(Arc::new(move |retry: u32, _: Option<&RequestError>| {
            backoff.delay_for_attempt(retry)
        }))
    }
}

/// `initial * multiplier^(retry-1)`, capped at `max`, with jitter.
pub fn exponential_backoff(initial: Duration, multiplier: f64, max: Duration) -> RetryDelay {
    ExponentialBackoff {
        initial,
        multiplier,
        max,
        jitter: true,
    }
    .into()
}

/// `step * retry`, capped at `max`.
pub fn linear_backoff(step: Duration, max: Duration) -> RetryDelay {
    RetryDelay::Computed(Arc::new(move |retry: u32, _: Option<&RequestError>| {
        step.saturating_mul(retry).min(max)
    }))
}

// ── Feature ───────────────────────────────────────────────────────────

/// Wraps every execution's transport in a retry loop.
#[derive(Clone, Default)]
pub struct RetryFeature {
    defaults: RetryPolicy,
    meta_policy: Option<(MetaEvaluator, RetryPolicy)>,
}

impl RetryFeature {
    pub fn new(defaults: RetryPolicy) -> Self {
        Self {
            defaults,
            meta_policy: None,
        }
    }

    /// Use `policy` for requests whose metadata satisfies `evaluator`.
    pub fn with_meta_policy<F>(mut self, evaluator: F, policy: RetryPolicy) -> Self
    where
        F: Fn(&Meta) -> bool + Send + Sync + 'static,
    {
        self.meta_policy = Some((Arc::new(evaluator), policy));
        self
    }

    /// The effective policy for one execution.
    pub fn resolve(&self, config: &ConfigView) -> RetryPolicy {
        let explicit = config.retry_policy();
        let from_meta = self.meta_policy.as_ref().and_then(|(evaluator, policy)| {
            evaluator(&config.meta()).then(|| policy.clone())
        });
        match (explicit, from_meta) {
            (Some(explicit), Some(_)) => {
                warn!("explicit retry policy overrides the metadata-driven policy");
                explicit
            }
            (Some(explicit), None) => explicit,
            (None, Some(from_meta)) => from_meta,
            (None, None) => self.defaults.clone(),
        }
    }
}

impl Feature for RetryFeature {
    fn name(&self) -> &str {
        FEATURE_NAME
    }

    fn request_delegates(&self, _ctx: &FactoryContext) -> RequestDelegates {
        RequestDelegates {
            decorators: vec![Arc::new(self.clone())],
            ..Default::default()
        }
    }
}

impl TransportDecorator for RetryFeature {
    fn decorate(&self, inner: Arc<dyn Transport>, config: &ConfigView) -> Arc<dyn Transport> {
        let policy = self.resolve(config);
        if policy.attempts == 0 {
            return inner;
        }
        Arc::new(RetryTransport {
            inner,
            policy,
            config: config.clone(),
        })
    }
}

struct RetryTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
    config: ConfigView,
}

impl Transport for RetryTransport {
    fn send(&self, url: String, init: TransportInit) -> TransportFuture {
        let inner = Arc::clone(&self.inner);
        let policy = self.policy.clone();
        let config = self.config.clone();
        Box::pin(async move {
            let signal = init.signal.clone();
            let template = init;
            let mut retries = 0u32;
            loop {
                let attempt_init = match template.try_clone() {
                    Some(attempt_init) => attempt_init,
                    None => {
                        warn!(
                            %url,
                            "streamed request body cannot be replayed; sending without retry"
                        );
                        return inner.send(url, template).await;
                    }
                };
                let outcome = inner.send(url.clone(), attempt_init).await;

                let (error, head) = match &outcome {
                    Ok(response) => (None, Some(response.head().clone())),
                    Err(e) => (Some(e.clone()), None),
                };
                let wants_retry = !signal.is_aborted()
                    && policy.should_retry(&RetryContext {
                        error: error.as_ref(),
                        response: head.as_ref(),
                        attempt: retries + 1,
                        policy: &policy,
                        config: &config,
                    });

                if !wants_retry {
                    if retries > 0
                        && let (Ok(response), Some(cb)) = (&outcome, &policy.on_retry_success)
                    {
                        cb(retries, response.head());
                    }
                    return outcome;
                }
                if retries >= policy.attempts {
                    if let (Some(err), Some(cb)) = (&error, &policy.on_max_attempts_exceeded) {
                        cb(err, policy.attempts);
                    }
                    debug!(%url, attempts = policy.attempts, "retries exhausted");
                    return outcome;
                }

                retries += 1;
                let delay = policy.delay.delay_for(retries, error.as_ref());
                if let Some(cb) = &policy.on_retry {
                    cb(retries, error.as_ref(), delay);
                }
                debug!(
                    %url,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                drop(outcome);
                signal.guard(tokio::time::sleep(delay)).await?;
            }
        })
    }
}
