//! Factory defaults and the conditional-defaults DSL.

use crate::config::{Credentials, Deferred, Meta, RequestConfig};
use crate::engine::interceptor::{
    ErrorInterceptor, RequestInterceptor, ResponseInterceptorEntry, Transformer,
};
use crate::features::retry::RetryPolicy;
use crate::features::{DefaultId, FeatureCommands};
use crate::log::LogLevel;
use http::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// What is known about a request before its configuration is assembled.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub url: String,
    pub meta: Meta,
}

/// Contributes to every request's configuration.
pub trait DefaultBuilder: Send + Sync {
    fn apply(&self, config: &mut RequestConfig, info: &RequestInfo);
}

impl<F> DefaultBuilder for F
where
    F: Fn(&mut RequestConfig, &RequestInfo) + Send + Sync,
{
    fn apply(&self, config: &mut RequestConfig, info: &RequestInfo) {
        self(config, info)
    }
}

/// Predicate deciding whether conditional defaults apply to a request.
pub type Predicate = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Chainable registration of defaults, optionally gated by a predicate.
///
/// ```ignore
/// factory
///     .when(|info| info.url.starts_with("/admin"))
///     .header("x-admin", "1")
///     .timeout(Duration::from_secs(5));
/// ```
pub struct Conditional {
    commands: FeatureCommands,
    predicate: Option<Predicate>,
    registered: Vec<DefaultId>,
}

impl Conditional {
    pub(crate) fn new(commands: FeatureCommands, predicate: Option<Predicate>) -> Self {
        Self {
            commands,
            predicate,
            registered: Vec::new(),
        }
    }

    /// Register an arbitrary default under this condition.
    pub fn apply<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut RequestConfig, &RequestInfo) + Send + Sync + 'static,
    {
        let predicate = self.predicate.clone();
        let id = self.commands.add_default(Arc::new(
            move |config: &mut RequestConfig, info: &RequestInfo| {
                if predicate.as_ref().is_none_or(|p| p(info)) {
                    f(config, info);
                }
            },
        ));
        self.registered.push(id);
        self
    }

    pub fn header(self, name: impl Into<String>, value: impl Into<Deferred<String>>) -> Self {
        let (name, value) = (name.into(), value.into());
        self.apply(move |c, _| c.set_header(name.clone(), value.clone()))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.apply(move |c, _| c.set_timeout(timeout))
    }

    pub fn credentials(self, credentials: Credentials) -> Self {
        self.apply(move |c, _| c.set_credentials(credentials))
    }

    pub fn meta(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let (key, value) = (key.into(), value.into());
        self.apply(move |c, _| c.set_meta(key.clone(), value.clone()))
    }

    pub fn log_level(self, level: LogLevel) -> Self {
        self.apply(move |c, _| c.set_log_level(level))
    }

    pub fn json_type(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.apply(move |c, _| c.add_json_type(pattern.clone()))
    }

    pub fn text_type(self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.apply(move |c, _| c.add_text_type(pattern.clone()))
    }

    pub fn retry(self, policy: RetryPolicy) -> Self {
        self.apply(move |c, _| c.set_retry(Some(policy.clone())))
    }

    pub fn request_interceptor(self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.apply(move |c, _| c.add_request_interceptor(Arc::clone(&interceptor)))
    }

    pub fn response_interceptor(self, entry: ResponseInterceptorEntry) -> Self {
        self.apply(move |c, _| c.add_response_interceptor(entry.clone()))
    }

    pub fn error_interceptor(self, interceptor: Arc<dyn ErrorInterceptor>) -> Self {
        self.apply(move |c, _| c.add_error_interceptor(Arc::clone(&interceptor)))
    }

    pub fn transformer(self, transformer: Arc<dyn Transformer>) -> Self {
        self.apply(move |c, _| c.add_transformer(Arc::clone(&transformer)))
    }

    /// Handles of every default registered through this chain.
    pub fn ids(&self) -> &[DefaultId] {
        &self.registered
    }

    /// Remove every default registered through this chain.
    pub fn remove(self) {
        for id in self.registered {
            self.commands.remove_default(id);
        }
    }
}
