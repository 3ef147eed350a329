//! The request factory.
//!
//! A [`Factory`] owns everything requests share: the default transport and
//! stream connector, the base URL, registered features and their delegates,
//! and the list of default builders. Requests hold the factory's context by
//! `Arc`, so defaults and adapters registered after a request was built
//! still apply when it executes.
//!
//! ```ignore
//! let factory = Factory::builder()
//!     .with_base_url("https://api.example.com")
//!     .build()?;
//! factory.use_feature(RetryFeature::new(RetryPolicy::new(2)))?;
//! factory.when(|info| info.url.contains("/admin")).header("x-admin", "1");
//!
//! let user = factory.get("/users/{{id}}").path_param("id", "7").execute().await?;
//! ```

pub mod config;
pub mod defaults;

pub use config::{BackoffKind, FactoryConfig, RetrySettings};
pub use defaults::{Conditional, DefaultBuilder, Predicate, RequestInfo};

use crate::config::Deferred;
use crate::engine::Request;
use crate::engine::interceptor::{
    ErrorInterceptor, RequestInterceptor, ResponseInterceptorEntry, Transformer,
};
use crate::engine::mode::{Plain, ResultMode, Wrapped};
use crate::engine::stream::StreamRequest;
use crate::error::{Error, Result};
use crate::features::adapters::{self, Adapter, AdapterRegistry, PriorityOverride};
use crate::features::retry::RetryFeature;
use crate::features::{FactoryDelegates, Feature, FeatureCommands, RequestDelegates};
use crate::log::LogLevel;
use crate::transport::reqwest_client::DEFAULT_USER_AGENT;
use crate::transport::{ReqwestEventSource, ReqwestTransport, StreamConnector, Transport};
use crate::url::join_url;
use http::Method;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

// ── Context ───────────────────────────────────────────────────────────

/// Per-factory state shared with features and requests.
pub struct FactoryContext {
    commands: FeatureCommands,
    features: Mutex<Vec<Arc<dyn Feature>>>,
    request_delegates: Mutex<RequestDelegates>,
    factory_delegates: Mutex<FactoryDelegates>,
    transport: Arc<dyn Transport>,
    connector: Arc<dyn StreamConnector>,
    base_url: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl FactoryContext {
    pub fn commands(&self) -> &FeatureCommands {
        &self.commands
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn connector(&self) -> &Arc<dyn StreamConnector> {
        &self.connector
    }

    pub fn has_feature(&self, name: &str) -> bool {
        lock(&self.features).iter().any(|f| f.name() == name)
    }

    /// Register a feature: apply its hooks and merge its delegates.
    fn register(&self, feature: Arc<dyn Feature>) -> Result<()> {
        {
            let mut features = lock(&self.features);
            if features.iter().any(|f| f.name() == feature.name()) {
                return Err(Error::FeatureAlreadyRegistered(feature.name().to_string()));
            }
            features.push(Arc::clone(&feature));
        }
        feature.apply(self);
        let request = feature.request_delegates(self);
        let factory = feature.factory_delegates(self);
        lock(&self.request_delegates).merge(request);
        lock(&self.factory_delegates).merge(factory);
        info!(feature = feature.name(), "feature registered");
        Ok(())
    }

    /// Snapshot of the per-execution delegates.
    pub(crate) fn request_delegates(&self) -> RequestDelegates {
        lock(&self.request_delegates).clone()
    }

    pub(crate) fn factory_delegates(&self) -> FactoryDelegates {
        lock(&self.factory_delegates).clone()
    }
}

// ── Builder ───────────────────────────────────────────────────────────

/// Builds a [`Factory`]. Missing transports default to `reqwest`, sharing
/// one client between plain requests and event streams.
#[derive(Default)]
pub struct FactoryBuilder {
    transport: Option<Arc<dyn Transport>>,
    connector: Option<Arc<dyn StreamConnector>>,
    base_url: Option<String>,
    user_agent: Option<String>,
}

impl FactoryBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<Factory> {
        let (transport, connector) = match (self.transport, self.connector) {
            (Some(transport), Some(connector)) => (transport, connector),
            (transport, connector) => {
                let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
                let client = reqwest::Client::builder()
                    .user_agent(user_agent)
                    .build()
                    .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
                let transport: Arc<dyn Transport> = match transport {
                    Some(transport) => transport,
                    None => Arc::new(ReqwestTransport::from_client(client.clone())),
                };
                let connector: Arc<dyn StreamConnector> = match connector {
                    Some(connector) => connector,
                    None => Arc::new(ReqwestEventSource::from_client(client)),
                };
                (transport, connector)
            }
        };
        debug!(base_url = ?self.base_url, "building factory");
        Ok(Factory {
            ctx: Arc::new(FactoryContext {
                commands: FeatureCommands::default(),
                features: Mutex::new(Vec::new()),
                request_delegates: Mutex::new(RequestDelegates::default()),
                factory_delegates: Mutex::new(FactoryDelegates::default()),
                transport,
                connector,
                base_url: self.base_url,
            }),
            _mode: PhantomData,
        })
    }
}

// ── Factory ───────────────────────────────────────────────────────────

/// Creates requests that share defaults, features and transports.
///
/// The mode parameter decides what `execute()` returns: [`Plain`] yields a
/// `Result`, [`Wrapped`] a [`WrappedResponse`](crate::engine::mode::WrappedResponse).
/// Clones share state.
pub struct Factory<M: ResultMode = Plain> {
    ctx: Arc<FactoryContext>,
    _mode: PhantomData<fn() -> M>,
}

impl<M: ResultMode> Clone for Factory<M> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            _mode: PhantomData,
        }
    }
}

impl Factory {
    /// A factory over the default `reqwest` transport.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::default()
    }

    /// A factory configured from a [`FactoryConfig`].
    pub fn from_config(config: &FactoryConfig) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(base_url) = &config.base_url {
            builder = builder.with_base_url(base_url.clone());
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.with_user_agent(user_agent.clone());
        }
        let factory = builder.build()?;
        factory.apply_config(config)?;
        Ok(factory)
    }
}

impl<M: ResultMode> Factory<M> {
    /// Register `config`'s defaults on this factory.
    pub fn apply_config(&self, config: &FactoryConfig) -> Result<()> {
        let mut defaults = self.always();
        for (name, value) in &config.headers {
            defaults = defaults.header(name.clone(), value.clone());
        }
        if let Some(timeout) = config.timeout() {
            defaults = defaults.timeout(timeout);
        }
        if let Some(level) = config.log_level {
            defaults = defaults.log_level(level);
        }
        if let Some(credentials) = config.credentials {
            defaults = defaults.credentials(credentials);
        }
        debug!(defaults = defaults.ids().len(), "applied factory config");
        if let Some(retry) = &config.retry {
            self.use_feature(RetryFeature::new(retry.to_policy()))?;
        }
        Ok(())
    }

    /// The same factory, returning wrapped results.
    pub fn wrapped(&self) -> Factory<Wrapped> {
        Factory {
            ctx: Arc::clone(&self.ctx),
            _mode: PhantomData,
        }
    }

    /// The same factory, returning plain results.
    pub fn plain(&self) -> Factory<Plain> {
        Factory {
            ctx: Arc::clone(&self.ctx),
            _mode: PhantomData,
        }
    }

    pub fn context(&self) -> &Arc<FactoryContext> {
        &self.ctx
    }

    // ── Features ──────────────────────────────────────────────────────

    /// Register a feature. Names are unique per factory.
    pub fn use_feature(&self, feature: impl Feature + 'static) -> Result<()> {
        self.ctx.register(Arc::new(feature))
    }

    /// Builder-style [`use_feature`](Self::use_feature).
    pub fn with_feature(self, feature: impl Feature + 'static) -> Result<Self> {
        self.use_feature(feature)?;
        Ok(self)
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.ctx.has_feature(name)
    }

    /// Fail unless the named feature is registered.
    pub fn require_feature(&self, name: &str) -> Result<()> {
        if self.has_feature(name) {
            Ok(())
        } else {
            Err(Error::FeatureNotRegistered(name.to_string()))
        }
    }

    pub fn commands(&self) -> &FeatureCommands {
        self.ctx.commands()
    }

    // ── Defaults ──────────────────────────────────────────────────────

    /// Defaults that apply to every request.
    pub fn always(&self) -> Conditional {
        Conditional::new(self.ctx.commands().clone(), None)
    }

    /// Defaults that apply to requests matching `predicate`.
    pub fn when<F>(&self, predicate: F) -> Conditional
    where
        F: Fn(&RequestInfo) -> bool + Send + Sync + 'static,
    {
        Conditional::new(self.ctx.commands().clone(), Some(Arc::new(predicate)))
    }

    pub fn default_header(
        &self,
        name: impl Into<String>,
        value: impl Into<Deferred<String>>,
    ) -> &Self {
        self.always().header(name, value);
        self
    }

    pub fn default_timeout(&self, timeout: Duration) -> &Self {
        self.always().timeout(timeout);
        self
    }

    pub fn default_meta(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.always().meta(key, value);
        self
    }

    pub fn default_log_level(&self, level: LogLevel) -> &Self {
        self.always().log_level(level);
        self
    }

    pub fn default_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> &Self {
        self.always().request_interceptor(interceptor);
        self
    }

    pub fn default_response_interceptor(&self, entry: ResponseInterceptorEntry) -> &Self {
        self.always().response_interceptor(entry);
        self
    }

    pub fn default_error_interceptor(&self, interceptor: Arc<dyn ErrorInterceptor>) -> &Self {
        self.always().error_interceptor(interceptor);
        self
    }

    pub fn default_transformer(&self, transformer: Arc<dyn Transformer>) -> &Self {
        self.always().transformer(transformer);
        self
    }

    // ── Requests ──────────────────────────────────────────────────────

    /// A request for `url`, joined onto the base URL unless absolute.
    pub fn request(&self, method: Method, url: &str) -> Request<M> {
        let url = join_url(self.ctx.base_url(), url);
        Request::new(Arc::clone(&self.ctx), method, url)
    }

    pub fn get(&self, url: &str) -> Request<M> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Request<M> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> Request<M> {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> Request<M> {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> Request<M> {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> Request<M> {
        self.request(Method::HEAD, url)
    }

    /// A server-sent-events subscription request.
    pub fn stream(&self, url: &str) -> StreamRequest<M> {
        let url = join_url(self.ctx.base_url(), url);
        StreamRequest::new(Arc::clone(&self.ctx), url)
    }

    // ── Adapters ──────────────────────────────────────────────────────

    /// The adapter registry. Requires [`AdapterFeature`](adapters::AdapterFeature).
    pub fn adapters(&self) -> Result<Arc<AdapterRegistry>> {
        self.ctx
            .factory_delegates()
            .adapters
            .ok_or_else(|| Error::FeatureNotRegistered(adapters::FEATURE_NAME.to_string()))
    }

    pub fn attach_adapter(&self, adapter: impl Adapter + 'static) -> Result<()> {
        self.adapters()?.attach(Arc::new(adapter))
    }

    pub fn attach_adapter_with(
        &self,
        adapter: impl Adapter + 'static,
        overrides: PriorityOverride,
    ) -> Result<()> {
        self.adapters()?.attach_with(Arc::new(adapter), overrides)
    }

    pub fn detach_adapter(&self, name: &str) -> Result<()> {
        self.adapters()?.detach(name)
    }

    pub fn has_adapter(&self, name: &str) -> Result<bool> {
        Ok(self.adapters()?.has(name))
    }

    pub fn list_adapters(&self) -> Result<Vec<String>> {
        Ok(self.adapters()?.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::features::adapters::AdapterFeature;
    use crate::features::hash::RequestHashFeature;
    use crate::transport::{
        EventStream, Response, StreamInit, TransportInit, connector_fn, transport_fn,
    };

    fn factory() -> Factory {
        Factory::builder()
            .with_base_url("https://api.example.com/v1/")
            .with_transport(transport_fn(|_url: String, _init: TransportInit| async {
                Ok(Response::empty(http::StatusCode::NO_CONTENT))
            }))
            .with_connector(connector_fn(|_url: String, _init: StreamInit| async {
                Ok::<EventStream, RequestError>(Box::pin(futures::stream::empty()))
            }))
            .build()
            .unwrap()
    }

    #[test]
    fn duplicate_features_are_rejected() {
        let factory = factory();
        factory.use_feature(RequestHashFeature).unwrap();
        assert!(factory.has_feature("request-hash"));
        assert!(matches!(
            factory.use_feature(RequestHashFeature),
            Err(Error::FeatureAlreadyRegistered(_))
        ));
    }

    #[test]
    fn require_feature_fails_fast() {
        let factory = factory();
        assert!(matches!(
            factory.require_feature("retry"),
            Err(Error::FeatureNotRegistered(name)) if name == "retry"
        ));
    }

    #[test]
    fn adapters_need_the_adapter_feature() {
        let factory = factory();
        assert!(matches!(factory.adapters(), Err(Error::FeatureNotRegistered(_))));
        factory.use_feature(AdapterFeature).unwrap();
        assert_eq!(factory.list_adapters().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn config_defaults_are_registered() {
        let factory = factory();
        let config = FactoryConfig::from_json(
            r#"{"timeout_ms": 100, "headers": {"a": "1", "b": "2"}, "retry": {"attempts": 1}}"#,
        )
        .unwrap();
        factory.apply_config(&config).unwrap();
        assert_eq!(factory.commands().defaults().len(), 3);
        assert!(factory.has_feature("retry"));
    }

    #[test]
    fn wrapped_view_shares_state() {
        let factory = factory();
        let wrapped = factory.wrapped();
        wrapped.use_feature(RequestHashFeature).unwrap();
        assert!(factory.has_feature("request-hash"));
    }
}
