//! Bearer-token authentication for `courier-rs` factories.
//!
//! [`BearerAuth`] is an [`Adapter`]: attach it to a factory that has the
//! adapter feature and every request gets an `authorization: Bearer <token>`
//! header from the token source. When a request fails with 401 the
//! refresh hook runs, so the next request picks up a fresh token. The
//! failed request itself is not replayed.
//!
//! ```ignore
//! use courier_auth::BearerAuth;
//! use courier_rs::prelude::*;
//!
//! let factory = Factory::new()?.with_feature(AdapterFeature)?;
//! let tokens = TokenStore::default();
//! factory.attach_adapter(
//!     BearerAuth::new(move || tokens.current())
//!         .on_unauthorized(move |_| async move { tokens.refresh().await }),
//! )?;
//! ```

use courier_rs::engine::interceptor::{ErrorInterceptor, RequestInterceptor};
use courier_rs::features::adapters::{Adapter, PriorityOverride};
use courier_rs::{ConfigView, Intercept, RequestControl, RequestError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Default adapter name.
pub const ADAPTER_NAME: &str = "bearer-auth";

/// Runs before most adapters so later ones see the header.
pub const DEFAULT_REQUEST_PRIORITY: u32 = 100;

pub const AUTHORIZATION: &str = "authorization";

pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;
pub type RefreshHook = Arc<dyn Fn(RequestError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adds a bearer token to every request and reacts to 401s.
pub struct BearerAuth {
    name: String,
    token: TokenSource,
    refresh: Option<RefreshHook>,
    priority: PriorityOverride,
}

impl BearerAuth {
    /// Read the token from `source` on every request. `None` sends no header.
    pub fn new<F>(source: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self {
            name: ADAPTER_NAME.to_string(),
            token: Arc::new(source),
            refresh: None,
            priority: PriorityOverride::request(DEFAULT_REQUEST_PRIORITY),
        }
    }

    pub fn with_static_token(token: impl Into<String>) -> Self {
        let token = token.into();
        Self::new(move || Some(token.clone()))
    }

    /// Attach more than one instance under different names.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_priority(mut self, priority: PriorityOverride) -> Self {
        self.priority = priority;
        self
    }

    /// Called with the error whenever a request fails with 401.
    pub fn on_unauthorized<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RequestError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.refresh = Some(Arc::new(move |error| Box::pin(f(error))));
        self
    }
}

/// Set the header unless the request already carries one.
fn attach_token(source: &TokenSource, config: &ConfigView, control: &RequestControl) -> Result<()> {
    if config.header(AUTHORIZATION).is_some() {
        return Ok(());
    }
    match source() {
        Some(token) => control.set_header(AUTHORIZATION, format!("Bearer {token}")),
        None => {
            debug!("no bearer token available; sending unauthenticated");
            Ok(())
        }
    }
}

impl Adapter for BearerAuth {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> PriorityOverride {
        self.priority
    }

    fn on_attach(&self) {
        info!(adapter = %self.name, "bearer auth attached");
    }

    fn request_interceptors(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        let source = Arc::clone(&self.token);
        let interceptor: Arc<dyn RequestInterceptor> =
            Arc::new(move |config: ConfigView, control: RequestControl| {
                let outcome = attach_token(&source, &config, &control);
                async move { outcome.map(|()| Intercept::Continue) }
            });
        vec![interceptor]
    }

    fn error_interceptors(&self) -> Vec<Arc<dyn ErrorInterceptor>> {
        let Some(refresh) = self.refresh.clone() else {
            return Vec::new();
        };
        let interceptor: Arc<dyn ErrorInterceptor> =
            Arc::new(move |error: RequestError, _config: ConfigView| {
                let pending = (error.code == 401).then(|| refresh(error));
                async move {
                    if let Some(pending) = pending {
                        debug!("401 received; refreshing bearer token");
                        pending.await;
                    }
                    false
                }
            });
        vec![interceptor]
    }
}
