//! The mutation surface handed to interceptors.

use crate::body::RequestBody;
use crate::config::{ConfigView, Deferred, QueryValue, RequestConfig, SharedConfig};
use crate::engine::signal::AbortReason;
use crate::error::{Error, Result};
use crate::features::RequestHasher;
use crate::log::Logger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Lets interceptors abort, rewrite, and inspect an in-flight request.
///
/// Every URL-affecting mutation (template, path and query parameters,
/// headers, body) fails with [`Error::Finalized`] once the URL has been
/// finalized. Clones share state.
#[derive(Clone)]
pub struct RequestControl {
    shared: Arc<SharedConfig>,
    skip_transformers: Arc<AtomicBool>,
    hasher: Option<Arc<dyn RequestHasher>>,
}

impl std::fmt::Debug for RequestControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestControl")
            .field("finalized", &self.shared.final_url().is_some())
            .field("skip_transformers", &self.transformers_skipped())
            .finish_non_exhaustive()
    }
}

impl RequestControl {
    pub(crate) fn new(shared: Arc<SharedConfig>, hasher: Option<Arc<dyn RequestHasher>>) -> Self {
        Self {
            shared,
            skip_transformers: Arc::new(AtomicBool::new(false)),
            hasher,
        }
    }

    /// A read-only view of the same configuration.
    pub fn config(&self) -> ConfigView {
        ConfigView::new(Arc::clone(&self.shared))
    }

    /// Abort the request. Only the first abort has any effect.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.shared.signal().abort(AbortReason::Explicit(reason.clone())) {
            debug!(%reason, "request aborted by interceptor");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.signal().is_aborted()
    }

    fn mutate(&self, what: &'static str, f: impl FnOnce(&mut RequestConfig)) -> Result<()> {
        let mut config = self.shared.lock();
        if self.shared.final_url().is_some() {
            return Err(Error::Finalized(what));
        }
        f(&mut config);
        Ok(())
    }

    pub fn replace_url(&self, url: impl Into<String>) -> Result<()> {
        let url = url.into();
        self.mutate("replace the URL", |c| c.replace_url(url))
    }

    pub fn set_path_param(
        &self,
        name: impl Into<String>,
        value: impl Into<Deferred<String>>,
    ) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.mutate("set a path parameter", |c| c.set_path_param(name, value))
    }

    pub fn set_query_param(
        &self,
        name: impl Into<String>,
        value: impl Into<Deferred<QueryValue>>,
    ) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.mutate("set a query parameter", |c| c.set_query_param(name, value))
    }

    pub fn remove_query_param(&self, name: &str) -> Result<()> {
        self.mutate("remove a query parameter", |c| c.remove_query_param(name))
    }

    pub fn set_header(
        &self,
        name: impl Into<String>,
        value: impl Into<Deferred<String>>,
    ) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.mutate("set a header", |c| c.set_header(name, value))
    }

    pub fn remove_header(&self, name: &str) -> Result<()> {
        self.mutate("remove a header", |c| c.remove_header(name))
    }

    /// Replace (or with `None`, clear) the request body.
    pub fn replace_body(&self, body: Option<Deferred<RequestBody>>) -> Result<()> {
        self.mutate("replace the body", |c| c.set_body(body))
    }

    /// The URL as it would be composed right now, without finalizing.
    pub fn provisional_url(&self) -> Result<String> {
        self.config().provisional_url()
    }

    /// Compose and freeze the URL. Idempotent: later calls return the
    /// stored value.
    pub fn finalize_url(&self) -> Result<String> {
        if let Some(url) = self.shared.final_url() {
            return Ok(url.clone());
        }
        let url = self.config().provisional_url()?;
        let url = self.shared.set_final_url(url);
        debug!(%url, "URL finalized");
        Ok(url)
    }

    pub fn is_finalized(&self) -> bool {
        self.shared.final_url().is_some()
    }

    /// Return whatever this request produces without running transformers.
    pub fn skip_transformers(&self) {
        self.skip_transformers.store(true, Ordering::SeqCst);
    }

    pub fn transformers_skipped(&self) -> bool {
        self.skip_transformers.load(Ordering::SeqCst)
    }

    /// Stable hash of the request, if a hashing feature is registered.
    pub fn hash(&self) -> Result<String> {
        let hasher = self
            .hasher
            .as_ref()
            .ok_or_else(|| {
                Error::FeatureNotRegistered(crate::features::hash::FEATURE_NAME.into())
            })?;
        hasher.hash(&self.config())
    }

    pub fn logger(&self) -> Logger {
        self.config().logger()
    }
}
