//! Read-only access to a request's live configuration.

use super::{Credentials, Meta, QueryValue, RequestConfig, RequestMode};
use crate::body::RequestBody;
use crate::engine::signal::AbortSignal;
use crate::error::Result;
use crate::features::retry::RetryPolicy;
use crate::log::{LogLevel, Logger};
use crate::url::compose_url;
use http::Method;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tracing::warn;

/// State shared by everything that touches one execution.
pub(crate) struct SharedConfig {
    config: Mutex<RequestConfig>,
    final_url: OnceLock<String>,
    signal: AbortSignal,
}

impl SharedConfig {
    pub(crate) fn new(config: RequestConfig, signal: AbortSignal) -> Self {
        Self {
            config: Mutex::new(config),
            final_url: OnceLock::new(),
            signal,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RequestConfig> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn final_url(&self) -> Option<&String> {
        self.final_url.get()
    }

    pub(crate) fn set_final_url(&self, url: String) -> String {
        // First writer wins; later callers observe the stored value.
        let _ = self.final_url.set(url);
        self.final_url.get().cloned().unwrap_or_default()
    }

    pub(crate) fn signal(&self) -> &AbortSignal {
        &self.signal
    }
}

/// Read-only view of a request's configuration.
///
/// Cheap to clone. Deferred values are evaluated on every read, so a
/// computed header sees the latest state of whatever it depends on. The
/// configuration lock is never held while a computed value runs, which
/// lets one computed value read another.
#[derive(Clone)]
pub struct ConfigView {
    shared: Arc<SharedConfig>,
}

impl std::fmt::Debug for ConfigView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigView")
            .field("config", &*self.shared.lock())
            .field("final_url", &self.shared.final_url())
            .finish()
    }
}

impl ConfigView {
    pub(crate) fn new(shared: Arc<SharedConfig>) -> Self {
        Self { shared }
    }

    /// A detached view over a standalone configuration.
    pub fn of(config: RequestConfig) -> Self {
        Self::new(Arc::new(SharedConfig::new(config, AbortSignal::new())))
    }

    pub(crate) fn shared(&self) -> &Arc<SharedConfig> {
        &self.shared
    }

    pub fn method(&self) -> Method {
        self.shared.lock().method().clone()
    }

    pub fn template_url(&self) -> String {
        self.shared.lock().template_url().to_string()
    }

    pub fn template_url_history(&self) -> Vec<String> {
        self.shared.lock().template_url_history().to_vec()
    }

    /// Evaluate one header. Names are case-insensitive.
    pub fn header(&self, name: &str) -> Option<String> {
        let entry = self.shared.lock().header_entry(name)?;
        entry.evaluate(self)
    }

    /// Evaluate every header, dropping those that compute to `None`.
    pub fn headers(&self) -> Vec<(String, String)> {
        let entries = self.shared.lock().header_entries();
        entries
            .into_iter()
            .filter_map(|(name, value)| value.evaluate(self).map(|v| (name, v)))
            .collect()
    }

    pub fn path_params(&self) -> Vec<(String, String)> {
        let entries = self.shared.lock().path_param_entries();
        entries
            .into_iter()
            .filter_map(|(name, value)| value.evaluate(self).map(|v| (name, v)))
            .collect()
    }

    pub fn query_params(&self) -> Vec<(String, QueryValue)> {
        let entries = self.shared.lock().query_param_entries();
        entries
            .into_iter()
            .filter_map(|(name, value)| value.evaluate(self).map(|v| (name, v)))
            .collect()
    }

    pub fn body(&self) -> Option<RequestBody> {
        let entry = self.shared.lock().body_entry()?;
        entry.evaluate(self)
    }

    pub fn timeout(&self) -> Duration {
        self.shared.lock().timeout()
    }

    pub fn credentials(&self) -> Credentials {
        self.shared.lock().credentials()
    }

    pub fn mode(&self) -> RequestMode {
        self.shared.lock().mode()
    }

    pub fn accept(&self) -> Vec<String> {
        self.shared.lock().accept().to_vec()
    }

    pub fn json_types(&self) -> Vec<String> {
        self.shared.lock().json_types().to_vec()
    }

    pub fn text_types(&self) -> Vec<String> {
        self.shared.lock().text_types().to_vec()
    }

    pub fn meta(&self) -> Meta {
        self.shared.lock().meta().clone()
    }

    pub fn meta_value(&self, key: &str) -> Option<Value> {
        self.shared.lock().meta().get(key).cloned()
    }

    pub fn log_level(&self) -> LogLevel {
        self.shared.lock().log_level()
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.shared.lock().retry().cloned()
    }

    pub fn ignore_body(&self) -> bool {
        self.shared.lock().ignore_body()
    }

    /// The URL as it would be composed right now. Safe to call repeatedly.
    pub fn provisional_url(&self) -> Result<String> {
        let template = self.template_url();
        compose_url(&template, &self.path_params(), &self.query_params())
    }

    /// The finalized URL.
    ///
    /// Reading it before finalization logs a warning and yields `None`.
    pub fn final_url(&self) -> Option<String> {
        let url = self.shared.final_url().cloned();
        if url.is_none() {
            warn!(template = %self.template_url(), "final URL read before finalization");
        }
        url
    }

    pub fn is_finalized(&self) -> bool {
        self.shared.final_url().is_some()
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.signal().is_aborted()
    }

    pub fn signal(&self) -> AbortSignal {
        self.shared.signal().clone()
    }

    pub fn logger(&self) -> Logger {
        let (level, method, template) = {
            let config = self.shared.lock();
            (
                config.log_level(),
                config.method().clone(),
                config.template_url().to_string(),
            )
        };
        let url = self.shared.final_url().cloned().unwrap_or(template);
        Logger::for_request(level, &method, &url)
    }
}
