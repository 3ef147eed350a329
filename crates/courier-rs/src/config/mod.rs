//! Request configuration.
//!
//! A [`RequestConfig`] is assembled once per execution: factory defaults
//! first, then post-construction hooks, then the builder calls made on the
//! request itself. Values that depend on other parts of the configuration
//! are stored as [`Deferred::Computed`] and evaluated lazily against a
//! [`ConfigView`] at the moment they are read.

mod view;

pub use view::ConfigView;
pub(crate) use view::SharedConfig;

use crate::body::RequestBody;
use crate::engine::interceptor::{
    ErrorInterceptor, RequestInterceptor, ResponseInterceptorEntry, Transformer,
};
use crate::features::progress::ProgressHandler;
use crate::features::retry::RetryPolicy;
use crate::log::LogLevel;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Free-form request metadata, readable by defaults, features and interceptors.
pub type Meta = serde_json::Map<String, Value>;

/// MIME patterns treated as JSON unless overridden.
pub const DEFAULT_JSON_TYPES: &[&str] = &[r"^application/json$", r"^application/[^;\s]+\+json$"];

/// MIME patterns treated as text unless overridden.
pub const DEFAULT_TEXT_TYPES: &[&str] = &[
    r"^text/",
    r"^application/(xml|javascript|x-www-form-urlencoded)$",
    r"^application/[^;\s]+\+xml$",
];

// ── Deferred values ───────────────────────────────────────────────────

/// Closure computing a value from the rest of the configuration.
///
/// Returning `None` means "absent": the header is dropped, the query
/// parameter is skipped, the body is empty.
pub type Computed<T> = Arc<dyn Fn(&ConfigView) -> Option<T> + Send + Sync>;

/// A configuration value that is either literal or computed on read.
pub enum Deferred<T> {
    Literal(T),
    Computed(Computed<T>),
}

impl<T: Clone> Deferred<T> {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&ConfigView) -> Option<T> + Send + Sync + 'static,
    {
        Deferred::Computed(Arc::new(f))
    }

    pub fn evaluate(&self, view: &ConfigView) -> Option<T> {
        match self {
            Deferred::Literal(v) => Some(v.clone()),
            Deferred::Computed(f) => f(view),
        }
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Deferred::Computed(_))
    }
}

impl<T: Clone> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        match self {
            Deferred::Literal(v) => Deferred::Literal(v.clone()),
            Deferred::Computed(f) => Deferred::Computed(Arc::clone(f)),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Deferred::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl<T> From<T> for Deferred<T> {
    fn from(value: T) -> Self {
        Deferred::Literal(value)
    }
}

impl From<&str> for Deferred<String> {
    fn from(value: &str) -> Self {
        Deferred::Literal(value.to_string())
    }
}

impl From<&str> for Deferred<QueryValue> {
    fn from(value: &str) -> Self {
        Deferred::Literal(QueryValue::from(value))
    }
}

impl From<&str> for Deferred<RequestBody> {
    fn from(value: &str) -> Self {
        Deferred::Literal(RequestBody::from(value))
    }
}

impl From<Value> for Deferred<RequestBody> {
    fn from(value: Value) -> Self {
        Deferred::Literal(RequestBody::Json(value))
    }
}

// ── Query values ──────────────────────────────────────────────────────

/// A query parameter value. Arrays become repeated keys; `Absent` is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    One(String),
    Many(Vec<String>),
    Absent,
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::One(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::One(value)
    }
}

impl<S: Into<String>> From<Vec<S>> for QueryValue {
    fn from(values: Vec<S>) -> Self {
        QueryValue::Many(values.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> From<Option<S>> for QueryValue {
    fn from(value: Option<S>) -> Self {
        value.map_or(QueryValue::Absent, |v| QueryValue::One(v.into()))
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::One(value.to_string())
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::One(value.to_string())
    }
}

// ── Transport options ─────────────────────────────────────────────────

/// Whether cookies and auth state travel with the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Cross-origin policy hint passed through to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

// ── RequestConfig ─────────────────────────────────────────────────────

/// The full configuration of one request.
///
/// Header names are stored lowercased. Path, query and header entries keep
/// insertion order; setting an existing key replaces it in place.
#[derive(Clone)]
pub struct RequestConfig {
    method: Method,
    template_urls: Vec<String>,
    path_params: Vec<(String, Deferred<String>)>,
    query_params: Vec<(String, Deferred<QueryValue>)>,
    headers: Vec<(String, Deferred<String>)>,
    body: Option<Deferred<RequestBody>>,
    timeout: Duration,
    credentials: Credentials,
    mode: RequestMode,
    accept: Vec<String>,
    json_types: Vec<String>,
    text_types: Vec<String>,
    meta: Meta,
    log_level: LogLevel,
    retry: Option<RetryPolicy>,
    ignore_body: bool,
    pub(crate) request_interceptors: Vec<Arc<dyn RequestInterceptor>>,
    pub(crate) response_interceptors: Vec<ResponseInterceptorEntry>,
    pub(crate) error_interceptors: Vec<Arc<dyn ErrorInterceptor>>,
    pub(crate) transformers: Vec<Arc<dyn Transformer>>,
    pub(crate) progress_handlers: Vec<ProgressHandler>,
}

fn upsert<V>(entries: &mut Vec<(String, V)>, key: String, value: V) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            template_urls: vec![url.into()],
            path_params: Vec::new(),
            query_params: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: Duration::ZERO,
            credentials: Credentials::default(),
            mode: RequestMode::default(),
            accept: Vec::new(),
            json_types: DEFAULT_JSON_TYPES.iter().map(|s| s.to_string()).collect(),
            text_types: DEFAULT_TEXT_TYPES.iter().map(|s| s.to_string()).collect(),
            meta: Meta::new(),
            log_level: LogLevel::default(),
            retry: None,
            ignore_body: false,
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
            error_interceptors: Vec::new(),
            transformers: Vec::new(),
            progress_handlers: Vec::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// The current URL template (the tip of the replacement history).
    pub fn template_url(&self) -> &str {
        self.template_urls.last().map_or("", String::as_str)
    }

    /// Every template the request has had, oldest first.
    pub fn template_url_history(&self) -> &[String] {
        &self.template_urls
    }

    /// Replace the URL template, keeping the previous one in the history.
    pub fn replace_url(&mut self, url: impl Into<String>) {
        self.template_urls.push(url.into());
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Deferred<String>>) {
        upsert(
            &mut self.headers,
            name.into().to_ascii_lowercase(),
            value.into(),
        );
    }

    pub fn remove_header(&mut self, name: &str) {
        let name = name.to_ascii_lowercase();
        self.headers.retain(|(k, _)| *k != name);
    }

    pub(crate) fn header_entry(&self, name: &str) -> Option<Deferred<String>> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    }

    pub(crate) fn header_entries(&self) -> Vec<(String, Deferred<String>)> {
        self.headers.clone()
    }

    pub fn set_path_param(&mut self, name: impl Into<String>, value: impl Into<Deferred<String>>) {
        upsert(&mut self.path_params, name.into(), value.into());
    }

    pub(crate) fn path_param_entries(&self) -> Vec<(String, Deferred<String>)> {
        self.path_params.clone()
    }

    pub fn set_query_param(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Deferred<QueryValue>>,
    ) {
        upsert(&mut self.query_params, name.into(), value.into());
    }

    pub fn remove_query_param(&mut self, name: &str) {
        self.query_params.retain(|(k, _)| k != name);
    }

    pub(crate) fn query_param_entries(&self) -> Vec<(String, Deferred<QueryValue>)> {
        self.query_params.clone()
    }

    pub fn set_body(&mut self, body: Option<Deferred<RequestBody>>) {
        self.body = body;
    }

    pub(crate) fn body_entry(&self) -> Option<Deferred<RequestBody>> {
        self.body.clone()
    }

    /// Zero disables the timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn set_mode(&mut self, mode: RequestMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    /// Add an accepted MIME pattern, sent as part of the `Accept` header.
    pub fn add_accept(&mut self, pattern: impl Into<String>) {
        self.accept.push(pattern.into());
    }

    pub fn accept(&self) -> &[String] {
        &self.accept
    }

    /// Add a regex matched against response content types to select JSON parsing.
    pub fn add_json_type(&mut self, pattern: impl Into<String>) {
        self.json_types.push(pattern.into());
    }

    pub fn json_types(&self) -> &[String] {
        &self.json_types
    }

    /// Add a regex matched against response content types to select text decoding.
    pub fn add_text_type(&mut self, pattern: impl Into<String>) {
        self.text_types.push(pattern.into());
    }

    pub fn text_types(&self) -> &[String] {
        &self.text_types
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.meta.insert(key.into(), value.into());
    }

    /// Merge metadata; entries in `meta` override existing keys.
    pub fn merge_meta(&mut self, meta: Meta) {
        self.meta.extend(meta);
    }

    pub fn set_log_level(&mut self, level: LogLevel) {
        self.log_level = level;
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Per-request retry policy; overrides metadata-driven and feature defaults.
    pub fn set_retry(&mut self, policy: Option<RetryPolicy>) {
        self.retry = policy;
    }

    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Skip reading the response body on success.
    pub fn set_ignore_body(&mut self, ignore: bool) {
        self.ignore_body = ignore;
    }

    pub fn ignore_body(&self) -> bool {
        self.ignore_body
    }

    pub fn add_request_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.request_interceptors.push(interceptor);
    }

    pub fn add_response_interceptor(&mut self, entry: ResponseInterceptorEntry) {
        self.response_interceptors.push(entry);
    }

    pub fn add_error_interceptor(&mut self, interceptor: Arc<dyn ErrorInterceptor>) {
        self.error_interceptors.push(interceptor);
    }

    pub fn add_transformer(&mut self, transformer: Arc<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    pub fn add_progress_handler(&mut self, handler: ProgressHandler) {
        self.progress_handlers.push(handler);
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("method", &self.method)
            .field("template_urls", &self.template_urls)
            .field("path_params", &self.path_params)
            .field("query_params", &self.query_params)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout", &self.timeout)
            .field("credentials", &self.credentials)
            .field("meta", &self.meta)
            .field("log_level", &self.log_level)
            .field("request_interceptors", &self.request_interceptors.len())
            .field("response_interceptors", &self.response_interceptors.len())
            .field("error_interceptors", &self.error_interceptors.len())
            .field("transformers", &self.transformers.len())
            .field("progress_handlers", &self.progress_handlers.len())
            .finish_non_exhaustive()
    }
}
