//! Pluggable features.
//!
//! A [`Feature`] is registered once per factory. On registration it may:
//!
//! - register factory defaults, post-construction hooks and pre-transport
//!   hooks through the factory's [`FeatureCommands`];
//! - contribute [`RequestDelegates`] (transport selection and decoration,
//!   download reading, request hashing) consulted on every execution;
//! - contribute [`FactoryDelegates`] exposed on the factory itself.
//!
//! Shipped features: [`RetryFeature`](retry::RetryFeature),
//! [`UploadProgressFeature`](progress::UploadProgressFeature),
//! [`DownloadProgressFeature`](progress::DownloadProgressFeature),
//! [`RequestHashFeature`](hash::RequestHashFeature) and
//! [`AdapterFeature`](adapters::AdapterFeature).

pub mod adapters;
pub mod hash;
pub mod progress;
pub mod retry;

use crate::config::ConfigView;
use crate::error::{RequestError, Result};
use crate::factory::FactoryContext;
use crate::factory::defaults::DefaultBuilder;
use crate::transport::{Response, Transport, TransportInit};
use adapters::AdapterRegistry;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A unit of optional functionality registered on a factory.
pub trait Feature: Send + Sync {
    /// Unique name; registering two features with the same name fails.
    fn name(&self) -> &str;

    /// Register defaults and hooks.
    fn apply(&self, ctx: &FactoryContext) {
        let _ = ctx;
    }

    /// Per-execution delegates.
    fn request_delegates(&self, ctx: &FactoryContext) -> RequestDelegates {
        let _ = ctx;
        RequestDelegates::default()
    }

    /// Delegates exposed on the factory.
    fn factory_delegates(&self, ctx: &FactoryContext) -> FactoryDelegates {
        let _ = ctx;
        FactoryDelegates::default()
    }
}

// ── Delegate seams ────────────────────────────────────────────────────

/// Chooses the base transport for one execution.
///
/// Returning `None` keeps the factory's default transport.
pub trait TransportSelector: Send + Sync {
    fn select(
        &self,
        default: &Arc<dyn Transport>,
        config: &ConfigView,
    ) -> Option<Arc<dyn Transport>>;
}

/// Wraps the transport for one execution.
pub trait TransportDecorator: Send + Sync {
    fn decorate(&self, inner: Arc<dyn Transport>, config: &ConfigView) -> Arc<dyn Transport>;
}

/// Reads a binary response body when progress handlers are attached.
pub trait DownloadHandler: Send + Sync {
    fn read(
        &self,
        response: Response,
        config: ConfigView,
    ) -> BoxFuture<'static, std::result::Result<Bytes, RequestError>>;
}

/// Computes a stable identity for a request.
pub trait RequestHasher: Send + Sync {
    fn hash(&self, config: &ConfigView) -> Result<String>;
}

/// Runs just before the transport is called, with the envelope mutable.
pub trait PreTransportHook: Send + Sync {
    fn before_send(&self, init: &mut TransportInit, config: &ConfigView);
}

impl<F> PreTransportHook for F
where
    F: Fn(&mut TransportInit, &ConfigView) + Send + Sync,
{
    fn before_send(&self, init: &mut TransportInit, config: &ConfigView) {
        self(init, config)
    }
}

/// Delegates consulted on every execution.
///
/// When several features supply a selector, download handler or hasher,
/// the last registered wins. Decorators stack in registration order, the
/// first registered innermost.
#[derive(Clone, Default)]
pub struct RequestDelegates {
    pub transport: Option<Arc<dyn TransportSelector>>,
    pub decorators: Vec<Arc<dyn TransportDecorator>>,
    pub download: Option<Arc<dyn DownloadHandler>>,
    pub hasher: Option<Arc<dyn RequestHasher>>,
}

impl RequestDelegates {
    pub(crate) fn merge(&mut self, other: RequestDelegates) {
        if other.transport.is_some() {
            self.transport = other.transport;
        }
        self.decorators.extend(other.decorators);
        if other.download.is_some() {
            self.download = other.download;
        }
        if other.hasher.is_some() {
            self.hasher = other.hasher;
        }
    }

    /// The transport for one execution: selected base, then decorators.
    pub(crate) fn resolve_transport(
        &self,
        default: &Arc<dyn Transport>,
        config: &ConfigView,
    ) -> Arc<dyn Transport> {
        let base = self
            .transport
            .as_ref()
            .and_then(|selector| selector.select(default, config))
            .unwrap_or_else(|| Arc::clone(default));
        self.decorators
            .iter()
            .fold(base, |inner, decorator| decorator.decorate(inner, config))
    }
}

/// Delegates exposed on the factory.
#[derive(Clone, Default)]
pub struct FactoryDelegates {
    pub adapters: Option<Arc<AdapterRegistry>>,
}

impl FactoryDelegates {
    pub(crate) fn merge(&mut self, other: FactoryDelegates) {
        if other.adapters.is_some() {
            self.adapters = other.adapters;
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────

/// Handle to a registered default, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultId(u64);

#[derive(Default)]
struct HookLists {
    next_id: AtomicU64,
    defaults: Mutex<Vec<(DefaultId, Arc<dyn DefaultBuilder>)>>,
    post_construct: Mutex<Vec<Arc<dyn DefaultBuilder>>>,
    pre_transport: Mutex<Vec<Arc<dyn PreTransportHook>>>,
}

/// The factory's hook registry, shared with every feature.
///
/// Defaults are applied lazily at execution time, so a default registered
/// after a request was built still applies to it. Post-construction hooks
/// are snapshotted when a request is built.
#[derive(Clone, Default)]
pub struct FeatureCommands {
    inner: Arc<HookLists>,
}

impl FeatureCommands {
    pub fn add_default(&self, builder: Arc<dyn DefaultBuilder>) -> DefaultId {
        let id = DefaultId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.inner.defaults).push((id, builder));
        id
    }

    /// Remove a default. Returns `false` if it was already gone.
    pub fn remove_default(&self, id: DefaultId) -> bool {
        let mut defaults = lock(&self.inner.defaults);
        let before = defaults.len();
        defaults.retain(|(existing, _)| *existing != id);
        defaults.len() != before
    }

    pub fn add_post_construct(&self, hook: Arc<dyn DefaultBuilder>) {
        lock(&self.inner.post_construct).push(hook);
    }

    pub fn add_pre_transport(&self, hook: Arc<dyn PreTransportHook>) {
        lock(&self.inner.pre_transport).push(hook);
    }

    pub(crate) fn defaults(&self) -> Vec<Arc<dyn DefaultBuilder>> {
        lock(&self.inner.defaults)
            .iter()
            .map(|(_, builder)| Arc::clone(builder))
            .collect()
    }

    pub(crate) fn post_construct(&self) -> Vec<Arc<dyn DefaultBuilder>> {
        lock(&self.inner.post_construct).clone()
    }

    pub(crate) fn pre_transport(&self) -> Vec<Arc<dyn PreTransportHook>> {
        lock(&self.inner.pre_transport).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::factory::defaults::RequestInfo;
    use std::time::Duration;

    #[test]
    fn defaults_can_be_removed_by_handle() {
        let commands = FeatureCommands::default();
        let a = commands.add_default(Arc::new(|c: &mut RequestConfig, _: &RequestInfo| {
            c.set_timeout(Duration::from_secs(1))
        }));
        let b = commands.add_default(Arc::new(|c: &mut RequestConfig, _: &RequestInfo| {
            c.set_header("x", "1")
        }));
        assert_ne!(a, b);
        assert_eq!(commands.defaults().len(), 2);
        assert!(commands.remove_default(a));
        assert!(!commands.remove_default(a));
        assert_eq!(commands.defaults().len(), 1);
    }
}
