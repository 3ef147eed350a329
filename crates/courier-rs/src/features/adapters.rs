//! Adapters: named bundles of interceptors and defaults.
//!
//! An adapter contributes request, response and error interceptors plus
//! factory defaults. Attached adapters are merged into one default that
//! installs their interceptors sorted by priority (lower runs first, ties
//! keep attach order). The merged default is rebuilt on every attach and
//! detach.
//!
//! Priorities resolve in three layers: the default (500), then what the
//! adapter declares, then the override given at attach time.

use super::{DefaultId, FactoryDelegates, Feature, FeatureCommands};
use crate::config::RequestConfig;
use crate::engine::interceptor::{ErrorInterceptor, RequestInterceptor, ResponseInterceptorEntry};
use crate::error::{Error, Result};
use crate::factory::FactoryContext;
use crate::factory::defaults::{DefaultBuilder, RequestInfo};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub const FEATURE_NAME: &str = "adapters";

pub const DEFAULT_PRIORITY: u32 = 500;

/// Effective priority of an attached adapter, per interceptor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterPriority {
    pub request: u32,
    pub response: u32,
    pub error: u32,
}

impl Default for AdapterPriority {
    fn default() -> Self {
        Self {
            request: DEFAULT_PRIORITY,
            response: DEFAULT_PRIORITY,
            error: DEFAULT_PRIORITY,
        }
    }
}

impl AdapterPriority {
    pub fn merged(self, overrides: PriorityOverride) -> Self {
        Self {
            request: overrides.request.unwrap_or(self.request),
            response: overrides.response.unwrap_or(self.response),
            error: overrides.error.unwrap_or(self.error),
        }
    }
}

/// Partial priorities; unset fields keep the lower layer's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityOverride {
    pub request: Option<u32>,
    pub response: Option<u32>,
    pub error: Option<u32>,
}

impl PriorityOverride {
    /// The same priority for every kind.
    pub fn all(priority: u32) -> Self {
        Self {
            request: Some(priority),
            response: Some(priority),
            error: Some(priority),
        }
    }

    pub fn request(priority: u32) -> Self {
        Self {
            request: Some(priority),
            ..Self::default()
        }
    }
}

/// A named bundle of interceptors and defaults.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> PriorityOverride {
        PriorityOverride::default()
    }

    fn on_attach(&self) {}

    fn on_detach(&self) {}

    fn request_interceptors(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        Vec::new()
    }

    fn response_interceptors(&self) -> Vec<ResponseInterceptorEntry> {
        Vec::new()
    }

    fn error_interceptors(&self) -> Vec<Arc<dyn ErrorInterceptor>> {
        Vec::new()
    }

    fn defaults(&self) -> Vec<Arc<dyn DefaultBuilder>> {
        Vec::new()
    }
}

// ── Registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttachmentId(u64);

struct Contribution<T> {
    owner: AttachmentId,
    priority: u32,
    item: T,
}

struct Attached {
    id: AttachmentId,
    adapter: Arc<dyn Adapter>,
    priority: AdapterPriority,
    defaults: Vec<DefaultId>,
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    attached: Vec<Attached>,
    requests: Vec<Contribution<Arc<dyn RequestInterceptor>>>,
    responses: Vec<Contribution<ResponseInterceptorEntry>>,
    errors: Vec<Contribution<Arc<dyn ErrorInterceptor>>>,
    applier: Option<DefaultId>,
}

/// Insert keeping the list sorted by priority, after existing equal entries.
fn insert_sorted<T>(list: &mut Vec<Contribution<T>>, contribution: Contribution<T>) {
    let at = list.partition_point(|c| c.priority <= contribution.priority);
    list.insert(at, contribution);
}

/// Attached adapters of one factory.
pub struct AdapterRegistry {
    commands: FeatureCommands,
    state: Mutex<RegistryState>,
}

impl AdapterRegistry {
    pub fn new(commands: FeatureCommands) -> Self {
        Self {
            commands,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach with the adapter's own priorities.
    pub fn attach(&self, adapter: Arc<dyn Adapter>) -> Result<()> {
        self.attach_with(adapter, PriorityOverride::default())
    }

    /// Attach, overriding some priorities.
    pub fn attach_with(
        &self,
        adapter: Arc<dyn Adapter>,
        overrides: PriorityOverride,
    ) -> Result<()> {
        let mut state = self.lock();
        let name = adapter.name().to_string();
        if state.attached.iter().any(|a| a.adapter.name() == name) {
            return Err(Error::AdapterAlreadyAttached(name));
        }

        let priority = AdapterPriority::default()
            .merged(adapter.priority())
            .merged(overrides);
        let id = AttachmentId(state.next_id);
        state.next_id += 1;

        for item in adapter.request_interceptors() {
            insert_sorted(
                &mut state.requests,
                Contribution {
                    owner: id,
                    priority: priority.request,
                    item,
                },
            );
        }
        for item in adapter.response_interceptors() {
            insert_sorted(
                &mut state.responses,
                Contribution {
                    owner: id,
                    priority: priority.response,
                    item,
                },
            );
        }
        for item in adapter.error_interceptors() {
            insert_sorted(
                &mut state.errors,
                Contribution {
                    owner: id,
                    priority: priority.error,
                    item,
                },
            );
        }
        let defaults = adapter
            .defaults()
            .into_iter()
            .map(|builder| self.commands.add_default(builder))
            .collect();

        state.attached.push(Attached {
            id,
            adapter: Arc::clone(&adapter),
            priority,
            defaults,
        });
        self.rebuild(&mut state);
        drop(state);

        // Hooks run unlocked so they may query the registry.
        adapter.on_attach();
        info!(adapter = %name, ?priority, "adapter attached");
        Ok(())
    }

    /// Detach by name, removing exactly what the adapter contributed.
    pub fn detach(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        let index = state
            .attached
            .iter()
            .position(|a| a.adapter.name() == name)
            .ok_or_else(|| Error::AdapterNotAttached(name.to_string()))?;
        let attached = state.attached.remove(index);

        state.requests.retain(|c| c.owner != attached.id);
        state.responses.retain(|c| c.owner != attached.id);
        state.errors.retain(|c| c.owner != attached.id);
        for id in &attached.defaults {
            self.commands.remove_default(*id);
        }
        self.rebuild(&mut state);
        drop(state);

        attached.adapter.on_detach();
        info!(adapter = %name, "adapter detached");
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.lock().attached.iter().any(|a| a.adapter.name() == name)
    }

    /// Names of attached adapters in attach order.
    pub fn list(&self) -> Vec<String> {
        self.lock()
            .attached
            .iter()
            .map(|a| a.adapter.name().to_string())
            .collect()
    }

    pub fn priority_of(&self, name: &str) -> Option<AdapterPriority> {
        self.lock()
            .attached
            .iter()
            .find(|a| a.adapter.name() == name)
            .map(|a| a.priority)
    }

    /// Replace the merged default with one reflecting the current lists.
    fn rebuild(&self, state: &mut RegistryState) {
        if let Some(previous) = state.applier.take() {
            self.commands.remove_default(previous);
        }
        if state.attached.is_empty() {
            return;
        }
        let requests: Vec<_> = state.requests.iter().map(|c| Arc::clone(&c.item)).collect();
        let responses: Vec<_> = state.responses.iter().map(|c| c.item.clone()).collect();
        let errors: Vec<_> = state.errors.iter().map(|c| Arc::clone(&c.item)).collect();
        debug!(
            requests = requests.len(),
            responses = responses.len(),
            errors = errors.len(),
            "rebuilding adapter defaults"
        );
        let applier = move |config: &mut RequestConfig, _: &RequestInfo| {
            for interceptor in &requests {
                config.add_request_interceptor(Arc::clone(interceptor));
            }
            for entry in &responses {
                config.add_response_interceptor(entry.clone());
            }
            for interceptor in &errors {
                config.add_error_interceptor(Arc::clone(interceptor));
            }
        };
        state.applier = Some(self.commands.add_default(Arc::new(applier)));
    }
}

/// Exposes an [`AdapterRegistry`] on the factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterFeature;

impl Feature for AdapterFeature {
    fn name(&self) -> &str {
        FEATURE_NAME
    }

    fn factory_delegates(&self, ctx: &FactoryContext) -> FactoryDelegates {
        FactoryDelegates {
            adapters: Some(Arc::new(AdapterRegistry::new(ctx.commands().clone()))),
        }
    }
}
