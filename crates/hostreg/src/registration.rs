//! Per-registration instance lifecycle
//!
//! A [`Registration`] binds one [`ServiceKey`] to a descriptor and an
//! effective lifetime, and owns every instance produced for that key: the
//! active store, the idle pool and the set of keys currently being disposed.
//! All three sit behind one lock that is private to the registration, so
//! unrelated services never contend. The lock is never held while running
//! constructors, lifecycle hooks or host operations.
//!
//! | Lifetime          | Instance key      | Cached |
//! |-------------------|-------------------|--------|
//! | `Singleton`       | `singleton`       | yes    |
//! | `ScopedSingleton` | `scope-N`         | yes    |
//! | `Transient`       | `{name}_{n}`      | no     |
//! | `ScopedTransient` | `scope-N_{n}`     | no     |
//!
//! When two threads race to create the same cached instance, the first one
//! stored wins and the other thread's instance is retired immediately.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::descriptor::Descriptor;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, Severity};
use crate::error::{RegistryError, RegistryResult};
use crate::host::HostContext;
use crate::instance::{ManagedObject, ServiceInstance};
use crate::key::{InstanceKey, ServiceKey};
use crate::lifetime::{Lifetime, ScopeContext};
use crate::pool::InstancePool;
use crate::scope::ScopeId;
use crate::service::Service;

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

/// Read-only view of a registration's instance state, for tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationSnapshot {
    pub key: String,
    pub implementation: String,
    pub lifetime: Lifetime,
    pub scope_context: ScopeContext,
    /// Keys of active instances, sorted
    pub active: Vec<String>,
    /// Idle pooled instances
    pub idle: usize,
    /// Keys currently being disposed, sorted
    pub disposing: Vec<String>,
    /// Backing objects constructed so far
    pub created: u64,
}

#[derive(Default)]
struct InstanceState {
    active: HashMap<InstanceKey, ServiceInstance>,
    pool: Option<InstancePool>,
    disposing: HashSet<InstanceKey>,
}

enum StoreOutcome {
    Inserted,
    Lost(ServiceInstance),
    Conflict,
}

/// One registered `(interface, name)` pair and its instances
pub struct Registration {
    id: u64,
    key: ServiceKey,
    descriptor: Arc<Descriptor>,
    lifetime: Lifetime,
    scope_context: ScopeContext,
    counter: AtomicU64,
    created: AtomicU64,
    state: Mutex<InstanceState>,
    host: HostContext,
}

impl Registration {
    pub(crate) fn new(
        key: ServiceKey,
        descriptor: Arc<Descriptor>,
        lifetime: Lifetime,
        scope_context: ScopeContext,
        host: HostContext,
    ) -> Self {
        Self {
            id: NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed),
            key,
            descriptor,
            lifetime,
            scope_context,
            counter: AtomicU64::new(0),
            created: AtomicU64::new(0),
            state: Mutex::new(InstanceState::default()),
            host,
        }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn scope_context(&self) -> ScopeContext {
        self.scope_context
    }

    /// Backing objects constructed so far, pooled ones included
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Resolve synchronously. Async-capable or async-tainted implementations
    /// are rejected.
    pub(crate) fn get_instance(&self, scope: ScopeId) -> RegistryResult<ServiceInstance> {
        if self.descriptor.is_async_capable() {
            return Err(self.async_violation(
                "implementation needs asynchronous initialization; resolve it with get_async",
            ));
        }
        if self.descriptor.has_async_dependency() {
            return Err(self.async_violation(
                "depends on an async-capable implementation; make it async-capable or always resolve it with get_async",
            ));
        }
        self.acquire(scope)
    }

    /// Resolve and drive the instance's async initialization to completion.
    ///
    /// With `strict` set (the registry default), implementations that need
    /// no asynchronous initialization are rejected. Host-managed implementations are acquired
    /// on the host thread.
    pub(crate) async fn get_instance_async(
        self: &Arc<Self>,
        scope: ScopeId,
        strict: bool,
    ) -> RegistryResult<ServiceInstance> {
        if strict && !self.descriptor.requires_async_resolution() {
            return Err(self.async_violation(
                "implementation is not async-capable and has no async dependency; resolve it with get",
            ));
        }

        let instance = if self.requires_host_thread() && !self.host.thread.is_host_thread() {
            let this = Arc::clone(self);
            self.host
                .thread
                .run_async(move || this.acquire(scope))
                .await
                .map_err(|e| RegistryError::initialization(self.implementation(), e.into()))??
        } else {
            self.acquire(scope)?
        };

        if let Err(error) = instance.ensure_initialized().await {
            warn!(
                "Async initialization of {} ({}) failed: {}",
                self.key,
                instance.key(),
                error
            );
            self.discard(&instance);
            return Err(RegistryError::initialization(self.implementation(), error));
        }
        Ok(instance)
    }

    /// Fire-and-forget release; host-managed teardown is posted to the host thread
    pub(crate) fn release(self: &Arc<Self>, instance: ServiceInstance) -> RegistryResult<()> {
        self.check_owner(&instance)?;
        if self.requires_host_thread() {
            let this = Arc::clone(self);
            self.host.thread.post(move || {
                this.release_now(&instance);
            });
        } else {
            self.release_now(&instance);
        }
        Ok(())
    }

    /// Release and wait until the instance reached its terminal state.
    /// Returns `false` if it had already been released.
    pub(crate) async fn release_async(
        self: &Arc<Self>,
        instance: ServiceInstance,
    ) -> RegistryResult<bool> {
        self.check_owner(&instance)?;
        if self.requires_host_thread() {
            let this = Arc::clone(self);
            self.host
                .thread
                .run_async(move || this.release_now(&instance))
                .await
                .map_err(|e| RegistryError::initialization(self.implementation(), e.into()))
        } else {
            Ok(self.release_now(&instance))
        }
    }

    /// Tear down the instances bound to a closed scope. Returns the number of
    /// active instances released.
    pub(crate) fn close_scope(&self, scope: ScopeId) -> usize {
        if !self.lifetime.is_scoped() {
            return 0;
        }

        let doomed: Vec<ServiceInstance> = {
            let state = self.state.lock();
            state
                .active
                .iter()
                .filter(|(key, _)| key.belongs_to_scope(scope))
                .map(|(_, instance)| instance.clone())
                .collect()
        };
        for instance in &doomed {
            self.release_inner(instance, false);
        }

        if !doomed.is_empty() {
            debug!("Released {} instances of {} for {}", doomed.len(), self.key, scope);
        }
        doomed.len()
    }

    /// Release every active instance and destroy the pool. Failures are
    /// logged and never stop the sweep.
    pub(crate) fn teardown_all(&self) -> usize {
        let active: Vec<ServiceInstance> = self.state.lock().active.values().cloned().collect();
        for instance in &active {
            self.release_inner(instance, false);
        }

        let idle = {
            let mut state = self.state.lock();
            state
                .pool
                .take()
                .map(|mut pool| pool.drain_all())
                .unwrap_or_default()
        };
        let idle_count = idle.len();
        for managed in idle {
            self.destroy(managed.object().clone());
        }

        info!(
            "Tore down {} ({} active, {} pooled)",
            self.key,
            active.len(),
            idle_count
        );
        active.len()
    }

    pub fn snapshot(&self) -> RegistrationSnapshot {
        let state = self.state.lock();
        let mut active: Vec<String> = state.active.keys().map(ToString::to_string).collect();
        active.sort();
        let mut disposing: Vec<String> = state.disposing.iter().map(ToString::to_string).collect();
        disposing.sort();

        RegistrationSnapshot {
            key: self.key.to_string(),
            implementation: self.implementation(),
            lifetime: self.lifetime,
            scope_context: self.scope_context,
            active,
            idle: state.pool.as_ref().map(InstancePool::len).unwrap_or(0),
            disposing,
            created: self.created_count(),
        }
    }

    fn acquire(&self, scope: ScopeId) -> RegistryResult<ServiceInstance> {
        let scope_tag = self.lifetime.is_scoped().then_some(scope);

        match self.lifetime {
            Lifetime::Singleton | Lifetime::ScopedSingleton => {
                let key = if self.lifetime == Lifetime::Singleton {
                    InstanceKey::singleton()
                } else {
                    InstanceKey::scoped(scope)
                };

                let Some(cached) = self.cached(&key) else {
                    return self.produce(key, scope_tag);
                };
                if cached.object().is_alive() {
                    return Ok(cached);
                }

                self.invalidate(&cached);
                let replacement = self.produce(key, scope_tag)?;
                if !replacement.object().is_alive() {
                    self.invalidate(&replacement);
                    return Err(RegistryError::InstanceInvalid {
                        service: self.key.to_string(),
                        instance: replacement.key().to_string(),
                    });
                }
                Ok(replacement)
            }
            Lifetime::Transient => {
                let key = InstanceKey::transient(self.key.name(), self.next_counter());
                self.produce(key, None)
            }
            Lifetime::ScopedTransient => {
                let key = InstanceKey::scoped_transient(scope, self.next_counter());
                self.produce(key, scope_tag)
            }
        }
    }

    fn next_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn cached(&self, key: &InstanceKey) -> Option<ServiceInstance> {
        let state = self.state.lock();
        if state.disposing.contains(key) {
            return None;
        }
        state.active.get(key).cloned()
    }

    fn produce(&self, key: InstanceKey, scope: Option<ScopeId>) -> RegistryResult<ServiceInstance> {
        let instance = match self.take_pooled()? {
            Some(managed) => {
                self.prepare_lease(&managed, &key);
                debug!("Leased pooled instance of {} as {}", self.key, key);
                ServiceInstance::lease(managed, key, scope)
            }
            None => {
                let object = self.construct(key.as_str())?;
                let instance = ServiceInstance::new(self.id, object, key, scope);
                self.init_pool(&instance);
                instance
            }
        };
        Ok(self.store(instance))
    }

    fn construct(&self, name: &str) -> RegistryResult<Arc<dyn Service>> {
        let object = self
            .descriptor
            .kind()
            .construct(&self.descriptor, name, &self.host)?;
        let created = self.created.fetch_add(1, Ordering::AcqRel) + 1;

        self.host.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::InstanceCreated,
            Severity::Debug,
            format!("Created {} for {} (#{})", name, self.key, created),
            json!({
                "key": self.key.to_string(),
                "implementation": self.implementation(),
                "instance": name,
                "created": created,
            }),
        ));
        Ok(object)
    }

    fn construct_idle(&self) -> RegistryResult<Arc<ManagedObject>> {
        let object = self.construct(InstanceKey::idle().as_str())?;
        self.descriptor.kind().deactivate(&object, &self.host);
        Ok(ManagedObject::new(self.id, object))
    }

    /// Lazily create the pool from the first poolable instance and top it up
    /// so that active plus idle instances reach the initial size
    fn init_pool(&self, first: &ServiceInstance) {
        let Some(poolable) = first.object().as_poolable() else {
            return;
        };

        let deficit = {
            let mut state = self.state.lock();
            if state.pool.is_some() {
                return;
            }
            let pool = InstancePool::new(poolable.pool_settings());
            let deficit = pool
                .settings()
                .initial_size
                .saturating_sub(state.active.len() + 1);
            state.pool = Some(pool);
            deficit
        };

        debug!("Initialized pool for {} with {} idle instances", self.key, deficit);
        for _ in 0..deficit {
            match self.construct_idle() {
                Ok(idle) => self.park(idle),
                Err(e) => {
                    warn!("Failed to pre-fill pool for {}: {}", self.key, e);
                    break;
                }
            }
        }
    }

    fn take_pooled(&self) -> RegistryResult<Option<Arc<ManagedObject>>> {
        let expansion = {
            let mut state = self.state.lock();
            let Some(pool) = state.pool.as_mut() else {
                return Ok(None);
            };
            if let Some(managed) = pool.pop() {
                return Ok(Some(managed));
            }
            pool.settings().expansion_size
        };

        debug!("Pool for {} is empty; expanding by {}", self.key, expansion);
        for _ in 0..expansion {
            let idle = self.construct_idle()?;
            self.park(idle);
        }

        let mut state = self.state.lock();
        Ok(state.pool.as_mut().and_then(InstancePool::pop))
    }

    fn prepare_lease(&self, managed: &ManagedObject, key: &InstanceKey) {
        let object = managed.object();
        if let Some(poolable) = object.as_poolable() {
            poolable.on_taken_from_pool();
        }
        if let Some(disposable) = object.as_disposable() {
            if !disposable.reset_disposal() {
                warn!("Pooled instance of {} did not reset its disposal state", self.key);
                self.host.diagnostics.emit(DiagnosticEvent::new(
                    DiagnosticKind::PoolResetFailed,
                    Severity::Warning,
                    format!("Pooled instance of {} failed to reset before reuse as {}", self.key, key),
                    json!({ "key": self.key.to_string(), "instance": key.to_string() }),
                ));
            }
        }
        self.descriptor.kind().activate(object, key.as_str(), &self.host);
    }

    /// Insert into the active store. Returns the instance the caller gets.
    fn store(&self, instance: ServiceInstance) -> ServiceInstance {
        let key = instance.key();
        let outcome = {
            let mut state = self.state.lock();
            let existing = if self.lifetime.is_cached() {
                state.active.get(&key).cloned()
            } else {
                None
            };
            if state.disposing.contains(&key) {
                StoreOutcome::Conflict
            } else if let Some(winner) = existing {
                StoreOutcome::Lost(winner)
            } else {
                state.active.insert(key.clone(), instance.clone());
                StoreOutcome::Inserted
            }
        };

        match outcome {
            StoreOutcome::Inserted => instance,
            StoreOutcome::Lost(winner) => {
                debug!("Lost creation race for {} ({}); discarding duplicate", self.key, key);
                instance.mark_released();
                self.retire(&instance);
                winner
            }
            StoreOutcome::Conflict => {
                warn!(
                    "{} ({}) is being disposed; handing out an uncached instance",
                    self.key, key
                );
                self.host.diagnostics.emit(DiagnosticEvent::new(
                    DiagnosticKind::DisposalConflict,
                    Severity::Warning,
                    format!("Skipped caching {} for {}: key is being disposed", key, self.key),
                    json!({ "key": self.key.to_string(), "instance": key.to_string() }),
                ));
                instance
            }
        }
    }

    pub(crate) fn release_now(&self, instance: &ServiceInstance) -> bool {
        self.release_inner(instance, true)
    }

    fn release_inner(&self, instance: &ServiceInstance, report: bool) -> bool {
        if !instance.mark_released() {
            if report {
                self.host.diagnostics.emit(DiagnosticEvent::new(
                    DiagnosticKind::AlreadyReleased,
                    Severity::Info,
                    format!("Instance {} of {} was already released", instance.id(), self.key),
                    json!({ "key": self.key.to_string(), "instance_id": instance.id() }),
                ));
            }
            return false;
        }

        let key = instance.key();
        let tracked = {
            let mut state = self.state.lock();
            let tracked = state
                .active
                .get(&key)
                .map(|active| active.ptr_eq(instance))
                .unwrap_or(false);
            if tracked {
                state.active.remove(&key);
                state.disposing.insert(key.clone());
            }
            tracked
        };

        self.retire(instance);

        if tracked {
            self.state.lock().disposing.remove(&key);
        }
        debug!("Released {} ({})", self.key, key);
        true
    }

    /// Dispose, then return to the pool or destroy
    fn retire(&self, instance: &ServiceInstance) {
        let object = instance.object().clone();
        if let Some(disposable) = object.as_disposable() {
            if let Err(e) = disposable.system_dispose() {
                warn!("Disposal of {} ({}) failed: {}", self.key, instance.key(), e);
            }
        }

        if object.as_poolable().is_some() && self.return_to_pool(instance) {
            return;
        }
        self.destroy(object);
    }

    fn return_to_pool(&self, instance: &ServiceInstance) -> bool {
        if self.state.lock().pool.is_none() {
            return false;
        }

        let object = instance.object();
        if let Some(poolable) = object.as_poolable() {
            poolable.on_returned_to_pool();
        }
        self.descriptor.kind().deactivate(object, &self.host);

        let mut state = self.state.lock();
        match state.pool.as_mut() {
            Some(pool) => {
                pool.push(instance.managed().clone());
                true
            }
            None => false,
        }
    }

    fn park(&self, idle: Arc<ManagedObject>) {
        let parked = {
            let mut state = self.state.lock();
            match state.pool.as_mut() {
                Some(pool) => {
                    pool.push(idle.clone());
                    true
                }
                None => false,
            }
        };
        if !parked {
            self.destroy(idle.object().clone());
        }
    }

    /// Evict a dead cached instance and report it
    fn invalidate(&self, instance: &ServiceInstance) {
        warn!("Cached instance {} of {} is no longer alive", instance.key(), self.key);
        self.host.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::InstanceInvalid,
            Severity::Warning,
            format!("Evicted dead instance {} of {}", instance.key(), self.key),
            json!({ "key": self.key.to_string(), "instance": instance.key().to_string() }),
        ));
        self.discard(instance);
    }

    /// Remove from the active store and destroy without pooling
    fn discard(&self, instance: &ServiceInstance) {
        if !instance.mark_released() {
            return;
        }
        let key = instance.key();
        {
            let mut state = self.state.lock();
            if state
                .active
                .get(&key)
                .map(|active| active.ptr_eq(instance))
                .unwrap_or(false)
            {
                state.active.remove(&key);
            }
        }
        self.destroy(instance.object().clone());
    }

    fn destroy(&self, object: Arc<dyn Service>) {
        if let Err(e) = self.descriptor.kind().destroy(object, &self.host) {
            warn!("Failed to destroy instance of {}: {}", self.key, e);
        }
    }

    fn check_owner(&self, instance: &ServiceInstance) -> RegistryResult<()> {
        if instance.owner() != self.id {
            return Err(RegistryError::validation(
                &self.key,
                format!("instance {} was not produced by this registration", instance.id()),
            ));
        }
        Ok(())
    }

    fn requires_host_thread(&self) -> bool {
        self.descriptor.kind().requires_host_thread()
    }

    fn implementation(&self) -> String {
        self.descriptor.implementation().name().to_string()
    }

    fn async_violation(&self, message: &str) -> RegistryError {
        RegistryError::AsyncAccessViolation {
            service: format!("{} ({})", self.key, self.descriptor.implementation()),
            context: format!("{} in {} context", self.lifetime, self.scope_context),
            message: message.to_string(),
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("implementation", &self.descriptor.implementation())
            .field("lifetime", &self.lifetime)
            .field("scope_context", &self.scope_context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TypeInfo;
    use crate::service::{Disposable, PoolSettings, Poolable};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Weak;

    trait Gadget {}

    struct Widget {
        alive: Arc<AtomicBool>,
        disposed: Arc<AtomicUsize>,
        pool: Option<PoolSettings>,
    }

    impl Poolable for Widget {
        fn pool_settings(&self) -> PoolSettings {
            self.pool.unwrap_or_default()
        }
    }

    impl Disposable for Widget {
        fn system_dispose(&self) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Service for Widget {
        fn as_poolable(&self) -> Option<&dyn Poolable> {
            self.pool.as_ref().map(|_| self as &dyn Poolable)
        }

        fn as_disposable(&self) -> Option<&dyn Disposable> {
            Some(self)
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[derive(Clone, Default)]
    struct Tally {
        constructed: Arc<AtomicUsize>,
        disposed: Arc<AtomicUsize>,
        spawn_dead: Arc<AtomicBool>,
        flags: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    }

    fn registration(
        lifetime: Lifetime,
        context: ScopeContext,
        pool: Option<PoolSettings>,
    ) -> (Arc<Registration>, Tally) {
        let tally = Tally::default();
        let factory = tally.clone();
        let descriptor = Descriptor::builder(TypeInfo::of::<dyn Gadget>(), TypeInfo::of::<Widget>())
            .lifetime(lifetime)
            .scope_context(context)
            .constructed_with(move || {
                factory.constructed.fetch_add(1, Ordering::SeqCst);
                let alive = Arc::new(AtomicBool::new(!factory.spawn_dead.load(Ordering::SeqCst)));
                factory.flags.lock().push(alive.clone());
                Ok(Widget {
                    alive,
                    disposed: factory.disposed.clone(),
                    pool,
                })
            })
            .build();
        (registration_for(descriptor), tally)
    }

    fn registration_for(descriptor: Descriptor) -> Arc<Registration> {
        let (lifetime, context) = (descriptor.lifetime(), descriptor.scope_context());
        Arc::new(Registration::new(
            ServiceKey::new(TypeInfo::of::<dyn Gadget>(), "widget").unwrap(),
            Arc::new(descriptor),
            lifetime,
            context,
            HostContext::headless(),
        ))
    }

    fn kinds(events: &mut tokio::sync::broadcast::Receiver<DiagnosticEvent>) -> Vec<DiagnosticKind> {
        std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.kind)
            .collect()
    }

    #[test]
    fn test_singleton_is_cached() {
        let (registration, tally) = registration(Lifetime::Singleton, ScopeContext::Global, None);

        let a = registration.get_instance(ScopeId::NONE).unwrap();
        let b = registration.get_instance(ScopeId::NONE).unwrap();

        assert!(a.ptr_eq(&b));
        assert_eq!(a.key().as_str(), "singleton");
        assert_eq!(tally.constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transient_keys_count_up() {
        let (registration, _) = registration(Lifetime::Transient, ScopeContext::Global, None);

        let keys: Vec<String> = (0..3)
            .map(|_| registration.get_instance(ScopeId::NONE).unwrap().key().to_string())
            .collect();
        assert_eq!(keys, vec!["widget_1", "widget_2", "widget_3"]);
    }

    #[test]
    fn test_scoped_singleton_per_scope() {
        let (registration, _) =
            registration(Lifetime::ScopedSingleton, ScopeContext::Level, None);
        let a = ScopeId::from_raw(1);
        let b = ScopeId::from_raw(2);

        let in_a = registration.get_instance(a).unwrap();
        let in_b = registration.get_instance(b).unwrap();
        assert!(!in_a.ptr_eq(&in_b));
        assert_eq!(in_a.scope(), Some(a));

        assert_eq!(registration.close_scope(a), 1);
        let again = registration.get_instance(a).unwrap();
        assert!(!again.ptr_eq(&in_a));
        assert!(registration.get_instance(b).unwrap().ptr_eq(&in_b));
    }

    #[test]
    fn test_scoped_transient_teardown_by_prefix() {
        let (registration, tally) =
            registration(Lifetime::ScopedTransient, ScopeContext::World, None);
        let scope = ScopeId::from_raw(5);
        let other = ScopeId::from_raw(50);

        registration.get_instance(scope).unwrap();
        registration.get_instance(scope).unwrap();
        let survivor = registration.get_instance(other).unwrap();
        assert_eq!(survivor.key().as_str(), "scope-50_3");

        assert_eq!(registration.close_scope(scope), 2);
        assert_eq!(registration.active_count(), 1);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_release_twice_disposes_once() {
        let (registration, tally) = registration(Lifetime::Transient, ScopeContext::Global, None);
        let mut events = registration.host.diagnostics.subscribe();

        let instance = registration.get_instance(ScopeId::NONE).unwrap();
        assert!(registration.release_now(&instance));
        assert!(!registration.release_now(&instance));

        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
        assert!(kinds(&mut events).contains(&DiagnosticKind::AlreadyReleased));
    }

    #[test]
    fn test_stale_handle_cannot_release_pooled_reuse() {
        let (registration, tally) = registration(
            Lifetime::Transient,
            ScopeContext::Global,
            Some(PoolSettings::new(1, 1)),
        );
        let mut events = registration.host.diagnostics.subscribe();

        let stale = registration.get_instance(ScopeId::NONE).unwrap();
        assert!(registration.release_now(&stale));
        let current = registration.get_instance(ScopeId::NONE).unwrap();
        assert_eq!(current.id(), stale.id());
        assert!(!current.ptr_eq(&stale));
        assert_eq!(current.key().as_str(), "widget_2");

        assert!(!registration.release_now(&stale));
        assert!(kinds(&mut events).contains(&DiagnosticKind::AlreadyReleased));
        assert!(!current.is_released());
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(registration.snapshot().active, vec!["widget_2"]);
        assert_eq!(registration.snapshot().idle, 0);

        assert!(registration.release_now(&current));
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 2);
        assert_eq!(registration.snapshot().idle, 1);
        assert_eq!(tally.constructed.load(Ordering::SeqCst), 1);
    }

    /// Resolves its own key again while being disposed
    struct Reentrant {
        hook: Arc<ReentryHook>,
    }

    #[derive(Default)]
    struct ReentryHook {
        registration: Mutex<Weak<Registration>>,
        scope: Mutex<Option<ScopeId>>,
        fired: AtomicBool,
        resolved: Mutex<Option<ServiceInstance>>,
    }

    impl Disposable for Reentrant {
        fn system_dispose(&self) -> anyhow::Result<()> {
            if self.hook.fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            let registration = self.hook.registration.lock().upgrade();
            let scope = *self.hook.scope.lock();
            if let (Some(registration), Some(scope)) = (registration, scope) {
                let instance = registration.get_instance(scope)?;
                *self.hook.resolved.lock() = Some(instance);
            }
            Ok(())
        }
    }

    impl Service for Reentrant {
        fn as_disposable(&self) -> Option<&dyn Disposable> {
            Some(self)
        }
    }

    #[test]
    fn test_resolve_during_disposal_is_not_cached() {
        let hook = Arc::new(ReentryHook::default());
        let factory = hook.clone();
        let registration = registration_for(
            Descriptor::builder(TypeInfo::of::<dyn Gadget>(), TypeInfo::of::<Reentrant>())
                .lifetime(Lifetime::ScopedSingleton)
                .scope_context(ScopeContext::Level)
                .constructed_with(move || {
                    Ok(Reentrant {
                        hook: factory.clone(),
                    })
                })
                .build(),
        );
        let scope = ScopeId::from_raw(9);
        *hook.registration.lock() = Arc::downgrade(&registration);
        *hook.scope.lock() = Some(scope);
        let mut events = registration.host.diagnostics.subscribe();

        let original = registration.get_instance(scope).unwrap();
        assert_eq!(registration.close_scope(scope), 1);
        assert!(original.is_released());

        let during = hook.resolved.lock().take().unwrap();
        assert!(!during.ptr_eq(&original));
        assert!(!during.is_released());
        assert_eq!(registration.active_count(), 0);
        assert!(registration.snapshot().disposing.is_empty());
        assert!(kinds(&mut events).contains(&DiagnosticKind::DisposalConflict));

        let after = registration.get_instance(scope).unwrap();
        assert!(!after.ptr_eq(&during));
        assert_eq!(registration.active_count(), 1);
        assert!(registration.release_now(&during));
        assert_eq!(registration.active_count(), 1);
    }

    struct StickyWidget {
        disposed: Arc<AtomicUsize>,
    }

    impl Poolable for StickyWidget {
        fn pool_settings(&self) -> PoolSettings {
            PoolSettings::new(1, 1)
        }
    }

    impl Disposable for StickyWidget {
        fn system_dispose(&self) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn reset_disposal(&self) -> bool {
            false
        }
    }

    impl Service for StickyWidget {
        fn as_poolable(&self) -> Option<&dyn Poolable> {
            Some(self)
        }

        fn as_disposable(&self) -> Option<&dyn Disposable> {
            Some(self)
        }
    }

    #[test]
    fn test_failed_pool_reset_is_reported_on_reuse() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        let registration = registration_for(
            Descriptor::builder(TypeInfo::of::<dyn Gadget>(), TypeInfo::of::<StickyWidget>())
                .lifetime(Lifetime::Transient)
                .constructed_with(move || {
                    Ok(StickyWidget {
                        disposed: counter.clone(),
                    })
                })
                .build(),
        );
        let mut events = registration.host.diagnostics.subscribe();

        let first = registration.get_instance(ScopeId::NONE).unwrap();
        let object = first.downcast::<StickyWidget>().unwrap();
        registration.release_now(&first);
        assert!(!kinds(&mut events).contains(&DiagnosticKind::PoolResetFailed));

        let reused = registration.get_instance(ScopeId::NONE).unwrap();
        assert!(Arc::ptr_eq(&reused.downcast::<StickyWidget>().unwrap(), &object));
        assert!(!reused.is_released());

        let failures: Vec<DiagnosticEvent> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|event| event.kind == DiagnosticKind::PoolResetFailed)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].severity, Severity::Warning);
        assert_eq!(failures[0].payload["instance"], "widget_2");
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_bound_and_expansion() {
        let (registration, tally) = registration(
            Lifetime::Transient,
            ScopeContext::Global,
            Some(PoolSettings::new(3, 2)),
        );

        let first: Vec<_> = (0..3)
            .map(|_| registration.get_instance(ScopeId::NONE).unwrap())
            .collect();
        assert_eq!(tally.constructed.load(Ordering::SeqCst), 3);

        for instance in &first {
            registration.release_now(instance);
        }
        assert_eq!(registration.snapshot().idle, 3);

        let again: Vec<_> = (0..3)
            .map(|_| registration.get_instance(ScopeId::NONE).unwrap())
            .collect();
        assert_eq!(tally.constructed.load(Ordering::SeqCst), 3);
        assert_eq!(again[0].key().as_str(), "widget_4");

        registration.get_instance(ScopeId::NONE).unwrap();
        assert_eq!(tally.constructed.load(Ordering::SeqCst), 5);
        assert_eq!(registration.snapshot().idle, 1);
    }

    #[test]
    fn test_dead_singleton_is_replaced_once() {
        let (registration, tally) = registration(Lifetime::Singleton, ScopeContext::Global, None);

        let first = registration.get_instance(ScopeId::NONE).unwrap();
        tally.flags.lock()[0].store(false, Ordering::SeqCst);

        let second = registration.get_instance(ScopeId::NONE).unwrap();
        assert!(!second.ptr_eq(&first));
        assert!(first.is_released());
    }

    #[test]
    fn test_dead_replacement_is_an_error() {
        let (registration, tally) = registration(Lifetime::Singleton, ScopeContext::Global, None);

        registration.get_instance(ScopeId::NONE).unwrap();
        tally.flags.lock()[0].store(false, Ordering::SeqCst);
        tally.spawn_dead.store(true, Ordering::SeqCst);

        let result = registration.get_instance(ScopeId::NONE);
        assert!(matches!(result, Err(RegistryError::InstanceInvalid { .. })));
        assert_eq!(registration.active_count(), 0);
    }

    #[test]
    fn test_foreign_instance_rejected() {
        let (first, _) = registration(Lifetime::Transient, ScopeContext::Global, None);
        let (second, _) = registration(Lifetime::Transient, ScopeContext::Global, None);

        let instance = first.get_instance(ScopeId::NONE).unwrap();
        assert!(matches!(
            second.release(instance),
            Err(RegistryError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_teardown_destroys_pool() {
        let (registration, tally) = registration(
            Lifetime::Transient,
            ScopeContext::Global,
            Some(PoolSettings::new(2, 1)),
        );
        registration.get_instance(ScopeId::NONE).unwrap();

        assert_eq!(registration.teardown_all(), 1);
        let snapshot = registration.snapshot();
        assert!(snapshot.active.is_empty());
        assert_eq!(snapshot.idle, 0);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_async_reports_terminal_state_once() {
        let (registration, tally) = registration(Lifetime::Singleton, ScopeContext::Global, None);
        let instance = registration.get_instance(ScopeId::NONE).unwrap();

        let first = tokio_test::block_on(registration.release_async(instance.clone())).unwrap();
        let second = tokio_test::block_on(registration.release_async(instance)).unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(tally.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(registration.active_count(), 0);
    }
}
