//! Service registry: the public resolution facade
//!
//! [`ServiceRegistry`] ties the pieces together. It validates registrations
//! against the [`DescriptorCatalog`], keeps them in the concurrent
//! [`RegistrationTable`], picks the scope of each resolution and delegates
//! the instance lifecycle to the [`Registration`]. Every successful
//! resolution and every failure is reported on the [`DiagnosticsBus`] in
//! addition to the returned error.
//!
//! # Example
//!
//! ```rust,ignore
//! let catalog = DescriptorCatalog::build(vec![
//!     Descriptor::builder(TypeInfo::of::<dyn Storage>(), TypeInfo::of::<DiskStorage>())
//!         .constructed_with(|| Ok(DiskStorage::default()))
//!         .build(),
//! ])?;
//! let registry = ServiceRegistry::new(catalog);
//!
//! registry.register(
//!     TypeInfo::of::<dyn Storage>(),
//!     TypeInfo::of::<DiskStorage>(),
//!     "main",
//!     Lifetime::Singleton,
//!     ScopeContext::Global,
//! )?;
//!
//! let storage = registry.get_typed::<DiskStorage>(TypeInfo::of::<dyn Storage>(), "main", None)?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::catalog::{DescriptorCatalog, DescriptorStore};
use crate::config::RegistryConfig;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsBus, Severity};
use crate::error::{RegistryError, RegistryResult};
use crate::host::{HostContext, HostObjects, NoHost};
use crate::instance::ServiceInstance;
use crate::key::{ServiceKey, TypeInfo};
use crate::lifetime::{Lifetime, ScopeContext};
use crate::marshal::HostThread;
use crate::registration::{Registration, RegistrationSnapshot};
use crate::scope::{ScopeHint, ScopeId, ScopeListener, ScopeTracker};
use crate::service::Service;
use crate::table::RegistrationTable;
use crate::validation::ValidationOutcome;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Result of [`ServiceRegistry::register_discovered`]
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<ServiceKey>,
    /// Descriptors skipped because their origin is not enabled
    pub filtered: usize,
    /// Implementations that failed to register, with the reason
    pub failed: Vec<(TypeInfo, String)>,
}

/// Process-wide service registry
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    table: RegistrationTable,
    catalog: Arc<DescriptorCatalog>,
    scopes: Arc<ScopeTracker>,
    host: HostContext,
    config: RegistryConfig,
    listener_id: String,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.scopes.unsubscribe(&self.listener_id);
    }
}

/// Tears down scope-bound instances when the host closes a scope
struct ScopeTeardown {
    id: String,
    registry: Weak<RegistryInner>,
}

impl ScopeListener for ScopeTeardown {
    fn listener_id(&self) -> &str {
        &self.id
    }

    fn on_scope_closed(&self, scope: ScopeId) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let released: usize = inner
            .table
            .registrations()
            .iter()
            .filter(|registration| registration.lifetime().is_scoped())
            .map(|registration| registration.close_scope(scope))
            .sum();
        debug!("Scope teardown for {} released {} instances", scope, released);
    }
}

/// Builder for [`ServiceRegistry`]
pub struct ServiceRegistryBuilder {
    catalog: DescriptorCatalog,
    host: Option<Arc<dyn HostObjects>>,
    thread: Option<HostThread>,
    scopes: Option<Arc<ScopeTracker>>,
    diagnostics: Option<DiagnosticsBus>,
    config: RegistryConfig,
}

impl ServiceRegistryBuilder {
    pub fn new(catalog: DescriptorCatalog) -> Self {
        Self {
            catalog,
            host: None,
            thread: None,
            scopes: None,
            diagnostics: None,
            config: RegistryConfig::default(),
        }
    }

    pub fn host(mut self, host: Arc<dyn HostObjects>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn host_thread(mut self, thread: HostThread) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn scopes(mut self, scopes: Arc<ScopeTracker>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn diagnostics(mut self, diagnostics: DiagnosticsBus) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> RegistryResult<ServiceRegistry> {
        self.config.validate()?;

        Ok(self.assemble())
    }

    fn assemble(self) -> ServiceRegistry {
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| DiagnosticsBus::with_capacity(self.config.diagnostics_capacity));
        let host = HostContext::new(
            self.host.unwrap_or_else(|| Arc::new(NoHost)),
            self.thread.unwrap_or_else(HostThread::headless),
            diagnostics,
        );
        let scopes = self.scopes.unwrap_or_default();
        let listener_id = format!(
            "hostreg-registry-{}",
            NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed)
        );

        let inner = Arc::new(RegistryInner {
            table: RegistrationTable::new(),
            catalog: Arc::new(self.catalog),
            scopes: scopes.clone(),
            host,
            config: self.config,
            listener_id: listener_id.clone(),
        });

        scopes.subscribe(Arc::new(ScopeTeardown {
            id: listener_id,
            registry: Arc::downgrade(&inner),
        }));

        info!(
            "Service registry ready with {} descriptors",
            inner.catalog.len()
        );
        ServiceRegistry { inner }
    }
}

impl ServiceRegistry {
    /// Registry with no host object model, a headless marshaller and default config
    pub fn new(catalog: DescriptorCatalog) -> Self {
        ServiceRegistryBuilder::new(catalog).assemble()
    }

    pub fn builder(catalog: DescriptorCatalog) -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new(catalog)
    }

    /// Register `implementation` for `(interface, name)` with an explicit
    /// lifetime and scope context
    pub fn register(
        &self,
        interface: TypeInfo,
        implementation: TypeInfo,
        name: &str,
        lifetime: Lifetime,
        scope_context: ScopeContext,
    ) -> RegistryResult<()> {
        let result = self.try_register(interface, implementation, name, lifetime, scope_context);
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    /// Register `implementation` with its descriptor's interface, name,
    /// lifetime and scope context
    pub fn register_descriptor(&self, implementation: TypeInfo) -> RegistryResult<()> {
        let descriptor = match self.inner.catalog.descriptor(implementation) {
            Some(descriptor) => descriptor,
            None => {
                let error = not_described(implementation);
                self.report(&error);
                return Err(error);
            }
        };
        self.register(
            descriptor.interface(),
            implementation,
            descriptor.name(),
            descriptor.lifetime(),
            descriptor.scope_context(),
        )
    }

    /// Register every catalog descriptor whose origin is enabled
    pub fn register_discovered(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for descriptor in self.inner.catalog.descriptors() {
            if !self.inner.config.origin_enabled(descriptor.origin()) {
                report.filtered += 1;
                continue;
            }
            match self.register_descriptor(descriptor.implementation()) {
                Ok(()) => match ServiceKey::new(descriptor.interface(), descriptor.name()) {
                    Ok(key) => report.registered.push(key),
                    Err(e) => report.failed.push((descriptor.implementation(), e.to_string())),
                },
                Err(e) => report.failed.push((descriptor.implementation(), e.to_string())),
            }
        }
        info!(
            "Registered {} discovered services ({} filtered, {} failed)",
            report.registered.len(),
            report.filtered,
            report.failed.len()
        );
        report
    }

    /// Resolve synchronously
    pub fn get(
        &self,
        interface: TypeInfo,
        name: &str,
        hint: Option<ScopeHint>,
    ) -> RegistryResult<ServiceInstance> {
        let result = self.lookup(interface, name).and_then(|registration| {
            let scope = self.resolve_scope(&registration, hint.as_ref())?;
            registration.get_instance(scope)
        });
        self.report_resolution(interface, name, &result);
        result
    }

    /// Resolve and complete the instance's asynchronous initialization
    pub async fn get_async(
        &self,
        interface: TypeInfo,
        name: &str,
        hint: Option<ScopeHint>,
    ) -> RegistryResult<ServiceInstance> {
        let result = match self.lookup(interface, name) {
            Ok(registration) => match self.resolve_scope(&registration, hint.as_ref()) {
                Ok(scope) => {
                    registration
                        .get_instance_async(scope, self.inner.config.strict_async_access)
                        .await
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.report_resolution(interface, name, &result);
        result
    }

    /// Resolve synchronously and downcast to the concrete implementation
    pub fn get_typed<T: Service>(
        &self,
        interface: TypeInfo,
        name: &str,
        hint: Option<ScopeHint>,
    ) -> RegistryResult<Arc<T>> {
        let instance = self.get(interface, name, hint)?;
        instance.downcast::<T>().ok_or_else(|| {
            RegistryError::validation(
                format!("{}[{}]", interface, name),
                format!("resolved instance is not a {}", std::any::type_name::<T>()),
            )
        })
    }

    /// Release an instance. Host-managed teardown is queued onto the host
    /// thread when called elsewhere.
    pub fn release(
        &self,
        interface: TypeInfo,
        name: &str,
        instance: ServiceInstance,
    ) -> RegistryResult<()> {
        let result = self
            .lookup(interface, name)
            .and_then(|registration| registration.release(instance));
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    /// Release an instance and wait for its teardown to finish
    pub async fn release_async(
        &self,
        interface: TypeInfo,
        name: &str,
        instance: ServiceInstance,
    ) -> RegistryResult<()> {
        let result = match self.lookup(interface, name) {
            Ok(registration) => registration.release_async(instance).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(error) = &result {
            self.report(error);
        }
        result
    }

    /// Remove a registration and wait until all its instances are torn down
    pub async fn unregister(&self, interface: TypeInfo, name: &str) -> RegistryResult<()> {
        let key = ServiceKey::new(interface, name)?;
        let Some(registration) = self.inner.table.remove(&key) else {
            let error = RegistryError::NotFound {
                key: key.to_string(),
            };
            self.report(&error);
            return Err(error);
        };

        let released = self.teardown(registration).await;
        self.inner.host.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::Unregistered,
            Severity::Info,
            format!("Unregistered {} ({} instances released)", key, released),
            json!({ "key": key.to_string(), "released": released }),
        ));
        Ok(())
    }

    /// Unregister everything. Returns the number of registrations removed.
    pub async fn clear(&self) -> usize {
        let registrations = self.inner.table.drain();
        let count = registrations.len();
        for registration in registrations {
            let key = registration.key().to_string();
            let released = self.teardown(registration).await;
            debug!("Cleared {} ({} instances released)", key, released);
        }
        info!("Cleared {} registrations", count);
        count
    }

    /// Registered names for an interface, sorted
    pub fn names(&self, interface: TypeInfo) -> Vec<String> {
        self.inner.table.names(interface)
    }

    pub fn is_registered(&self, interface: TypeInfo, name: &str) -> bool {
        ServiceKey::new(interface, name)
            .map(|key| self.inner.table.contains(&key))
            .unwrap_or(false)
    }

    pub fn registration_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Read-only view of one registration's instances
    pub fn inspect(&self, interface: TypeInfo, name: &str) -> Option<RegistrationSnapshot> {
        let key = ServiceKey::new(interface, name).ok()?;
        self.inner.table.get(&key).map(|registration| registration.snapshot())
    }

    /// Snapshots of every registration, sorted by key
    pub fn snapshot_all(&self) -> Vec<RegistrationSnapshot> {
        let mut snapshots: Vec<RegistrationSnapshot> = self
            .inner
            .table
            .registrations()
            .iter()
            .map(|registration| registration.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Validate the dependency graph from any interface or implementation
    pub fn validate(&self, root: TypeInfo) -> ValidationOutcome {
        self.inner.catalog.validate(root)
    }

    pub fn catalog(&self) -> &DescriptorCatalog {
        &self.inner.catalog
    }

    pub fn scopes(&self) -> &Arc<ScopeTracker> {
        &self.inner.scopes
    }

    pub fn diagnostics(&self) -> &DiagnosticsBus {
        &self.inner.host.diagnostics
    }

    pub fn host_thread(&self) -> &HostThread {
        &self.inner.host.thread
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn try_register(
        &self,
        interface: TypeInfo,
        implementation: TypeInfo,
        name: &str,
        lifetime: Lifetime,
        scope_context: ScopeContext,
    ) -> RegistryResult<()> {
        let key = ServiceKey::new(interface, name)?;
        let descriptor = self
            .inner
            .catalog
            .descriptor(implementation)
            .ok_or_else(|| not_described(implementation))?;

        if descriptor.interface() != interface {
            return Err(RegistryError::validation(
                &key,
                format!(
                    "{} implements {}, not {}",
                    implementation,
                    descriptor.interface(),
                    interface
                ),
            ));
        }

        if !lifetime.accepts(scope_context) {
            let expected = if lifetime.is_scoped() {
                "a non-global scope context"
            } else {
                "the global scope context"
            };
            return Err(RegistryError::validation(
                &key,
                format!(
                    "{} lifetime requires {}, got {}",
                    lifetime, expected, scope_context
                ),
            ));
        }

        if let Some(outcome) = self.inner.catalog.outcome(implementation) {
            if outcome.is_hard_cycle {
                return Err(RegistryError::CircularDependency {
                    service: format!("{} ({})", key, implementation),
                    chain: outcome.format_chain(),
                });
            }
            if outcome.is_soft_cycle() && self.inner.config.warn_on_soft_cycles {
                self.inner.host.diagnostics.emit(DiagnosticEvent::new(
                    DiagnosticKind::CircularDependency,
                    Severity::Warning,
                    format!(
                        "Soft circular dependency for {}: {}. The services must not use each other during initialization.",
                        implementation,
                        outcome.format_chain()
                    ),
                    json!({
                        "key": key.to_string(),
                        "implementation": implementation.name(),
                        "chain": outcome.chain.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "hard": false,
                    }),
                ));
            }
        }

        if descriptor.has_async_dependency() && !descriptor.is_async_capable() {
            warn!(
                "{} depends on an async-capable implementation but is not async-capable",
                implementation
            );
            self.inner.host.diagnostics.emit(DiagnosticEvent::new(
                DiagnosticKind::AsyncDependencyViolation,
                Severity::Warning,
                format!(
                    "{} has an async dependency: make it async-capable or always resolve it with get_async",
                    implementation
                ),
                json!({ "key": key.to_string(), "implementation": implementation.name() }),
            ));
        }

        let registration = Arc::new(Registration::new(
            key.clone(),
            descriptor,
            lifetime,
            scope_context,
            self.inner.host.clone(),
        ));
        self.inner.table.insert(registration)?;

        info!("Registered {} -> {} ({})", key, implementation, lifetime);
        self.inner.host.diagnostics.emit(DiagnosticEvent::new(
            DiagnosticKind::Registered,
            Severity::Info,
            format!("Registered {} as {} ({}, {})", implementation, key, lifetime, scope_context),
            json!({
                "key": key.to_string(),
                "implementation": implementation.name(),
                "lifetime": lifetime,
                "scope_context": scope_context,
            }),
        ));
        Ok(())
    }

    fn lookup(&self, interface: TypeInfo, name: &str) -> RegistryResult<Arc<Registration>> {
        let key = ServiceKey::new(interface, name)?;
        self.inner
            .table
            .get(&key)
            .ok_or_else(|| RegistryError::NotFound {
                key: key.to_string(),
            })
    }

    /// Scope for a resolution: explicit scope, then the caller's associated
    /// scope, then the current scope of the registration's context
    fn resolve_scope(
        &self,
        registration: &Registration,
        hint: Option<&ScopeHint>,
    ) -> RegistryResult<ScopeId> {
        if !registration.lifetime().is_scoped() {
            return Ok(ScopeId::NONE);
        }

        let context = registration.scope_context();
        let scopes = &self.inner.scopes;
        let scope = match hint {
            Some(ScopeHint::Scope(scope)) => Some(*scope),
            Some(ScopeHint::Caller(caller)) => scopes
                .scope_of_caller(caller)
                .or_else(|| scopes.current(context)),
            None => scopes.current(context),
        };

        let Some(scope) = scope else {
            return Err(RegistryError::validation(
                registration.key(),
                format!("{} lifetime needs an open {} scope", registration.lifetime(), context),
            ));
        };

        match scopes.context_of(scope) {
            None => Err(RegistryError::validation(
                registration.key(),
                format!("{} is not open", scope),
            )),
            Some(actual) if actual != context => Err(RegistryError::validation(
                registration.key(),
                format!("{} is a {} scope, registration requires {}", scope, actual, context),
            )),
            Some(_) => Ok(scope),
        }
    }

    async fn teardown(&self, registration: Arc<Registration>) -> usize {
        let thread = &self.inner.host.thread;
        if registration.descriptor().kind().requires_host_thread() && !thread.is_host_thread() {
            let key = registration.key().to_string();
            match thread.run_async(move || registration.teardown_all()).await {
                Ok(released) => released,
                Err(e) => {
                    warn!("Teardown of {} did not complete: {}", key, e);
                    0
                }
            }
        } else {
            registration.teardown_all()
        }
    }

    fn report_resolution(
        &self,
        interface: TypeInfo,
        name: &str,
        result: &RegistryResult<ServiceInstance>,
    ) {
        match result {
            Ok(instance) => self.inner.host.diagnostics.emit(DiagnosticEvent::new(
                DiagnosticKind::InstanceResolved,
                Severity::Debug,
                format!("Resolved {}[{}] as {}", interface, name, instance.key()),
                json!({
                    "interface": interface.name(),
                    "name": name,
                    "instance": instance.key().to_string(),
                    "instance_id": instance.id(),
                }),
            )),
            Err(error) => self.report(error),
        }
    }

    fn report(&self, error: &RegistryError) {
        self.inner.host.diagnostics.emit(DiagnosticEvent::new(
            error.diagnostic_kind(),
            Severity::Error,
            error.to_string(),
            json!({ "error": error.to_string() }),
        ));
    }
}

fn not_described(implementation: TypeInfo) -> RegistryError {
    RegistryError::NotFound {
        key: format!("descriptor for {}", implementation.name()),
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.inner.table.len())
            .field("catalog", &self.inner.catalog)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    trait Clock {}
    struct SystemClock;
    struct FrameClock;
    impl Service for SystemClock {}
    impl Service for FrameClock {}

    fn registry() -> ServiceRegistry {
        let catalog = DescriptorCatalog::build(vec![
            Descriptor::builder(TypeInfo::of::<dyn Clock>(), TypeInfo::of::<SystemClock>())
                .constructed_with(|| Ok(SystemClock))
                .build(),
            Descriptor::builder(TypeInfo::of::<dyn Clock>(), TypeInfo::of::<FrameClock>())
                .lifetime(Lifetime::ScopedSingleton)
                .scope_context(ScopeContext::Level)
                .name("frame")
                .constructed_with(|| Ok(FrameClock))
                .build(),
        ])
        .unwrap();
        ServiceRegistry::new(catalog)
    }

    #[test]
    fn test_scope_context_must_match_lifetime() {
        let registry = registry();
        let result = registry.register(
            TypeInfo::of::<dyn Clock>(),
            TypeInfo::of::<SystemClock>(),
            "system",
            Lifetime::Singleton,
            ScopeContext::World,
        );
        assert!(matches!(result, Err(RegistryError::ValidationError { .. })));
    }

    #[test]
    fn test_interface_must_match_descriptor() {
        trait Other {}
        let registry = registry();
        let result = registry.register(
            TypeInfo::of::<dyn Other>(),
            TypeInfo::of::<SystemClock>(),
            "system",
            Lifetime::Singleton,
            ScopeContext::Global,
        );
        assert!(matches!(result, Err(RegistryError::ValidationError { .. })));
    }

    #[test]
    fn test_scoped_resolution_needs_open_scope() {
        let registry = registry();
        registry
            .register_descriptor(TypeInfo::of::<FrameClock>())
            .unwrap();

        let result = registry.get(TypeInfo::of::<dyn Clock>(), "frame", None);
        assert!(matches!(result, Err(RegistryError::ValidationError { .. })));

        let level = registry.scopes().open(ScopeContext::Level);
        let instance = registry
            .get(TypeInfo::of::<dyn Clock>(), "frame", None)
            .unwrap();
        assert_eq!(instance.scope(), Some(level));
    }

    #[test]
    fn test_scope_hint_of_wrong_context_rejected() {
        let registry = registry();
        registry
            .register_descriptor(TypeInfo::of::<FrameClock>())
            .unwrap();
        let world = registry.scopes().open(ScopeContext::World);

        let result = registry.get(
            TypeInfo::of::<dyn Clock>(),
            "frame",
            Some(ScopeHint::Scope(world)),
        );
        assert!(matches!(result, Err(RegistryError::ValidationError { .. })));
    }

    #[test]
    fn test_caller_association_selects_scope() {
        let registry = registry();
        registry
            .register_descriptor(TypeInfo::of::<FrameClock>())
            .unwrap();
        let first = registry.scopes().open(ScopeContext::Level);
        let _second = registry.scopes().open(ScopeContext::Level);
        registry.scopes().associate("hud", first);

        let instance = registry
            .get(
                TypeInfo::of::<dyn Clock>(),
                "frame",
                Some(ScopeHint::Caller("hud".to_string())),
            )
            .unwrap();
        assert_eq!(instance.scope(), Some(first));
    }

    #[test]
    fn test_closing_scope_tears_down_instances() {
        let registry = registry();
        registry
            .register_descriptor(TypeInfo::of::<FrameClock>())
            .unwrap();
        let level = registry.scopes().open(ScopeContext::Level);
        let instance = registry
            .get(TypeInfo::of::<dyn Clock>(), "frame", None)
            .unwrap();

        registry.scopes().close(level);
        assert!(instance.is_released());
        let snapshot = registry.inspect(TypeInfo::of::<dyn Clock>(), "frame").unwrap();
        assert!(snapshot.active.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_reported() {
        let registry = registry();
        let mut events = registry.diagnostics().subscribe();

        let result = registry.get(TypeInfo::of::<dyn Clock>(), "missing", None);
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, DiagnosticKind::InstanceNotFound);
        assert_eq!(event.severity, Severity::Error);
    }

    #[test]
    fn test_dropping_registry_unsubscribes_listener() {
        let scopes = Arc::new(ScopeTracker::new());
        let registry = ServiceRegistry::builder(DescriptorCatalog::empty())
            .scopes(scopes.clone())
            .build()
            .unwrap();
        let id = registry.inner.listener_id.clone();
        drop(registry);

        assert!(!scopes.unsubscribe(&id));
    }
}
