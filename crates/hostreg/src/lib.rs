//! Service registry and instance lifecycle engine
//!
//! `hostreg` hands out implementations for `(interface, name)` pairs and
//! governs how the backing objects are created, cached, pooled and torn down.
//!
//! - [`DescriptorCatalog`] holds the immutable implementation metadata and
//!   validates the dependency graph once: hard cycles, soft cycles and the
//!   async-initialization taint.
//! - [`ServiceRegistry`] is the facade: register, resolve (sync or async),
//!   release, unregister.
//! - [`Registration`] owns the instances of one key under its [`Lifetime`]:
//!   singletons, per-scope singletons, transients and scoped transients, with
//!   optional pooling and disposal.
//! - [`HostThread`] marshals host-managed object work onto the host's thread,
//!   and [`ScopeTracker`] drives scope-bound teardown.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hostreg::{Descriptor, DescriptorCatalog, Lifetime, ScopeContext, ServiceRegistry, TypeInfo};
//!
//! let catalog = DescriptorCatalog::build(vec![
//!     Descriptor::builder(TypeInfo::of::<dyn Storage>(), TypeInfo::of::<DiskStorage>())
//!         .constructed_with(|| Ok(DiskStorage::default()))
//!         .build(),
//! ])?;
//! let registry = ServiceRegistry::new(catalog);
//! hostreg::register_service!(registry, dyn Storage => DiskStorage, "main", Lifetime::Singleton)?;
//!
//! let storage = hostreg::resolve_service!(registry, dyn Storage, "main")?;
//! ```

pub mod catalog;
pub mod config;
pub mod descriptor;
pub mod diagnostics;
pub mod discovery;
pub mod error;
pub mod host;
pub mod instance;
pub mod key;
pub mod kind;
pub mod lifetime;
pub mod marshal;
mod pool;
pub mod registration;
pub mod registry;
pub mod scope;
pub mod service;
pub mod table;
pub mod validation;

pub use catalog::{DescriptorCatalog, DescriptorStore};
pub use config::RegistryConfig;
pub use descriptor::{Constructor, Descriptor, DescriptorBuilder, Origin};
pub use diagnostics::{DiagnosticEvent, DiagnosticKind, DiagnosticsBus, Severity};
pub use discovery::{collect_descriptors, list_sources, DescriptorSource};
pub use error::{RegistryError, RegistryResult};
pub use host::{HostContext, HostObjects, NoHost};
pub use instance::ServiceInstance;
pub use key::{InstanceKey, ServiceKey, TypeInfo};
pub use kind::ImplementationKind;
pub use lifetime::{Lifetime, ScopeContext};
pub use marshal::{HostThread, MarshalError};
pub use registration::{Registration, RegistrationSnapshot};
pub use registry::{DiscoveryReport, ServiceRegistry, ServiceRegistryBuilder};
pub use scope::{ScopeHint, ScopeId, ScopeListener, ScopeTracker};
pub use service::{AsAny, AsyncInitialize, Disposable, PoolSettings, Poolable, Service};
pub use validation::{ChainLink, DependencyValidator, Hop, ValidationOutcome};

/// Register an implementation under a global scope context
#[macro_export]
macro_rules! register_service {
    ($registry:expr, $interface:ty => $implementation:ty, $name:expr, $lifetime:expr) => {
        $registry.register(
            $crate::TypeInfo::of::<$interface>(),
            $crate::TypeInfo::of::<$implementation>(),
            $name,
            $lifetime,
            $crate::ScopeContext::Global,
        )
    };
    ($registry:expr, $interface:ty => $implementation:ty, $name:expr, $lifetime:expr, $context:expr) => {
        $registry.register(
            $crate::TypeInfo::of::<$interface>(),
            $crate::TypeInfo::of::<$implementation>(),
            $name,
            $lifetime,
            $context,
        )
    };
}

/// Resolve a service synchronously
#[macro_export]
macro_rules! resolve_service {
    ($registry:expr, $interface:ty, $name:expr) => {
        $registry.get($crate::TypeInfo::of::<$interface>(), $name, None)
    };
    ($registry:expr, $interface:ty, $name:expr, $hint:expr) => {
        $registry.get($crate::TypeInfo::of::<$interface>(), $name, Some($hint))
    };
}
