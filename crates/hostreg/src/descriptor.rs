//! Implementation descriptors
//!
//! A [`Descriptor`] is the metadata record the scanner produces for one
//! implementation type: which interface it provides, how it is constructed,
//! its default lifetime, scope context and name, and the dependency edges the
//! validator walks. Descriptors are immutable once a
//! [`DescriptorCatalog`](crate::catalog::DescriptorCatalog) has been built;
//! the catalog fills in the derived `has_async_dependency` flag.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::key::TypeInfo;
use crate::kind::ImplementationKind;
use crate::lifetime::{Lifetime, ScopeContext};
use crate::service::Service;

/// Parameterless constructor for plain implementations
pub type Constructor = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Service>> + Send + Sync>;

/// Build configuration an implementation was discovered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Runtime,
    EditorOnly,
    Test,
}

/// Metadata for one implementation type
#[derive(Clone)]
pub struct Descriptor {
    interface: TypeInfo,
    implementation: TypeInfo,
    kind: ImplementationKind,
    lifetime: Lifetime,
    scope_context: ScopeContext,
    name: String,
    constructor: Option<Constructor>,
    origin: Origin,
    dependencies: Vec<TypeInfo>,
    additional_dependencies: Vec<TypeInfo>,
    is_async_capable: bool,
    has_async_dependency: bool,
}

impl Descriptor {
    /// Start a descriptor for `implementation` providing `interface`
    pub fn builder(interface: TypeInfo, implementation: TypeInfo) -> DescriptorBuilder {
        DescriptorBuilder::new(interface, implementation)
    }

    pub fn interface(&self) -> TypeInfo {
        self.interface
    }

    pub fn implementation(&self) -> TypeInfo {
        self.implementation
    }

    pub fn kind(&self) -> ImplementationKind {
        self.kind
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn scope_context(&self) -> ScopeContext {
        self.scope_context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constructor(&self) -> Option<&Constructor> {
        self.constructor.as_ref()
    }

    pub fn has_parameterless_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Dependencies discovered from the implementation's members
    pub fn dependencies(&self) -> &[TypeInfo] {
        &self.dependencies
    }

    /// Dependencies declared explicitly because they cannot be inferred
    pub fn additional_dependencies(&self) -> &[TypeInfo] {
        &self.additional_dependencies
    }

    /// Discovered and declared dependencies, in that order
    pub fn all_dependencies(&self) -> impl Iterator<Item = TypeInfo> + '_ {
        self.dependencies
            .iter()
            .chain(self.additional_dependencies.iter())
            .copied()
    }

    pub fn is_async_capable(&self) -> bool {
        self.is_async_capable
    }

    /// Set by the validator: something this implementation depends on needs
    /// asynchronous initialization
    pub fn has_async_dependency(&self) -> bool {
        self.has_async_dependency
    }

    /// Whether resolution must go through the asynchronous path
    pub fn requires_async_resolution(&self) -> bool {
        self.is_async_capable || self.has_async_dependency
    }

    pub(crate) fn with_async_dependency(mut self, has_async_dependency: bool) -> Self {
        self.has_async_dependency = has_async_dependency;
        self
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("interface", &self.interface)
            .field("implementation", &self.implementation)
            .field("kind", &self.kind)
            .field("lifetime", &self.lifetime)
            .field("scope_context", &self.scope_context)
            .field("name", &self.name)
            .field("has_constructor", &self.constructor.is_some())
            .field("origin", &self.origin)
            .field("dependencies", &self.dependencies)
            .field("additional_dependencies", &self.additional_dependencies)
            .field("is_async_capable", &self.is_async_capable)
            .field("has_async_dependency", &self.has_async_dependency)
            .finish()
    }
}

/// Builder for [`Descriptor`]
///
/// Defaults: plain kind, singleton lifetime, global context, runtime origin,
/// and the implementation's short type name as service name.
pub struct DescriptorBuilder {
    descriptor: Descriptor,
}

impl DescriptorBuilder {
    pub fn new(interface: TypeInfo, implementation: TypeInfo) -> Self {
        Self {
            descriptor: Descriptor {
                interface,
                implementation,
                kind: ImplementationKind::Plain,
                lifetime: Lifetime::Singleton,
                scope_context: ScopeContext::Global,
                name: implementation.short_name().to_string(),
                constructor: None,
                origin: Origin::Runtime,
                dependencies: Vec::new(),
                additional_dependencies: Vec::new(),
                is_async_capable: false,
                has_async_dependency: false,
            },
        }
    }

    pub fn kind(mut self, kind: ImplementationKind) -> Self {
        self.descriptor.kind = kind;
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.descriptor.lifetime = lifetime;
        self
    }

    pub fn scope_context(mut self, scope_context: ScopeContext) -> Self {
        self.descriptor.scope_context = scope_context;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    pub fn origin(mut self, origin: Origin) -> Self {
        self.descriptor.origin = origin;
        self
    }

    /// Type-erased constructor
    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.descriptor.constructor = Some(constructor);
        self
    }

    /// Constructor returning the concrete implementation
    pub fn constructed_with<T, F>(self, factory: F) -> Self
    where
        T: Service,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.constructor(Arc::new(move || {
            let service: Arc<dyn Service> = Arc::new(factory()?);
            Ok(service)
        }))
    }

    /// Dependency discovered from a constructor parameter, field or property
    pub fn depends_on(mut self, dependency: TypeInfo) -> Self {
        self.descriptor.dependencies.push(dependency);
        self
    }

    /// Dependency that cannot be inferred and is declared explicitly
    pub fn also_depends_on(mut self, dependency: TypeInfo) -> Self {
        self.descriptor.additional_dependencies.push(dependency);
        self
    }

    pub fn async_capable(mut self, is_async_capable: bool) -> Self {
        self.descriptor.is_async_capable = is_async_capable;
        self
    }

    pub fn build(self) -> Descriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Audio {}
    struct Mixer;
    impl Service for Mixer {}
    struct Clock;

    #[test]
    fn test_builder_defaults() {
        let descriptor =
            Descriptor::builder(TypeInfo::of::<dyn Audio>(), TypeInfo::of::<Mixer>()).build();

        assert_eq!(descriptor.name(), "Mixer");
        assert_eq!(descriptor.kind(), ImplementationKind::Plain);
        assert_eq!(descriptor.lifetime(), Lifetime::Singleton);
        assert_eq!(descriptor.scope_context(), ScopeContext::Global);
        assert_eq!(descriptor.origin(), Origin::Runtime);
        assert!(!descriptor.has_parameterless_constructor());
        assert!(!descriptor.requires_async_resolution());
    }

    #[test]
    fn test_constructed_with_produces_service() {
        let descriptor = Descriptor::builder(TypeInfo::of::<dyn Audio>(), TypeInfo::of::<Mixer>())
            .constructed_with(|| Ok(Mixer))
            .build();

        let constructor = descriptor.constructor().unwrap();
        let service = constructor().unwrap();
        assert!(service.as_any_arc().downcast::<Mixer>().is_ok());
    }

    #[test]
    fn test_all_dependencies_include_declared_edges() {
        let descriptor = Descriptor::builder(TypeInfo::of::<dyn Audio>(), TypeInfo::of::<Mixer>())
            .depends_on(TypeInfo::of::<Clock>())
            .also_depends_on(TypeInfo::of::<dyn Audio>())
            .build();

        let all: Vec<_> = descriptor.all_dependencies().collect();
        assert_eq!(all, vec![TypeInfo::of::<Clock>(), TypeInfo::of::<dyn Audio>()]);
    }
}
