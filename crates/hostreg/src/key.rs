//! Type identities, service keys and instance keys

use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{RegistryError, RegistryResult};
use crate::scope::ScopeId;

/// Identity of a Rust type used as an interface or implementation.
///
/// Interfaces are usually trait objects (`TypeInfo::of::<dyn Storage>()`),
/// implementations concrete types. Equality and hashing use the `TypeId`
/// only; the name is carried for messages.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, e.g. `FooImpl` or `dyn IFoo`
    pub fn short_name(&self) -> &'static str {
        let trimmed = self.name.strip_prefix("dyn ").unwrap_or(self.name);
        let base = trimmed.split('<').next().unwrap_or(trimmed);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(other.name).then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeInfo({})", self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Registration key: an interface plus a non-empty name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    interface: TypeInfo,
    name: String,
}

impl ServiceKey {
    pub fn new(interface: TypeInfo, name: impl Into<String>) -> RegistryResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::validation(
                interface,
                "service name must not be empty",
            ));
        }
        Ok(Self { interface, name })
    }

    pub fn interface(&self) -> TypeInfo {
        self.interface
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.interface, self.name)
    }
}

/// Key of one cached instance within a registration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(String);

impl InstanceKey {
    const SINGLETON: &'static str = "singleton";
    const IDLE: &'static str = "<pooled>";

    pub fn singleton() -> Self {
        Self(Self::SINGLETON.to_string())
    }

    pub fn scoped(scope: ScopeId) -> Self {
        Self(scope.to_string())
    }

    pub fn transient(name: &str, counter: u64) -> Self {
        Self(format!("{}_{}", name, counter))
    }

    pub fn scoped_transient(scope: ScopeId, counter: u64) -> Self {
        Self(format!("{}_{}", scope, counter))
    }

    /// Placeholder carried by instances sitting idle in a pool
    pub fn idle() -> Self {
        Self(Self::IDLE.to_string())
    }

    pub fn is_idle(&self) -> bool {
        self.0 == Self::IDLE
    }

    /// Whether this key was derived from `scope` (scoped singleton or scoped transient)
    pub fn belongs_to_scope(&self, scope: ScopeId) -> bool {
        let prefix = scope.to_string();
        match self.0.strip_prefix(prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('_'),
            None => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
