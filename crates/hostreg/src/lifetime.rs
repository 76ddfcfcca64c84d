//! Lifetime policies and scope contexts

use std::fmt;

use serde::{Deserialize, Serialize};

/// Instance lifetime policy of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifetime {
    /// One instance for the whole process
    Singleton,
    /// One instance per open scope
    ScopedSingleton,
    /// A fresh (or pooled) instance per resolution
    Transient,
    /// A fresh (or pooled) instance per resolution, torn down with its scope
    ScopedTransient,
}

impl Lifetime {
    /// Whether instances are bound to a scope
    pub fn is_scoped(self) -> bool {
        matches!(self, Lifetime::ScopedSingleton | Lifetime::ScopedTransient)
    }

    /// Whether resolutions share one cached instance per key
    pub fn is_cached(self) -> bool {
        matches!(self, Lifetime::Singleton | Lifetime::ScopedSingleton)
    }

    /// Scope-bound lifetimes need a non-global context, the others a global one
    pub fn accepts(self, context: ScopeContext) -> bool {
        self.is_scoped() != context.is_global()
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifetime::Singleton => "singleton",
            Lifetime::ScopedSingleton => "scoped singleton",
            Lifetime::Transient => "transient",
            Lifetime::ScopedTransient => "scoped transient",
        };
        f.write_str(name)
    }
}

/// Class of scope a registration is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeContext {
    /// Not bound to any host scope
    Global,
    World,
    Level,
    Session,
}

impl ScopeContext {
    pub fn is_global(self) -> bool {
        self == ScopeContext::Global
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeContext::Global => "global",
            ScopeContext::World => "world",
            ScopeContext::Level => "level",
            ScopeContext::Session => "session",
        };
        f.write_str(name)
    }
}
