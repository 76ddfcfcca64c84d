//! Capabilities a service object can expose to the lifecycle manager
//!
//! Every managed object implements [`Service`]. The optional capabilities
//! (pooling, disposal, asynchronous initialization, liveness) are discovered
//! through the `as_*` accessors instead of runtime type tests, so an
//! implementation opts in by overriding the accessor:
//!
//! ```rust,ignore
//! struct Projectile;
//!
//! impl Poolable for Projectile {
//!     fn pool_settings(&self) -> PoolSettings {
//!         PoolSettings::new(8, 4)
//!     }
//! }
//!
//! impl Service for Projectile {
//!     fn as_poolable(&self) -> Option<&dyn Poolable> {
//!         Some(self)
//!     }
//! }
//! ```

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

/// Type-erasure helper implemented for every `Send + Sync + 'static` type
pub trait AsAny: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A managed service object
pub trait Service: AsAny {
    fn as_poolable(&self) -> Option<&dyn Poolable> {
        None
    }

    fn as_disposable(&self) -> Option<&dyn Disposable> {
        None
    }

    fn as_async_initialize(&self) -> Option<&dyn AsyncInitialize> {
        None
    }

    /// Liveness check for cached instances, e.g. a host object destroyed
    /// behind the registry's back
    fn is_alive(&self) -> bool {
        true
    }
}

/// Pool sizing declared by a poolable implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Instances (active plus idle) created when the pool is first initialized
    pub initial_size: usize,
    /// Instances added whenever a take finds the pool empty
    pub expansion_size: usize,
}

impl PoolSettings {
    pub fn new(initial_size: usize, expansion_size: usize) -> Self {
        Self {
            initial_size,
            expansion_size,
        }
    }

    /// Expansion of at least one instance so an empty pool always makes progress
    pub(crate) fn normalized(self) -> Self {
        Self {
            initial_size: self.initial_size.max(1),
            expansion_size: self.expansion_size.max(1),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Implementations that can be recycled through an idle pool
pub trait Poolable: Send + Sync {
    fn pool_settings(&self) -> PoolSettings;

    fn on_taken_from_pool(&self) {}

    fn on_returned_to_pool(&self) {}
}

/// Implementations with explicit teardown
pub trait Disposable: Send + Sync {
    /// Runs on release, before the instance is pooled or destroyed
    fn system_dispose(&self) -> anyhow::Result<()>;

    /// Clears the disposed state when a pooled instance is reused.
    /// Returning `false` is logged as a warning.
    fn reset_disposal(&self) -> bool {
        true
    }
}

/// Implementations that must finish an asynchronous setup step before use
#[async_trait]
pub trait AsyncInitialize: Send + Sync {
    async fn initialize(&self) -> anyhow::Result<()>;
}
