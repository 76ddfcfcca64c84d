//! Handles to managed service objects
//!
//! A [`ManagedObject`] is the backing object plus the state that lives as
//! long as the object does: its id, the registration that produced it and
//! the once-only async initialization. Every handout wraps it in a fresh
//! [`ServiceInstance`] lease carrying the key, the scope and a one-shot
//! released flag. A pooled object therefore gets a new lease each time it
//! is taken, and a stale lease can never release the current one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::key::InstanceKey;
use crate::scope::ScopeId;
use crate::service::Service;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Backing object shared by every lease handed out for it
pub(crate) struct ManagedObject {
    id: u64,
    owner: u64,
    object: Arc<dyn Service>,
    initialized: OnceCell<()>,
}

impl ManagedObject {
    pub(crate) fn new(owner: u64, object: Arc<dyn Service>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            owner,
            object,
            initialized: OnceCell::new(),
        })
    }

    pub(crate) fn object(&self) -> &Arc<dyn Service> {
        &self.object
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("initialized", &self.initialized.initialized())
            .finish()
    }
}

/// One handout of a managed object.
///
/// Cloning is cheap and yields another handle to the same lease; use
/// [`ServiceInstance::ptr_eq`] for identity.
#[derive(Clone)]
pub struct ServiceInstance {
    lease: Arc<Lease>,
}

struct Lease {
    managed: Arc<ManagedObject>,
    key: InstanceKey,
    scope: Option<ScopeId>,
    released: AtomicBool,
}

impl ServiceInstance {
    /// Lease a freshly constructed object
    pub(crate) fn new(
        owner: u64,
        object: Arc<dyn Service>,
        key: InstanceKey,
        scope: Option<ScopeId>,
    ) -> Self {
        Self::lease(ManagedObject::new(owner, object), key, scope)
    }

    /// New lease on an existing object, e.g. one taken from the pool
    pub(crate) fn lease(
        managed: Arc<ManagedObject>,
        key: InstanceKey,
        scope: Option<ScopeId>,
    ) -> Self {
        Self {
            lease: Arc::new(Lease {
                managed,
                key,
                scope,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Process-unique id of the backing object
    pub fn id(&self) -> u64 {
        self.lease.managed.id
    }

    pub fn key(&self) -> InstanceKey {
        self.lease.key.clone()
    }

    /// Scope the instance is affiliated with; `None` when unscoped
    pub fn scope(&self) -> Option<ScopeId> {
        self.lease.scope
    }

    pub fn object(&self) -> &Arc<dyn Service> {
        &self.lease.managed.object
    }

    /// Downcast the object to its concrete implementation type
    pub fn downcast<T: Service>(&self) -> Option<Arc<T>> {
        self.object().clone().as_any_arc().downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &ServiceInstance) -> bool {
        Arc::ptr_eq(&self.lease, &other.lease)
    }

    pub fn is_released(&self) -> bool {
        self.lease.released.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.lease.managed.initialized.initialized()
    }

    pub(crate) fn owner(&self) -> u64 {
        self.lease.managed.owner
    }

    pub(crate) fn managed(&self) -> &Arc<ManagedObject> {
        &self.lease.managed
    }

    /// Returns `false` if this lease was already released
    pub(crate) fn mark_released(&self) -> bool {
        !self.lease.released.swap(true, Ordering::AcqRel)
    }

    /// Run the object's async initializer, at most once per object.
    /// Concurrent callers wait for the same run.
    pub(crate) async fn ensure_initialized(&self) -> anyhow::Result<()> {
        let object = self.object().clone();
        self.lease
            .managed
            .initialized
            .get_or_try_init(|| async move {
                match object.as_async_initialize() {
                    Some(initializer) => initializer.initialize().await,
                    None => Ok(()),
                }
            })
            .await?;
        Ok(())
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("id", &self.id())
            .field("key", &self.lease.key)
            .field("scope", &self.lease.scope)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::AsyncInitialize;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl AsyncInitialize for Counter {
        async fn initialize(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Service for Counter {
        fn as_async_initialize(&self) -> Option<&dyn AsyncInitialize> {
            Some(self)
        }
    }

    fn instance() -> (ServiceInstance, Arc<Counter>) {
        let counter = Arc::new(Counter {
            runs: AtomicUsize::new(0),
        });
        let instance = ServiceInstance::new(1, counter.clone(), InstanceKey::singleton(), None);
        (instance, counter)
    }

    #[tokio::test]
    async fn test_async_initialization_runs_once() {
        let (instance, counter) = instance();
        let other = instance.clone();

        let (a, b) = tokio::join!(instance.ensure_initialized(), other.ensure_initialized());
        a.unwrap();
        b.unwrap();
        instance.ensure_initialized().await.unwrap();

        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert!(instance.is_initialized());
    }

    #[test]
    fn test_release_flag_is_one_shot() {
        let (instance, _) = instance();
        assert!(instance.mark_released());
        assert!(!instance.mark_released());
        assert!(instance.is_released());
    }

    #[tokio::test]
    async fn test_new_lease_shares_object_not_release_state() {
        let (first, counter) = instance();
        first.ensure_initialized().await.unwrap();
        assert!(first.mark_released());

        let scope = ScopeId::from_raw(4);
        let second = ServiceInstance::lease(
            first.managed().clone(),
            InstanceKey::scoped(scope),
            Some(scope),
        );
        assert!(!second.ptr_eq(&first));
        assert_eq!(second.id(), first.id());
        assert!(!second.is_released());
        assert!(second.is_initialized());
        assert_eq!(second.scope(), Some(scope));

        // Releasing the stale lease again leaves the new one untouched
        assert!(!first.mark_released());
        assert!(!second.is_released());

        second.ensure_initialized().await.unwrap();
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_downcast_and_identity() {
        let (instance, counter) = instance();
        let concrete = instance.downcast::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&concrete, &counter));
        assert!(instance.ptr_eq(&instance.clone()));
    }
}
