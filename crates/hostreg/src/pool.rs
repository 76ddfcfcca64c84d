//! Idle object pool of one registration

use std::collections::VecDeque;
use std::sync::Arc;

use crate::instance::ManagedObject;
use crate::service::PoolSettings;

/// Idle objects waiting to be leased again.
///
/// Only the owning registration touches the pool, always under its lock.
/// Idle objects hold no lease, so they carry neither key nor scope.
#[derive(Debug)]
pub(crate) struct InstancePool {
    settings: PoolSettings,
    idle: VecDeque<Arc<ManagedObject>>,
}

impl InstancePool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings: settings.normalized(),
            idle: VecDeque::new(),
        }
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    pub fn pop(&mut self) -> Option<Arc<ManagedObject>> {
        self.idle.pop_front()
    }

    pub fn push(&mut self, object: Arc<ManagedObject>) {
        self.idle.push_back(object);
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }

    pub fn drain_all(&mut self) -> Vec<Arc<ManagedObject>> {
        self.idle.drain(..).collect()
    }
}
