//! Concurrent registration table

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{RegistryError, RegistryResult};
use crate::key::{ServiceKey, TypeInfo};
use crate::registration::Registration;

/// `ServiceKey -> Registration` map.
///
/// Inserts go through the entry API so a key is claimed at most once; reads
/// clone the `Arc` and release the shard guard immediately.
#[derive(Default)]
pub struct RegistrationTable {
    entries: DashMap<ServiceKey, Arc<Registration>>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, registration: Arc<Registration>) -> RegistryResult<()> {
        match self.entries.entry(registration.key().clone()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateRegistration {
                key: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(registration);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<Registration>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &ServiceKey) -> Option<Arc<Registration>> {
        self.entries.remove(key).map(|(_, registration)| registration)
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered names for an interface, sorted
    pub fn names(&self, interface: TypeInfo) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().interface() == interface)
            .map(|entry| entry.key().name().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        self.entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Remove and return every registration
    pub fn drain(&self) -> Vec<Arc<Registration>> {
        let keys: Vec<ServiceKey> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
