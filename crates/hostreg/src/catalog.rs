//! Descriptor store
//!
//! [`DescriptorCatalog`] is the immutable descriptor store the registry reads
//! from. Building it validates every implementation once and fills in the
//! derived `has_async_dependency` flag, so the flag is settled before the
//! first registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::descriptor::Descriptor;
use crate::error::{RegistryError, RegistryResult};
use crate::key::TypeInfo;
use crate::validation::{DependencyValidator, ValidationOutcome};

/// Read access to implementation descriptors
pub trait DescriptorStore: Send + Sync {
    /// Descriptor of an implementation type
    fn descriptor(&self, implementation: TypeInfo) -> Option<Arc<Descriptor>>;

    /// All descriptors, in the order they were added
    fn descriptors(&self) -> Vec<Arc<Descriptor>>;

    /// Implementations that provide `interface`, in the order they were added
    fn implementations_of(&self, interface: TypeInfo) -> Vec<TypeInfo>;

    fn is_interface(&self, type_info: TypeInfo) -> bool;

    /// Type-relevance filter for dependency edges: only interfaces and
    /// implementations known to the store take part in validation
    fn is_known(&self, type_info: TypeInfo) -> bool {
        self.is_interface(type_info) || self.descriptor(type_info).is_some()
    }
}

#[derive(Default)]
struct Index {
    order: Vec<TypeInfo>,
    descriptors: HashMap<TypeInfo, Arc<Descriptor>>,
    implementations: HashMap<TypeInfo, Vec<TypeInfo>>,
}

impl Index {
    fn from_descriptors(descriptors: Vec<Descriptor>) -> RegistryResult<Self> {
        let mut index = Index::default();
        for descriptor in descriptors {
            let implementation = descriptor.implementation();
            if index.descriptors.contains_key(&implementation) {
                return Err(RegistryError::validation(
                    implementation,
                    "implementation described more than once",
                ));
            }
            index
                .implementations
                .entry(descriptor.interface())
                .or_default()
                .push(implementation);
            index.order.push(implementation);
            index.descriptors.insert(implementation, Arc::new(descriptor));
        }
        Ok(index)
    }
}

impl DescriptorStore for Index {
    fn descriptor(&self, implementation: TypeInfo) -> Option<Arc<Descriptor>> {
        self.descriptors.get(&implementation).cloned()
    }

    fn descriptors(&self) -> Vec<Arc<Descriptor>> {
        self.order
            .iter()
            .filter_map(|implementation| self.descriptors.get(implementation).cloned())
            .collect()
    }

    fn implementations_of(&self, interface: TypeInfo) -> Vec<TypeInfo> {
        self.implementations
            .get(&interface)
            .cloned()
            .unwrap_or_default()
    }

    fn is_interface(&self, type_info: TypeInfo) -> bool {
        self.implementations.contains_key(&type_info)
    }
}

/// Validated, immutable set of descriptors
pub struct DescriptorCatalog {
    index: Index,
    outcomes: HashMap<TypeInfo, ValidationOutcome>,
}

impl DescriptorCatalog {
    pub fn empty() -> Self {
        Self {
            index: Index::default(),
            outcomes: HashMap::new(),
        }
    }

    /// Index and validate `descriptors`.
    ///
    /// Fails only when an implementation is described twice; cycles are
    /// recorded per implementation and surface when it is registered.
    pub fn build(descriptors: impl IntoIterator<Item = Descriptor>) -> RegistryResult<Self> {
        let descriptors: Vec<Descriptor> = descriptors.into_iter().collect();
        let raw = Index::from_descriptors(descriptors.clone())?;

        let mut outcomes = HashMap::new();
        {
            let validator = DependencyValidator::new(&raw);
            for descriptor in &descriptors {
                let implementation = descriptor.implementation();
                let outcome = validator.validate(implementation);
                if outcome.is_hard_cycle {
                    warn!(
                        "Hard circular dependency for {}: {}",
                        implementation,
                        outcome.format_chain()
                    );
                }
                outcomes.insert(implementation, outcome);
            }
        }

        let flagged = descriptors
            .into_iter()
            .map(|descriptor| {
                let has_async_dependency = outcomes
                    .get(&descriptor.implementation())
                    .map(|outcome| outcome.has_async_dependency)
                    .unwrap_or(false);
                descriptor.with_async_dependency(has_async_dependency)
            })
            .collect();
        let index = Index::from_descriptors(flagged)?;

        info!("Built descriptor catalog with {} implementations", index.order.len());
        Ok(Self { index, outcomes })
    }

    /// Stored validation result of an implementation
    pub fn outcome(&self, implementation: TypeInfo) -> Option<&ValidationOutcome> {
        self.outcomes.get(&implementation)
    }

    /// Run a fresh validation from any type, interface or implementation
    pub fn validate(&self, root: TypeInfo) -> ValidationOutcome {
        debug!("Validating dependency graph from {}", root);
        DependencyValidator::new(self).validate(root)
    }

    pub fn len(&self) -> usize {
        self.index.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.order.is_empty()
    }
}

impl DescriptorStore for DescriptorCatalog {
    fn descriptor(&self, implementation: TypeInfo) -> Option<Arc<Descriptor>> {
        self.index.descriptor(implementation)
    }

    fn descriptors(&self) -> Vec<Arc<Descriptor>> {
        self.index.descriptors()
    }

    fn implementations_of(&self, interface: TypeInfo) -> Vec<TypeInfo> {
        self.index.implementations_of(interface)
    }

    fn is_interface(&self, type_info: TypeInfo) -> bool {
        self.index.is_interface(type_info)
    }
}

impl Default for DescriptorCatalog {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for DescriptorCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCatalog")
            .field("implementations", &self.index.order)
            .finish()
    }
}
