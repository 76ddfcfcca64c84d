//! Implementation kinds and their per-kind object operations

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::descriptor::Descriptor;
use crate::diagnostics::{DiagnosticEvent, DiagnosticKind, Severity};
use crate::error::{RegistryError, RegistryResult};
use crate::host::HostContext;
use crate::service::Service;

/// How objects of an implementation come into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationKind {
    /// Built from the descriptor's parameterless constructor
    Plain,
    /// Owned by the host's object model; host-thread only
    HostManagedObject,
    /// Loaded from a host asset, reusing an existing one when present
    AssetBacked,
}

impl ImplementationKind {
    pub fn requires_host_thread(self) -> bool {
        self == ImplementationKind::HostManagedObject
    }

    pub(crate) fn construct(
        self,
        descriptor: &Arc<Descriptor>,
        name: &str,
        host: &HostContext,
    ) -> RegistryResult<Arc<dyn Service>> {
        let implementation = descriptor.implementation();
        match self {
            ImplementationKind::Plain => {
                let constructor = descriptor.constructor().ok_or_else(|| {
                    RegistryError::validation(
                        implementation,
                        "plain implementation has no parameterless constructor",
                    )
                })?;
                constructor().map_err(|e| RegistryError::initialization(implementation, e))
            }
            ImplementationKind::HostManagedObject => {
                let objects = host.objects.clone();
                let descriptor = descriptor.clone();
                let name = name.to_string();
                host.thread
                    .run_blocking(move || objects.create_host_managed(&descriptor, &name))
                    .map_err(|e| RegistryError::initialization(implementation, e.into()))?
                    .map_err(|e| RegistryError::initialization(implementation, e))
            }
            ImplementationKind::AssetBacked => {
                let mut existing = host.objects.find_existing_asset_backed(descriptor);
                if existing.len() > 1 {
                    host.diagnostics.emit(DiagnosticEvent::new(
                        DiagnosticKind::MultipleInstancesFound,
                        Severity::Warning,
                        format!(
                            "Found {} existing assets for {}; using the first",
                            existing.len(),
                            implementation
                        ),
                        json!({
                            "implementation": implementation.name(),
                            "count": existing.len(),
                        }),
                    ));
                }
                if !existing.is_empty() {
                    debug!("Reusing existing asset for {}", implementation);
                    return Ok(existing.swap_remove(0));
                }
                host.objects
                    .create_asset_backed(descriptor, name)
                    .map_err(|e| RegistryError::initialization(implementation, e))
            }
        }
    }

    pub(crate) fn destroy(self, object: Arc<dyn Service>, host: &HostContext) -> anyhow::Result<()> {
        match self {
            ImplementationKind::Plain => {
                drop(object);
                Ok(())
            }
            ImplementationKind::HostManagedObject => {
                let objects = host.objects.clone();
                host.thread
                    .run_blocking(move || objects.destroy_host_managed(&object))?
            }
            ImplementationKind::AssetBacked => host.objects.release_asset_backed(&object),
        }
    }

    pub(crate) fn activate(self, object: &Arc<dyn Service>, name: &str, host: &HostContext) {
        match self {
            ImplementationKind::Plain => {}
            ImplementationKind::HostManagedObject => {
                let objects = host.objects.clone();
                let object = object.clone();
                let name = name.to_string();
                if let Err(e) = host
                    .thread
                    .run_blocking(move || objects.activate(&object, &name))
                {
                    warn!("Failed to reactivate pooled object: {}", e);
                }
            }
            ImplementationKind::AssetBacked => host.objects.activate(object, name),
        }
    }

    pub(crate) fn deactivate(self, object: &Arc<dyn Service>, host: &HostContext) {
        match self {
            ImplementationKind::Plain => {}
            ImplementationKind::HostManagedObject => {
                let objects = host.objects.clone();
                let object = object.clone();
                if let Err(e) = host.thread.run_blocking(move || objects.deactivate(&object)) {
                    warn!("Failed to deactivate pooled object: {}", e);
                }
            }
            ImplementationKind::AssetBacked => host.objects.deactivate(object),
        }
    }
}
