//! Host object primitives
//!
//! The registry never creates or destroys host objects itself; it asks the
//! embedding host through [`HostObjects`]. Host-managed calls are always made
//! on the host thread (see [`crate::marshal`]).

use std::sync::Arc;

use anyhow::bail;

use crate::descriptor::Descriptor;
use crate::diagnostics::DiagnosticsBus;
use crate::marshal::HostThread;
use crate::service::Service;

/// Object primitives supplied by the host environment
pub trait HostObjects: Send + Sync {
    /// Create a host-managed object named `name`. Called on the host thread.
    fn create_host_managed(
        &self,
        descriptor: &Descriptor,
        name: &str,
    ) -> anyhow::Result<Arc<dyn Service>>;

    /// Destroy a host-managed object. Called on the host thread.
    fn destroy_host_managed(&self, object: &Arc<dyn Service>) -> anyhow::Result<()>;

    fn create_asset_backed(
        &self,
        descriptor: &Descriptor,
        name: &str,
    ) -> anyhow::Result<Arc<dyn Service>>;

    /// Existing asset-backed objects for `descriptor`. More than one is
    /// reported as a diagnostic and the first one is used.
    fn find_existing_asset_backed(&self, _descriptor: &Descriptor) -> Vec<Arc<dyn Service>> {
        Vec::new()
    }

    fn release_asset_backed(&self, _object: &Arc<dyn Service>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-parent a pooled object under its new name
    fn activate(&self, _object: &Arc<dyn Service>, _name: &str) {}

    /// Detach an object from its active owner before it goes idle
    fn deactivate(&self, _object: &Arc<dyn Service>) {}
}

/// Host without an object model; only plain implementations can be resolved
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHost;

impl HostObjects for NoHost {
    fn create_host_managed(
        &self,
        descriptor: &Descriptor,
        _name: &str,
    ) -> anyhow::Result<Arc<dyn Service>> {
        bail!(
            "no host attached: cannot create host-managed {}",
            descriptor.implementation()
        )
    }

    fn destroy_host_managed(&self, _object: &Arc<dyn Service>) -> anyhow::Result<()> {
        Ok(())
    }

    fn create_asset_backed(
        &self,
        descriptor: &Descriptor,
        _name: &str,
    ) -> anyhow::Result<Arc<dyn Service>> {
        bail!(
            "no host attached: cannot load asset-backed {}",
            descriptor.implementation()
        )
    }
}

/// Everything a registration needs to talk to the host
#[derive(Clone)]
pub struct HostContext {
    pub objects: Arc<dyn HostObjects>,
    pub thread: HostThread,
    pub diagnostics: DiagnosticsBus,
}

impl HostContext {
    pub fn new(objects: Arc<dyn HostObjects>, thread: HostThread, diagnostics: DiagnosticsBus) -> Self {
        Self {
            objects,
            thread,
            diagnostics,
        }
    }

    /// No host object model, headless marshaller, fresh diagnostics bus
    pub fn headless() -> Self {
        Self::new(Arc::new(NoHost), HostThread::headless(), DiagnosticsBus::new())
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}
