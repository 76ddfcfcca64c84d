//! Descriptor discovery using the inventory crate
//!
//! Crates that provide implementations submit a [`DescriptorSource`] with
//! `inventory::submit!`; [`DescriptorCatalog::discover`] collects every linked
//! source and builds a validated catalog from them.
//!
//! ```rust,ignore
//! use hostreg::{Descriptor, DescriptorSource, Lifetime, TypeInfo};
//!
//! fn audio_descriptors() -> Vec<Descriptor> {
//!     vec![Descriptor::builder(TypeInfo::of::<dyn Mixer>(), TypeInfo::of::<SoftwareMixer>())
//!         .lifetime(Lifetime::Singleton)
//!         .constructed_with(|| Ok(SoftwareMixer::default()))
//!         .build()]
//! }
//!
//! inventory::submit! {
//!     DescriptorSource::new("audio", audio_descriptors)
//! }
//! ```

use tracing::{debug, info};

use crate::catalog::DescriptorCatalog;
use crate::descriptor::Descriptor;
use crate::error::RegistryResult;

/// A group of descriptors contributed by one crate or module
pub struct DescriptorSource {
    /// Name of the group (e.g. "audio", "rendering")
    pub name: &'static str,

    /// Produces the group's descriptors
    pub descriptors: fn() -> Vec<Descriptor>,

    /// Collection order (lower = earlier, default = 100)
    pub priority: u32,
}

impl DescriptorSource {
    pub const fn new(name: &'static str, descriptors: fn() -> Vec<Descriptor>) -> Self {
        Self {
            name,
            descriptors,
            priority: 100,
        }
    }

    pub const fn with_priority(
        name: &'static str,
        descriptors: fn() -> Vec<Descriptor>,
        priority: u32,
    ) -> Self {
        Self {
            name,
            descriptors,
            priority,
        }
    }
}

inventory::collect!(DescriptorSource);

fn sorted_sources() -> Vec<&'static DescriptorSource> {
    let mut sources: Vec<&DescriptorSource> = inventory::iter::<DescriptorSource>().collect();
    // Stable sort keeps link order for equal priorities
    sources.sort_by_key(|source| source.priority);
    sources
}

/// Descriptors of every linked source, in priority order
pub fn collect_descriptors() -> Vec<Descriptor> {
    let sources = sorted_sources();
    info!("Discovered {} descriptor sources via inventory", sources.len());

    let mut descriptors = Vec::new();
    for source in sources {
        let produced = (source.descriptors)();
        debug!(
            "Source '{}' (priority {}) contributed {} descriptors",
            source.name,
            source.priority,
            produced.len()
        );
        descriptors.extend(produced);
    }
    descriptors
}

/// Names of every linked source, in priority order
pub fn list_sources() -> Vec<&'static str> {
    sorted_sources().into_iter().map(|source| source.name).collect()
}

impl DescriptorCatalog {
    /// Build a catalog from every linked [`DescriptorSource`]
    pub fn discover() -> RegistryResult<Self> {
        DescriptorCatalog::build(collect_descriptors())
    }
}
