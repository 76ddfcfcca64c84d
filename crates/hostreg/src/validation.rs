//! Static dependency-graph validation
//!
//! [`DependencyValidator`] walks the dependency edges of a descriptor store
//! depth-first, starting from one type:
//!
//! - an interface node expands into every implementation of that interface;
//! - an implementation node follows its discovered and declared dependencies,
//!   keeping only types the store knows about.
//!
//! A node met again while it is still on the recursion path closes a cycle.
//! The cycle is *hard* when any link of the captured chain is a direct
//! reference to a concrete implementation type. Hard cycles cannot be broken
//! by lazy resolution and stop the walk. *Soft* cycles run purely through
//! interfaces; they are recorded and the walk continues.
//!
//! The walk also propagates the async taint: entering an async-capable
//! implementation marks every node on the current path as having an async
//! dependency, and so does reaching an already processed node that carries the
//! taint. Processed nodes are never re-entered, so the walk terminates on
//! cyclic graphs.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;

use crate::catalog::DescriptorStore;
use crate::key::TypeInfo;

/// How a link in a dependency chain was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// Start of the walk
    Root,
    /// Dependency declared on an interface type
    Interface,
    /// Implementation reached by expanding an interface
    Implementation { via: TypeInfo },
    /// Dependency declared directly on a concrete implementation type
    Concrete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub node: TypeInfo,
    pub hop: Hop,
}

impl fmt::Display for ChainLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hop {
            Hop::Root => write!(f, "{}", self.node),
            Hop::Interface => write!(f, "[interface] {}", self.node),
            Hop::Implementation { via } => write!(f, "{} (via {})", self.node, via),
            Hop::Concrete => write!(f, "[concrete] {}", self.node),
        }
    }
}

/// Result of validating one root type
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub has_cycle: bool,
    /// Chain of the reported cycle, from the first occurrence of the repeated
    /// node up to and including the repetition
    pub chain: Vec<ChainLink>,
    pub is_hard_cycle: bool,
    /// Whether the root depends, directly or transitively, on an
    /// async-capable implementation
    pub has_async_dependency: bool,
    /// Every node found to carry the async taint during the walk
    pub tainted: Vec<TypeInfo>,
}

impl ValidationOutcome {
    pub fn is_soft_cycle(&self) -> bool {
        self.has_cycle && !self.is_hard_cycle
    }

    /// Human-readable chain, e.g. `FooImpl -> [interface] Bar -> BarImpl (via Bar) -> [concrete] FooImpl`
    pub fn format_chain(&self) -> String {
        self.chain
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Depth-first validator over a [`DescriptorStore`]
pub struct DependencyValidator<'a> {
    store: &'a dyn DescriptorStore,
}

impl<'a> DependencyValidator<'a> {
    pub fn new(store: &'a dyn DescriptorStore) -> Self {
        Self { store }
    }

    pub fn validate(&self, root: TypeInfo) -> ValidationOutcome {
        let mut walk = Walk::new(self.store);
        walk.visit(root, Hop::Root);
        walk.finish(root)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Halt,
}

struct Walk<'a> {
    store: &'a dyn DescriptorStore,
    processed: HashSet<TypeInfo>,
    tainted: HashSet<TypeInfo>,
    path: Vec<ChainLink>,
    on_path: HashSet<TypeInfo>,
    expanding: HashSet<TypeInfo>,
    cycle: Option<Vec<ChainLink>>,
    is_hard_cycle: bool,
}

impl<'a> Walk<'a> {
    fn new(store: &'a dyn DescriptorStore) -> Self {
        Self {
            store,
            processed: HashSet::new(),
            tainted: HashSet::new(),
            path: Vec::new(),
            on_path: HashSet::new(),
            expanding: HashSet::new(),
            cycle: None,
            is_hard_cycle: false,
        }
    }

    fn visit(&mut self, node: TypeInfo, hop: Hop) -> Flow {
        let is_interface = self.store.is_interface(node);

        if self.on_path.contains(&node) || (is_interface && self.expanding.contains(&node)) {
            return self.close_cycle(node, hop);
        }

        if self.processed.contains(&node) {
            if self.tainted.contains(&node) || self.is_async_capable(node) {
                self.taint_path(None);
            }
            return Flow::Continue;
        }

        self.path.push(ChainLink { node, hop });
        self.on_path.insert(node);

        let flow = if is_interface {
            self.expand_interface(node)
        } else {
            self.follow_dependencies(node)
        };

        if flow == Flow::Halt {
            return flow;
        }

        self.path.pop();
        self.on_path.remove(&node);
        self.processed.insert(node);
        flow
    }

    fn expand_interface(&mut self, interface: TypeInfo) -> Flow {
        self.expanding.insert(interface);
        for implementation in self.store.implementations_of(interface) {
            if self.visit(implementation, Hop::Implementation { via: interface }) == Flow::Halt {
                return Flow::Halt;
            }
        }
        self.expanding.remove(&interface);
        Flow::Continue
    }

    fn follow_dependencies(&mut self, implementation: TypeInfo) -> Flow {
        let Some(descriptor) = self.store.descriptor(implementation) else {
            return Flow::Continue;
        };

        if descriptor.is_async_capable() {
            self.taint_path(Some(implementation));
        }

        for dependency in descriptor.all_dependencies() {
            if !self.store.is_known(dependency) {
                continue;
            }
            let hop = if self.store.is_interface(dependency) {
                Hop::Interface
            } else {
                Hop::Concrete
            };
            if self.visit(dependency, hop) == Flow::Halt {
                return Flow::Halt;
            }
        }
        Flow::Continue
    }

    fn close_cycle(&mut self, node: TypeInfo, hop: Hop) -> Flow {
        if self.tainted.contains(&node) {
            self.taint_path(None);
        } else if self.is_async_capable(node) {
            self.taint_path(Some(node));
        }

        let start = self
            .path
            .iter()
            .position(|link| link.node == node)
            .unwrap_or(0);
        let mut chain = self.path[start..].to_vec();
        chain.push(ChainLink { node, hop });

        let is_hard = chain.iter().skip(1).any(|link| link.hop == Hop::Concrete);
        debug!(
            "{} cycle: {}",
            if is_hard { "Hard" } else { "Soft" },
            chain
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        if self.cycle.is_none() || (is_hard && !self.is_hard_cycle) {
            self.cycle = Some(chain);
            self.is_hard_cycle = is_hard;
        }

        if is_hard {
            Flow::Halt
        } else {
            Flow::Continue
        }
    }

    /// Mark every node on the path, except `source`, as async-tainted
    fn taint_path(&mut self, source: Option<TypeInfo>) {
        for link in &self.path {
            if Some(link.node) != source {
                self.tainted.insert(link.node);
            }
        }
    }

    fn is_async_capable(&self, node: TypeInfo) -> bool {
        self.store
            .descriptor(node)
            .map(|descriptor| descriptor.is_async_capable())
            .unwrap_or(false)
    }

    fn finish(self, root: TypeInfo) -> ValidationOutcome {
        let mut tainted: Vec<TypeInfo> = self.tainted.iter().copied().collect();
        tainted.sort();

        ValidationOutcome {
            has_cycle: self.cycle.is_some(),
            chain: self.cycle.unwrap_or_default(),
            is_hard_cycle: self.is_hard_cycle,
            has_async_dependency: self.tainted.contains(&root),
            tainted,
        }
    }
}
