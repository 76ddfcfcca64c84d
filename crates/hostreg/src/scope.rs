//! Host scopes: bounded lifetime contexts opened and closed by the host
//!
//! The host drives a [`ScopeTracker`] with `open`/`close` calls (normally from
//! its own thread). The tracker remembers which scopes are open, which one is
//! current for each [`ScopeContext`], which callers belong to which scope, and
//! notifies subscribed [`ScopeListener`]s. The registry subscribes once so
//! scope-bound instances are torn down when their scope closes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::lifetime::ScopeContext;

/// Identifier of an opened scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Neutral marker used by lifetimes that are not scope-bound
    pub const NONE: ScopeId = ScopeId(0);

    pub const fn from_raw(raw: u64) -> Self {
        ScopeId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("no-scope")
        } else {
            write!(f, "scope-{}", self.0)
        }
    }
}

/// Caller-supplied hint used to pick the scope of a scope-bound resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeHint {
    /// Resolve in this exact scope
    Scope(ScopeId),
    /// Resolve in the scope associated with this caller, if any
    Caller(String),
}

/// Receives scope notifications from a [`ScopeTracker`]
pub trait ScopeListener: Send + Sync {
    /// Stable identifier; subscribing twice with the same id is a no-op
    fn listener_id(&self) -> &str;

    fn on_scope_opened(&self, _scope: ScopeId, _context: ScopeContext) {}

    fn on_scope_closed(&self, scope: ScopeId);
}

#[derive(Debug, Clone, Copy)]
struct OpenScope {
    id: ScopeId,
    context: ScopeContext,
}

/// Tracks open scopes and fans out open/close notifications
pub struct ScopeTracker {
    next_id: AtomicU64,
    // Ordered by opening time; the last entry of a context is its current scope
    open: RwLock<Vec<OpenScope>>,
    callers: DashMap<String, ScopeId>,
    listeners: RwLock<Vec<Arc<dyn ScopeListener>>>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            open: RwLock::new(Vec::new()),
            callers: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Open a new scope of the given context and make it current for that context
    pub fn open(&self, context: ScopeContext) -> ScopeId {
        let id = ScopeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.open.write().push(OpenScope { id, context });
        info!("Opened {} ({})", id, context);

        for listener in self.listeners_snapshot() {
            listener.on_scope_opened(id, context);
        }
        id
    }

    /// Close a scope. Returns `false` if the scope was not open.
    ///
    /// Listeners run on the calling thread after the scope has been removed.
    pub fn close(&self, scope: ScopeId) -> bool {
        let removed = {
            let mut open = self.open.write();
            match open.iter().position(|s| s.id == scope) {
                Some(index) => {
                    open.remove(index);
                    true
                }
                None => false,
            }
        };

        if !removed {
            debug!("Ignoring close of {}: not open", scope);
            return false;
        }

        self.callers.retain(|_, associated| *associated != scope);
        info!("Closed {}", scope);

        for listener in self.listeners_snapshot() {
            listener.on_scope_closed(scope);
        }
        true
    }

    pub fn is_open(&self, scope: ScopeId) -> bool {
        self.open.read().iter().any(|s| s.id == scope)
    }

    pub fn context_of(&self, scope: ScopeId) -> Option<ScopeContext> {
        self.open
            .read()
            .iter()
            .find(|s| s.id == scope)
            .map(|s| s.context)
    }

    /// Most recently opened scope of `context` that is still open
    pub fn current(&self, context: ScopeContext) -> Option<ScopeId> {
        self.open
            .read()
            .iter()
            .rev()
            .find(|s| s.context == context)
            .map(|s| s.id)
    }

    pub fn open_scopes(&self) -> Vec<ScopeId> {
        self.open.read().iter().map(|s| s.id).collect()
    }

    /// Associate a caller with a scope; the association ends when the scope closes
    pub fn associate(&self, caller: impl Into<String>, scope: ScopeId) {
        self.callers.insert(caller.into(), scope);
    }

    pub fn scope_of_caller(&self, caller: &str) -> Option<ScopeId> {
        self.callers.get(caller).map(|entry| *entry.value())
    }

    /// Subscribe a listener. Returns `false` if a listener with the same id is
    /// already subscribed.
    pub fn subscribe(&self, listener: Arc<dyn ScopeListener>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners
            .iter()
            .any(|existing| existing.listener_id() == listener.listener_id())
        {
            return false;
        }
        debug!("Subscribed scope listener '{}'", listener.listener_id());
        listeners.push(listener);
        true
    }

    pub fn unsubscribe(&self, listener_id: &str) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.listener_id() != listener_id);
        listeners.len() != before
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn ScopeListener>> {
        self.listeners.read().clone()
    }
}

impl Default for ScopeTracker {
    fn default() -> Self {
        Self::new()
    }
}
