//! Diagnostic events for resolution, validation and lifecycle
//!
//! Every event carries a structured JSON payload for tooling plus a
//! pre-formatted message for humans. Events are broadcast to subscribers
//! through a tokio broadcast channel; when nobody is subscribed the event is
//! written as a plain `tracing` line at its severity instead.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = DiagnosticsBus::new();
//! let mut events = bus.subscribe();
//!
//! registry.get(TypeInfo::of::<dyn Storage>(), "missing", None).ok();
//!
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.kind, DiagnosticKind::InstanceNotFound);
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Channel capacity for broadcast events
const CHANNEL_CAPACITY: usize = 1024;

/// Category of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Registered,
    Unregistered,
    InstanceCreated,
    InstanceResolved,
    InstanceNotFound,
    MultipleInstancesFound,
    DuplicateRegistration,
    ValidationError,
    InitializationError,
    CircularDependency,
    AsyncDependencyViolation,
    InstanceInvalid,
    AlreadyReleased,
    PoolResetFailed,
    DisposalConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One diagnostic event
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
}

impl DiagnosticEvent {
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        message: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            payload,
            emitted_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Fan-out point for diagnostic events
///
/// Cloning shares the underlying channel.
#[derive(Clone, Debug)]
pub struct DiagnosticsBus {
    sender: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticsBus {
    /// Create a bus with the default capacity (1024 events)
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event, or log it when no subscriber is attached
    pub fn emit(&self, event: DiagnosticEvent) {
        if self.sender.receiver_count() == 0 {
            log_event(&event);
            return;
        }
        // A send error only means every receiver went away in the meantime
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            log_event(&event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DiagnosticsBus {
    fn default() -> Self {
        Self::new()
    }
}

fn log_event(event: &DiagnosticEvent) {
    match event.severity {
        Severity::Debug => debug!(kind = ?event.kind, "{}", event.message),
        Severity::Info => info!(kind = ?event.kind, "{}", event.message),
        Severity::Warning => warn!(kind = ?event.kind, "{}", event.message),
        Severity::Error => error!(kind = ?event.kind, "{}", event.message),
    }
}
