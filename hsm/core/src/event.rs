//! Events and event-name matching

use core::fmt;
use std::any::Any;
use std::sync::Arc;

/// Name of the distinguished completion event that drives initial transitions
pub const INITIAL_EVENT: &str = "hsm_initial";

/// Name of the completion event observed by exit behaviors during `stop`
pub const FINAL_EVENT: &str = "hsm_final";

/// Name of the diagnostic event raised when a choice pseudostate cannot
/// resolve any branch
pub const DIAGNOSTIC_EVENT: &str = "hsm_diagnostic";

/// Discriminates how an event entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Dispatched by user code
    Signal,
    /// Synthesized by the dispatcher (initial, final-state completion);
    /// promoted to the head of the event queue
    Completion,
    /// Emitted by an `after`/`every` timer activity
    Time,
}

/// An event: a name plus an optional opaque payload.
///
/// Events are cheap to clone; the payload is shared.
#[derive(Clone)]
pub struct Event {
    name: String,
    kind: EventKind,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Event {
    /// Create a signal event
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Signal,
            payload: None,
        }
    }

    /// Create a signal event carrying a payload
    pub fn with_payload<T: Any + Send + Sync>(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Signal,
            payload: Some(Arc::new(payload)),
        }
    }

    /// Create a completion event
    pub fn completion(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Completion,
            payload: None,
        }
    }

    /// Create a time event
    pub fn time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EventKind::Time,
            payload: None,
        }
    }

    /// The distinguished completion event used at start-up
    pub fn initial() -> Self {
        Self::completion(INITIAL_EVENT)
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event kind
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// True for synthetic completion events, which jump the queue
    pub fn is_completion(&self) -> bool {
        self.kind == EventKind::Completion
    }

    /// Borrow the payload, downcast to a concrete type
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

/// Event-name variants for hierarchical matching.
///
/// Yields the name itself followed by the prefixes obtained by repeatedly
/// truncating at the last `_` or `/`, so `request_data` also matches
/// transitions triggered on `request`.
pub fn name_variants(name: &str) -> Vec<&str> {
    let mut variants = Vec::with_capacity(4);
    variants.push(name);

    let mut current = name;
    while let Some(pos) = current.rfind(['_', '/']) {
        current = &current[..pos];
        if current.is_empty() {
            break;
        }
        variants.push(current);
    }
    variants
}
