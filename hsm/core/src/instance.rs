//! Instance facade
//!
//! User state types embed an [`Instance`] and expose it through
//! `AsRef<Instance>`. The running machine attaches itself on `start`, after
//! which behaviors may re-enter the dispatcher through their instance
//! (`instance.as_ref().dispatch(...)`) without holding any engine type.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::context::Context;
use crate::event::Event;
use crate::task::{TaskProvider, ThreadTaskProvider};

/// Type-erased view of a running machine, implemented by the engine.
pub trait EventSink: Send + Sync {
    /// Enqueue an event for processing; returns the queue-idle signal
    fn post(&self, event: Event) -> Arc<Context>;

    /// Qualified name of the current leaf state, empty when stopped
    fn current_state(&self) -> String;

    /// The task provider driving this machine's activities
    fn task_provider(&self) -> Arc<dyn TaskProvider>;
}

/// Per-machine facade embedded in user instance types.
///
/// A detached instance (no machine started) is inert: `dispatch` drops the
/// event and returns an already-set signal, `state` is empty.
#[derive(Default)]
pub struct Instance {
    sink: RwLock<Option<Weak<dyn EventSink>>>,
}

impl Instance {
    /// Create a detached instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to a running machine. Called by the engine on `start`.
    pub fn attach(&self, sink: Weak<dyn EventSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Detach from the machine. Called by the engine on shutdown.
    pub fn detach(&self) {
        *self.sink.write() = None;
    }

    fn sink(&self) -> Option<Arc<dyn EventSink>> {
        self.sink.read().as_ref().and_then(Weak::upgrade)
    }

    /// Enqueue an event on the attached machine.
    ///
    /// Returns a signal that is set once the machine's queue is idle; on a
    /// detached instance the signal is already set.
    pub fn dispatch(&self, event: Event) -> Arc<Context> {
        match self.sink() {
            Some(sink) => sink.post(event),
            None => Arc::new(Context::set_new()),
        }
    }

    /// Qualified name of the current leaf state, empty when detached or
    /// stopped
    pub fn state(&self) -> String {
        self.sink().map(|sink| sink.current_state()).unwrap_or_default()
    }

    /// Task provider of the attached machine, or a fresh default provider
    pub fn task_provider(&self) -> Arc<dyn TaskProvider> {
        match self.sink() {
            Some(sink) => sink.task_provider(),
            None => Arc::new(ThreadTaskProvider),
        }
    }
}

impl core::fmt::Debug for Instance {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Instance")
            .field("attached", &self.sink().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_instance_is_inert() {
        let instance = Instance::new();
        assert_eq!(instance.state(), "");
        let done = instance.dispatch(Event::new("ignored"));
        assert!(done.is_set());
    }

    struct RecordingSink {
        posted: parking_lot::Mutex<Vec<String>>,
        idle: Arc<Context>,
    }

    impl EventSink for RecordingSink {
        fn post(&self, event: Event) -> Arc<Context> {
            self.posted.lock().push(event.name().to_string());
            Arc::clone(&self.idle)
        }

        fn current_state(&self) -> String {
            "/m/leaf".to_string()
        }

        fn task_provider(&self) -> Arc<dyn TaskProvider> {
            Arc::new(ThreadTaskProvider)
        }
    }

    #[test]
    fn test_attached_instance_forwards() {
        let sink = Arc::new(RecordingSink {
            posted: parking_lot::Mutex::new(Vec::new()),
            idle: Arc::new(Context::set_new()),
        });
        let instance = Instance::new();
        instance.attach(Arc::downgrade(&sink) as Weak<dyn EventSink>);

        assert_eq!(instance.state(), "/m/leaf");
        instance.dispatch(Event::new("ping"));
        assert_eq!(sink.posted.lock().as_slice(), ["ping".to_string()]);

        instance.detach();
        assert_eq!(instance.state(), "");
    }
}
