//! Bounded event queue
//!
//! A fixed-capacity FIFO with priority insertion: completion events are
//! consumed before any pending signal events, so a composite reacts to its
//! child reaching a final state before external input.

use heapless::Deque;
use parking_lot::Mutex;

use hsm_core::Event;

/// Bounded, thread-safe event queue.
///
/// Capacity is fixed at compile time; `push` on a full queue fails soft by
/// handing the event back to the caller.
pub struct EventQueue<const N: usize> {
    inner: Mutex<Deque<Event, N>>,
}

impl<const N: usize> EventQueue<N> {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Deque::new()),
        }
    }

    /// Enqueue an event.
    ///
    /// Completion events insert at the head, everything else appends at the
    /// tail. On a full queue the event is returned unconsumed.
    pub fn push(&self, event: Event) -> Result<(), Event> {
        let mut queue = self.inner.lock();
        if event.is_completion() {
            queue.push_front(event)
        } else {
            queue.push_back(event)
        }
    }

    /// Remove and return the event at the head
    pub fn pop(&self) -> Option<Event> {
        self.inner.lock().pop_front()
    }

    /// Splice a buffer of events back onto the head, preserving its order.
    ///
    /// Used to re-offer deferred events after a state change. Events that no
    /// longer fit are dropped with a warning.
    pub fn requeue_front(&self, events: Vec<Event>) {
        let mut queue = self.inner.lock();
        for event in events.into_iter().rev() {
            if let Err(event) = queue.push_front(event) {
                tracing::warn!(name = event.name(), "queue full, deferred event dropped");
            }
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Maximum capacity
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop all queued events
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
