#![forbid(unsafe_code)]

//! # HSM compile-time variant
//!
//! The same execution contract as `hsm-engine`, with the model normalized to
//! index-based arrays when constants are evaluated: states, transitions, and
//! choices are plain `const`-constructible records, behaviors are function
//! pointers, and [`CtModel::new`] is a `const fn` that validates the
//! structure and builds the static lookup tables (sorted event index,
//! deferral bit-matrix). A malformed model fails to compile; dispatch never
//! allocates.
//!
//! Differences from the dynamic engine, by construction:
//! - events carry no payload,
//! - activities and timers execute through a [`CtTaskProvider`] whose
//!   default runs tasks inline with no-op sleeps, so each timer arms once
//!   per state entry and periodic timers degrade to one-shot,
//! - wildcard deferral patterns are not supported.

pub mod machine;
pub mod model;

pub use machine::*;
pub use model::*;

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

/// Index sentinel for "no reference"
pub const INVALID: usize = usize::MAX;

/// Cancellation flag handed to every behavior invocation
#[derive(Default)]
pub struct CtContext {
    flag: AtomicBool,
}

impl CtContext {
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Events consumed by the compile-time machine.
///
/// Signal events are matched by name (with hierarchical suffix stripping);
/// completion and time events are matched structurally by index, which is
/// what the static tables store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtEvent {
    /// User-dispatched event
    Signal(&'static str),
    /// Completion of the state with this index
    Completion(usize),
    /// Expiry of the timer on the transition with this index
    Time(usize),
}

impl CtEvent {
    /// The signal name, when there is one
    pub fn name(&self) -> Option<&'static str> {
        match self {
            CtEvent::Signal(name) => Some(name),
            _ => None,
        }
    }
}

/// Execution provider for concurrent behaviors and timer sleeps
pub trait CtTaskProvider {
    /// Run a concurrent behavior
    fn run(&self, task: &mut dyn FnMut());

    /// Sleep before a timer fires
    fn sleep_for(&self, duration: Duration);
}

/// Default provider: tasks run inline, sleeps are no-ops
#[derive(Debug, Default, Clone, Copy)]
pub struct Sequential;

impl CtTaskProvider for Sequential {
    fn run(&self, task: &mut dyn FnMut()) {
        task();
    }

    fn sleep_for(&self, _duration: Duration) {}
}
