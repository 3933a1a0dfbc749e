//! Task provider abstraction
//!
//! The engine never spawns threads directly; it asks an injected
//! [`TaskProvider`] to run concurrent behaviors and to sleep inside timer
//! activities. The default provider is backed by OS threads.

use std::thread;
use std::time::Duration;

/// Handle to a spawned task
pub trait TaskHandle: Send {
    /// Block until the task completes.
    ///
    /// Calling `join` from within the task itself must not deadlock; the
    /// default provider detaches in that case.
    fn join(&mut self);
}

/// Provider of concurrent execution and cooperative sleeping
pub trait TaskProvider: Send + Sync {
    /// Spawn a task running `f`; `name` identifies it for diagnostics
    fn spawn(&self, name: &str, f: Box<dyn FnOnce() + Send>) -> Box<dyn TaskHandle>;

    /// Cooperative sleep used by timer activities
    fn sleep_for(&self, duration: Duration);
}

/// Task provider backed by `std::thread`
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTaskProvider;

struct ThreadTaskHandle {
    handle: Option<thread::JoinHandle<()>>,
}

impl TaskHandle for ThreadTaskHandle {
    fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Joining from the task's own thread would deadlock; release the
        // handle instead and let the thread run to completion detached.
        if handle.thread().id() == thread::current().id() {
            drop(handle);
            return;
        }
        if let Err(panic) = handle.join() {
            tracing::error!(?panic, "joined task had panicked");
        }
    }
}

impl TaskProvider for ThreadTaskProvider {
    fn spawn(&self, name: &str, f: Box<dyn FnOnce() + Send>) -> Box<dyn TaskHandle> {
        let builder = thread::Builder::new().name(name.to_string());
        let handle = builder
            .spawn(f)
            .unwrap_or_else(|error| panic!("failed to spawn task {name:?}: {error}"));
        Box::new(ThreadTaskHandle {
            handle: Some(handle),
        })
    }

    fn sleep_for(&self, duration: Duration) {
        thread::sleep(duration);
    }
}
