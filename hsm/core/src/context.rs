//! Cancellation and completion signalling

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A one-shot, resettable signal.
///
/// Handed to every behavior invocation as its cancellation token: activities
/// poll [`Context::is_set`] and return promptly once it reads true. The same
/// type doubles as the dispatcher's queue-idle signal that callers can
/// [`Context::wait`] on.
#[derive(Default)]
pub struct Context {
    flag: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Context {
    /// Create an unset context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context that is already set
    pub fn set_new() -> Self {
        let context = Self::default();
        context.set();
        context
    }

    /// Set the flag and wake all waiters
    pub fn set(&self) {
        let _guard = self.mutex.lock();
        self.flag.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Check the flag without blocking
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clear the flag
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Block until the flag is set
    pub fn wait(&self) {
        let mut guard = self.mutex.lock();
        while !self.flag.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }

    /// Block until the flag is set or the timeout elapses.
    ///
    /// Returns true if the flag was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = self.mutex.lock();
        while !self.flag.load(Ordering::Acquire) {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                return self.flag.load(Ordering::Acquire);
            }
        }
        true
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context").field("set", &self.is_set()).finish()
    }
}
