//! Activity lifecycle management
//!
//! Concurrent behaviors (activities and timers) run on tasks obtained from
//! the injected task provider. Exactly one task may be live per behavior
//! name; exiting the owning state signals the task's context and joins it
//! before the transition proceeds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use hsm_core::{Context, TaskHandle, TaskProvider};

struct ActiveTask {
    context: Arc<Context>,
    task: Box<dyn TaskHandle>,
}

/// Tracks the live tasks of one machine instance.
///
/// The map has its own lock so activity threads can be inspected without
/// touching the processing lock; joins always happen outside the map lock.
pub struct ActivityManager {
    provider: Arc<dyn TaskProvider>,
    active: Mutex<HashMap<String, ActiveTask>>,
}

impl ActivityManager {
    pub fn new(provider: Arc<dyn TaskProvider>) -> Self {
        Self {
            provider,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The task provider backing this manager
    pub fn provider(&self) -> &Arc<dyn TaskProvider> {
        &self.provider
    }

    /// Spawn the task for a behavior unless one is already live.
    ///
    /// `make_task` receives the freshly allocated cancellation context and
    /// returns the closure to run.
    pub fn launch(
        &self,
        name: &str,
        make_task: impl FnOnce(Arc<Context>) -> Box<dyn FnOnce() + Send>,
    ) {
        let mut active = self.active.lock();
        if active.contains_key(name) {
            tracing::debug!(name, "activity already running, not respawned");
            return;
        }
        let context = Arc::new(Context::new());
        let task = self.provider.spawn(name, make_task(Arc::clone(&context)));
        active.insert(name.to_string(), ActiveTask { context, task });
    }

    /// Signal a behavior's context and join its task.
    ///
    /// Joining is mandatory on the exit path: the next entry or exit must not
    /// observe a still-running predecessor. The provider's same-thread join
    /// fallback covers an activity that exits its own state re-entrantly.
    pub fn cancel_and_join(&self, name: &str) {
        let entry = self.active.lock().remove(name);
        if let Some(mut entry) = entry {
            entry.context.set();
            entry.task.join();
        }
    }

    /// Cancel every live task, then join them all
    pub fn stop_all(&self) {
        let drained: Vec<(String, ActiveTask)> = self.active.lock().drain().collect();
        for (_, entry) in &drained {
            entry.context.set();
        }
        for (_, mut entry) in drained {
            entry.task.join();
        }
    }

    /// Whether a task is currently tracked for this behavior name
    pub fn is_active(&self, name: &str) -> bool {
        self.active.lock().contains_key(name)
    }

    /// Number of live tasks
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsm_core::ThreadTaskProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> ActivityManager {
        ActivityManager::new(Arc::new(ThreadTaskProvider))
    }

    #[test]
    fn test_launch_and_cancel() {
        let manager = manager();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&cancelled);
        manager.launch("/m/a/activity_0", move |context| {
            Box::new(move || {
                context.wait();
                count.fetch_add(1, Ordering::SeqCst);
            })
        });
        assert!(manager.is_active("/m/a/activity_0"));

        manager.cancel_and_join("/m/a/activity_0");
        assert!(!manager.is_active("/m/a/activity_0"));
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_launch_is_ignored() {
        let manager = manager();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            manager.launch("/m/a/activity_0", move |context| {
                Box::new(move || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    context.wait();
                })
            });
        }
        assert_eq!(manager.active_count(), 1);
        manager.stop_all();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_all_joins_everything() {
        let manager = manager();
        let live = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            let live = Arc::clone(&live);
            manager.launch(name, move |context| {
                Box::new(move || {
                    live.fetch_add(1, Ordering::SeqCst);
                    while !context.is_set() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    live.fetch_sub(1, Ordering::SeqCst);
                })
            });
        }
        manager.stop_all();
        assert_eq!(manager.active_count(), 0);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_unknown_is_harmless() {
        manager().cancel_and_join("/nope");
    }
}
