//! The execution kernel
//!
//! A [`Machine`] couples one user instance to an elaborated model and drives
//! it: `start` enters the initial configuration, `dispatch` enqueues and
//! drains, `stop` exits to the root and terminates activities.
//!
//! Threading model: all transition logic and synchronous behaviors run on
//! whichever thread currently holds the per-instance processing lock. The
//! lock is re-entrant so a behavior may call `dispatch` on its own instance;
//! the nested call only enqueues and the outer drain picks the event up.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

use hsm_core::{
    name_variants, path, Context, Event, EventSink, Instance, TaskProvider, ThreadTaskProvider,
    DIAGNOSTIC_EVENT, FINAL_EVENT,
};
use hsm_model::{
    Model, PseudostateKind, State, StateKind, Transition, TransitionKind, TransitionPath,
};

use crate::activity::ActivityManager;
use crate::queue::EventQueue;

/// Default capacity of the per-instance event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Bound required of user instance types
pub trait MachineInstance: AsRef<Instance> + Send + Sync + 'static {}

impl<I: AsRef<Instance> + Send + Sync + 'static> MachineInstance for I {}

/// A running state machine instance.
///
/// Owns the user instance for its lifetime; dropping the machine stops it.
pub struct Machine<I: MachineInstance> {
    shared: Arc<Shared<I>>,
}

impl<I: MachineInstance> Machine<I> {
    /// Associate `instance` with `model` and enter the initial
    /// configuration using the default thread-backed task provider.
    pub fn start(instance: I, model: Arc<Model<I>>) -> Self {
        Self::start_with_provider(instance, model, Arc::new(ThreadTaskProvider))
    }

    /// Start with an explicit task provider
    pub fn start_with_provider(
        instance: I,
        model: Arc<Model<I>>,
        provider: Arc<dyn TaskProvider>,
    ) -> Self {
        let shared = Arc::new(Shared {
            model,
            instance,
            queue: EventQueue::new(),
            processing: ReentrantMutex::new(RefCell::new(false)),
            idle: Arc::new(Context::set_new()),
            current: RwLock::new(None),
            activities: ActivityManager::new(provider),
            path_cache: Mutex::new(HashMap::new()),
            weak_self: OnceLock::new(),
        });
        let _ = shared.weak_self.set(Arc::downgrade(&shared));
        shared
            .instance
            .as_ref()
            .attach(Arc::downgrade(&shared) as Weak<dyn EventSink>);
        shared.start();
        Self { shared }
    }

    /// Enqueue an event and drain the queue if no other caller is doing so.
    ///
    /// Returns the queue-idle signal; it is set once the machine has
    /// processed everything currently queued.
    pub fn dispatch(&self, event: Event) -> Arc<Context> {
        self.shared.post(event)
    }

    /// Qualified name of the current leaf state, empty when stopped
    pub fn state(&self) -> String {
        self.shared.current_state()
    }

    /// Exit the active configuration and terminate all activities.
    ///
    /// Subsequent `dispatch` calls are no-ops until [`Machine::restart`].
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Re-enter the initial configuration after a `stop`
    pub fn restart(&self) {
        self.shared.start();
    }

    /// Block until the event queue is idle
    pub fn wait_idle(&self) {
        self.shared.idle.wait();
    }

    /// The user instance driven by this machine
    pub fn instance(&self) -> &I {
        &self.shared.instance
    }

    /// The shared model
    pub fn model(&self) -> &Arc<Model<I>> {
        &self.shared.model
    }
}

impl<I: MachineInstance> Drop for Machine<I> {
    fn drop(&mut self) {
        self.shared.stop();
        self.shared.instance.as_ref().detach();
    }
}

struct Shared<I: MachineInstance> {
    model: Arc<Model<I>>,
    instance: I,
    queue: EventQueue<DEFAULT_QUEUE_CAPACITY>,
    /// Re-entrant processing lock; the inner flag is true while the holder
    /// is draining, which turns nested same-thread dispatches into plain
    /// enqueues.
    processing: ReentrantMutex<RefCell<bool>>,
    idle: Arc<Context>,
    current: RwLock<Option<String>>,
    activities: ActivityManager,
    /// Lazily extended paths for transitions taken from a descendant of
    /// their declared source, keyed (transition, occupied state).
    path_cache: Mutex<HashMap<(String, String), TransitionPath>>,
    weak_self: OnceLock<Weak<Shared<I>>>,
}

impl<I: MachineInstance> EventSink for Shared<I> {
    fn post(&self, event: Event) -> Arc<Context> {
        if self.current.read().is_none() {
            tracing::debug!(name = event.name(), "machine not running, event dropped");
            return Arc::clone(&self.idle);
        }
        if let Err(event) = self.queue.push(event) {
            tracing::warn!(name = event.name(), "event queue full, event dropped");
            return Arc::clone(&self.idle);
        }
        self.try_drain();
        Arc::clone(&self.idle)
    }

    fn current_state(&self) -> String {
        self.current.read().clone().unwrap_or_default()
    }

    fn task_provider(&self) -> Arc<dyn TaskProvider> {
        Arc::clone(self.activities.provider())
    }
}

impl<I: MachineInstance> Shared<I> {
    /// Enter the initial configuration. No-op while already running.
    fn start(&self) {
        let guard = self.processing.lock();
        if self.current.read().is_some() {
            return;
        }

        let Some(transition) = self.model.initial_transition() else {
            tracing::warn!(model = self.model.name(), "model has no initial transition");
            return;
        };

        *guard.borrow_mut() = true;
        self.idle.reset();

        let event = Event::initial();
        let root = self.model.name().to_string();
        if let Some(leaf) = self.execute_transition(&root, transition, &event) {
            let entered_final = self
                .model
                .state(&leaf)
                .is_some_and(State::is_final);
            *self.current.write() = Some(leaf.clone());
            if entered_final {
                let _ = self.queue.push(Event::completion(leaf));
            }
            self.drain();
        }

        *guard.borrow_mut() = false;
        self.idle.set();
    }

    /// Exit the active configuration from leaf to root, join every
    /// activity, and clear the queue.
    fn stop(&self) {
        let guard = self.processing.lock();
        let stopped = self.current.write().take();
        if let Some(leaf) = stopped {
            let event = Event::completion(FINAL_EVENT);
            let mut chain = Some(leaf);
            while let Some(name) = chain {
                if let Some(state) = self.model.state(&name) {
                    self.exit_state(state, &event);
                }
                if name == self.model.name() {
                    break;
                }
                chain = path::parent(&name).map(str::to_string);
            }
        }
        self.activities.stop_all();
        self.queue.clear();
        drop(guard);
        self.idle.set();
    }

    /// Acquire the processing lock and drain, unless this thread is already
    /// draining (re-entrant dispatch) or another thread holds the lock (it
    /// will drain on its way out).
    fn try_drain(&self) {
        let Some(guard) = self.processing.try_lock() else {
            return;
        };
        if *guard.borrow() {
            return;
        }
        *guard.borrow_mut() = true;
        self.idle.reset();
        self.drain();
        *guard.borrow_mut() = false;
        self.idle.set();
    }

    /// Main loop: one transition (or deferral, or silent drop) per event.
    fn drain(&self) {
        let mut deferred: Vec<Event> = Vec::new();

        while let Some(event) = self.queue.pop() {
            let Some(leaf) = self.current.read().clone() else {
                break;
            };
            let variants = name_variants(event.name());

            if let Some(entry) = self.model.deferred(&leaf) {
                let is_deferred = variants.iter().any(|v| entry.contains_literal(v))
                    || entry.matches_pattern(event.name());
                if is_deferred {
                    tracing::trace!(name = event.name(), state = %leaf, "event deferred");
                    deferred.push(event);
                    continue;
                }
            }

            let Some(transition_name) = self.find_enabled(&leaf, &event, &variants) else {
                tracing::trace!(name = event.name(), state = %leaf, "no enabled transition");
                continue;
            };
            let Some(transition) = self.model.transition(&transition_name) else {
                continue;
            };

            let new_leaf = self
                .execute_transition(&leaf, transition, &event)
                .unwrap_or_else(|| leaf.clone());
            *self.current.write() = Some(new_leaf.clone());

            if new_leaf != leaf {
                // Re-offer deferred events in the new configuration; a
                // completion event for a freshly entered final state still
                // outranks them.
                self.queue.requeue_front(std::mem::take(&mut deferred));
                if self.model.state(&new_leaf).is_some_and(State::is_final) {
                    let _ = self.queue.push(Event::completion(new_leaf));
                }
            }
        }

        for event in deferred {
            if self.queue.push(event).is_err() {
                tracing::warn!("event queue full, deferred event dropped");
            }
        }
    }

    /// Highest-priority enabled transition for any name variant of `event`
    fn find_enabled(&self, leaf: &str, event: &Event, variants: &[&str]) -> Option<String> {
        for variant in variants {
            for name in self.model.candidates(leaf, variant) {
                let Some(transition) = self.model.transition(name) else {
                    continue;
                };
                if self.guard_passes(transition, event) {
                    return Some(name.clone());
                }
            }
        }
        None
    }

    fn guard_passes(&self, transition: &Transition, event: &Event) -> bool {
        let Some(guard_name) = transition.guard() else {
            return true;
        };
        let Some(guard) = self.model.guard(guard_name) else {
            tracing::error!(guard = guard_name, "guard not found, treating as not satisfied");
            return false;
        };
        let context = Context::new();
        let condition = guard.condition().as_ref();
        match catch_unwind(AssertUnwindSafe(|| condition(&context, &self.instance, event))) {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(guard = guard_name, "guard panicked, treating as not satisfied");
                false
            }
        }
    }

    /// Execute a taken transition from the state `current`: exit up to the
    /// LCA, run effects, enter down to the target, and resolve composite
    /// default entry and choice pseudostates recursively.
    ///
    /// Returns the new leaf, or `None` when no path could be resolved.
    fn execute_transition(
        &self,
        current: &str,
        transition: &Transition,
        event: &Event,
    ) -> Option<String> {
        let transition_path = match transition.path_from(current) {
            Some(found) => found.clone(),
            None => self.resolve_path(current, transition)?,
        };

        for name in &transition_path.exit {
            if let Some(state) = self.model.state(name) {
                self.exit_state(state, event);
            }
        }

        for name in transition.effects() {
            self.run_behavior(name, event);
        }

        if transition.is_internal() {
            return Some(current.to_string());
        }
        let Some(target) = transition.target() else {
            return Some(current.to_string());
        };

        for name in &transition_path.enter {
            let default_entry = name.as_str() == target;
            let entered = self.enter_vertex(name, event, default_entry);
            if default_entry {
                return Some(entered);
            }
        }

        // Local transition to an ancestor: nothing was re-entered, the
        // target itself is the new leaf.
        Some(target.to_string())
    }

    /// Path for a transition taken from a descendant of its declared
    /// source, computed on first use and cached.
    fn resolve_path(&self, current: &str, transition: &Transition) -> Option<TransitionPath> {
        if !path::is_ancestor(transition.source(), current) {
            tracing::error!(
                transition = transition.qualified_name(),
                state = current,
                "no transition path from current state"
            );
            return None;
        }

        let key = (
            transition.qualified_name().to_string(),
            current.to_string(),
        );
        if let Some(found) = self.path_cache.lock().get(&key) {
            return Some(found.clone());
        }

        let mut computed = TransitionPath::default();
        match (transition.target(), transition.kind()) {
            (None, _) | (_, TransitionKind::Internal) => {}
            (Some(_), TransitionKind::SelfTransition) => {
                // Exit from the leaf through the source, then re-enter it.
                computed.exit = path::ancestors_up_to(current, transition.source());
                computed.exit.push(transition.source().to_string());
                computed.enter.push(transition.source().to_string());
            }
            (Some(target), _) => {
                let lca = path::lca(current, target).to_string();
                computed.exit = path::ancestors_up_to(current, &lca);
                let mut enter = path::ancestors_up_to(target, &lca);
                enter.reverse();
                computed.enter = enter;
            }
        }

        self.path_cache.lock().insert(key, computed.clone());
        Some(computed)
    }

    /// Enter a vertex: run entry behaviors and start activities for states,
    /// recursively resolve default entry and choice branches.
    ///
    /// Returns the resulting leaf state.
    fn enter_vertex(&self, name: &str, event: &Event, default_entry: bool) -> String {
        if let Some(state) = self.model.state(name) {
            if state.is_final() {
                return name.to_string();
            }
            for behavior in state.entry_behaviors() {
                self.run_behavior(behavior, event);
            }
            for behavior in state.activity_behaviors() {
                self.spawn_activity(behavior, event);
            }

            if !default_entry {
                return name.to_string();
            }
            let Some(initial) = state.initial() else {
                if matches!(state.kind(), StateKind::Composite | StateKind::Root) {
                    tracing::debug!(state = name, "composite entered without initial transition");
                }
                return name.to_string();
            };
            let Some(transition) = self
                .model
                .pseudostate(initial)
                .and_then(|pseudo| pseudo.outgoing_transitions().first())
                .and_then(|t| self.model.transition(t))
            else {
                return name.to_string();
            };
            return self
                .execute_transition(name, transition, event)
                .unwrap_or_else(|| name.to_string());
        }

        if let Some(pseudo) = self.model.pseudostate(name) {
            if pseudo.kind() == PseudostateKind::Choice {
                return self.resolve_choice(name, pseudo.outgoing_transitions(), event);
            }
        }

        name.to_string()
    }

    /// Evaluate a choice pseudostate's branches in declaration order; the
    /// first enabled guard wins.
    fn resolve_choice(&self, choice: &str, branches: &[String], event: &Event) -> String {
        for name in branches {
            let Some(transition) = self.model.transition(name) else {
                continue;
            };
            if self.guard_passes(transition, event) {
                if let Some(leaf) = self.execute_transition(choice, transition, event) {
                    return leaf;
                }
            }
        }

        // Unreachable with a well-formed model unless a guard panicked the
        // fallback away; stay in the deepest state entered so far.
        tracing::error!(choice, "no enabled branch at choice pseudostate");
        let _ = self.queue.push(Event::new(DIAGNOSTIC_EVENT));
        path::parent(choice).unwrap_or("/").to_string()
    }

    /// Cancel and join the state's activities (reverse declaration order),
    /// then run its exit behaviors (declaration order).
    fn exit_state(&self, state: &State, event: &Event) {
        for behavior in state.activity_behaviors().iter().rev() {
            self.activities.cancel_and_join(behavior);
        }
        for behavior in state.exit_behaviors() {
            self.run_behavior(behavior, event);
        }
    }

    /// Run a synchronous behavior inline, containing panics
    fn run_behavior(&self, name: &str, event: &Event) {
        let Some(behavior) = self.model.behavior(name) else {
            return;
        };
        if behavior.is_concurrent() {
            self.spawn_activity(name, event);
            return;
        }
        let context = Context::new();
        let action = behavior.action().as_ref();
        if catch_unwind(AssertUnwindSafe(|| action(&context, &self.instance, event))).is_err() {
            tracing::error!(behavior = name, "behavior panicked");
        }
    }

    /// Start a concurrent behavior on a provider task
    fn spawn_activity(&self, name: &str, event: &Event) {
        let Some(behavior) = self.model.behavior(name) else {
            return;
        };
        let Some(weak) = self.weak_self.get().cloned() else {
            return;
        };
        let action = Arc::clone(behavior.action());
        let event = event.clone();
        self.activities.launch(name, move |context| {
            Box::new(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let run = catch_unwind(AssertUnwindSafe(|| {
                    (action.as_ref())(&context, &shared.instance, &event)
                }));
                if run.is_err() {
                    tracing::error!("activity panicked");
                }
            })
        });
    }
}
