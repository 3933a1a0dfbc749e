//! Index-based dispatcher over the static tables
//!
//! Single-threaded by construction: `dispatch` takes `&mut self`, so there
//! is no processing lock and no re-entrancy. Behaviors are plain function
//! pointers receiving `&I`; concurrent behaviors run through the injected
//! [`CtTaskProvider`].

use std::panic::{catch_unwind, AssertUnwindSafe};

use heapless::{Deque, Vec};

use crate::model::{CtModel, CtState, CtStateKind, CtTarget, CtTimer, CtTransition};
use crate::{CtContext, CtEvent, CtTaskProvider, Sequential, INVALID};

/// Event queue capacity of the compile-time machine
pub const CT_QUEUE_CAPACITY: usize = 32;

/// Maximum nesting depth for hierarchical states
pub const CT_MAX_DEPTH: usize = 16;

/// A running compile-time machine: one instance driven over a `&'static`
/// (or otherwise borrowed) normalized model.
pub struct CtMachine<'m, I: 'static, P, const S: usize, const T: usize, const E: usize> {
    model: &'m CtModel<I, S, T, E>,
    instance: I,
    provider: P,
    /// Current leaf state index, `INVALID` when stopped
    current: usize,
    queue: Deque<CtEvent, CT_QUEUE_CAPACITY>,
}

impl<'m, I: 'static, const S: usize, const T: usize, const E: usize>
    CtMachine<'m, I, Sequential, S, T, E>
{
    /// Start with the default sequential provider
    pub fn start(instance: I, model: &'m CtModel<I, S, T, E>) -> Self {
        Self::start_with_provider(instance, model, Sequential)
    }
}

impl<'m, I: 'static, P: CtTaskProvider, const S: usize, const T: usize, const E: usize>
    CtMachine<'m, I, P, S, T, E>
{
    /// Start with an explicit provider
    pub fn start_with_provider(instance: I, model: &'m CtModel<I, S, T, E>, provider: P) -> Self {
        let mut machine = Self {
            model,
            instance,
            provider,
            current: INVALID,
            queue: Deque::new(),
        };
        machine.run_initial();
        machine
    }

    /// Qualified name of the current leaf, empty when stopped
    pub fn state(&self) -> &'static str {
        if self.current == INVALID {
            ""
        } else {
            self.model.state(self.current).name
        }
    }

    /// The user instance
    pub fn instance(&self) -> &I {
        &self.instance
    }

    /// Enqueue an event and process the queue to idle
    pub fn dispatch(&mut self, event: CtEvent) {
        if self.current == INVALID {
            tracing::debug!("machine not running, event dropped");
            return;
        }
        let queued = match event {
            CtEvent::Completion(_) => self.queue.push_front(event),
            _ => self.queue.push_back(event),
        };
        if queued.is_err() {
            tracing::warn!("event queue full, event dropped");
        }
        self.drain();
    }

    /// Exit the configuration from leaf to root and clear the queue
    pub fn stop(&mut self) {
        if self.current != INVALID {
            let event = CtEvent::Completion(self.current);
            let mut cursor = self.current;
            self.current = INVALID;
            loop {
                self.exit_state(cursor, &event);
                let parent = self.model.state(cursor).parent;
                if parent == INVALID {
                    break;
                }
                cursor = parent;
            }
        }
        self.queue.clear();
    }

    /// Re-enter the initial configuration after a `stop`
    pub fn restart(&mut self) {
        if self.current == INVALID {
            self.run_initial();
        }
    }

    fn run_initial(&mut self) {
        let initial = self.model.state(0).initial;
        if initial == INVALID {
            tracing::warn!("model has no initial transition");
            return;
        }
        let event = CtEvent::Completion(0);
        let leaf = self.execute_transition(0, initial, &event);
        self.current = leaf;
        if self.model.state(leaf).kind == CtStateKind::Final {
            let _ = self.queue.push_front(CtEvent::Completion(leaf));
        }
        self.drain();
    }

    fn drain(&mut self) {
        let mut deferred: Vec<CtEvent, CT_QUEUE_CAPACITY> = Vec::new();

        while let Some(event) = self.queue.pop_front() {
            if self.current == INVALID {
                break;
            }

            if let CtEvent::Signal(name) = event {
                if self.signal_is_deferred(name) {
                    if deferred.push(event).is_err() {
                        tracing::warn!("deferral buffer full, event dropped");
                    }
                    continue;
                }
            }

            let Some(transition) = self.select(&event) else {
                continue;
            };
            let old = self.current;
            let leaf = self.execute_transition(old, transition, &event);
            self.current = leaf;

            if leaf != old {
                while let Some(event) = deferred.pop() {
                    let _ = self.queue.push_front(event);
                }
                if self.model.state(leaf).kind == CtStateKind::Final {
                    let _ = self.queue.push_front(CtEvent::Completion(leaf));
                }
            }
        }

        for event in deferred {
            let _ = self.queue.push_back(event);
        }
    }

    fn signal_is_deferred(&self, name: &str) -> bool {
        let mut variant = name;
        loop {
            let id = self.model.event_id(variant);
            if self.model.is_deferred(self.current, id) {
                return true;
            }
            match variant.rfind(['_', '/']) {
                Some(pos) if pos > 0 => variant = &variant[..pos],
                _ => return false,
            }
        }
    }

    /// Highest-priority enabled transition for this event, nearest
    /// declaration first, honoring name variants for signal events.
    fn select(&self, event: &CtEvent) -> Option<usize> {
        let model = self.model;
        match *event {
            CtEvent::Signal(name) => {
                let mut variant = name;
                loop {
                    let mut cursor = self.current;
                    loop {
                        let state = model.state(cursor);
                        for &index in state.transitions {
                            let transition = model.transition(index);
                            if transition.events.iter().any(|e| *e == variant)
                                && self.guard_passes(transition, event)
                            {
                                return Some(index);
                            }
                        }
                        if state.parent == INVALID {
                            break;
                        }
                        cursor = state.parent;
                    }
                    match variant.rfind(['_', '/']) {
                        Some(pos) if pos > 0 => variant = &variant[..pos],
                        _ => return None,
                    }
                }
            }
            CtEvent::Completion(done) => {
                let mut cursor = self.current;
                loop {
                    let state = model.state(cursor);
                    for &index in state.transitions {
                        let transition = model.transition(index);
                        let is_completion = transition.events.is_empty()
                            && matches!(transition.timer, CtTimer::None);
                        if is_completion
                            && model.is_in_chain(transition.source, done)
                            && self.guard_passes(transition, event)
                        {
                            return Some(index);
                        }
                    }
                    if state.parent == INVALID {
                        break;
                    }
                    cursor = state.parent;
                }
                None
            }
            CtEvent::Time(index) => {
                let transition = model.transition(index);
                if model.is_in_chain(transition.source, self.current)
                    && self.guard_passes(transition, event)
                {
                    Some(index)
                } else {
                    None
                }
            }
        }
    }

    fn guard_passes(&self, transition: &CtTransition<I>, event: &CtEvent) -> bool {
        match transition.guard {
            None => true,
            Some(guard) => {
                let context = CtContext::new();
                match catch_unwind(AssertUnwindSafe(|| guard(&context, &self.instance, event))) {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!("guard panicked, treating as not satisfied");
                        false
                    }
                }
            }
        }
    }

    /// Exit up to the LCA, run effects, enter down to the target, resolving
    /// default entry and choices recursively. Returns the new leaf index.
    fn execute_transition(&mut self, from: usize, index: usize, event: &CtEvent) -> usize {
        let model = self.model;
        let transition = model.transition(index);

        let (end_state, choice) = match transition.target {
            CtTarget::None => {
                self.run_actions(transition.effects, event);
                return from;
            }
            CtTarget::State(state) => (state, None),
            CtTarget::Choice(choice) => (model.choice(choice).owner, Some(choice)),
        };

        if choice.is_none() && end_state == transition.source {
            // Self transition: exit from the leaf through the source, then
            // re-enter it.
            let mut cursor = from;
            loop {
                self.exit_state(cursor, event);
                if cursor == transition.source {
                    break;
                }
                cursor = model.state(cursor).parent;
                if cursor == INVALID {
                    break;
                }
            }
            self.run_actions(transition.effects, event);
            return self.enter_state(end_state, event, true);
        }

        let lca = model.lca(from, end_state);
        let mut cursor = from;
        while cursor != lca && cursor != INVALID {
            self.exit_state(cursor, event);
            cursor = model.state(cursor).parent;
        }

        self.run_actions(transition.effects, event);

        let mut chain: Vec<usize, CT_MAX_DEPTH> = Vec::new();
        let mut cursor = end_state;
        while cursor != lca && cursor != INVALID {
            let _ = chain.push(cursor);
            cursor = model.state(cursor).parent;
        }

        let mut leaf = end_state;
        for &entering in chain.iter().rev() {
            if entering == end_state && choice.is_none() {
                leaf = self.enter_state(entering, event, true);
            } else {
                self.enter_state(entering, event, false);
                leaf = entering;
            }
        }

        match choice {
            Some(choice) => self.resolve_choice(choice, end_state, event),
            None => leaf,
        }
    }

    fn resolve_choice(&mut self, choice: usize, owner: usize, event: &CtEvent) -> usize {
        let model = self.model;
        for &branch in model.choice(choice).branches {
            let transition = model.transition(branch);
            if self.guard_passes(transition, event) {
                return self.execute_transition(owner, branch, event);
            }
        }
        tracing::error!(choice = model.choice(choice).name, "no enabled branch at choice");
        owner
    }

    /// Run entry behaviors, start activities, arm timers, and descend
    /// through the initial transition on default entry.
    fn enter_state(&mut self, state_index: usize, event: &CtEvent, default_entry: bool) -> usize {
        let model = self.model;
        let state: &CtState<I> = model.state(state_index);
        if state.kind == CtStateKind::Final {
            return state_index;
        }

        self.run_actions(state.entry, event);

        for action in state.activities {
            let context = CtContext::new();
            let mut task = || {
                let run =
                    catch_unwind(AssertUnwindSafe(|| action(&context, &self.instance, event)));
                if run.is_err() {
                    tracing::error!("activity panicked");
                }
            };
            self.provider.run(&mut task);
        }

        // Arm timers on the outgoing timed transitions; validity is
        // re-checked when the time event is consumed.
        for &index in state.transitions {
            let duration_fn = match model.transition(index).timer {
                CtTimer::None => continue,
                CtTimer::After(f) | CtTimer::Every(f) => f,
            };
            let context = CtContext::new();
            let duration = match catch_unwind(AssertUnwindSafe(|| {
                duration_fn(&context, &self.instance, event)
            })) {
                Ok(duration) => duration,
                Err(_) => {
                    tracing::error!("timer duration panicked, timer disarmed");
                    continue;
                }
            };
            if duration.is_zero() {
                continue;
            }
            self.provider.sleep_for(duration);
            if self.queue.push_back(CtEvent::Time(index)).is_err() {
                tracing::warn!("event queue full, time event dropped");
            }
        }

        if !default_entry {
            return state_index;
        }
        if state.initial == INVALID {
            if matches!(state.kind, CtStateKind::Composite | CtStateKind::Root) {
                tracing::debug!(state = state.name, "composite entered without initial transition");
            }
            return state_index;
        }
        self.execute_transition(state_index, state.initial, event)
    }

    fn exit_state(&mut self, state_index: usize, event: &CtEvent) {
        let state = self.model.state(state_index);
        self.run_actions(state.exit, event);
    }

    /// Run behaviors in declaration order, containing panics
    fn run_actions(&self, actions: &[crate::model::CtAction<I>], event: &CtEvent) {
        for action in actions {
            let context = CtContext::new();
            let run = catch_unwind(AssertUnwindSafe(|| action(&context, &self.instance, event)));
            if run.is_err() {
                tracing::error!("behavior panicked");
            }
        }
    }
}
