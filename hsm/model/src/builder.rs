//! Model construction
//!
//! A model is assembled from [`Part`] values produced by the free functions
//! in this module and elaborated by [`define`]. Elaboration resolves every
//! relative reference to a canonical absolute qualified name, derives state
//! and transition kinds, synthesizes timer activities, validates the result,
//! and precomputes the lookup tables the dispatcher relies on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hsm_core::{path, Context, Event, Instance, INITIAL_EVENT};

use crate::elements::{
    ActionFn, Behavior, DurationFn, Guard, PredicateFn, Pseudostate, PseudostateKind, State,
    StateKind, TimerKind, Transition, TransitionKind, TransitionPath,
};
use crate::model::{DeferredEvents, Model};
use crate::ModelError;

/// One building block of a model definition
pub enum Part<I> {
    /// A (possibly composite) state and its nested parts
    State { name: String, parts: Vec<Part<I>> },
    /// A final state
    Final { name: String },
    /// The default-entry pseudostate of the enclosing state
    Initial { parts: Vec<Part<I>> },
    /// A choice pseudostate and its outgoing transitions
    Choice { name: String, parts: Vec<Part<I>> },
    /// A transition owned by the enclosing vertex
    Transition { parts: Vec<Part<I>> },
    /// Explicit transition source
    Source(String),
    /// Transition target
    Target(String),
    /// Triggering event name
    Trigger(String),
    /// Transition guard predicate
    Guard(PredicateFn<I>),
    /// Transition effect
    Effect(ActionFn<I>),
    /// State entry behavior
    Entry(ActionFn<I>),
    /// State exit behavior
    Exit(ActionFn<I>),
    /// State activity (concurrent behavior)
    Activity(ActionFn<I>),
    /// Deferred event name or pattern
    Defer(String),
    /// One-shot timer on the enclosing transition
    After(DurationFn<I>),
    /// Periodic timer on the enclosing transition
    Every(DurationFn<I>),
}

/// Declare a state
pub fn state<I>(name: impl Into<String>, parts: impl IntoIterator<Item = Part<I>>) -> Part<I> {
    Part::State {
        name: name.into(),
        parts: parts.into_iter().collect(),
    }
}

/// Declare a final state
pub fn final_state<I>(name: impl Into<String>) -> Part<I> {
    Part::Final { name: name.into() }
}

/// Declare the default-entry pseudostate of the enclosing state
pub fn initial<I>(parts: impl IntoIterator<Item = Part<I>>) -> Part<I> {
    Part::Initial {
        parts: parts.into_iter().collect(),
    }
}

/// Declare a choice pseudostate
pub fn choice<I>(name: impl Into<String>, parts: impl IntoIterator<Item = Part<I>>) -> Part<I> {
    Part::Choice {
        name: name.into(),
        parts: parts.into_iter().collect(),
    }
}

/// Declare a transition owned by the enclosing vertex
pub fn transition<I>(parts: impl IntoIterator<Item = Part<I>>) -> Part<I> {
    Part::Transition {
        parts: parts.into_iter().collect(),
    }
}

/// Set an explicit transition source
pub fn source<I>(path: impl Into<String>) -> Part<I> {
    Part::Source(path.into())
}

/// Set the transition target
pub fn target<I>(path: impl Into<String>) -> Part<I> {
    Part::Target(path.into())
}

/// Add a triggering event to the enclosing transition
pub fn on<I>(event: impl Into<String>) -> Part<I> {
    Part::Trigger(event.into())
}

/// Attach a guard predicate to the enclosing transition
pub fn guard<I>(
    condition: impl Fn(&Context, &I, &Event) -> bool + Send + Sync + 'static,
) -> Part<I> {
    Part::Guard(Arc::new(condition))
}

/// Add an effect to the enclosing transition
pub fn effect<I>(action: impl Fn(&Context, &I, &Event) + Send + Sync + 'static) -> Part<I> {
    Part::Effect(Arc::new(action))
}

/// Add an entry behavior to the enclosing state
pub fn entry<I>(action: impl Fn(&Context, &I, &Event) + Send + Sync + 'static) -> Part<I> {
    Part::Entry(Arc::new(action))
}

/// Add an exit behavior to the enclosing state
pub fn exit<I>(action: impl Fn(&Context, &I, &Event) + Send + Sync + 'static) -> Part<I> {
    Part::Exit(Arc::new(action))
}

/// Add a concurrent activity to the enclosing state.
///
/// The activity runs on a provider task while the state is active and must
/// poll its context and return promptly once cancelled.
pub fn activity<I>(action: impl Fn(&Context, &I, &Event) + Send + Sync + 'static) -> Part<I> {
    Part::Activity(Arc::new(action))
}

/// Defer an event name (or `*`/`?` pattern) while the enclosing state is
/// active
pub fn defer<I>(event: impl Into<String>) -> Part<I> {
    Part::Defer(event.into())
}

/// Make the enclosing transition fire once, after the computed duration.
///
/// A zero duration disarms the timer.
pub fn after<I>(
    duration: impl Fn(&Context, &I, &Event) -> Duration + Send + Sync + 'static,
) -> Part<I> {
    Part::After(Arc::new(duration))
}

/// Make the enclosing transition fire repeatedly, every computed duration.
///
/// A zero duration disarms the timer.
pub fn every<I>(
    duration: impl Fn(&Context, &I, &Event) -> Duration + Send + Sync + 'static,
) -> Part<I> {
    Part::Every(Arc::new(duration))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    State,
    Initial,
    Choice,
    Transition,
}

#[derive(Debug, Clone)]
struct Scope {
    qualified_name: String,
    kind: ScopeKind,
}

struct PendingTimer<I> {
    event_name: String,
    source: String,
    duration: DurationFn<I>,
    kind: TimerKind,
}

struct Builder<I> {
    model: Model<I>,
    stack: Vec<Scope>,
    counter: usize,
    timers: Vec<PendingTimer<I>>,
}

/// Elaborate a model definition.
///
/// The returned model is immutable and may be shared by any number of
/// machine instances.
pub fn define<I>(
    name: impl Into<String>,
    parts: impl IntoIterator<Item = Part<I>>,
) -> Result<Model<I>, ModelError>
where
    I: AsRef<Instance> + Send + Sync + 'static,
{
    let root_name = path::join("/", &name.into());
    let mut model = Model {
        name: root_name.clone(),
        states: HashMap::new(),
        pseudostates: HashMap::new(),
        transitions: HashMap::new(),
        behaviors: HashMap::new(),
        guards: HashMap::new(),
        transition_table: HashMap::new(),
        deferred_table: HashMap::new(),
    };
    model
        .states
        .insert(root_name.clone(), State::new(root_name.clone(), StateKind::Root));

    let mut builder = Builder {
        model,
        stack: vec![Scope {
            qualified_name: root_name,
            kind: ScopeKind::State,
        }],
        counter: 0,
        timers: Vec::new(),
    };

    for part in parts {
        builder.apply(part)?;
    }

    builder.synthesize_timers()?;
    builder.prune_final_states();
    builder.derive_state_kinds();
    builder.derive_transition_kinds();
    builder.validate()?;
    builder.compute_transition_paths();
    builder.build_transition_table();
    builder.build_deferred_table();

    Ok(builder.model)
}

impl<I> Builder<I>
where
    I: AsRef<Instance> + Send + Sync + 'static,
{
    fn nearest(&self, kinds: &[ScopeKind]) -> Option<&Scope> {
        self.stack.iter().rev().find(|scope| kinds.contains(&scope.kind))
    }

    fn nearest_state(&self) -> Option<Scope> {
        self.nearest(&[ScopeKind::State]).cloned()
    }

    fn nearest_vertex(&self) -> Option<Scope> {
        self.nearest(&[ScopeKind::State, ScopeKind::Initial, ScopeKind::Choice])
            .cloned()
    }

    fn nearest_transition(&self) -> Option<String> {
        self.nearest(&[ScopeKind::Transition])
            .map(|scope| scope.qualified_name.clone())
    }

    fn next_id(&mut self) -> usize {
        let id = self.counter;
        self.counter += 1;
        id
    }

    fn apply(&mut self, part: Part<I>) -> Result<(), ModelError> {
        match part {
            Part::State { name, parts } => self.apply_state(name, parts),
            Part::Final { name } => self.apply_final(name),
            Part::Initial { parts } => self.apply_initial(parts),
            Part::Choice { name, parts } => self.apply_choice(name, parts),
            Part::Transition { parts } => {
                self.apply_transition(None, parts).map(|_| ())
            }
            Part::Source(source) => self.apply_source(source),
            Part::Target(target) => self.apply_target(target),
            Part::Trigger(event) => self.apply_trigger(event),
            Part::Guard(condition) => self.apply_guard(condition),
            Part::Effect(action) => self.apply_effect(action),
            Part::Entry(action) => self.apply_state_behavior(action, BehaviorSlot::Entry),
            Part::Exit(action) => self.apply_state_behavior(action, BehaviorSlot::Exit),
            Part::Activity(action) => self.apply_state_behavior(action, BehaviorSlot::Activity),
            Part::Defer(event) => self.apply_defer(event),
            Part::After(duration) => self.apply_timer(duration, TimerKind::After),
            Part::Every(duration) => self.apply_timer(duration, TimerKind::Every),
        }
    }

    fn apply_state(&mut self, name: String, parts: Vec<Part<I>>) -> Result<(), ModelError> {
        let Some(owner) = self.nearest_state() else {
            return Ok(());
        };
        let qualified_name = path::join(&owner.qualified_name, &name);
        self.insert_state(State::new(qualified_name.clone(), StateKind::Leaf))?;
        self.stack.push(Scope {
            qualified_name,
            kind: ScopeKind::State,
        });
        let result = parts.into_iter().try_for_each(|part| self.apply(part));
        self.stack.pop();
        result
    }

    fn apply_final(&mut self, name: String) -> Result<(), ModelError> {
        let Some(owner) = self.nearest_state() else {
            return Ok(());
        };
        let qualified_name = path::join(&owner.qualified_name, &name);
        self.insert_state(State::new(qualified_name, StateKind::Final))
    }

    fn apply_initial(&mut self, parts: Vec<Part<I>>) -> Result<(), ModelError> {
        let Some(owner) = self.nearest_state() else {
            return Ok(());
        };
        let qualified_name = path::join(&owner.qualified_name, ".initial");
        self.insert_pseudostate(Pseudostate {
            qualified_name: qualified_name.clone(),
            kind: PseudostateKind::Initial,
            transitions: Vec::new(),
        })?;
        if let Some(state) = self.model.states.get_mut(&owner.qualified_name) {
            state.initial = Some(qualified_name.clone());
        }

        self.stack.push(Scope {
            qualified_name: qualified_name.clone(),
            kind: ScopeKind::Initial,
        });
        // The default-entry transition is implicit: it originates at the
        // pseudostate and fires on the distinguished initial event.
        let mut transition_parts: Vec<Part<I>> = vec![
            Part::Source(qualified_name),
            Part::Trigger(INITIAL_EVENT.to_string()),
        ];
        transition_parts.extend(parts);
        let result = self
            .apply_transition(Some(".initial_transition".to_string()), transition_parts)
            .map(|_| ());
        self.stack.pop();
        result
    }

    fn apply_choice(&mut self, name: String, parts: Vec<Part<I>>) -> Result<(), ModelError> {
        let Some(owner) = self.nearest_state() else {
            return Ok(());
        };
        let qualified_name = path::join(&owner.qualified_name, &name);
        self.insert_pseudostate(Pseudostate {
            qualified_name: qualified_name.clone(),
            kind: PseudostateKind::Choice,
            transitions: Vec::new(),
        })?;
        self.stack.push(Scope {
            qualified_name,
            kind: ScopeKind::Choice,
        });
        let result = parts.into_iter().try_for_each(|part| self.apply(part));
        self.stack.pop();
        result
    }

    fn apply_transition(
        &mut self,
        name: Option<String>,
        parts: Vec<Part<I>>,
    ) -> Result<String, ModelError> {
        let Some(owner) = self.nearest_vertex() else {
            return Err(ModelError::OrphanTransition);
        };
        let name = name.unwrap_or_else(|| format!("transition_{}", self.next_id()));
        let qualified_name = path::join(&owner.qualified_name, &name);
        if self.model.transitions.contains_key(&qualified_name) {
            return Err(ModelError::DuplicateName(qualified_name));
        }
        self.model.transitions.insert(
            qualified_name.clone(),
            Transition {
                qualified_name: qualified_name.clone(),
                source: String::new(),
                target: None,
                events: Vec::new(),
                guard: None,
                effects: Vec::new(),
                timer: TimerKind::None,
                kind: TransitionKind::External,
                paths: HashMap::new(),
            },
        );

        self.stack.push(Scope {
            qualified_name: qualified_name.clone(),
            kind: ScopeKind::Transition,
        });
        let result = parts.into_iter().try_for_each(|part| self.apply(part));
        self.stack.pop();
        result?;

        // Default the source to the owning vertex, then register the
        // transition on whichever vertex the source resolved to.
        let source = {
            let Some(transition) = self.model.transitions.get_mut(&qualified_name) else {
                return Ok(qualified_name);
            };
            if transition.source.is_empty() {
                transition.source = owner.qualified_name.clone();
            }
            transition.source.clone()
        };
        if let Some(state) = self.model.states.get_mut(&source) {
            state.transitions.push(qualified_name.clone());
        } else if let Some(pseudostate) = self.model.pseudostates.get_mut(&source) {
            pseudostate.transitions.push(qualified_name.clone());
        }
        Ok(qualified_name)
    }

    fn apply_source(&mut self, source: String) -> Result<(), ModelError> {
        let Some(transition) = self.nearest_transition() else {
            return Ok(());
        };
        let resolved = if path::is_absolute(&source) {
            self.resolve_absolute(&source)
        } else {
            let base = match self.nearest_vertex() {
                Some(scope) if scope.kind == ScopeKind::Initial => path::parent(&scope.qualified_name)
                    .map(str::to_string)
                    .unwrap_or_else(|| self.model.name.clone()),
                Some(scope) => scope.qualified_name,
                None => self.model.name.clone(),
            };
            path::join(&base, &source)
        };
        if let Some(transition) = self.model.transitions.get_mut(&transition) {
            transition.source = resolved;
        }
        Ok(())
    }

    fn apply_target(&mut self, target: String) -> Result<(), ModelError> {
        let Some(transition) = self.nearest_transition() else {
            return Ok(());
        };
        let resolved = if path::is_absolute(&target) {
            self.resolve_absolute(&target)
        } else {
            let base = self.target_base(&target);
            if target == "." {
                base
            } else {
                path::join(&base, &target)
            }
        };
        if let Some(transition) = self.model.transitions.get_mut(&transition) {
            transition.target = Some(resolved);
        }
        Ok(())
    }

    /// Base path for a relative target: the enclosing state for initial
    /// transitions, the nearest enclosing vertex otherwise.
    fn target_base(&self, target: &str) -> String {
        let explicit_relative = target.starts_with('.');
        if let Some(scope) = self.nearest_vertex() {
            let is_initial = scope.kind == ScopeKind::Initial;
            if scope.kind == ScopeKind::State || (explicit_relative && !is_initial) {
                return scope.qualified_name;
            }
            if let Some(owner) = path::parent(&scope.qualified_name) {
                return owner.to_string();
            }
        }
        if let Some(scope) = self.nearest_state() {
            return scope.qualified_name;
        }
        self.model.name.clone()
    }

    /// Absolute references outside the model root are re-prefixed with it.
    fn resolve_absolute(&self, reference: &str) -> String {
        let normalized = path::normalize(reference);
        if path::is_ancestor_or_equal(&self.model.name, &normalized) {
            normalized
        } else {
            path::join(&self.model.name, normalized.trim_start_matches(path::SEPARATOR))
        }
    }

    fn apply_trigger(&mut self, event: String) -> Result<(), ModelError> {
        if let Some(transition) = self.nearest_transition() {
            if let Some(transition) = self.model.transitions.get_mut(&transition) {
                transition.events.push(event);
            }
        }
        Ok(())
    }

    fn apply_guard(&mut self, condition: PredicateFn<I>) -> Result<(), ModelError> {
        let Some(transition) = self.nearest_transition() else {
            return Ok(());
        };
        let qualified_name = path::join(&transition, "guard");
        self.model.guards.insert(
            qualified_name.clone(),
            Guard {
                qualified_name: qualified_name.clone(),
                condition,
            },
        );
        if let Some(transition) = self.model.transitions.get_mut(&transition) {
            transition.guard = Some(qualified_name);
        }
        Ok(())
    }

    fn apply_effect(&mut self, action: ActionFn<I>) -> Result<(), ModelError> {
        let Some(transition) = self.nearest_transition() else {
            return Ok(());
        };
        let index = self
            .model
            .transitions
            .get(&transition)
            .map(|t| t.effects.len())
            .unwrap_or(0);
        let qualified_name = path::join(&transition, &format!("effect_{index}"));
        self.model
            .behaviors
            .insert(qualified_name.clone(), Behavior::synchronous(qualified_name.clone(), action));
        if let Some(transition) = self.model.transitions.get_mut(&transition) {
            transition.effects.push(qualified_name);
        }
        Ok(())
    }

    fn apply_state_behavior(
        &mut self,
        action: ActionFn<I>,
        slot: BehaviorSlot,
    ) -> Result<(), ModelError> {
        let Some(owner) = self.nearest_state() else {
            return Ok(());
        };
        let Some(state) = self.model.states.get_mut(&owner.qualified_name) else {
            return Ok(());
        };
        let (list, prefix, concurrent) = match slot {
            BehaviorSlot::Entry => (&mut state.entry, "entry", false),
            BehaviorSlot::Exit => (&mut state.exit, "exit", false),
            BehaviorSlot::Activity => (&mut state.activities, "activity", true),
        };
        let qualified_name = path::join(
            &owner.qualified_name,
            &format!("{prefix}_{}", list.len()),
        );
        list.push(qualified_name.clone());
        let behavior = if concurrent {
            Behavior::concurrent(qualified_name.clone(), action)
        } else {
            Behavior::synchronous(qualified_name.clone(), action)
        };
        self.model.behaviors.insert(qualified_name, behavior);
        Ok(())
    }

    fn apply_defer(&mut self, event: String) -> Result<(), ModelError> {
        if let Some(owner) = self.nearest_state() {
            if let Some(state) = self.model.states.get_mut(&owner.qualified_name) {
                state.deferred.push(event);
            }
        }
        Ok(())
    }

    fn apply_timer(&mut self, duration: DurationFn<I>, kind: TimerKind) -> Result<(), ModelError> {
        let Some(transition) = self.nearest_transition() else {
            return Ok(());
        };
        let Some(source) = self.nearest_vertex() else {
            return Ok(());
        };
        let suffix = match kind {
            TimerKind::After => "after",
            TimerKind::Every => "every",
            TimerKind::None => unreachable!(),
        };
        let event_name = format!("{transition}_{suffix}_{}", self.next_id());
        if let Some(transition) = self.model.transitions.get_mut(&transition) {
            transition.events.push(event_name.clone());
            transition.timer = kind;
        }
        self.timers.push(PendingTimer {
            event_name,
            source: source.qualified_name,
            duration,
            kind,
        });
        Ok(())
    }

    /// Timed transitions become auto-generated concurrent activities on the
    /// source state: the task computes the duration, sleeps on the task
    /// provider, and dispatches the synthetic time event unless cancelled.
    fn synthesize_timers(&mut self) -> Result<(), ModelError> {
        let timers = std::mem::take(&mut self.timers);
        for timer in timers {
            let Some(state) = self.model.states.get_mut(&timer.source) else {
                return Err(ModelError::UnresolvedReference {
                    element: timer.event_name,
                    reference: timer.source,
                });
            };
            let qualified_name =
                path::join(&timer.source, &format!("activity_{}", state.activities.len()));
            state.activities.push(qualified_name.clone());

            let event_name = timer.event_name;
            let duration = timer.duration;
            let kind = timer.kind;
            let action: ActionFn<I> = Arc::new(move |context, instance: &I, event| {
                let delay = (duration.as_ref())(context, instance, event);
                if delay.is_zero() {
                    return;
                }
                let facade = instance.as_ref();
                loop {
                    facade.task_provider().sleep_for(delay);
                    if context.is_set() {
                        return;
                    }
                    facade.dispatch(Event::time(event_name.clone()));
                    if kind != TimerKind::Every {
                        return;
                    }
                }
            });
            self.model
                .behaviors
                .insert(qualified_name.clone(), Behavior::concurrent(qualified_name, action));
        }
        Ok(())
    }

    /// Final states carry no behaviors and no outgoing transitions; anything
    /// attached at build time is dropped.
    fn prune_final_states(&mut self) {
        for state in self.model.states.values_mut() {
            if state.kind == StateKind::Final {
                let dropped = state.entry.len()
                    + state.exit.len()
                    + state.activities.len()
                    + state.transitions.len();
                if dropped > 0 {
                    tracing::debug!(
                        state = %state.qualified_name,
                        dropped,
                        "ignoring behaviors and transitions on final state"
                    );
                }
                state.entry.clear();
                state.exit.clear();
                state.activities.clear();
                state.transitions.clear();
            }
        }
    }

    fn derive_state_kinds(&mut self) {
        let mut composites: Vec<String> = Vec::new();
        for state in self.model.states.values() {
            if state.initial.is_some() {
                composites.push(state.qualified_name.clone());
            }
            if let Some(parent) = state.parent() {
                composites.push(parent.to_string());
            }
        }
        for qualified_name in composites {
            if let Some(state) = self.model.states.get_mut(&qualified_name) {
                if state.kind == StateKind::Leaf {
                    state.kind = StateKind::Composite;
                }
            }
        }
    }

    fn derive_transition_kinds(&mut self) {
        for transition in self.model.transitions.values_mut() {
            transition.kind = match transition.target.as_deref() {
                None => TransitionKind::Internal,
                Some(target) if target == transition.source => TransitionKind::SelfTransition,
                Some(target)
                    if path::is_ancestor(&transition.source, target)
                        || path::is_ancestor(target, &transition.source) =>
                {
                    TransitionKind::Local
                }
                Some(_) => TransitionKind::External,
            };
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        let model = &self.model;
        for transition in model.transitions.values() {
            let resolves = |name: &str| {
                model.states.contains_key(name) || model.pseudostates.contains_key(name)
            };
            if !resolves(&transition.source) {
                return Err(ModelError::UnresolvedReference {
                    element: transition.qualified_name.clone(),
                    reference: transition.source.clone(),
                });
            }
            if let Some(target) = &transition.target {
                if !resolves(target) {
                    return Err(ModelError::UnresolvedReference {
                        element: transition.qualified_name.clone(),
                        reference: target.clone(),
                    });
                }
            }
        }

        for pseudostate in model.pseudostates.values() {
            match pseudostate.kind {
                PseudostateKind::Initial => {
                    let well_formed = pseudostate.transitions.len() == 1
                        && pseudostate
                            .transitions
                            .first()
                            .and_then(|name| model.transitions.get(name))
                            .is_some_and(|t| t.target.is_some());
                    if !well_formed {
                        return Err(ModelError::MalformedInitial(
                            pseudostate.qualified_name.clone(),
                        ));
                    }
                }
                PseudostateKind::Choice => {
                    if pseudostate.transitions.len() < 2 {
                        return Err(ModelError::ChoiceWithoutFallback(
                            pseudostate.qualified_name.clone(),
                        ));
                    }
                    let has_fallback = pseudostate
                        .transitions
                        .iter()
                        .filter_map(|name| model.transitions.get(name))
                        .any(|t| t.guard.is_none());
                    if !has_fallback {
                        return Err(ModelError::ChoiceWithoutFallback(
                            pseudostate.qualified_name.clone(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn compute_transition_paths(&mut self) {
        let initial_sources: HashMap<String, String> = self
            .model
            .pseudostates
            .values()
            .filter(|p| p.kind == PseudostateKind::Initial)
            .map(|p| {
                (
                    p.qualified_name.clone(),
                    p.owner().unwrap_or("/").to_string(),
                )
            })
            .collect();

        for transition in self.model.transitions.values_mut() {
            let mut transition_path = TransitionPath::default();
            let key;

            if let Some(owner) = initial_sources.get(&transition.source) {
                // Default entry: enter every state from the owner (exclusive)
                // down to the target.
                if let Some(target) = &transition.target {
                    let mut enter = path::ancestors_up_to(target, owner);
                    enter.reverse();
                    transition_path.enter = enter;
                }
                key = owner.clone();
            } else {
                match transition.kind {
                    TransitionKind::Internal => {}
                    TransitionKind::SelfTransition => {
                        transition_path.exit.push(transition.source.clone());
                        transition_path.enter.push(transition.source.clone());
                    }
                    _ => {
                        if let Some(target) = &transition.target {
                            let lca = path::lca(&transition.source, target).to_string();
                            transition_path.exit =
                                path::ancestors_up_to(&transition.source, &lca);
                            let mut enter = path::ancestors_up_to(target, &lca);
                            enter.reverse();
                            transition_path.enter = enter;
                        } else {
                            transition_path.exit.push(transition.source.clone());
                        }
                    }
                }
                key = transition.source.clone();
            }

            transition.paths.insert(key, transition_path);
        }
    }

    /// Transition lookup table: for every state, the transitions reachable
    /// from it (own and inherited from ancestors) per event name, nearest
    /// declaration first. Walking upward keeps the per-event lists in
    /// priority order without sorting. Completion transitions (no triggers,
    /// no timer) are keyed by their source's qualified name. Wildcard
    /// triggers are not tabled.
    fn build_transition_table(&mut self) {
        let model = &self.model;
        let mut table: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();

        for state_name in model.states.keys() {
            let mut by_event: HashMap<String, Vec<String>> = HashMap::new();
            let mut current = Some(state_name.clone());
            while let Some(vertex_name) = current {
                if let Some(vertex) = model.states.get(&vertex_name) {
                    for transition_name in &vertex.transitions {
                        let Some(transition) = model.transitions.get(transition_name) else {
                            continue;
                        };
                        if transition.events.is_empty() && transition.timer == TimerKind::None {
                            by_event
                                .entry(transition.source.clone())
                                .or_default()
                                .push(transition_name.clone());
                            continue;
                        }
                        for event in &transition.events {
                            if event.contains('*') || event.contains('?') {
                                continue;
                            }
                            by_event
                                .entry(event.clone())
                                .or_default()
                                .push(transition_name.clone());
                        }
                    }
                }
                if vertex_name == model.name {
                    break;
                }
                current = path::parent(&vertex_name).map(str::to_string);
            }
            table.insert(state_name.clone(), by_event);
        }

        self.model.transition_table = table;
    }

    fn build_deferred_table(&mut self) {
        let model = &self.model;
        let mut table: HashMap<String, DeferredEvents> = HashMap::new();

        for state_name in model.states.keys() {
            let mut deferred = DeferredEvents::default();
            let mut current = Some(state_name.clone());
            while let Some(vertex_name) = current {
                if let Some(state) = model.states.get(&vertex_name) {
                    for pattern in &state.deferred {
                        if pattern.contains('*') || pattern.contains('?') {
                            deferred.patterns.push(pattern.clone());
                        } else {
                            deferred.literals.insert(pattern.clone());
                        }
                    }
                }
                if vertex_name == model.name {
                    break;
                }
                current = path::parent(&vertex_name).map(str::to_string);
            }
            table.insert(state_name.clone(), deferred);
        }

        self.model.deferred_table = table;
    }

    fn insert_state(&mut self, state: State) -> Result<(), ModelError> {
        let qualified_name = state.qualified_name.clone();
        if self.model.states.contains_key(&qualified_name)
            || self.model.pseudostates.contains_key(&qualified_name)
        {
            return Err(ModelError::DuplicateName(qualified_name));
        }
        self.model.states.insert(qualified_name, state);
        Ok(())
    }

    fn insert_pseudostate(&mut self, pseudostate: Pseudostate) -> Result<(), ModelError> {
        let qualified_name = pseudostate.qualified_name.clone();
        if self.model.states.contains_key(&qualified_name)
            || self.model.pseudostates.contains_key(&qualified_name)
        {
            return Err(ModelError::DuplicateName(qualified_name));
        }
        self.model.pseudostates.insert(qualified_name, pseudostate);
        Ok(())
    }
}

enum BehaviorSlot {
    Entry,
    Exit,
    Activity,
}
