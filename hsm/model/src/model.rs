//! The elaborated model container

use std::collections::{HashMap, HashSet};

use crate::elements::{Behavior, Guard, Pseudostate, State, Transition};

/// Deferred-event lookup entry for one state: literal names from the state
/// and its ancestors, plus any wildcard patterns for glob matching.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    pub(crate) literals: HashSet<String>,
    pub(crate) patterns: Vec<String>,
}

impl DeferredEvents {
    /// Check a literal event name (one of the dispatch variants)
    pub fn contains_literal(&self, name: &str) -> bool {
        self.literals.contains(name)
    }

    /// Check the full event name against the wildcard patterns
    pub fn matches_pattern(&self, name: &str) -> bool {
        hsm_core::path::match_any(name, self.patterns.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty() && self.patterns.is_empty()
    }
}

/// A fully-elaborated, immutable state machine model.
///
/// Built once by [`crate::define`]; read-only during execution and shareable
/// between any number of machine instances.
pub struct Model<I> {
    pub(crate) name: String,
    pub(crate) states: HashMap<String, State>,
    pub(crate) pseudostates: HashMap<String, Pseudostate>,
    pub(crate) transitions: HashMap<String, Transition>,
    pub(crate) behaviors: HashMap<String, Behavior<I>>,
    pub(crate) guards: HashMap<String, Guard<I>>,
    /// state → event name → transition names, nearest declaration first
    pub(crate) transition_table: HashMap<String, HashMap<String, Vec<String>>>,
    /// state → deferred names including ancestor deferrals
    pub(crate) deferred_table: HashMap<String, DeferredEvents>,
}

impl<I> Model<I> {
    /// Qualified name of the machine root (e.g. `/Watcher`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The root state
    pub fn root(&self) -> &State {
        &self.states[&self.name]
    }

    /// Look up a state by qualified name
    pub fn state(&self, qualified_name: &str) -> Option<&State> {
        self.states.get(qualified_name)
    }

    /// Look up a pseudostate by qualified name
    pub fn pseudostate(&self, qualified_name: &str) -> Option<&Pseudostate> {
        self.pseudostates.get(qualified_name)
    }

    /// Look up a transition by qualified name
    pub fn transition(&self, qualified_name: &str) -> Option<&Transition> {
        self.transitions.get(qualified_name)
    }

    /// Look up a behavior by qualified name
    pub fn behavior(&self, qualified_name: &str) -> Option<&Behavior<I>> {
        self.behaviors.get(qualified_name)
    }

    /// Look up a guard by qualified name
    pub fn guard(&self, qualified_name: &str) -> Option<&Guard<I>> {
        self.guards.get(qualified_name)
    }

    /// All states, in no particular order
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.values()
    }

    /// The root's default-entry transition, if the model declares one
    pub fn initial_transition(&self) -> Option<&Transition> {
        let initial = self.root().initial()?;
        let pseudostate = self.pseudostates.get(initial)?;
        let name = pseudostate.transitions.first()?;
        self.transitions.get(name)
    }

    /// Transition candidates for `state` when `event_name` arrives, in
    /// priority order (nearest declaration first). Includes transitions
    /// declared on ancestors.
    pub fn candidates(&self, state: &str, event_name: &str) -> &[String] {
        self.transition_table
            .get(state)
            .and_then(|by_event| by_event.get(event_name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Deferred-event entry for `state`, covering ancestor deferrals
    pub fn deferred(&self, state: &str) -> Option<&DeferredEvents> {
        self.deferred_table.get(state)
    }
}

impl<I> core::fmt::Debug for Model<I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("pseudostates", &self.pseudostates.len())
            .field("transitions", &self.transitions.len())
            .field("behaviors", &self.behaviors.len())
            .finish()
    }
}
