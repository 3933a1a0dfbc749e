//! Model elements
//!
//! The elaborated model is an arena: every element lives in a per-kind map
//! owned by [`crate::Model`], keyed by its canonical absolute qualified name.
//! Cross-references between elements are qualified names, and a state's
//! parent is derived from its own name, so the graph carries no cycles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hsm_core::{path, Context, Event};

/// Synchronous or concurrent action signature
pub type ActionFn<I> = Arc<dyn Fn(&Context, &I, &Event) + Send + Sync>;

/// Guard predicate signature
pub type PredicateFn<I> = Arc<dyn Fn(&Context, &I, &Event) -> bool + Send + Sync>;

/// Timer duration expression signature
pub type DurationFn<I> = Arc<dyn Fn(&Context, &I, &Event) -> Duration + Send + Sync>;

/// Classification of a state within the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// The machine itself; a composite marked as the root
    Root,
    /// State with children and/or a default-entry pseudostate
    Composite,
    /// Childless state
    Leaf,
    /// Terminal state; entering it raises a completion event
    Final,
}

/// A state in the hierarchy
#[derive(Debug)]
pub struct State {
    pub(crate) qualified_name: String,
    pub(crate) kind: StateKind,
    pub(crate) initial: Option<String>,
    pub(crate) entry: Vec<String>,
    pub(crate) exit: Vec<String>,
    pub(crate) activities: Vec<String>,
    pub(crate) deferred: Vec<String>,
    pub(crate) transitions: Vec<String>,
}

impl State {
    pub(crate) fn new(qualified_name: String, kind: StateKind) -> Self {
        Self {
            qualified_name,
            kind,
            initial: None,
            entry: Vec::new(),
            exit: Vec::new(),
            activities: Vec::new(),
            deferred: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Canonical absolute qualified name
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Last segment of the qualified name
    pub fn name(&self) -> &str {
        path::name(&self.qualified_name)
    }

    /// Qualified name of the parent state; `None` only for the root
    pub fn parent(&self) -> Option<&str> {
        match path::parent(&self.qualified_name) {
            Some("/") | None => None,
            parent => parent,
        }
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    /// Initial pseudostate for default entry, if declared
    pub fn initial(&self) -> Option<&str> {
        self.initial.as_deref()
    }

    /// Entry behaviors in declaration order
    pub fn entry_behaviors(&self) -> &[String] {
        &self.entry
    }

    /// Exit behaviors in declaration order
    pub fn exit_behaviors(&self) -> &[String] {
        &self.exit
    }

    /// Activity behaviors in declaration order
    pub fn activity_behaviors(&self) -> &[String] {
        &self.activities
    }

    /// Deferred event names and patterns declared on this state
    pub fn deferred_events(&self) -> &[String] {
        &self.deferred
    }

    /// Outgoing transitions in declaration order
    pub fn outgoing_transitions(&self) -> &[String] {
        &self.transitions
    }
}

/// Kinds of pseudostates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudostateKind {
    /// Default-entry vertex owned by a composite state
    Initial,
    /// Branching vertex resolved by guard evaluation in declaration order
    Choice,
}

/// A pseudostate vertex
#[derive(Debug)]
pub struct Pseudostate {
    pub(crate) qualified_name: String,
    pub(crate) kind: PseudostateKind,
    pub(crate) transitions: Vec<String>,
}

impl Pseudostate {
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Qualified name of the owning state
    pub fn owner(&self) -> Option<&str> {
        path::parent(&self.qualified_name)
    }

    pub fn kind(&self) -> PseudostateKind {
        self.kind
    }

    /// Outgoing transitions in declaration order
    pub fn outgoing_transitions(&self) -> &[String] {
        &self.transitions
    }
}

/// Derived transition classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Default: exits up to the LCA and enters down to the target
    External,
    /// No target: effects only, no exit or entry
    Internal,
    /// Source equals target: the source is exited and re-entered
    SelfTransition,
    /// Source and target in ancestor relation: the outer state is not exited
    Local,
}

/// Timer classification of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Not timed
    None,
    /// One-shot `after` timer
    After,
    /// Periodic `every` timer
    Every,
}

/// Exit and enter sequences traversed when a transition fires.
///
/// `exit` is leaf-first, `enter` is parent-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPath {
    pub exit: Vec<String>,
    pub enter: Vec<String>,
}

/// A transition between vertices
#[derive(Debug)]
pub struct Transition {
    pub(crate) qualified_name: String,
    pub(crate) source: String,
    pub(crate) target: Option<String>,
    pub(crate) events: Vec<String>,
    pub(crate) guard: Option<String>,
    pub(crate) effects: Vec<String>,
    pub(crate) timer: TimerKind,
    pub(crate) kind: TransitionKind,
    /// Exit/enter sequences keyed by the state the machine occupies when the
    /// transition fires. Populated at elaboration for the declared source;
    /// descendant-leaf paths are computed lazily by the engine.
    pub(crate) paths: HashMap<String, TransitionPath>,
}

impl Transition {
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Target vertex; `None` for internal transitions
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Triggering event names; empty for completion and pseudostate
    /// transitions
    pub fn events(&self) -> &[String] {
        &self.events
    }

    pub fn guard(&self) -> Option<&str> {
        self.guard.as_deref()
    }

    /// Effect behaviors in declaration order
    pub fn effects(&self) -> &[String] {
        &self.effects
    }

    pub fn timer(&self) -> TimerKind {
        self.timer
    }

    pub fn kind(&self) -> TransitionKind {
        self.kind
    }

    pub fn is_internal(&self) -> bool {
        self.kind == TransitionKind::Internal
    }

    /// Precomputed exit/enter path for a given occupied state
    pub fn path_from(&self, state: &str) -> Option<&TransitionPath> {
        self.paths.get(state)
    }
}

/// A named behavior: entry, exit, effect (synchronous) or activity/timer
/// (concurrent)
pub struct Behavior<I> {
    pub(crate) qualified_name: String,
    pub(crate) concurrent: bool,
    pub(crate) action: ActionFn<I>,
}

impl<I> Behavior<I> {
    pub(crate) fn synchronous(qualified_name: String, action: ActionFn<I>) -> Self {
        Self {
            qualified_name,
            concurrent: false,
            action,
        }
    }

    pub(crate) fn concurrent(qualified_name: String, action: ActionFn<I>) -> Self {
        Self {
            qualified_name,
            concurrent: true,
            action,
        }
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// True for activities and timers, which run on a provider task
    pub fn is_concurrent(&self) -> bool {
        self.concurrent
    }

    /// The callable itself
    pub fn action(&self) -> &ActionFn<I> {
        &self.action
    }
}

impl<I> core::fmt::Debug for Behavior<I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Behavior")
            .field("qualified_name", &self.qualified_name)
            .field("concurrent", &self.concurrent)
            .finish()
    }
}

/// A guard constraint attached to a transition
pub struct Guard<I> {
    pub(crate) qualified_name: String,
    pub(crate) condition: PredicateFn<I>,
}

impl<I> Guard<I> {
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn condition(&self) -> &PredicateFn<I> {
        &self.condition
    }
}

impl<I> core::fmt::Debug for Guard<I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Guard")
            .field("qualified_name", &self.qualified_name)
            .finish()
    }
}
