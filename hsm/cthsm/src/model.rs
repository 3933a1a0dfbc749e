//! Const-normalized model arrays and static table construction

use core::time::Duration;

use crate::{CtContext, CtEvent, INVALID};

/// Behavior signature (entry, exit, effect, activity)
pub type CtAction<I> = fn(&CtContext, &I, &CtEvent);

/// Guard predicate signature
pub type CtGuardFn<I> = fn(&CtContext, &I, &CtEvent) -> bool;

/// Timer duration expression signature
pub type CtDurationFn<I> = fn(&CtContext, &I, &CtEvent) -> Duration;

/// State classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtStateKind {
    Root,
    Composite,
    Leaf,
    Final,
}

/// Transition target reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtTarget {
    /// Internal transition
    None,
    /// A state by index
    State(usize),
    /// A choice pseudostate by index
    Choice(usize),
}

/// Timer attached to a transition
pub enum CtTimer<I: 'static> {
    None,
    /// One-shot
    After(CtDurationFn<I>),
    /// Periodic under a real provider; one-shot under [`crate::Sequential`]
    Every(CtDurationFn<I>),
}

impl<I> Clone for CtTimer<I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I> Copy for CtTimer<I> {}

/// A state record.
///
/// `name` is the canonical absolute qualified name; `parent` is an index
/// into the state array (`INVALID` only for the root at index 0).
pub struct CtState<I: 'static> {
    pub name: &'static str,
    pub parent: usize,
    pub kind: CtStateKind,
    /// Index of the default-entry transition, or `INVALID`
    pub initial: usize,
    pub entry: &'static [CtAction<I>],
    pub exit: &'static [CtAction<I>],
    pub activities: &'static [CtAction<I>],
    /// Deferred event names (literals only)
    pub deferred: &'static [&'static str],
    /// Outgoing transition indices in declaration order. Default-entry
    /// transitions (referenced by `initial`) and choice branches
    /// (referenced by [`CtChoice::branches`]) are not listed here.
    pub transitions: &'static [usize],
}

/// A transition record.
///
/// `source` is always a state index; choice branches use the choice's owner
/// and are reachable only through the choice's branch list.
pub struct CtTransition<I: 'static> {
    pub source: usize,
    pub target: CtTarget,
    /// Triggering event names; empty for completion transitions, choice
    /// branches, and default-entry transitions
    pub events: &'static [&'static str],
    pub guard: Option<CtGuardFn<I>>,
    pub effects: &'static [CtAction<I>],
    pub timer: CtTimer<I>,
}

/// A choice pseudostate: branches are transition indices evaluated in
/// declaration order; at least one must be guardless.
pub struct CtChoice {
    pub name: &'static str,
    /// Owning state index
    pub owner: usize,
    pub branches: &'static [usize],
}

const fn str_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn str_lt(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let min = if a.len() < b.len() { a.len() } else { b.len() };
    let mut i = 0;
    while i < min {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
        i += 1;
    }
    a.len() < b.len()
}

const fn find_event<const E: usize>(events: &[&'static str; E], name: &str) -> usize {
    let mut i = 0;
    while i < E {
        if str_eq(events[i], name) {
            return i;
        }
        i += 1;
    }
    INVALID
}

/// A fully-normalized compile-time model.
///
/// `S`, `T`, and `E` are the state, transition, and distinct-event-name
/// counts. Construction is a `const fn`: structural errors (dangling
/// indices, missing choice fallbacks, unknown event names) abort constant
/// evaluation and therefore fail the build.
pub struct CtModel<I: 'static, const S: usize, const T: usize, const E: usize> {
    pub(crate) states: [CtState<I>; S],
    pub(crate) transitions: [CtTransition<I>; T],
    pub(crate) choices: &'static [CtChoice],
    /// Sorted for binary search
    pub(crate) events: [&'static str; E],
    /// `deferred[state][event]`, ancestor deferrals folded in
    pub(crate) deferred: [[bool; E]; S],
}

impl<I: 'static, const S: usize, const T: usize, const E: usize> CtModel<I, S, T, E> {
    /// Normalize and validate a model, building the static tables.
    ///
    /// The root must be the state at index 0. `event_names` lists every
    /// distinct trigger and deferred event name once.
    pub const fn new(
        states: [CtState<I>; S],
        transitions: [CtTransition<I>; T],
        choices: &'static [CtChoice],
        event_names: [&'static str; E],
    ) -> Self {
        assert!(S > 0, "model needs a root state");
        assert!(
            states[0].parent == INVALID,
            "root state must have no parent"
        );

        // Sort the event index (insertion sort; E is small).
        let mut events = event_names;
        let mut i = 1;
        while i < E {
            let mut j = i;
            while j > 0 && str_lt(events[j], events[j - 1]) {
                let tmp = events[j];
                events[j] = events[j - 1];
                events[j - 1] = tmp;
                j -= 1;
            }
            i += 1;
        }
        i = 1;
        while i < E {
            assert!(!str_eq(events[i - 1], events[i]), "duplicate event name");
            i += 1;
        }

        // Structural validation.
        i = 0;
        while i < S {
            let state = &states[i];
            assert!(
                i == 0 || state.parent < S,
                "state parent index out of range"
            );
            assert!(
                state.initial == INVALID || state.initial < T,
                "state initial transition index out of range"
            );
            let mut k = 0;
            while k < state.transitions.len() {
                assert!(state.transitions[k] < T, "outgoing transition index out of range");
                k += 1;
            }
            i += 1;
        }

        i = 0;
        while i < T {
            let transition = &transitions[i];
            assert!(transition.source < S, "transition source out of range");
            match transition.target {
                CtTarget::None => {}
                CtTarget::State(index) => assert!(index < S, "transition target out of range"),
                CtTarget::Choice(index) => {
                    assert!(index < choices.len(), "transition choice target out of range")
                }
            }
            let mut k = 0;
            while k < transition.events.len() {
                assert!(
                    find_event(&events, transition.events[k]) != INVALID,
                    "trigger event missing from event_names"
                );
                k += 1;
            }
            i += 1;
        }

        i = 0;
        while i < choices.len() {
            let choice = &choices[i];
            assert!(choice.owner < S, "choice owner out of range");
            assert!(!choice.branches.is_empty(), "choice needs branches");
            let mut has_fallback = false;
            let mut k = 0;
            while k < choice.branches.len() {
                let branch = choice.branches[k];
                assert!(branch < T, "choice branch index out of range");
                if transitions[branch].guard.is_none() {
                    has_fallback = true;
                }
                k += 1;
            }
            assert!(has_fallback, "choice has no guardless fallback branch");
            i += 1;
        }

        // Deferral bit-matrix, ancestor deferrals included.
        let mut deferred = [[false; E]; S];
        i = 0;
        while i < S {
            let mut current = i;
            loop {
                let state = &states[current];
                let mut k = 0;
                while k < state.deferred.len() {
                    let event = find_event(&events, state.deferred[k]);
                    assert!(event != INVALID, "deferred event missing from event_names");
                    deferred[i][event] = true;
                    k += 1;
                }
                if state.parent == INVALID {
                    break;
                }
                current = state.parent;
            }
            i += 1;
        }

        Self {
            states,
            transitions,
            choices,
            events,
            deferred,
        }
    }

    pub fn state(&self, index: usize) -> &CtState<I> {
        &self.states[index]
    }

    pub fn transition(&self, index: usize) -> &CtTransition<I> {
        &self.transitions[index]
    }

    pub fn choice(&self, index: usize) -> &CtChoice {
        &self.choices[index]
    }

    /// Binary search over the sorted event index
    pub fn event_id(&self, name: &str) -> usize {
        let mut low = 0usize;
        let mut high = E;
        while low < high {
            let mid = (low + high) / 2;
            if self.events[mid] < name {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        if low < E && self.events[low] == name {
            low
        } else {
            INVALID
        }
    }

    /// Whether `state` (or an ancestor) defers the event with this id
    pub fn is_deferred(&self, state: usize, event: usize) -> bool {
        event != INVALID && self.deferred[state][event]
    }

    /// Whether `ancestor` is `state` or one of its ancestors
    pub fn is_in_chain(&self, ancestor: usize, state: usize) -> bool {
        let mut current = state;
        loop {
            if current == ancestor {
                return true;
            }
            let parent = self.states[current].parent;
            if parent == INVALID {
                return false;
            }
            current = parent;
        }
    }

    /// Lowest common ancestor of two states, by index
    pub fn lca(&self, a: usize, b: usize) -> usize {
        let mut current = a;
        loop {
            if self.is_in_chain(current, b) {
                return current;
            }
            let parent = self.states[current].parent;
            if parent == INVALID {
                return current;
            }
            current = parent;
        }
    }
}
