#![forbid(unsafe_code)]

//! # HSM Model
//!
//! The elaborated state machine model and the builder DSL that produces it.
//!
//! A model is defined declaratively from nested [`Part`] values and
//! elaborated by [`define`] into an immutable [`Model`]: all names resolved
//! to canonical absolute paths, kinds derived, timers synthesized into
//! activities, and the transition/deferral lookup tables precomputed. The
//! model is read-only afterwards and may be shared by any number of running
//! machines.

pub mod builder;
pub mod elements;
pub mod model;

pub use builder::*;
pub use elements::*;
pub use model::*;

/// Errors detected while elaborating a model definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Two elements elaborated to the same qualified name
    #[error("duplicate qualified name: {0}")]
    DuplicateName(String),
    /// A transition references a vertex that does not exist
    #[error("{element}: unresolved reference to {reference}")]
    UnresolvedReference { element: String, reference: String },
    /// A choice pseudostate has no guardless fallback branch
    #[error("choice {0} has no guardless fallback branch")]
    ChoiceWithoutFallback(String),
    /// An initial pseudostate does not have exactly one targeted transition
    #[error("initial pseudostate {0} is malformed")]
    MalformedInitial(String),
    /// A transition was declared outside of any vertex
    #[error("transition declared outside of any vertex")]
    OrphanTransition,
}
