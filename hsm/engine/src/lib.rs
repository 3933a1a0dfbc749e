#![forbid(unsafe_code)]

//! # HSM Engine
//!
//! The execution engine of the HSM runtime: a bounded event queue with
//! completion-event promotion, an activity manager that starts, cancels,
//! and joins concurrent behaviors, and the dispatcher that drives a user
//! instance through a shared [`hsm_model::Model`] honoring UML statechart
//! semantics (hierarchy, entry/exit/activity, guards, choice pseudostates,
//! deferral, timed transitions).

pub mod activity;
pub mod machine;
pub mod queue;

pub use activity::*;
pub use machine::*;
pub use queue::*;
