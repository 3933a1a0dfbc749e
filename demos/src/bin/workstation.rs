//! Workstation demo: deferral, a choice pseudostate, and completion events.
//!
//! Jobs submitted while the station is busy are deferred and picked up once
//! the current job completes; a choice routes finished jobs by quality.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hsm_core::{Event, Instance};
use hsm_engine::Machine;
use hsm_model::{
    choice, defer, define, entry, final_state, guard, initial, on, state, target, transition,
};

struct Station {
    base: Instance,
    passed_check: AtomicBool,
    completed: AtomicUsize,
}

impl AsRef<Instance> for Station {
    fn as_ref(&self) -> &Instance {
        &self.base
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let model = define(
        "station",
        [
            initial([target("ready")]),
            state(
                "ready",
                [
                    entry(|_, _: &Station, _| tracing::info!("ready for work")),
                    transition([on("job"), target("../machining")]),
                ],
            ),
            state(
                "machining",
                [
                    defer("job"),
                    initial([target("cutting")]),
                    state(
                        "cutting",
                        [
                            entry(|_, _: &Station, _| tracing::info!("cutting")),
                            transition([on("cut_done"), target("../polishing")]),
                        ],
                    ),
                    state(
                        "polishing",
                        [
                            entry(|_, _: &Station, _| tracing::info!("polishing")),
                            transition([on("polish_done"), target("../finished")]),
                        ],
                    ),
                    final_state("finished"),
                    transition([target("../inspect")]),
                ],
            ),
            choice(
                "inspect",
                [
                    transition([
                        guard(|_, station: &Station, _| station.passed_check.load(Ordering::SeqCst)),
                        target("../ready"),
                        hsm_model::effect(|_, station: &Station, _| {
                            station.completed.fetch_add(1, Ordering::SeqCst);
                            tracing::info!("passed inspection");
                        }),
                    ]),
                    transition([
                        target("../machining"),
                        hsm_model::effect(|_, _: &Station, _| {
                            tracing::warn!("failed inspection, reworking");
                        }),
                    ]),
                ],
            ),
        ],
    )
    .expect("workstation model is well-formed");

    let machine = Machine::start(
        Station {
            base: Instance::new(),
            passed_check: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
        },
        Arc::new(model),
    );
    tracing::info!(state = %machine.state(), "started");

    // First job fails inspection once, then passes after rework.
    machine.dispatch(Event::new("job")).wait();
    // A second job arrives mid-machining and is deferred.
    machine.dispatch(Event::new("job")).wait();

    machine.dispatch(Event::new("cut_done")).wait();
    machine.dispatch(Event::new("polish_done")).wait();
    tracing::info!(state = %machine.state(), "after failed inspection");

    machine.instance().passed_check.store(true, Ordering::SeqCst);
    machine.dispatch(Event::new("cut_done")).wait();
    machine.dispatch(Event::new("polish_done")).wait();
    tracing::info!(
        state = %machine.state(),
        completed = machine.instance().completed.load(Ordering::SeqCst),
        "after rework"
    );

    machine.stop();
}
