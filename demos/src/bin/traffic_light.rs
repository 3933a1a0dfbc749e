//! Traffic light demo: timed transitions and a pedestrian-button override.
//!
//! The light cycles red -> green -> yellow on `after` timers; pressing the
//! button (simulated) while green forces an early yellow.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hsm_core::{Event, Instance};
use hsm_engine::Machine;
use hsm_model::{after, define, entry, initial, on, state, target, transition};

struct Light {
    base: Instance,
    cycles: AtomicUsize,
}

impl AsRef<Instance> for Light {
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
        "light",
        [
            initial([target("red")]),
            state(
                "red",
                [
                    entry(|_, light: &Light, _| {
                        light.cycles.fetch_add(1, Ordering::SeqCst);
                        tracing::info!("RED - stop");
                    }),
                    transition([
                        after(|_, _: &Light, _| Duration::from_millis(600)),
                        target("../green"),
                    ]),
                ],
            ),
            state(
                "green",
                [
                    entry(|_, _: &Light, _| tracing::info!("GREEN - go")),
                    transition([
                        after(|_, _: &Light, _| Duration::from_millis(600)),
                        target("../yellow"),
                    ]),
                    transition([on("button"), target("../yellow")]),
                ],
            ),
            state(
                "yellow",
                [
                    entry(|_, _: &Light, _| tracing::info!("YELLOW - caution")),
                    transition([
                        after(|_, _: &Light, _| Duration::from_millis(300)),
                        target("../red"),
                    ]),
                ],
            ),
        ],
    )
    .expect("traffic light model is well-formed");

    let machine = Machine::start(
        Light {
            base: Instance::new(),
            cycles: AtomicUsize::new(0),
        },
        Arc::new(model),
    );

    // Let it cycle on its own for a bit.
    while machine.instance().cycles.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(50));
    }

    // Pedestrian presses the button during green.
    while machine.state() != "/light/green" {
        thread::sleep(Duration::from_millis(20));
    }
    tracing::info!("button pressed");
    machine.dispatch(Event::new("button")).wait();
    tracing::info!(state = %machine.state(), "after button");

    machine.stop();
    tracing::info!("light stopped");
}
