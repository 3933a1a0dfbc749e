//! Choice pseudostate tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hsm_core::{Event, Instance};
use hsm_engine::Machine;
use hsm_model::{choice, define, effect, guard, initial, on, state, target, transition, Model};
use parking_lot::Mutex;

struct TestInstance {
    base: Instance,
    flag: AtomicBool,
    log: Mutex<Vec<String>>,
}

impl TestInstance {
    fn new(flag: bool) -> Self {
        Self {
            base: Instance::new(),
            flag: AtomicBool::new(flag),
            log: Mutex::new(Vec::new()),
        }
    }

    fn log(&self, message: &str) {
        self.log.lock().push(message.to_string());
    }

    fn logs(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl AsRef<Instance> for TestInstance {
    fn as_ref(&self) -> &Instance {
        &self.base
    }
}

fn branching_model() -> Model<TestInstance> {
    define(
        "root",
        [
            initial([target("s")]),
            state("s", [transition([on("E"), target("../c")])]),
            choice(
                "c",
                [
                    transition([
                        guard(|_, instance: &TestInstance, _| instance.flag.load(Ordering::SeqCst)),
                        target("../t1"),
                        effect(|_, instance: &TestInstance, _| instance.log("took_t1")),
                    ]),
                    transition([
                        target("../t2"),
                        effect(|_, instance: &TestInstance, _| instance.log("took_t2")),
                    ]),
                ],
            ),
            state("t1", []),
            state("t2", []),
        ],
    )
    .unwrap()
}

#[test]
fn test_choice_takes_first_enabled_branch() {
    let machine = Machine::start(TestInstance::new(true), Arc::new(branching_model()));
    machine.dispatch(Event::new("E")).wait();
    assert_eq!(machine.state(), "/root/t1");
    assert_eq!(machine.instance().logs(), ["took_t1"]);
}

#[test]
fn test_choice_falls_back_to_guardless_branch() {
    let machine = Machine::start(TestInstance::new(false), Arc::new(branching_model()));
    machine.dispatch(Event::new("E")).wait();
    assert_eq!(machine.state(), "/root/t2");
    assert_eq!(machine.instance().logs(), ["took_t2"]);
}

#[test]
fn test_choice_branches_observe_guard_changes_between_runs() {
    let model = Arc::new(branching_model());

    let machine = Machine::start(TestInstance::new(true), Arc::clone(&model));
    machine.dispatch(Event::new("E")).wait();
    assert_eq!(machine.state(), "/root/t1");
    drop(machine);

    let machine = Machine::start(TestInstance::new(false), model);
    machine.dispatch(Event::new("E")).wait();
    assert_eq!(machine.state(), "/root/t2");
}

#[test]
fn test_initial_transition_may_target_a_choice() {
    let model = define(
        "root",
        [
            initial([target("c")]),
            choice(
                "c",
                [
                    transition([
                        guard(|_, instance: &TestInstance, _| instance.flag.load(Ordering::SeqCst)),
                        target("../on"),
                    ]),
                    transition([target("../off")]),
                ],
            ),
            state("on", []),
            state("off", []),
        ],
    )
    .unwrap();

    let machine = Machine::start(TestInstance::new(true), Arc::new(model));
    assert_eq!(machine.state(), "/root/on");
}

#[test]
fn test_guard_panic_falls_through_to_next_branch() {
    let model = define(
        "root",
        [
            initial([target("s")]),
            state("s", [transition([on("E"), target("../c")])]),
            choice(
                "c",
                [
                    transition([
                        guard(|_, _: &TestInstance, _| panic!("guard blew up")),
                        target("../t1"),
                    ]),
                    transition([target("../t2")]),
                ],
            ),
            state("t1", []),
            state("t2", []),
        ],
    )
    .unwrap();

    let machine = Machine::start(TestInstance::new(true), Arc::new(model));
    machine.dispatch(Event::new("E")).wait();
    assert_eq!(machine.state(), "/root/t2");
}

#[test]
fn test_choice_inside_composite_can_leave_it() {
    let model = define(
        "root",
        [
            initial([target("w")]),
            state(
                "w",
                [
                    hsm_model::exit(|_, instance: &TestInstance, _| instance.log("exit_w")),
                    initial([target("busy")]),
                    state("busy", [transition([on("done"), target("../c")])]),
                    choice(
                        "c",
                        [
                            transition([
                                guard(|_, instance: &TestInstance, _| {
                                    instance.flag.load(Ordering::SeqCst)
                                }),
                                target("/root/out"),
                            ]),
                            transition([target("../busy")]),
                        ],
                    ),
                ],
            ),
            state("out", []),
        ],
    )
    .unwrap();

    let machine = Machine::start(TestInstance::new(true), Arc::new(model));
    machine.dispatch(Event::new("done")).wait();
    assert_eq!(machine.state(), "/root/out");
    assert_eq!(machine.instance().logs(), ["exit_w"]);
}
