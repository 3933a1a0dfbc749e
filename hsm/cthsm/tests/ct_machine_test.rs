//! Compile-time machine semantics tests

use std::cell::{Cell, RefCell};
use std::time::Duration;

use hsm_cthsm::{
    CtChoice, CtContext, CtEvent, CtMachine, CtModel, CtState, CtStateKind, CtTarget, CtTimer,
    CtTransition, INVALID,
};

#[derive(Default)]
struct Inst {
    log: RefCell<Vec<&'static str>>,
    flag: Cell<bool>,
}

impl Inst {
    fn logs(&self) -> Vec<&'static str> {
        self.log.borrow().clone()
    }
}

macro_rules! action {
    ($name:ident, $message:literal) => {
        fn $name(_: &CtContext, instance: &Inst, _: &CtEvent) {
            instance.log.borrow_mut().push($message);
        }
    };
}

action!(enter_idle, "enter_idle");
action!(exit_idle, "exit_idle");
action!(enter_busy, "enter_busy");
action!(exit_busy, "exit_busy");
action!(enter_working, "enter_working");
action!(exit_working, "exit_working");
action!(eff_begin, "eff_begin");
action!(eff_complete, "eff_complete");

// Workstation: idle --begin/eff--> busy{working --finish--> done(final)}
// --completion/eff--> out
const STATES: [CtState<Inst>; 6] = [
    CtState {
        name: "/m",
        parent: INVALID,
        kind: CtStateKind::Root,
        initial: 0,
        entry: &[],
        exit: &[],
        activities: &[],
        deferred: &[],
        transitions: &[],
    },
    CtState {
        name: "/m/idle",
        parent: 0,
        kind: CtStateKind::Leaf,
        initial: INVALID,
        entry: &[enter_idle],
        exit: &[exit_idle],
        activities: &[],
        deferred: &["held"],
        transitions: &[1],
    },
    CtState {
        name: "/m/busy",
        parent: 0,
        kind: CtStateKind::Composite,
        initial: 3,
        entry: &[enter_busy],
        exit: &[exit_busy],
        activities: &[],
        deferred: &[],
        transitions: &[2],
    },
    CtState {
        name: "/m/busy/working",
        parent: 2,
        kind: CtStateKind::Leaf,
        initial: INVALID,
        entry: &[enter_working],
        exit: &[exit_working],
        activities: &[],
        deferred: &[],
        transitions: &[4, 5],
    },
    CtState {
        name: "/m/busy/done",
        parent: 2,
        kind: CtStateKind::Final,
        initial: INVALID,
        entry: &[],
        exit: &[],
        activities: &[],
        deferred: &[],
        transitions: &[],
    },
    CtState {
        name: "/m/out",
        parent: 0,
        kind: CtStateKind::Leaf,
        initial: INVALID,
        entry: &[],
        exit: &[],
        activities: &[],
        deferred: &[],
        transitions: &[],
    },
];

const TRANSITIONS: [CtTransition<Inst>; 6] = [
    // 0: root default entry -> idle
    CtTransition {
        source: 0,
        target: CtTarget::State(1),
        events: &[],
        guard: None,
        effects: &[],
        timer: CtTimer::None,
    },
    // 1: idle --begin--> busy
    CtTransition {
        source: 1,
        target: CtTarget::State(2),
        events: &["begin"],
        guard: None,
        effects: &[eff_begin],
        timer: CtTimer::None,
    },
    // 2: busy completion -> out
    CtTransition {
        source: 2,
        target: CtTarget::State(5),
        events: &[],
        guard: None,
        effects: &[eff_complete],
        timer: CtTimer::None,
    },
    // 3: busy default entry -> working
    CtTransition {
        source: 2,
        target: CtTarget::State(3),
        events: &[],
        guard: None,
        effects: &[],
        timer: CtTimer::None,
    },
    // 4: working --finish--> done
    CtTransition {
        source: 3,
        target: CtTarget::State(4),
        events: &["finish"],
        guard: None,
        effects: &[],
        timer: CtTimer::None,
    },
    // 5: working --held--> out (never taken while deferred elsewhere)
    CtTransition {
        source: 3,
        target: CtTarget::State(5),
        events: &["held"],
        guard: None,
        effects: &[],
        timer: CtTimer::None,
    },
];

static MODEL: CtModel<Inst, 6, 6, 3> =
    CtModel::new(STATES, TRANSITIONS, &[], ["begin", "finish", "held"]);

#[test]
fn test_default_entry() {
    let machine = CtMachine::start(Inst::default(), &MODEL);
    assert_eq!(machine.state(), "/m/idle");
    assert_eq!(machine.instance().logs(), ["enter_idle"]);
}

#[test]
fn test_exit_effect_entry_order_and_descent() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("begin"));
    assert_eq!(machine.state(), "/m/busy/working");
    assert_eq!(
        machine.instance().logs(),
        ["enter_idle", "exit_idle", "eff_begin", "enter_busy", "enter_working"]
    );
}

#[test]
fn test_completion_event_reaches_enclosing_composite() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("begin"));
    machine.dispatch(CtEvent::Signal("finish"));
    assert_eq!(machine.state(), "/m/out");
    assert_eq!(
        machine.instance().logs(),
        [
            "enter_idle",
            "exit_idle",
            "eff_begin",
            "enter_busy",
            "enter_working",
            "exit_working",
            "exit_busy",
            "eff_complete"
        ]
    );
}

#[test]
fn test_deferral_reoffers_after_state_change() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("held"));
    assert_eq!(machine.state(), "/m/idle");

    machine.dispatch(CtEvent::Signal("begin"));
    // held was re-offered in busy/working, which consumes it.
    assert_eq!(machine.state(), "/m/out");
}

#[test]
fn test_event_name_variants() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("begin_now"));
    assert_eq!(machine.state(), "/m/busy/working");
}

#[test]
fn test_unmatched_event_is_dropped() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("nothing"));
    assert_eq!(machine.state(), "/m/idle");
}

#[test]
fn test_stop_exits_to_root_and_restart_recovers() {
    let mut machine = CtMachine::start(Inst::default(), &MODEL);
    machine.dispatch(CtEvent::Signal("begin"));
    machine.stop();
    assert_eq!(machine.state(), "");
    let logs = machine.instance().logs();
    assert_eq!(&logs[logs.len() - 2..], ["exit_working", "exit_busy"]);

    machine.dispatch(CtEvent::Signal("begin"));
    assert_eq!(machine.state(), "");

    machine.restart();
    assert_eq!(machine.state(), "/m/idle");
}

mod choice {
    use super::*;

    fn pick(_: &CtContext, instance: &Inst, _: &CtEvent) -> bool {
        instance.flag.get()
    }

    const STATES: [CtState<Inst>; 4] = [
        CtState {
            name: "/c",
            parent: INVALID,
            kind: CtStateKind::Root,
            initial: 0,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/c/s",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[1],
        },
        CtState {
            name: "/c/t1",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/c/t2",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
    ];

    const TRANSITIONS: [CtTransition<Inst>; 4] = [
        // 0: root default entry -> s
        CtTransition {
            source: 0,
            target: CtTarget::State(1),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 1: s --E--> choice
        CtTransition {
            source: 1,
            target: CtTarget::Choice(0),
            events: &["E"],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 2: branch [pick] -> t1
        CtTransition {
            source: 0,
            target: CtTarget::State(2),
            events: &[],
            guard: Some(pick),
            effects: &[],
            timer: CtTimer::None,
        },
        // 3: branch fallback -> t2
        CtTransition {
            source: 0,
            target: CtTarget::State(3),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
    ];

    const CHOICES: [CtChoice; 1] = [CtChoice {
        name: "/c/decide",
        owner: 0,
        branches: &[2, 3],
    }];

    static MODEL: CtModel<Inst, 4, 4, 1> = CtModel::new(STATES, TRANSITIONS, &CHOICES, ["E"]);

    #[test]
    fn test_choice_takes_first_enabled_branch() {
        let instance = Inst::default();
        instance.flag.set(true);
        let mut machine = CtMachine::start(instance, &MODEL);
        machine.dispatch(CtEvent::Signal("E"));
        assert_eq!(machine.state(), "/c/t1");
    }

    #[test]
    fn test_choice_falls_back_to_guardless_branch() {
        let mut machine = CtMachine::start(Inst::default(), &MODEL);
        machine.dispatch(CtEvent::Signal("E"));
        assert_eq!(machine.state(), "/c/t2");
    }
}

mod panics {
    use super::*;

    fn failing_guard(_: &CtContext, _: &Inst, _: &CtEvent) -> bool {
        panic!("guard failed")
    }

    fn failing_action(_: &CtContext, _: &Inst, _: &CtEvent) {
        panic!("action failed")
    }

    action!(second_effect, "second_effect");
    action!(enter_b, "enter_b");

    const STATES: [CtState<Inst>; 5] = [
        CtState {
            name: "/p",
            parent: INVALID,
            kind: CtStateKind::Root,
            initial: 0,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/p/s",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            // A panicking exit action must not abort the transition.
            exit: &[failing_action],
            activities: &[],
            deferred: &[],
            transitions: &[1, 4, 5],
        },
        CtState {
            name: "/p/t1",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/p/t2",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/p/b",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[failing_action, enter_b],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
    ];

    const TRANSITIONS: [CtTransition<Inst>; 6] = [
        // 0: root default entry -> s
        CtTransition {
            source: 0,
            target: CtTarget::State(1),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 1: s --E--> choice
        CtTransition {
            source: 1,
            target: CtTarget::Choice(0),
            events: &["E"],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 2: branch [failing_guard] -> t1
        CtTransition {
            source: 0,
            target: CtTarget::State(2),
            events: &[],
            guard: Some(failing_guard),
            effects: &[],
            timer: CtTimer::None,
        },
        // 3: branch fallback -> t2
        CtTransition {
            source: 0,
            target: CtTarget::State(3),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 4: s --hop--> t1, guard panics so the next candidate wins
        CtTransition {
            source: 1,
            target: CtTarget::State(2),
            events: &["hop"],
            guard: Some(failing_guard),
            effects: &[],
            timer: CtTimer::None,
        },
        // 5: s --go--> b, first effect panics, second still runs
        CtTransition {
            source: 1,
            target: CtTarget::State(4),
            events: &["hop", "go"],
            guard: None,
            effects: &[failing_action, second_effect],
            timer: CtTimer::None,
        },
    ];

    const CHOICES: [CtChoice; 1] = [CtChoice {
        name: "/p/c",
        owner: 0,
        branches: &[2, 3],
    }];

    static MODEL: CtModel<Inst, 5, 6, 3> =
        CtModel::new(STATES, TRANSITIONS, &CHOICES, ["E", "hop", "go"]);

    #[test]
    fn test_guard_panic_falls_through_to_next_branch() {
        let mut machine = CtMachine::start(Inst::default(), &MODEL);
        machine.dispatch(CtEvent::Signal("E"));
        assert_eq!(machine.state(), "/p/t2");
    }

    #[test]
    fn test_guard_panic_is_treated_as_false() {
        let mut machine = CtMachine::start(Inst::default(), &MODEL);
        machine.dispatch(CtEvent::Signal("hop"));
        assert_eq!(machine.state(), "/p/b");
    }

    #[test]
    fn test_behavior_panic_does_not_abort_the_transition() {
        let mut machine = CtMachine::start(Inst::default(), &MODEL);
        machine.dispatch(CtEvent::Signal("go"));
        assert_eq!(machine.state(), "/p/b");
        // The panicking exit, effect, and entry actions are contained; the
        // remaining behaviors still run in order.
        assert_eq!(machine.instance().logs(), ["second_effect", "enter_b"]);
    }
}

mod timers {
    use super::*;

    fn short(_: &CtContext, _: &Inst, _: &CtEvent) -> Duration {
        Duration::from_millis(1)
    }

    fn disarmed(_: &CtContext, _: &Inst, _: &CtEvent) -> Duration {
        Duration::ZERO
    }

    const STATES: [CtState<Inst>; 4] = [
        CtState {
            name: "/t",
            parent: INVALID,
            kind: CtStateKind::Root,
            initial: 0,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
        CtState {
            name: "/t/armed",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[1],
        },
        CtState {
            name: "/t/fired",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[2],
        },
        CtState {
            name: "/t/never",
            parent: 0,
            kind: CtStateKind::Leaf,
            initial: INVALID,
            entry: &[],
            exit: &[],
            activities: &[],
            deferred: &[],
            transitions: &[],
        },
    ];

    const TRANSITIONS: [CtTransition<Inst>; 3] = [
        // 0: root default entry -> armed
        CtTransition {
            source: 0,
            target: CtTarget::State(1),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::None,
        },
        // 1: armed after(short) -> fired
        CtTransition {
            source: 1,
            target: CtTarget::State(2),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::After(short),
        },
        // 2: fired after(zero) -> never; a zero duration disarms
        CtTransition {
            source: 2,
            target: CtTarget::State(3),
            events: &[],
            guard: None,
            effects: &[],
            timer: CtTimer::After(disarmed),
        },
    ];

    static MODEL: CtModel<Inst, 4, 3, 1> = CtModel::new(STATES, TRANSITIONS, &[], ["unused"]);

    #[test]
    fn test_sequential_timer_fires_on_entry_and_zero_disarms() {
        // Under the sequential provider the sleep is a no-op, so the armed
        // timer fires within start's drain; the zero-duration timer in the
        // target state never does.
        let machine = CtMachine::start(Inst::default(), &MODEL);
        assert_eq!(machine.state(), "/t/fired");
    }
}
