use std::collections::HashMap;
use std::convert::TryInto;
use std::ops::ControlFlow;
use std::process::Command;

use tether::{Arch, Options, Phase, Pid, TraceConfig, TraceEvent, Tracee};

#[allow(unused)]
macro_rules! pid {
    ($raw: expr) => {
        tether::Pid::from_raw($raw)
    };
}

/// Construct a trace step with a readable, integration test-friendly syntax.
#[allow(unused)]
macro_rules! step {
    ($raw_pid: expr, $name: expr, $phase: ident) => {{
        support::Step {
            pid: tether::Pid::from_raw($raw_pid),
            name: $name.to_string(),
            phase: tether::Phase::$phase,
        }
    }};
}

/// The parts of a syscall event which are stable across runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    pub pid: Pid,
    pub name: String,
    pub phase: Phase,
}

impl Step {
    pub fn of(event: &TraceEvent) -> Option<Self> {
        match event {
            TraceEvent::Syscall(syscall) => Some(Self {
                pid: syscall.pid,
                name: syscall.info.name.to_string(),
                phase: syscall.phase,
            }),
            TraceEvent::Seccomp(_) => None,
        }
    }
}

/// Spawn `argv` as a stopped tracee.
pub fn spawn(argv: &[&str]) -> tether::Result<Tracee> {
    let mut cmd = Command::new(argv[0]);
    cmd.args(&argv[1..]);

    Tracee::spawn(Arch::host(), cmd, Options::empty())
}

/// Trace `argv` to completion, returning every event with its rendered text.
#[allow(unused)]
pub fn trace_command(argv: &[&str], follow: bool) -> anyhow::Result<Vec<(TraceEvent, String)>> {
    let tracee = spawn(argv)?;
    let mut events = vec![];

    let mut config = TraceConfig::new();
    config.set_follow(follow);

    config.run(tracee, |event, tracee| {
        let text = match event {
            TraceEvent::Syscall(syscall) => syscall.render(&tracee.memory()),
            TraceEvent::Seccomp(seccomp) => seccomp.to_string(),
        };
        eprintln!("[{}] {text}", event.pid());

        events.push((event.clone(), text));
        Ok(ControlFlow::Continue(()))
    })?;

    Ok(events)
}

/// Split a trace into per-pid step sequences, keyed by normalized pid.
#[allow(unused)]
pub fn steps_by_pid(events: &[(TraceEvent, String)]) -> HashMap<Pid, Vec<Step>> {
    let steps: Vec<Step> = events.iter().filter_map(|(e, _)| Step::of(e)).collect();
    let mut by_pid: HashMap<Pid, Vec<Step>> = HashMap::new();

    for step in Normalizer::normalize(&steps) {
        by_pid.entry(step.pid).or_default().push(step);
    }

    by_pid
}

/// Assert that the steps of one pid alternate enter and exit, with each exit matching
/// the syscall just entered. Only the last syscall may be left without an exit.
#[allow(unused)]
pub fn assert_paired(steps: &[Step]) {
    for (i, pair) in steps.chunks(2).enumerate() {
        let enter = &pair[0];
        assert_eq!(enter.phase, Phase::Enter, "step {}: {:?}", 2 * i, enter);

        match pair.get(1) {
            Some(exit) => {
                assert_eq!(exit.phase, Phase::Exit, "step {}: {:?}", 2 * i + 1, exit);
                assert_eq!(exit.name, enter.name);
            },
            None => assert_eq!(2 * i + 1, steps.len(), "unpaired enter mid-trace"),
        }
    }
}

/// Normalizes a trace by substituting each concrete raw pid value with one that matches
/// its ordinal of appearance in the trace.
#[derive(Default)]
struct Normalizer {
    map: HashMap<Pid, Pid>,
}

impl Normalizer {
    pub fn normalize(trace: &[Step]) -> Vec<Step> {
        let mut normalizer = Normalizer::default();

        trace
            .iter()
            .map(|step| Step {
                pid: normalizer.normalize_pid(step.pid),
                ..step.clone()
            })
            .collect()
    }

    fn normalize_pid(&mut self, pid: Pid) -> Pid {
        // Avoid borrowck error in `default` fn.
        let next_free = self.map.len();

        let entry = self.map.entry(pid).or_insert_with(|| {
            let raw: i32 = next_free.try_into().expect("exhausted free test PIDs");
            Pid::from_raw(raw)
        });

        *entry
    }
}

#[allow(unused)]
pub fn stack_pointer() -> &'static str {
    match Arch::host() {
        Arch::X86_64 => "rsp",
        Arch::Aarch64 => "sp",
    }
}
