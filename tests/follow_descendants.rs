use std::collections::BTreeSet;
use std::ops::ControlFlow;

use anyhow::Result;
use ntest::timeout;
use pretty_assertions::assert_eq;
use tether::{trace_descendants, Arch, Error, TraceEvent, Tracee};

#[macro_use]
mod support;
use support::*;

#[test]
#[timeout(5000)]
fn test_follow_forked_child() -> Result<()> {
    let events = trace_command(&["sh", "-c", "true & wait"], true)?;

    let pids: BTreeSet<i32> = events.iter().map(|(e, _)| e.pid().as_raw()).collect();
    assert!(pids.len() >= 2, "pids: {pids:?}");

    // Every pid, including the forked child, ends in `exit_group()`.
    for steps in steps_by_pid(&events).values() {
        assert_paired(steps);
        assert_eq!(steps.last().map(|s| s.name.as_str()), Some("exit_group"));
    }

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_without_follow_sees_one_pid() -> Result<()> {
    let events = trace_command(&["sh", "-c", "true & wait"], false)?;

    let pids: BTreeSet<i32> = events.iter().map(|(e, _)| e.pid().as_raw()).collect();
    assert_eq!(pids.len(), 1);

    Ok(())
}

/// Trace `sh -c "sleep 0.3 & wait"`, stopping at the first syscall exit of the forked
/// child with `stop`. Returns the root's exit code, once it has run to completion.
fn stop_at_child_exit(stop: tether::Result<ControlFlow<()>>) -> Result<Option<i32>> {
    let root = spawn(&["sh", "-c", "sleep 0.3 & wait"])?;
    let root_pid = root.pid();

    let mut stop = Some(stop);
    let res = trace_descendants(root, |event, _| match event {
        TraceEvent::Syscall(syscall) if syscall.pid != root_pid && syscall.is_exit() => {
            stop.take().unwrap_or(Ok(ControlFlow::Continue(())))
        },
        _ => Ok(ControlFlow::Continue(())),
    });

    match res {
        Ok(()) | Err(Error::Input(_)) => {},
        Err(err) => return Err(err.into()),
    }
    assert!(stop.is_none(), "the child made no syscalls");

    // Detached, both the root and its still-running child finish without us.
    let root = Tracee::from_traced(Arch::host(), root_pid);
    Ok(root.wait()?.exit_code())
}

#[test]
#[timeout(5000)]
fn test_descendants_break_detaches_all() -> Result<()> {
    assert_eq!(stop_at_child_exit(Ok(ControlFlow::Break(())))?, Some(0));

    Ok(())
}

#[test]
#[timeout(5000)]
fn test_descendants_error_detaches_all() -> Result<()> {
    assert_eq!(stop_at_child_exit(Err(Error::Input("stop".into())))?, Some(0));

    Ok(())
}
