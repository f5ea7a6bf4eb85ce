//! Event loops which drive tracees from syscall-stop to syscall-stop, pairing each
//! syscall's entry with its exit.
//!
//! A syscall-enter-stop is always followed by the matching syscall-exit-stop, a
//! ptrace-event-stop, or the death of the tracee. No other kind of ptrace-stop can occur
//! in between. Syscall-enter-stops and syscall-exit-stops are otherwise
//! indistinguishable, so we track the pending syscall of each tracee to tell them apart.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::ControlFlow;

use nix::errno::Errno;
use nix::sys::signal;
use nix::sys::wait::WaitPidFlag;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::{Memory, WordIo};
use crate::sys::Call;
use crate::syscall::{render_enter, render_exit, SyscallInfo};
use crate::tracee::Tracee;
use crate::{Arch, Event, Options, Pid, Signal};

/// Options used when following descendants.
pub const DEFAULT_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACESYSGOOD)
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEEXEC);

/// Options required to tell syscall-stops apart from signal-delivery-stops of `SIGTRAP`,
/// and to see `execve()` as a ptrace-event-stop.
pub const REQUIRED_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACESYSGOOD)
    .union(Options::PTRACE_O_TRACEEXEC);

const FOLLOW_OPTIONS: Options = Options::empty()
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACECLONE);

/// How to run a trace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TraceConfig {
    options: Options,
    follow: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            options: Options::empty(),
            follow: true,
        }
    }
}

impl TraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ptrace options applied to the root tracee, and inherited by its descendants.
    pub fn options(&self) -> Options {
        let options = self.options | REQUIRED_OPTIONS;

        if self.follow {
            options | FOLLOW_OPTIONS
        } else {
            // Auto-attached children would never be waited for.
            options - FOLLOW_OPTIONS
        }
    }

    /// Set the ptrace options applied to the root tracee.
    ///
    /// **NOTE:** [`REQUIRED_OPTIONS`] are always set. The fork-like event options are
    /// set when following descendants, and cleared otherwise.
    pub fn set_options(&mut self, options: Options) -> &mut Self {
        self.options = options;
        self
    }

    pub fn follow(&self) -> bool {
        self.follow
    }

    /// Follow tracees created by `fork()`, `vfork()`, and `clone()`.
    pub fn set_follow(&mut self, follow: bool) -> &mut Self {
        self.follow = follow;
        self
    }

    /// Run a trace of `root` with this configuration.
    pub fn run<F>(&self, root: Tracee, f: F) -> Result<()>
    where
        F: FnMut(&TraceEvent, &Tracee) -> Result<ControlFlow<()>>,
    {
        if self.follow {
            run_descendants(root, self.options(), f)
        } else {
            let mut root = root;
            run_single(&mut root, self.options(), f)
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    Enter,
    Exit,
}

/// One side of an observed syscall.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyscallEvent {
    pub pid: Pid,
    pub info: SyscallInfo,

    /// Argument register values, as captured at entry.
    pub args: [u64; 6],

    pub phase: Phase,

    /// Raw return value, set on exit.
    pub ret: Option<i64>,
}

impl SyscallEvent {
    pub fn enter(pid: Pid, info: SyscallInfo, args: [u64; 6]) -> Self {
        Self { pid, info, args, phase: Phase::Enter, ret: None }
    }

    /// The matching exit of an entered syscall.
    pub fn exit(self, ret: i64) -> Self {
        Self { phase: Phase::Exit, ret: Some(ret), ..self }
    }

    pub fn is_enter(&self) -> bool {
        self.phase == Phase::Enter
    }

    pub fn is_exit(&self) -> bool {
        self.phase == Phase::Exit
    }

    /// Render as e.g. `close(3) ...` on entry, or `close(3) = 0` on exit.
    pub fn render<W: WordIo>(&self, memory: &Memory<W>) -> String {
        match self.ret {
            Some(ret) => render_exit(&self.info, &self.args, ret, memory),
            None => render_enter(&self.info, &self.args, memory),
        }
    }
}

/// A seccomp filter returned `SECCOMP_RET_TRACE`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SeccompEvent {
    pub pid: Pid,
    pub info: SyscallInfo,

    /// The `SECCOMP_RET_DATA` part of the filter's return value.
    pub data: u32,

    /// Flags of the most recently installed filter. Empty if we lack the privilege
    /// to read them.
    pub flag_names: Vec<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TraceEvent {
    Syscall(SyscallEvent),
    Seccomp(SeccompEvent),
}

impl TraceEvent {
    pub fn pid(&self) -> Pid {
        match self {
            TraceEvent::Syscall(event) => event.pid,
            TraceEvent::Seccomp(event) => event.pid,
        }
    }
}

impl fmt::Display for SeccompEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seccomp: {} data = {:#x}", self.info.name, self.data)?;

        if !self.flag_names.is_empty() {
            write!(f, " [{}]", self.flag_names.join(", "))?;
        }

        Ok(())
    }
}

/// Trace the syscalls of a single tracee until it terminates, or `f` breaks.
///
/// The tracee must be stopped. Unless it terminates, it is detached on return, even
/// if `f` fails or panics.
pub fn trace_syscalls<F>(tracee: &mut Tracee, f: F) -> Result<()>
where
    F: FnMut(&TraceEvent, &Tracee) -> Result<ControlFlow<()>>,
{
    let mut config = TraceConfig::new();
    config.set_follow(false);

    run_single(tracee, config.options(), f)
}

/// Trace the syscalls of `root` and every descendant it creates, until they have all
/// terminated, or `f` breaks.
///
/// The root must be stopped. Every tracee still alive on return is detached, even if
/// `f` fails or panics.
pub fn trace_descendants<F>(root: Tracee, f: F) -> Result<()>
where
    F: FnMut(&TraceEvent, &Tracee) -> Result<ControlFlow<()>>,
{
    run_descendants(root, TraceConfig::new().options(), f)
}

/// Detaches the wrapped tracee on drop, unless it is known to have terminated.
struct DetachGuard<'a> {
    tracee: &'a mut Tracee,
    terminated: bool,
}

impl Drop for DetachGuard<'_> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }

        if let Err(err) = self.tracee.detach(None) {
            if !err.tracee_died() {
                warn!(pid = self.tracee.pid().as_raw(), %err, "unable to detach tracee");
            }
        }
    }
}

fn run_single<F>(tracee: &mut Tracee, options: Options, mut f: F) -> Result<()>
where
    F: FnMut(&TraceEvent, &Tracee) -> Result<ControlFlow<()>>,
{
    let mut guard = DetachGuard { tracee, terminated: false };
    guard.tracee.set_options(options)?;

    let mut pending: Option<SyscallEvent> = None;
    let mut sig: Option<Signal> = None;

    loop {
        guard.tracee.syscall(sig.take())?;

        let event = guard.tracee.wait()?;
        if event.is_terminated() {
            debug!(pid = event.pid.as_raw(), %event, "tracee terminated");
            guard.terminated = true;
            return Ok(());
        }

        let tracee = &*guard.tracee;

        let trace_event = if event.is_syscall_stop() {
            let syscall = match pending.take() {
                None => {
                    let (info, args) = tracee.syscall_state()?;
                    let enter = SyscallEvent::enter(tracee.pid(), info, args);
                    pending = Some(enter.clone());
                    enter
                },
                Some(enter) => enter.exit(tracee.syscall_return()?),
            };
            Some(TraceEvent::Syscall(syscall))
        } else if event.is_seccomp() {
            Some(TraceEvent::Seccomp(seccomp_event(tracee)?))
        } else {
            sig = signal_to_deliver(tracee, &event)?;
            None
        };

        if let Some(trace_event) = trace_event {
            if f(&trace_event, tracee)?.is_break() {
                return Ok(());
            }
        }
    }
}

fn seccomp_event(tracee: &Tracee) -> Result<SeccompEvent> {
    // The filter return data is the low 32 bits of the event message.
    let data = tracee.event_message()? as u32;
    let info = tracee.current_syscall()?;

    let flag_names = match tracee.seccomp_metadata(0) {
        Ok(metadata) => metadata.flag_names(),
        Err(err) => {
            debug!(pid = tracee.pid().as_raw(), %err, "unable to read seccomp metadata");
            vec![]
        },
    };

    Ok(SeccompEvent { pid: tracee.pid(), info, data, flag_names })
}

// The signal to pass on when restarting from a stop that is not a syscall-stop.
fn signal_to_deliver(tracee: &Tracee, event: &Event) -> Result<Option<Signal>> {
    match event.delivered_signal() {
        Some(sig) if tracee.is_group_stop(event)? => {
            debug!(pid = event.pid.as_raw(), ?sig, "group-stop");
            Ok(None)
        },
        sig => Ok(sig),
    }
}

/// State of a trace of a tree of processes.
///
/// Dropping the session detaches every tracee it still tracks.
struct Session {
    arch: Arch,
    tracees: HashMap<Pid, Tracee>,

    /// Entered syscalls, awaiting their exit.
    pending: HashMap<Pid, SyscallEvent>,

    /// New tracees whose attach-stop we have yet to see.
    attaching: HashSet<Pid>,

    /// The tracee in ptrace-stop which we have not yet restarted.
    stopped: Option<Pid>,
}

impl Session {
    fn new(root: Tracee) -> Self {
        let arch = root.arch();
        let stopped = Some(root.pid());

        let mut tracees = HashMap::new();
        tracees.insert(root.pid(), root);

        Self {
            arch,
            tracees,
            pending: HashMap::new(),
            attaching: HashSet::new(),
            stopped,
        }
    }

    fn forget(&mut self, pid: Pid) {
        info!(pid = pid.as_raw(), "removing tracee");

        self.tracees.remove(&pid);
        self.pending.remove(&pid);
        self.attaching.remove(&pid);

        if self.stopped == Some(pid) {
            self.stopped = None;
        }
    }

    // Register a stopped pid we have not seen a fork-like event for.
    //
    // We may see an attach-stop out-of-order, before the ptrace-event-stop which would
    // otherwise have us mark it as attaching.
    fn adopt(&mut self, pid: Pid) {
        info!(pid = pid.as_raw(), "adopting new tracee");

        self.tracees.insert(pid, Tracee::from_traced(self.arch, pid));
        self.attaching.insert(pid);
    }

    // Restart a stopped tracee to its next syscall-stop.
    //
    // If it has vanished, it is forgotten instead.
    fn resume(&mut self, pid: Pid, sig: Option<Signal>) -> Result<()> {
        if self.stopped == Some(pid) {
            self.stopped = None;
        }

        let tracee = match self.tracees.get_mut(&pid) {
            Some(tracee) => tracee,
            None => return Ok(()),
        };

        match tracee.syscall(sig) {
            Ok(_) => Ok(()),
            Err(err) if err.tracee_died() => {
                debug!(pid = pid.as_raw(), "tracee vanished before restart");
                self.forget(pid);
                Ok(())
            },
            Err(err) => Err(err),
        }
    }

    fn tracee(&self, pid: Pid) -> Result<&Tracee> {
        self.tracees
            .get(&pid)
            .ok_or_else(|| Error::Internal(format!("no tracee for pid = {pid}")))
    }

    fn on_syscall_stop(&mut self, pid: Pid) -> Result<SyscallEvent> {
        let event = match self.pending.remove(&pid) {
            None => {
                let (info, args) = self.tracee(pid)?.syscall_state()?;
                let enter = SyscallEvent::enter(pid, info, args);
                self.pending.insert(pid, enter.clone());
                enter
            },
            Some(enter) => enter.exit(self.tracee(pid)?.syscall_return()?),
        };

        Ok(event)
    }

    // A handle on the child announced by a fork-like event, or `None` if it was already
    // adopted at its attach-stop, in which case its state is kept.
    fn new_child(&mut self, child: Pid) -> Option<Tracee> {
        if self.tracees.contains_key(&child) {
            return None;
        }

        // Left over from an earlier task with the same pid.
        self.pending.remove(&child);

        Some(Tracee::from_traced(self.arch, child))
    }

    fn on_fork(&mut self, pid: Pid) -> Result<()> {
        let child = Pid::from_raw(self.tracee(pid)?.event_message()? as i32);

        let mut tracee = match self.new_child(child) {
            Some(tracee) => tracee,
            None => {
                debug!(pid = pid.as_raw(), child = child.as_raw(), "fork-like event for known tracee");
                return Ok(());
            },
        };

        info!(pid = pid.as_raw(), child = child.as_raw(), "attaching to new tracee");

        // The child starts with a pending `SIGSTOP`. If it is already in its attach-stop,
        // restarting it here suppresses that stop. Otherwise it is not yet stopped, and
        // we will see and suppress the attach-stop later.
        match tracee.syscall(None) {
            Ok(_) => {},
            Err(err) if err.tracee_died() => {
                self.attaching.insert(child);
            },
            Err(err) => return Err(err),
        }

        self.tracees.insert(child, tracee);

        Ok(())
    }

    fn on_exec(&mut self, pid: Pid) -> Result<()> {
        let old = Pid::from_raw(self.tracee(pid)?.event_message()? as i32);

        if old != pid {
            // An `execve()` off the thread group leader. The exec'ing thread assumes the
            // tid of the leader, so its pending syscall moves with it.
            debug!(pid = pid.as_raw(), old = old.as_raw(), "exec off thread group leader");

            if let Some(enter) = self.pending.remove(&old) {
                self.pending.insert(pid, SyscallEvent { pid, ..enter });
            }

            self.tracees.remove(&old);
            self.attaching.remove(&old);
        }

        Ok(())
    }

    // Handle one stop, returning an event for the consumer, if any, and a signal to
    // deliver upon restart.
    fn on_stop(&mut self, event: &Event) -> Result<(Option<TraceEvent>, Option<Signal>)> {
        let pid = event.pid;

        if self.attaching.remove(&pid) && event.stop_signal() == Some(Signal::SIGSTOP as i32) {
            debug!(pid = pid.as_raw(), "suppressing attach-stop");
            return Ok((None, None));
        }

        if event.is_syscall_stop() {
            let syscall = self.on_syscall_stop(pid)?;
            return Ok((Some(TraceEvent::Syscall(syscall)), None));
        }

        if event.is_fork_like() {
            self.on_fork(pid)?;
        } else if event.is_exec() {
            self.on_exec(pid)?;
        } else if event.is_seccomp() {
            let seccomp = seccomp_event(self.tracee(pid)?)?;
            return Ok((Some(TraceEvent::Seccomp(seccomp)), None));
        } else if event.event_code() == 0 {
            let sig = signal_to_deliver(self.tracee(pid)?, event)?;
            return Ok((None, sig));
        }

        Ok((None, None))
    }

    // Stop a running tracee so it can be detached, then let it run again.
    fn release(tracee: &mut Tracee, stopped: bool) -> Result<()> {
        let pid = tracee.pid();

        if !stopped {
            signal::kill(pid, Signal::SIGSTOP)?;

            if tracee.wait()?.is_terminated() {
                return Ok(());
            }
        }

        tracee.detach(None)?;

        if !stopped {
            // The stop we waited for may not have been ours, so ours may still be pending.
            signal::kill(pid, Signal::SIGCONT)?;
        }

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let stopped = self.stopped;

        for (pid, tracee) in self.tracees.iter_mut() {
            match Session::release(tracee, stopped == Some(*pid)) {
                Ok(()) => {},
                Err(err) if err.tracee_died() => {},
                Err(Error::OS(Errno::ESRCH)) => {},
                Err(err) => warn!(pid = pid.as_raw(), %err, "unable to detach tracee"),
            }
        }
    }
}

fn run_descendants<F>(mut root: Tracee, options: Options, mut f: F) -> Result<()>
where
    F: FnMut(&TraceEvent, &Tracee) -> Result<ControlFlow<()>>,
{
    root.set_options(options)?;

    let root_pid = root.pid();
    let mut session = Session::new(root);
    session.resume(root_pid, None)?;

    while !session.tracees.is_empty() {
        // Only our own tracees, and not the children of other threads.
        let event = match Tracee::wait_any(WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(Error::Control { call: Call::Wait, errno: Errno::ECHILD, .. }) => {
                debug!("no traced children remain");
                break;
            },
            Err(err) => return Err(err),
        };

        let pid = event.pid;

        if event.is_terminated() {
            debug!(pid = pid.as_raw(), %event, "tracee terminated");
            session.forget(pid);
            continue;
        }

        if !event.is_stopped() {
            continue;
        }

        session.stopped = Some(pid);

        if !session.tracees.contains_key(&pid) {
            session.adopt(pid);
        }

        let (trace_event, sig) = match session.on_stop(&event) {
            Ok(handled) => handled,
            Err(err) if err.tracee_died() => {
                debug!(pid = pid.as_raw(), %err, "tracee vanished while stopped");
                session.forget(pid);
                continue;
            },
            Err(err) => return Err(err),
        };

        if let Some(trace_event) = trace_event {
            if f(&trace_event, session.tracee(pid)?)?.is_break() {
                return Ok(());
            }
        }

        session.resume(pid, sig)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::FakeWords;
    use crate::syscall::SyscallTable;

    #[test]
    fn test_config_options() {
        let config = TraceConfig::new();
        assert!(config.follow());
        assert_eq!(config.options(), DEFAULT_OPTIONS);

        let mut config = TraceConfig::new();
        config.set_follow(false).set_options(Options::PTRACE_O_TRACESECCOMP);

        let options = config.options();
        assert!(options.contains(REQUIRED_OPTIONS | Options::PTRACE_O_TRACESECCOMP));
        assert!(!options.intersects(FOLLOW_OPTIONS));

        // A single tracee never auto-attaches children, even if asked to.
        assert!(!TraceConfig::new().set_follow(false).options().intersects(FOLLOW_OPTIONS));

        let mut config = TraceConfig::new();
        config.set_options(Options::PTRACE_O_TRACEFORK).set_follow(false);
        assert_eq!(config.options(), REQUIRED_OPTIONS);
    }

    // Far above any `pid_max`, so signals sent on drop find no process.
    const UNUSED_PID: i32 = 0x3fff_0000;

    #[test]
    fn test_fork_event_keeps_adopted_child_state() {
        let root = Tracee::from_traced(Arch::host(), Pid::from_raw(UNUSED_PID));
        let mut session = Session::new(root);

        let info = SyscallTable::for_arch(Arch::host()).lookup_name("read").unwrap();

        // The child's attach-stop and first syscall-enter-stop came before the fork event.
        let child = Pid::from_raw(UNUSED_PID + 1);
        session.adopt(child);
        session.attaching.remove(&child);

        let enter = SyscallEvent::enter(child, info.clone(), [0, 0, 0, 0, 0, 0]);
        session.pending.insert(child, enter.clone());

        assert!(session.new_child(child).is_none());
        assert_eq!(session.pending.get(&child), Some(&enter));

        // Stale state of an unknown pid is dropped.
        let other = Pid::from_raw(UNUSED_PID + 2);
        session.pending.insert(other, SyscallEvent::enter(other, info, [0; 6]));

        let tracee = session.new_child(other).unwrap();
        assert_eq!(tracee.pid(), other);
        assert!(!session.pending.contains_key(&other));
    }

    #[test]
    fn test_syscall_event_phases() {
        let pid = Pid::from_raw(100);
        let info = SyscallTable::for_arch(Arch::X86_64).lookup_name("close").unwrap();
        let memory = Memory::new(FakeWords::default());

        let enter = SyscallEvent::enter(pid, info, [3, 0, 0, 0, 0, 0]);
        assert!(enter.is_enter());
        assert_eq!(enter.render(&memory), "close(3) ...");

        let exit = enter.exit(0);
        assert!(exit.is_exit());
        assert_eq!(exit.args[0], 3);
        assert_eq!(exit.render(&memory), "close(3) = 0");
        assert_eq!(TraceEvent::Syscall(exit).pid(), pid);
    }

    #[test]
    fn test_seccomp_event_display() {
        let info = SyscallTable::for_arch(Arch::X86_64).lookup_name("openat").unwrap();
        let event = SeccompEvent {
            pid: Pid::from_raw(1),
            info,
            data: 0x2a,
            flag_names: vec!["tsync".into(), "log".into()],
        };

        assert_eq!(event.to_string(), "seccomp: openat data = 0x2a [tsync, log]");
    }
}
