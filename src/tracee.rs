//! A handle on one traced task, and the requests we can make of it while it is stopped.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal;
use nix::sys::wait::WaitPidFlag;
use tracing::{debug, info, trace, warn};

use crate::arch::{Arch, RegisterTransfer, WORD_SIZE};
use crate::breakpoint::{Breakpoint, Breakpoints};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::maps::{self, Mapping};
use crate::memory::{Memory, WordIo};
use crate::regs::{self, Registers};
use crate::seccomp::{self, SeccompMetadata, SockFilter};
use crate::sys::{self, Request};
use crate::syscall::{SyscallInfo, SyscallTable};
use crate::{Options, Pid, Signal};

/// Extra signal info, such as its cause.
pub type Siginfo = libc::siginfo_t;

fn signal_data(sig: Option<Signal>) -> u64 {
    sig.map(|s| s as i32 as u64).unwrap_or(0)
}

/// Word access to tracee memory via `PTRACE_PEEKDATA` and `PTRACE_POKEDATA`.
#[derive(Clone, Copy, Debug)]
pub struct PtraceWords {
    pid: Pid,
}

impl WordIo for PtraceWords {
    fn peek_word(&self, addr: u64) -> Result<u64> {
        // SAFETY: `PTRACE_PEEKDATA` reads tracee memory and returns the word by value.
        let word = unsafe { sys::control(Request::PeekData, self.pid, addr, 0)? };
        Ok(word as u64)
    }

    fn poke_word(&mut self, addr: u64, word: u64) -> Result<()> {
        // SAFETY: `PTRACE_POKEDATA` writes `word` by value into tracee memory.
        unsafe { sys::control(Request::PokeData, self.pid, addr, word)? };
        Ok(())
    }
}

/// A traced task.
///
/// **Warning:** the underlying task is not guaranteed to exist. Any request may fail
/// with [`Error::NoSuchProcess`] if it was killed since it was last seen to stop.
#[derive(Debug)]
pub struct Tracee {
    pid: Pid,
    arch: Arch,
    breakpoints: Breakpoints,

    #[doc(hidden)]
    _not_send: PhantomData<*const ()>,
}

impl Tracee {
    /// Wrap a pid we already trace, e.g. a child auto-attached via a fork-like event.
    pub fn from_traced(arch: Arch, pid: Pid) -> Self {
        let breakpoints = Breakpoints::new();
        let _not_send = PhantomData;

        Self { pid, arch, breakpoints, _not_send }
    }

    /// Spawn `cmd` as a tracee, returning once it has stopped after its `execve()`.
    ///
    /// The child requests `PTRACE_TRACEME` after `fork()` and before `exec()`, so no
    /// events are missed. Non-empty `options` are applied at the first stop.
    pub fn spawn(arch: Arch, cmd: Command, options: Options) -> Result<Self> {
        Self::spawn_with_options_bits(arch, cmd, options.bits())
    }

    fn spawn_with_options_bits(arch: Arch, mut cmd: Command, options: libc::c_int) -> Result<Self> {
        // On fork, request `PTRACE_TRACEME`.
        unsafe {
            cmd.pre_exec(|| ptrace::traceme().map_err(|err| io::Error::from_raw_os_error(err as i32)))
        };

        let child = cmd.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        info!(pid = pid.as_raw(), "spawned tracee");

        let mut tracee = Self::from_traced(arch, pid);

        // The self-attached child is stopped by the `SIGTRAP` sent on `execve()`.
        if let Err(err) = tracee.await_first_stop("initial stop", options) {
            if !matches!(err, Error::ProtocolViolation { .. }) {
                tracee.kill_spawned();
            }
            return Err(err);
        }

        Ok(tracee)
    }

    /// Attach to a running process, returning once it has stopped.
    pub fn attach(arch: Arch, pid: Pid, options: Options) -> Result<Self> {
        Self::attach_with_options_bits(arch, pid, options.bits())
    }

    fn attach_with_options_bits(arch: Arch, pid: Pid, options: libc::c_int) -> Result<Self> {
        // SAFETY: `PTRACE_ATTACH` ignores `addr` and `data`.
        unsafe { sys::control(Request::Attach, pid, 0, 0)? };
        info!(pid = pid.as_raw(), "attached to tracee");

        let mut tracee = Self::from_traced(arch, pid);

        if let Err(err) = tracee.await_first_stop("attach-stop", options) {
            if !matches!(err, Error::ProtocolViolation { .. }) {
                if let Err(err) = tracee.detach(None) {
                    warn!(pid = pid.as_raw(), %err, "unable to detach tracee");
                }
            }
            return Err(err);
        }

        Ok(tracee)
    }

    // Wait for the stop which follows spawning or attaching, then apply any options.
    //
    // Fails with `ProtocolViolation` if the task terminated instead, and has then been
    // reaped.
    fn await_first_stop(&mut self, expected: &str, options: libc::c_int) -> Result<()> {
        let event = self.wait()?;
        if !event.is_stopped() {
            return Err(Error::ProtocolViolation {
                pid: self.pid,
                reason: format!("expected {expected}, got: {event}"),
            });
        }

        if options != 0 {
            self.set_options_bits(options)?;
        }

        Ok(())
    }

    // Kill and reap a child we failed to finish spawning.
    fn kill_spawned(&self) {
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) => {},
            Err(Errno::ESRCH) => return,
            Err(err) => {
                warn!(pid = self.pid.as_raw(), %err, "unable to kill spawned tracee");
                return;
            },
        }

        if let Err(err) = self.wait() {
            warn!(pid = self.pid.as_raw(), %err, "unable to reap spawned tracee");
        }
    }

    /// Seize a running process without stopping it.
    pub fn seize(arch: Arch, pid: Pid, options: Options) -> Result<Self> {
        let data = options.bits() as u32 as u64;

        // SAFETY: `PTRACE_SEIZE` takes the options by value in `data`.
        unsafe { sys::control(Request::Seize, pid, 0, data)? };
        info!(pid = pid.as_raw(), "seized tracee");

        Ok(Self::from_traced(arch, pid))
    }

    /// Wait for any traced task to change state.
    ///
    /// Returns `None` only if `flags` contains `WNOHANG` and no task changed state.
    pub fn wait_any(flags: WaitPidFlag) -> Result<Option<Event>> {
        let (pid, status) = sys::wait(Pid::from_raw(-1), flags)?;

        if pid.as_raw() == 0 {
            return Ok(None);
        }

        let event = Event::new(pid, status);
        trace!(pid = pid.as_raw(), %event, "wait");

        Ok(Some(event))
    }

    /// Block until this tracee changes state.
    pub fn wait(&self) -> Result<Event> {
        let (pid, status) = sys::wait(self.pid, WaitPidFlag::__WALL)?;
        let event = Event::new(pid, status);
        trace!(pid = pid.as_raw(), %event, "wait");

        Ok(event)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    fn resume(&mut self, request: Request, sig: Option<Signal>) -> Result<&mut Self> {
        trace!(pid = self.pid.as_raw(), %request, ?sig, "resuming tracee");

        // SAFETY: restart requests take the signal to deliver by value in `data`.
        unsafe { sys::control(request, self.pid, 0, signal_data(sig))? };
        Ok(self)
    }

    /// Resume, delivering `sig` if given.
    pub fn cont(&mut self, sig: impl Into<Option<Signal>>) -> Result<&mut Self> {
        self.resume(Request::Cont, sig.into())
    }

    /// Resume until the next syscall-stop.
    pub fn syscall(&mut self, sig: impl Into<Option<Signal>>) -> Result<&mut Self> {
        self.resume(Request::Syscall, sig.into())
    }

    /// Resume for a single instruction.
    pub fn step(&mut self, sig: impl Into<Option<Signal>>) -> Result<&mut Self> {
        self.resume(Request::SingleStep, sig.into())
    }

    /// Stop tracing, resuming the task and delivering `sig` if given.
    pub fn detach(&mut self, sig: impl Into<Option<Signal>>) -> Result<&mut Self> {
        self.resume(Request::Detach, sig.into())?;
        info!(pid = self.pid.as_raw(), "detached from tracee");

        Ok(self)
    }

    /// Stop a seized tracee.
    pub fn interrupt(&mut self) -> Result<&mut Self> {
        self.resume(Request::Interrupt, None)
    }

    /// Restart a seized tracee in group-stop, without resuming it.
    pub fn listen(&mut self) -> Result<&mut Self> {
        self.resume(Request::Listen, None)
    }

    pub fn kill(&mut self) -> Result<&mut Self> {
        self.resume(Request::Kill, None)
    }

    /// Set tracing options.
    pub fn set_options(&mut self, options: Options) -> Result<()> {
        self.set_options_bits(options.bits())
    }

    /// Set tracing options from raw bits, for bits such as
    /// [`PTRACE_O_SUSPEND_SECCOMP`](sys::PTRACE_O_SUSPEND_SECCOMP) that `Options`
    /// does not model.
    pub fn set_options_bits(&mut self, bits: libc::c_int) -> Result<()> {
        debug!(pid = self.pid.as_raw(), options = bits, "setting tracee options");

        // SAFETY: `PTRACE_SETOPTIONS` takes the options by value in `data`.
        unsafe { sys::control(Request::SetOptions, self.pid, 0, bits as u32 as u64)? };
        Ok(())
    }

    pub fn registers(&self) -> Result<Registers> {
        let size = self.arch.register_block_size();

        // Word-typed, so the kernel fills an aligned register block.
        let mut block = vec![0u64; size / WORD_SIZE];
        let base = block.as_mut_ptr() as u64;

        match self.arch.register_transfer() {
            RegisterTransfer::Direct => {
                // SAFETY: `block` is a live buffer of the size of the register block.
                unsafe { sys::control(Request::GetRegs, self.pid, 0, base)? };
            },
            RegisterTransfer::Regset { note } => {
                let mut iov = regs::pack_iovec(base, size as u64);
                let iov_ptr = iov.as_mut_ptr() as u64;

                // SAFETY: `iov` describes `block`, and both outlive the call.
                unsafe { sys::control(Request::GetRegSet, self.pid, note as u64, iov_ptr)? };

                // The kernel shrinks `iov_len` to the size it actually wrote.
                let (_, len) = regs::unpack_iovec(&iov)?;
                if len as usize != size {
                    return Err(Error::ProtocolViolation {
                        pid: self.pid,
                        reason: format!("register set is {len} bytes, expected {size}"),
                    });
                }
            },
        }

        let bytes: Vec<u8> = block.iter().flat_map(|w| w.to_le_bytes()).collect();
        Registers::decode(self.arch, &bytes)
    }

    pub fn set_registers(&mut self, regs: &Registers) -> Result<()> {
        if regs.arch() != self.arch {
            return Err(Error::Input(format!(
                "cannot set {} registers on {} tracee",
                regs.arch(),
                self.arch,
            )));
        }

        self.write_register_block(&regs.encode())
    }

    /// Overwrite only the named registers, keeping the current value of all others.
    pub fn update_registers(&mut self, updates: &BTreeMap<&str, u64>) -> Result<()> {
        let current = self.registers()?;
        let block = regs::encode_with(&current, updates)?;
        self.write_register_block(&block)
    }

    fn write_register_block(&mut self, bytes: &[u8]) -> Result<()> {
        let mut block: Vec<u64> = bytes
            .chunks(WORD_SIZE)
            .map(|word| {
                let mut raw = [0; WORD_SIZE];
                raw[..word.len()].copy_from_slice(word);
                u64::from_le_bytes(raw)
            })
            .collect();

        let size = block.len() * WORD_SIZE;
        let base = block.as_mut_ptr() as u64;

        match self.arch.register_transfer() {
            RegisterTransfer::Direct => {
                // SAFETY: `block` is a live buffer of the size of the register block.
                unsafe { sys::control(Request::SetRegs, self.pid, 0, base)? };
            },
            RegisterTransfer::Regset { note } => {
                let mut iov = regs::pack_iovec(base, size as u64);
                let iov_ptr = iov.as_mut_ptr() as u64;

                // SAFETY: `iov` describes `block`, and both outlive the call.
                unsafe { sys::control(Request::SetRegSet, self.pid, note as u64, iov_ptr)? };
            },
        }

        Ok(())
    }

    pub fn register(&self, name: &str) -> Result<u64> {
        self.registers()?
            .get(name)
            .ok_or_else(|| Error::Input(format!("no register `{name}` on {}", self.arch)))
    }

    pub fn set_register(&mut self, name: &str, value: u64) -> Result<()> {
        let regs = self.registers()?.with_updates(Some((name, value)))?;
        self.set_registers(&regs)
    }

    /// Read one general-purpose register from the virtual `user` area, without
    /// transferring the whole register block.
    #[cfg(target_arch = "x86_64")]
    pub fn peek_user_register(&self, name: &str) -> Result<u64> {
        use crate::arch::x86_64::user_offset;

        if self.arch != Arch::X86_64 {
            return Err(Error::UnsupportedArchitecture { arch: self.arch, operation: "PTRACE_PEEKUSER" });
        }

        let index = self
            .arch
            .register_index(name)
            .ok_or_else(|| Error::Input(format!("no register `{name}` on {}", self.arch)))?;

        // SAFETY: the `user` offset is not used as a pointer by the kernel, and the
        // word is returned by value.
        let word = unsafe { sys::control(Request::PeekUser, self.pid, user_offset(index), 0)? };
        Ok(word as u64)
    }

    pub fn memory(&self) -> Memory<PtraceWords> {
        Memory::new(PtraceWords { pid: self.pid })
    }

    /// The syscall at the current syscall-stop, with its argument register values.
    pub fn syscall_state(&self) -> Result<(SyscallInfo, [u64; 6])> {
        let regs = self.registers()?;
        Ok((self.syscall_info(&regs)?, self.args_of(&regs)?))
    }

    pub fn current_syscall(&self) -> Result<SyscallInfo> {
        self.syscall_info(&self.registers()?)
    }

    pub fn syscall_args(&self) -> Result<[u64; 6]> {
        self.args_of(&self.registers()?)
    }

    /// The return value of the syscall at the current syscall-exit-stop.
    pub fn syscall_return(&self) -> Result<i64> {
        let ret = self.arch.syscall_registers().ret;
        Ok(self.register(ret)? as i64)
    }

    fn syscall_info(&self, regs: &Registers) -> Result<SyscallInfo> {
        let name = self.arch.syscall_registers().number;
        let number = match regs.get(name) {
            Some(number) => number,
            None => internal_error!("syscall number register missing from register block"),
        };

        Ok(SyscallTable::for_arch(self.arch).lookup(number))
    }

    fn args_of(&self, regs: &Registers) -> Result<[u64; 6]> {
        let mut args = [0; 6];

        for (arg, name) in args.iter_mut().zip(self.arch.syscall_registers().args.iter()) {
            *arg = match regs.get(name) {
                Some(value) => value,
                None => internal_error!("syscall argument register missing from register block"),
            };
        }

        Ok(args)
    }

    /// The message of the most recent ptrace-event-stop, e.g. the pid of a new child
    /// after a fork-like event.
    pub fn event_message(&self) -> Result<u64> {
        let mut msg: libc::c_ulong = 0;
        let ptr = &mut msg as *mut libc::c_ulong as u64;

        // SAFETY: `msg` is a live `unsigned long`, as `PTRACE_GETEVENTMSG` expects.
        unsafe { sys::control(Request::GetEventMsg, self.pid, 0, ptr)? };

        Ok(msg as u64)
    }

    pub fn siginfo(&self) -> Result<Siginfo> {
        // SAFETY: `siginfo_t` is plain data, for which all-zero is a valid value.
        let mut info: Siginfo = unsafe { std::mem::zeroed() };
        let ptr = &mut info as *mut Siginfo as u64;

        // SAFETY: `info` is a live `siginfo_t`, as `PTRACE_GETSIGINFO` expects.
        unsafe { sys::control(Request::GetSigInfo, self.pid, 0, ptr)? };

        Ok(info)
    }

    /// Check if a signal stop is a group-stop rather than a signal-delivery-stop.
    ///
    /// Assumes an attach-stop has already been ruled out.
    pub fn is_group_stop(&self, event: &Event) -> Result<bool> {
        use Signal::*;

        match event.delivered_signal() {
            Some(SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU) => {
                // Only the four stopping signals can cause a group-stop, which is then
                // known for certain if `PTRACE_GETSIGINFO` fails with `EINVAL`.
                match self.siginfo() {
                    Err(Error::InvalidArgument { .. }) => Ok(true),
                    Err(err) => Err(err),
                    Ok(_) => Ok(false),
                }
            },
            _ => Ok(false),
        }
    }

    pub fn mappings(&self) -> Result<Vec<Mapping>> {
        let content = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        maps::parse(&content)
    }

    pub fn readable_mappings(&self) -> Result<Vec<Mapping>> {
        let mut mappings = self.mappings()?;
        mappings.retain(Mapping::readable);
        Ok(mappings)
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    pub fn install_breakpoint(&mut self, address: u64) -> Result<Breakpoint> {
        let mut memory = self.memory();
        self.breakpoints.install(self.arch, &mut memory, address)
    }

    pub fn remove_breakpoint(&mut self, address: u64) -> Result<Option<Breakpoint>> {
        let mut memory = self.memory();
        self.breakpoints.remove(&mut memory, address)
    }

    pub fn clear_breakpoints(&mut self) -> Result<usize> {
        let mut memory = self.memory();
        self.breakpoints.clear_all(&mut memory)
    }

    /// The breakpoint whose trap stopped the tracee, if any.
    pub fn current_breakpoint(&self) -> Result<Option<Breakpoint>> {
        if self.breakpoints.is_empty() {
            return Ok(None);
        }

        let ip = self.registers()?.instruction_pointer();
        Ok(self.breakpoints.hit(ip).copied())
    }

    /// Execute the instruction under the current breakpoint, then re-arm it.
    ///
    /// Returns the stop that followed the single-step.
    pub fn step_over_breakpoint(&mut self) -> Result<Event> {
        let mut regs = self.registers()?;

        let bp = match self.breakpoints.hit(regs.instruction_pointer()) {
            Some(bp) => *bp,
            None => return Err(Error::NoBreakpointHit { pid: self.pid }),
        };

        let mut memory = self.memory();
        self.breakpoints.unpatch(&mut memory, bp.address)?;

        regs.set_instruction_pointer(bp.address)?;
        self.set_registers(&regs)?;

        self.step(None)?;
        let event = self.wait()?;

        if event.is_terminated() {
            warn!(pid = self.pid.as_raw(), %event, "tracee terminated while stepping over breakpoint");
            return Ok(event);
        }

        self.breakpoints.repatch(self.arch, &mut memory, bp.address)?;

        Ok(event)
    }

    /// Metadata of the seccomp filter at `index`, counting back from the most recently
    /// installed filter.
    pub fn seccomp_metadata(&self, index: u64) -> Result<SeccompMetadata> {
        let mut raw = seccomp::pack_metadata(index, 0);
        let ptr = raw.as_mut_ptr() as u64;

        // SAFETY: `raw` is a live `struct seccomp_metadata`, whose size is passed in `addr`.
        unsafe { sys::control(Request::SeccompGetMetadata, self.pid, seccomp::METADATA_SIZE as u64, ptr)? };

        SeccompMetadata::unpack(&raw)
    }

    /// Dump the BPF program of the seccomp filter at `index`.
    pub fn seccomp_filter(&self, index: u64) -> Result<Vec<SockFilter>> {
        // SAFETY: with a null `data`, only the instruction count is returned.
        let count = unsafe { sys::control(Request::SeccompGetFilter, self.pid, index, 0)? };

        let count = usize::try_from(count)
            .map_err(|_| Error::Internal(format!("negative seccomp filter length: {count}")))?;

        if count == 0 {
            return Ok(vec![]);
        }

        let mut raw = vec![0u8; count * seccomp::INSTRUCTION_SIZE];
        let ptr = raw.as_mut_ptr() as u64;

        // SAFETY: `raw` has room for all `count` instructions of the filter.
        unsafe { sys::control(Request::SeccompGetFilter, self.pid, index, ptr)? };

        seccomp::decode_filter(&raw)
    }
}
