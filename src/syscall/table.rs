//! Per-architecture syscall number tables and argument templates.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use tracing::warn;

use super::{Arg, ArgType, SyscallInfo};
use crate::arch::Arch;

const SYSCALLS_X86_64: &str = include_str!("data/syscalls_x86_64.tsv");
const SYSCALLS_AARCH64: &str = include_str!("data/syscalls_aarch64.tsv");

lazy_static! {
    static ref X86_64: SyscallTable = SyscallTable::load(Arch::X86_64, SYSCALLS_X86_64);
    static ref AARCH64: SyscallTable = SyscallTable::load(Arch::Aarch64, SYSCALLS_AARCH64);
}

/// Syscall numbers and names for one architecture.
#[derive(Debug)]
pub struct SyscallTable {
    arch: Arch,
    by_number: BTreeMap<u64, &'static str>,
    by_name: HashMap<&'static str, u64>,
}

impl SyscallTable {
    pub fn for_arch(arch: Arch) -> &'static SyscallTable {
        match arch {
            Arch::X86_64 => &X86_64,
            Arch::Aarch64 => &AARCH64,
        }
    }

    // Each line is `<number>\t<name>`.
    fn load(arch: Arch, tsv: &'static str) -> Self {
        let mut by_number = BTreeMap::new();
        let mut by_name = HashMap::new();

        for line in tsv.split_terminator('\n') {
            let entry = line
                .split_once('\t')
                .and_then(|(number, name)| Some((number.parse::<u64>().ok()?, name)));

            match entry {
                Some((number, name)) => {
                    by_number.insert(number, name);
                    by_name.insert(name, number);
                },
                None => warn!(%arch, line, "skipping malformed syscall table line"),
            }
        }

        Self { arch, by_number, by_name }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    /// Look up a syscall by number. Unknown numbers yield a `syscall_<n>` placeholder.
    pub fn lookup(&self, number: u64) -> SyscallInfo {
        match self.by_number.get(&number) {
            Some(&name) => SyscallInfo {
                number,
                name: Cow::Borrowed(name),
                args: template(self.arch, name),
            },
            None => SyscallInfo::unknown(number),
        }
    }

    pub fn lookup_name(&self, name: &str) -> Option<SyscallInfo> {
        let &number = self.by_name.get(name)?;
        Some(self.lookup(number))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &'static str)> + '_ {
        self.by_number.iter().map(|(&n, &name)| (n, name))
    }
}

macro_rules! args {
    ($($name: ident: $ty: ident),* $(,)?) => {
        &[$(Arg { name: stringify!($name), ty: ArgType::$ty }),*]
    };
}

/// Argument names and types for well-known syscalls. Unlisted calls have no metadata.
fn template(arch: Arch, name: &str) -> &'static [Arg] {
    match name {
        "read" | "write" => args!(fd: Fd, buf: Buffer, count: Size),
        "pread64" | "pwrite64" => args!(fd: Fd, buf: Buffer, count: Size, offset: Int),
        "readv" | "writev" => args!(fd: Fd, iov: Pointer, iovcnt: Int),
        "open" => args!(pathname: Str, flags: Flags, mode: Mode),
        "openat" => args!(dirfd: Fd, pathname: Str, flags: Flags, mode: Mode),
        "openat2" => args!(dirfd: Fd, pathname: Str, how: Pointer, size: Size),
        "creat" => args!(pathname: Str, mode: Mode),
        "close" | "fsync" | "fdatasync" | "fchdir" | "dup" => args!(fd: Fd),
        "close_range" => args!(first: Fd, last: Fd, flags: Flags),
        "dup2" => args!(oldfd: Fd, newfd: Fd),
        "dup3" => args!(oldfd: Fd, newfd: Fd, flags: Flags),
        "stat" | "lstat" => args!(pathname: Str, statbuf: Pointer),
        "fstat" => args!(fd: Fd, statbuf: Pointer),
        "newfstatat" => args!(dirfd: Fd, pathname: Str, statbuf: Pointer, flags: Flags),
        "statx" => args!(dirfd: Fd, pathname: Str, flags: Flags, mask: Int, statxbuf: Pointer),
        "statfs" => args!(path: Str, buf: Pointer),
        "fstatfs" => args!(fd: Fd, buf: Pointer),
        "lseek" => args!(fd: Fd, offset: Int, whence: Int),
        "truncate" => args!(path: Str, length: Int),
        "ftruncate" => args!(fd: Fd, length: Int),
        "getdents64" => args!(fd: Fd, dirp: Buffer, count: Size),
        "getcwd" => args!(buf: Buffer, size: Size),
        "chdir" | "rmdir" | "unlink" => args!(pathname: Str),
        "mkdir" | "chmod" => args!(pathname: Str, mode: Mode),
        "mkdirat" | "fchmodat" => args!(dirfd: Fd, pathname: Str, mode: Mode),
        "fchmod" => args!(fd: Fd, mode: Mode),
        "umask" => args!(mask: Mode),
        "unlinkat" => args!(dirfd: Fd, pathname: Str, flags: Flags),
        "rename" | "link" | "symlink" => args!(oldpath: Str, newpath: Str),
        "renameat" => args!(olddirfd: Fd, oldpath: Str, newdirfd: Fd, newpath: Str),
        "linkat" => args!(olddirfd: Fd, oldpath: Str, newdirfd: Fd, newpath: Str, flags: Flags),
        "symlinkat" => args!(target: Str, newdirfd: Fd, linkpath: Str),
        "readlink" => args!(pathname: Str, buf: Buffer, bufsiz: Size),
        "readlinkat" => args!(dirfd: Fd, pathname: Str, buf: Buffer, bufsiz: Size),
        "access" => args!(pathname: Str, mode: Int),
        "faccessat" => args!(dirfd: Fd, pathname: Str, mode: Int),
        "faccessat2" => args!(dirfd: Fd, pathname: Str, mode: Int, flags: Flags),
        "pipe" => args!(pipefd: Pointer),
        "pipe2" => args!(pipefd: Pointer, flags: Flags),
        "ioctl" => args!(fd: Fd, request: Flags, arg: Pointer),
        "fcntl" => args!(fd: Fd, cmd: Int, arg: Int),
        "flock" => args!(fd: Fd, operation: Int),
        "sendfile" => args!(out_fd: Fd, in_fd: Fd, offset: Pointer, count: Size),
        "mmap" => args!(addr: Pointer, length: Size, prot: Flags, flags: Flags, fd: Fd, offset: Int),
        "mprotect" => args!(addr: Pointer, len: Size, prot: Flags),
        "munmap" => args!(addr: Pointer, length: Size),
        "mremap" => args!(old_address: Pointer, old_size: Size, new_size: Size, flags: Flags, new_address: Pointer),
        "madvise" => args!(addr: Pointer, length: Size, advice: Int),
        "brk" => args!(addr: Pointer),
        "rt_sigaction" => args!(signum: Int, act: Pointer, oldact: Pointer, sigsetsize: Size),
        "rt_sigprocmask" => args!(how: Int, set: Pointer, oldset: Pointer, sigsetsize: Size),
        "sigaltstack" => args!(ss: Pointer, old_ss: Pointer),
        "nanosleep" => args!(req: Pointer, rem: Pointer),
        "clock_gettime" | "clock_getres" => args!(clockid: Int, tp: Pointer),
        "clock_nanosleep" => args!(clockid: Int, flags: Flags, request: Pointer, remain: Pointer),
        "poll" => args!(fds: Pointer, nfds: Int, timeout: Int),
        "ppoll" => args!(fds: Pointer, nfds: Int, tmo_p: Pointer, sigmask: Pointer, sigsetsize: Size),
        "epoll_create1" => args!(flags: Flags),
        "epoll_ctl" => args!(epfd: Fd, op: Int, fd: Fd, event: Pointer),
        "epoll_wait" => args!(epfd: Fd, events: Pointer, maxevents: Int, timeout: Int),
        "eventfd2" => args!(initval: Int, flags: Flags),
        "socket" => args!(domain: Int, sock_type: Int, protocol: Int),
        "socketpair" => args!(domain: Int, sock_type: Int, protocol: Int, sv: Pointer),
        "connect" | "bind" => args!(sockfd: Fd, addr: Pointer, addrlen: Size),
        "accept" => args!(sockfd: Fd, addr: Pointer, addrlen: Pointer),
        "accept4" => args!(sockfd: Fd, addr: Pointer, addrlen: Pointer, flags: Flags),
        "listen" => args!(sockfd: Fd, backlog: Int),
        "shutdown" => args!(sockfd: Fd, how: Int),
        "sendto" => args!(sockfd: Fd, buf: Buffer, len: Size, flags: Flags, dest_addr: Pointer, addrlen: Size),
        "recvfrom" => args!(sockfd: Fd, buf: Buffer, len: Size, flags: Flags, src_addr: Pointer, addrlen: Pointer),
        "sendmsg" | "recvmsg" => args!(sockfd: Fd, msg: Pointer, flags: Flags),
        "setsockopt" => args!(sockfd: Fd, level: Int, optname: Int, optval: Pointer, optlen: Size),
        "getsockopt" => args!(sockfd: Fd, level: Int, optname: Int, optval: Pointer, optlen: Pointer),
        "clone" => match arch {
            Arch::X86_64 => args!(flags: Flags, stack: Pointer, parent_tid: Pointer, child_tid: Pointer, tls: Pointer),
            Arch::Aarch64 => args!(flags: Flags, stack: Pointer, parent_tid: Pointer, tls: Pointer, child_tid: Pointer),
        },
        "clone3" => args!(cl_args: Pointer, size: Size),
        "execve" => args!(pathname: Str, argv: Pointer, envp: Pointer),
        "execveat" => args!(dirfd: Fd, pathname: Str, argv: Pointer, envp: Pointer, flags: Flags),
        "exit" | "exit_group" => args!(status: Int),
        "wait4" => args!(pid: Pid, wstatus: Pointer, options: Flags, rusage: Pointer),
        "waitid" => args!(idtype: Int, id: Pid, infop: Pointer, options: Flags, rusage: Pointer),
        "kill" => args!(pid: Pid, sig: Int),
        "tkill" => args!(tid: Pid, sig: Int),
        "tgkill" => args!(tgid: Pid, tid: Pid, sig: Int),
        "setpgid" => args!(pid: Pid, pgid: Pid),
        "getpgid" | "getsid" => args!(pid: Pid),
        "pidfd_open" => args!(pid: Pid, flags: Flags),
        "uname" => args!(buf: Pointer),
        "sysinfo" => args!(info: Pointer),
        "set_tid_address" => args!(tidptr: Pointer),
        "set_robust_list" => args!(head: Pointer, len: Size),
        "arch_prctl" => args!(code: Int, addr: Pointer),
        "prctl" => args!(option: Int, arg2: Int, arg3: Int, arg4: Int, arg5: Int),
        "prlimit64" => args!(pid: Pid, resource: Int, new_limit: Pointer, old_limit: Pointer),
        "getrandom" => args!(buf: Buffer, buflen: Size, flags: Flags),
        "futex" => args!(uaddr: Pointer, futex_op: Int, val: Int, timeout: Pointer, uaddr2: Pointer, val3: Int),
        "rseq" => args!(rseq: Pointer, rseq_len: Size, flags: Flags, sig: Int),
        "ptrace" => args!(request: Int, pid: Pid, addr: Pointer, data: Pointer),
        "seccomp" => args!(operation: Int, flags: Flags, args: Pointer),
        "memfd_create" => args!(name: Str, flags: Flags),
        _ => &[],
    }
}
