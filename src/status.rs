//! Decoding of the raw status word returned by `waitpid(2)`.
//!
//! The bit layout of the low 16 bits of `status` is:
//!
//! ```text
//!   15                         8   7                     0
//!    +-------------------------+---+---------------------+
//!    |   exit code / stop sig  | c |    term sig / 0x7f  |
//!    +-------------------------+---+---------------------+
//! ```
//!
//! A low byte of `0x7f` means stopped, with the stopping signal in `status[15:8]`. The
//! whole word `0xffff` means continued. Otherwise a nonzero `status[6:0]` is the
//! terminating signal (with `c` flagging a core dump), and a zero `status[6:0]` is a
//! normal exit with code `status[15:8]`. Ptrace event codes sit above bit 16.

const STOPPED: i32 = 0x7f;
const CONTINUED: i32 = 0xffff;
const CORE_DUMP: i32 = 0x80;

fn low_bits(status: i32) -> i32 {
    status & 0x7f
}

pub fn exited(status: i32) -> bool {
    low_bits(status) == 0
}

pub fn exit_code(status: i32) -> i32 {
    (status >> 8) & 0xff
}

pub fn signaled(status: i32) -> bool {
    let sig = low_bits(status);
    sig != 0 && sig != STOPPED && !continued(status)
}

pub fn term_signal(status: i32) -> i32 {
    low_bits(status)
}

pub fn core_dumped(status: i32) -> bool {
    signaled(status) && status & CORE_DUMP != 0
}

pub fn stopped(status: i32) -> bool {
    status & 0xff == STOPPED
}

pub fn stop_signal(status: i32) -> i32 {
    (status >> 8) & 0xff
}

pub fn continued(status: i32) -> bool {
    status == CONTINUED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_every_byte() {
        for n in 0..=255 {
            let w = n << 8;
            assert!(exited(w));
            assert!(!signaled(w));
            assert!(!stopped(w));
            assert!(!continued(w));
            assert_eq!(exit_code(w), n);
        }
    }

    #[test]
    fn test_exited_42() {
        let w = 42 << 8;
        assert!(exited(w));
        assert_eq!(exit_code(w), 42);
    }

    #[test]
    fn test_agrees_with_libc() {
        let samples = [
            0,
            1 << 8,
            255 << 8,
            libc::SIGKILL,
            libc::SIGSEGV | CORE_DUMP,
            (libc::SIGSTOP << 8) | 0x7f,
            ((libc::SIGTRAP | 0x80) << 8) | 0x7f,
            (libc::PTRACE_EVENT_FORK << 16) | (libc::SIGTRAP << 8) | 0x7f,
            0xffff,
        ];

        for &w in &samples {
            assert_eq!(exited(w), libc::WIFEXITED(w), "{w:#x}");
            assert_eq!(signaled(w), libc::WIFSIGNALED(w), "{w:#x}");
            assert_eq!(stopped(w), libc::WIFSTOPPED(w), "{w:#x}");
            assert_eq!(continued(w), libc::WIFCONTINUED(w), "{w:#x}");

            if exited(w) {
                assert_eq!(exit_code(w), libc::WEXITSTATUS(w));
            }
            if signaled(w) {
                assert_eq!(term_signal(w), libc::WTERMSIG(w));
                assert_eq!(core_dumped(w), libc::WCOREDUMP(w));
            }
            if stopped(w) {
                assert_eq!(stop_signal(w), libc::WSTOPSIG(w));
            }
        }
    }

    #[test]
    fn test_exactly_one_state() {
        for w in [0, 3 << 8, libc::SIGTERM, libc::SIGABRT | CORE_DUMP, (libc::SIGCHLD << 8) | 0x7f, 0xffff] {
            let states = [exited(w), signaled(w), stopped(w), continued(w)];
            assert_eq!(states.iter().filter(|&&s| s).count(), 1, "{w:#x}");
        }
    }
}
