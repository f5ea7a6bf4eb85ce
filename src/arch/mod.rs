//! Per-architecture facts, collected in one value and passed explicitly.

use std::fmt;

pub mod aarch64;
pub mod x86_64;

/// Size in bytes of a machine word on every supported architecture.
pub const WORD_SIZE: usize = 8;

/// How the kernel transfers the general-purpose register block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RegisterTransfer {
    /// `PTRACE_GETREGS`/`PTRACE_SETREGS` with a pointer to the register block.
    Direct,

    /// `PTRACE_GETREGSET`/`PTRACE_SETREGSET` with a pointer to an `iovec` describing the
    /// register block, and the given register set identifier in `addr`.
    Regset { note: u32 },
}

/// Which registers hold the syscall number, its arguments, and its return value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyscallRegisters {
    pub number: &'static str,
    pub args: [&'static str; 6],
    pub ret: &'static str,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// The architecture this crate was compiled for.
    #[cfg(target_arch = "x86_64")]
    pub const fn host() -> Self {
        Arch::X86_64
    }

    /// The architecture this crate was compiled for.
    #[cfg(target_arch = "aarch64")]
    pub const fn host() -> Self {
        Arch::Aarch64
    }

    pub fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }

    /// General-purpose register names, in the order of the kernel's register block.
    pub fn register_names(self) -> &'static [&'static str] {
        match self {
            Arch::X86_64 => x86_64::REGISTERS,
            Arch::Aarch64 => aarch64::REGISTERS,
        }
    }

    pub fn register_index(self, name: &str) -> Option<usize> {
        self.register_names().iter().position(|&r| r == name)
    }

    /// Size in bytes of the general-purpose register block.
    pub fn register_block_size(self) -> usize {
        self.register_names().len() * WORD_SIZE
    }

    pub fn register_transfer(self) -> RegisterTransfer {
        match self {
            Arch::X86_64 => RegisterTransfer::Direct,
            Arch::Aarch64 => RegisterTransfer::Regset { note: aarch64::NT_PRSTATUS },
        }
    }

    pub fn syscall_registers(self) -> &'static SyscallRegisters {
        match self {
            Arch::X86_64 => &x86_64::SYSCALL_REGISTERS,
            Arch::Aarch64 => &aarch64::SYSCALL_REGISTERS,
        }
    }

    pub fn instruction_pointer(self) -> &'static str {
        match self {
            Arch::X86_64 => x86_64::INSTRUCTION_POINTER,
            Arch::Aarch64 => aarch64::INSTRUCTION_POINTER,
        }
    }

    /// The one-byte trap instruction used for software breakpoints, if supported.
    pub fn breakpoint_opcode(self) -> Option<u8> {
        match self {
            Arch::X86_64 => Some(x86_64::TRAP_OPCODE),
            Arch::Aarch64 => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes() {
        assert_eq!(Arch::X86_64.register_block_size(), 27 * 8);
        assert_eq!(Arch::Aarch64.register_block_size(), 34 * 8);
    }

    #[test]
    fn test_syscall_registers_are_known() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            let regs = arch.syscall_registers();
            assert!(arch.register_index(regs.number).is_some());
            assert!(arch.register_index(regs.ret).is_some());
            assert!(arch.register_index(arch.instruction_pointer()).is_some());

            for arg in regs.args {
                assert!(arch.register_index(arg).is_some(), "{arch}: {arg}");
            }
        }
    }

    #[test]
    fn test_transfer_conventions() {
        assert_eq!(Arch::X86_64.register_transfer(), RegisterTransfer::Direct);
        assert_eq!(Arch::Aarch64.register_transfer(), RegisterTransfer::Regset { note: 1 });
        assert_eq!(Arch::X86_64.breakpoint_opcode(), Some(0xcc));
        assert_eq!(Arch::Aarch64.breakpoint_opcode(), None);
    }
}
