//! x86_64 register layout and syscall ABI.

use super::SyscallRegisters;

/// Field order of `struct user_regs_struct` in `arch/x86/include/asm/user_64.h`.
pub const REGISTERS: &[&str] = &[
    "r15", "r14", "r13", "r12", "rbp", "rbx", "r11", "r10", "r9", "r8", "rax", "rcx",
    "rdx", "rsi", "rdi", "orig_rax", "rip", "cs", "eflags", "rsp", "ss", "fs_base",
    "gs_base", "ds", "es", "fs", "gs",
];

pub const SYSCALL_REGISTERS: SyscallRegisters = SyscallRegisters {
    number: "orig_rax",
    args: ["rdi", "rsi", "rdx", "r10", "r8", "r9"],
    ret: "rax",
};

pub const INSTRUCTION_POINTER: &str = "rip";

/// `int3`.
pub const TRAP_OPCODE: u8 = 0xcc;

/// Return the `PTRACE_PEEKUSER` offset of the general-purpose register at `index` in
/// the virtual `user` struct.
#[cfg(target_arch = "x86_64")]
pub(crate) fn user_offset(index: usize) -> u64 {
    memoffset::offset_of!(libc::user, regs) as u64 + 8 * index as u64
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use super::*;

    macro_rules! assert_offset {
        ($field: ident) => {{
            let index = REGISTERS.iter().position(|&r| r == stringify!($field)).unwrap();
            let expected = memoffset::offset_of!(libc::user, regs)
                + memoffset::offset_of!(libc::user_regs_struct, $field);
            assert_eq!(user_offset(index), expected as u64, stringify!($field));
        }};
    }

    #[test]
    fn test_register_order_matches_libc() {
        assert_eq!(REGISTERS.len() * 8, std::mem::size_of::<libc::user_regs_struct>());

        assert_offset!(r15);
        assert_offset!(rbp);
        assert_offset!(rax);
        assert_offset!(rdi);
        assert_offset!(orig_rax);
        assert_offset!(rip);
        assert_offset!(eflags);
        assert_offset!(rsp);
        assert_offset!(fs_base);
        assert_offset!(gs);
    }
}
