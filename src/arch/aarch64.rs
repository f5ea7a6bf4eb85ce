//! aarch64 register layout and syscall ABI.

use super::SyscallRegisters;

/// Register set identifier for general-purpose registers.
///
/// Defined in [`include/uapi/linux/elf.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/include/uapi/linux/elf.h#421).
pub const NT_PRSTATUS: u32 = 0x1;

/// Field order of `struct user_pt_regs` in
/// [`arch/arm64/include/uapi/asm/ptrace.h`](https://android.googlesource.com/kernel/common/+/refs/heads/android-mainline/arch/arm64/include/uapi/asm/ptrace.h#88):
/// `regs[31]`, then `sp`, `pc`, `pstate`.
pub const REGISTERS: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12",
    "x13", "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24",
    "x25", "x26", "x27", "x28", "x29", "x30", "sp", "pc", "pstate",
];

pub const SYSCALL_REGISTERS: SyscallRegisters = SyscallRegisters {
    number: "x8",
    args: ["x0", "x1", "x2", "x3", "x4", "x5"],
    ret: "x0",
};

pub const INSTRUCTION_POINTER: &str = "pc";
