//! Seccomp filter metadata and classic BPF instruction decoding.

use std::convert::TryInto;
use std::fmt;

use crate::error::{Error, Result};

/// Size of `struct seccomp_metadata`.
pub const METADATA_SIZE: usize = 16;

/// Size of `struct sock_filter`.
pub const INSTRUCTION_SIZE: usize = 8;

/// Filter flags, in ascending bit order. Defined in `include/uapi/linux/seccomp.h`.
const FLAG_NAMES: &[(u64, &str)] = &[
    (1 << 0, "tsync"),
    (1 << 1, "log"),
    (1 << 2, "spec_allow"),
    (1 << 3, "new_listener"),
    (1 << 4, "tsync_esrch"),
];

/// `struct seccomp_metadata`, as read by `PTRACE_SECCOMP_GET_METADATA`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SeccompMetadata {
    /// Index of the filter to query, counting back from the most recently installed.
    pub filter_off: u64,
    pub flags: u64,
}

impl SeccompMetadata {
    pub fn pack(&self) -> [u8; METADATA_SIZE] {
        pack_metadata(self.filter_off, self.flags)
    }

    pub fn unpack(raw: &[u8]) -> Result<Self> {
        let (filter_off, flags) = unpack_metadata(raw)?;
        Ok(Self { filter_off, flags })
    }

    pub fn flag_names(&self) -> Vec<String> {
        flag_names(self.flags)
    }
}

pub fn pack_metadata(filter_off: u64, flags: u64) -> [u8; METADATA_SIZE] {
    let mut raw = [0; METADATA_SIZE];
    raw[..8].copy_from_slice(&filter_off.to_le_bytes());
    raw[8..].copy_from_slice(&flags.to_le_bytes());
    raw
}

pub fn unpack_metadata(raw: &[u8]) -> Result<(u64, u64)> {
    if raw.len() != METADATA_SIZE {
        return Err(Error::Input(format!(
            "seccomp metadata must be {METADATA_SIZE} bytes, got {}",
            raw.len(),
        )));
    }

    let filter_off = u64::from_le_bytes(raw[..8].try_into().unwrap_or_default());
    let flags = u64::from_le_bytes(raw[8..].try_into().unwrap_or_default());

    Ok((filter_off, flags))
}

/// Name each known filter flag set in `flags`. Leftover bits are named `unknown_0x..`.
pub fn flag_names(flags: u64) -> Vec<String> {
    let mut names = vec![];
    let mut rest = flags;

    for &(bit, name) in FLAG_NAMES {
        if rest & bit != 0 {
            names.push(name.to_owned());
            rest &= !bit;
        }
    }

    if rest != 0 {
        names.push(format!("unknown_{rest:#x}"));
    }

    names
}

/// `struct sock_filter`: one classic BPF instruction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    pub fn decode(raw: &[u8; INSTRUCTION_SIZE]) -> Self {
        Self {
            code: u16::from_le_bytes([raw[0], raw[1]]),
            jt: raw[2],
            jf: raw[3],
            k: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        }
    }

    pub fn encode(&self) -> [u8; INSTRUCTION_SIZE] {
        let mut raw = [0; INSTRUCTION_SIZE];
        raw[..2].copy_from_slice(&self.code.to_le_bytes());
        raw[2] = self.jt;
        raw[3] = self.jf;
        raw[4..].copy_from_slice(&self.k.to_le_bytes());
        raw
    }
}

impl fmt::Display for SockFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ code = {:#06x}, jt = {}, jf = {}, k = {:#010x} }}", self.code, self.jt, self.jf, self.k)
    }
}

/// Decode a filter program dumped by `PTRACE_SECCOMP_GET_FILTER`.
pub fn decode_filter(raw: &[u8]) -> Result<Vec<SockFilter>> {
    if raw.len() % INSTRUCTION_SIZE != 0 {
        return Err(Error::Input(format!(
            "BPF program length {} is not a multiple of {INSTRUCTION_SIZE}",
            raw.len(),
        )));
    }

    let insns = raw
        .chunks_exact(INSTRUCTION_SIZE)
        .map(|chunk| {
            let mut insn = [0; INSTRUCTION_SIZE];
            insn.copy_from_slice(chunk);
            SockFilter::decode(&insn)
        })
        .collect();

    Ok(insns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip() {
        let raw = pack_metadata(3, 0x12);
        assert_eq!(unpack_metadata(&raw).unwrap(), (3, 0x12));

        let meta = SeccompMetadata { filter_off: 0, flags: 2 };
        assert_eq!(SeccompMetadata::unpack(&meta.pack()).unwrap(), meta);
        assert!(unpack_metadata(&raw[..12]).is_err());
    }

    #[test]
    fn test_flag_names() {
        assert!(flag_names(0).is_empty());
        assert_eq!(flag_names(0b10), vec!["log"]);
        assert_eq!(flag_names(0b11111), vec!["tsync", "log", "spec_allow", "new_listener", "tsync_esrch"]);
        assert_eq!(flag_names(0x101), vec!["tsync", "unknown_0x100"]);
    }

    #[test]
    fn test_decode_filter() {
        // ld [4]; jeq #0xc000003e, 1, 0
        let raw = [
            0x20, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00,
            0x15, 0x00, 0x01, 0x00, 0x3e, 0x00, 0x00, 0xc0,
        ];

        let prog = decode_filter(&raw).unwrap();
        assert_eq!(prog, vec![
            SockFilter { code: 0x20, jt: 0, jf: 0, k: 4 },
            SockFilter { code: 0x15, jt: 1, jf: 0, k: 0xc000_003e },
        ]);
        assert_eq!(&prog[1].encode()[..], &raw[8..]);
        assert_eq!(prog[1].to_string(), "{ code = 0x0015, jt = 1, jf = 0, k = 0xc000003e }");
    }

    #[test]
    fn test_decode_misaligned_filter() {
        assert!(matches!(decode_filter(&[0; 7]), Err(Error::Input(_))));
        assert!(decode_filter(&[]).unwrap().is_empty());
    }
}
