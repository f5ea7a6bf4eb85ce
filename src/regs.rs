//! Codec for the raw general-purpose register block and the `iovec` descriptor used to
//! transfer it on regset architectures.

use std::collections::BTreeMap;
use std::convert::TryInto;

use crate::arch::{Arch, WORD_SIZE};
use crate::error::{Error, Result};

/// Size in bytes of a packed `struct iovec`.
pub const IOVEC_SIZE: usize = 16;

/// Register state of a tracee: one word per name in [`Arch::register_names()`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Registers {
    arch: Arch,
    values: Vec<u64>,
}

impl Registers {
    /// All-zero register state, for building a block from scratch.
    pub fn zeroed(arch: Arch) -> Self {
        let values = vec![0; arch.register_names().len()];
        Self { arch, values }
    }

    /// Unpack a raw register block of little-endian words.
    pub fn decode(arch: Arch, bytes: &[u8]) -> Result<Self> {
        let expected = arch.register_block_size();

        if bytes.len() != expected {
            return Err(Error::Input(format!(
                "{arch} register block must be {expected} bytes, got {}",
                bytes.len(),
            )));
        }

        let values = bytes
            .chunks_exact(WORD_SIZE)
            .map(|word| u64::from_le_bytes(word.try_into().unwrap_or_default()))
            .collect();

        Ok(Self { arch, values })
    }

    /// Pack into a raw register block of little-endian words.
    pub fn encode(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        let index = self.arch.register_index(name)?;
        self.values.get(index).copied()
    }

    pub fn set(&mut self, name: &str, value: u64) -> Result<()> {
        let arch = self.arch;
        let index = arch
            .register_index(name)
            .ok_or_else(|| Error::Input(format!("no register `{name}` on {arch}")))?;
        self.values[index] = value;
        Ok(())
    }

    /// Return a copy with `updates` applied. Registers absent from `updates` keep their
    /// current value.
    pub fn with_updates<'a>(&self, updates: impl IntoIterator<Item = (&'a str, u64)>) -> Result<Self> {
        let mut regs = self.clone();

        for (name, value) in updates {
            regs.set(name, value)?;
        }

        Ok(regs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.arch.register_names().iter().copied().zip(self.values.iter().copied())
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, u64> {
        self.iter().collect()
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.get(self.arch.instruction_pointer()).unwrap_or_default()
    }

    pub fn set_instruction_pointer(&mut self, value: u64) -> Result<()> {
        self.set(self.arch.instruction_pointer(), value)
    }
}

/// Pack `current` with `updates` applied into a raw register block.
pub fn encode_with(current: &Registers, updates: &BTreeMap<&str, u64>) -> Result<Vec<u8>> {
    let regs = current.with_updates(updates.iter().map(|(&name, &value)| (name, value)))?;
    Ok(regs.encode())
}

/// Pack a `struct iovec { void *iov_base; size_t iov_len; }`.
pub fn pack_iovec(base: u64, len: u64) -> [u8; IOVEC_SIZE] {
    let mut raw = [0; IOVEC_SIZE];
    raw[..8].copy_from_slice(&base.to_le_bytes());
    raw[8..].copy_from_slice(&len.to_le_bytes());
    raw
}

/// Unpack a `struct iovec` into `(iov_base, iov_len)`.
pub fn unpack_iovec(raw: &[u8]) -> Result<(u64, u64)> {
    if raw.len() != IOVEC_SIZE {
        return Err(Error::Input(format!("iovec must be {IOVEC_SIZE} bytes, got {}", raw.len())));
    }

    let (base, len) = raw.split_at(8);
    let base = u64::from_le_bytes(base.try_into().unwrap_or_default());
    let len = u64::from_le_bytes(len.try_into().unwrap_or_default());

    Ok((base, len))
}
