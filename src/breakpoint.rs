//! Software breakpoints: a one-byte trap opcode patched over the original instruction.

use std::collections::BTreeMap;

use tracing::debug;

use crate::arch::Arch;
use crate::error::{Error, Result};
use crate::memory::{Memory, WordIo};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Breakpoint {
    pub address: u64,

    /// The byte the trap opcode replaced.
    pub original: u8,

    pub enabled: bool,
}

/// Address-keyed set of installed breakpoints, owned by a single tracee.
#[derive(Clone, Debug, Default)]
pub struct Breakpoints {
    installed: BTreeMap<u64, Breakpoint>,
}

impl Breakpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.installed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.is_empty()
    }

    pub fn get(&self, address: u64) -> Option<&Breakpoint> {
        self.installed.get(&address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.installed.values()
    }

    /// Install a breakpoint at `address`. Installing over an enabled breakpoint
    /// returns the existing record and leaves memory alone.
    pub fn install<W: WordIo>(&mut self, arch: Arch, memory: &mut Memory<W>, address: u64) -> Result<Breakpoint> {
        let opcode = arch.breakpoint_opcode().ok_or(Error::UnsupportedArchitecture {
            arch,
            operation: "software breakpoints",
        })?;

        if let Some(bp) = self.installed.get(&address) {
            if bp.enabled {
                return Ok(*bp);
            }
        }

        let original = match memory.read(address, 1)?.first() {
            Some(&byte) => byte,
            None => internal_error!("one-byte read returned nothing"),
        };
        memory.write(address, &[opcode])?;

        let bp = Breakpoint { address, original, enabled: true };
        self.installed.insert(address, bp);
        debug!(address, original, "installed breakpoint");

        Ok(bp)
    }

    /// Restore the original byte and forget the breakpoint. Unknown addresses are
    /// not an error, and cause no write.
    pub fn remove<W: WordIo>(&mut self, memory: &mut Memory<W>, address: u64) -> Result<Option<Breakpoint>> {
        let mut bp = match self.installed.get(&address) {
            Some(bp) => *bp,
            None => return Ok(None),
        };

        memory.write(address, &[bp.original])?;
        bp.enabled = false;
        self.installed.remove(&address);
        debug!(address, "removed breakpoint");

        Ok(Some(bp))
    }

    /// Remove every breakpoint, returning how many were removed.
    pub fn clear_all<W: WordIo>(&mut self, memory: &mut Memory<W>) -> Result<usize> {
        let addresses: Vec<u64> = self.installed.keys().copied().collect();

        let mut removed = 0;
        for address in addresses {
            if self.remove(memory, address)?.is_some() {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// The breakpoint whose trap was just executed, given the instruction pointer.
    ///
    /// Executing the one-byte trap leaves the instruction pointer just past it.
    pub fn hit(&self, ip: u64) -> Option<&Breakpoint> {
        let address = ip.checked_sub(1)?;
        self.installed.get(&address).filter(|bp| bp.enabled)
    }

    /// Put the original byte back, keeping the record, so the instruction can run.
    pub(crate) fn unpatch<W: WordIo>(&self, memory: &mut Memory<W>, address: u64) -> Result<()> {
        match self.installed.get(&address) {
            Some(bp) => memory.write(address, &[bp.original]),
            None => Ok(()),
        }
    }

    /// Rewrite the trap opcode for a still-enabled breakpoint.
    pub(crate) fn repatch<W: WordIo>(&self, arch: Arch, memory: &mut Memory<W>, address: u64) -> Result<()> {
        match (self.installed.get(&address), arch.breakpoint_opcode()) {
            (Some(bp), Some(opcode)) if bp.enabled => memory.write(address, &[opcode]),
            _ => Ok(()),
        }
    }
}
