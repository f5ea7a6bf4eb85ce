//! Byte-granular access to tracee memory built on word-granular peek and poke.

use std::convert::TryInto;

use crate::arch::WORD_SIZE;
use crate::error::{Error, Result};

const WORD: u64 = WORD_SIZE as u64;

/// Word-granular access to an address space. Addresses passed in are word-aligned.
pub trait WordIo {
    fn peek_word(&self, addr: u64) -> Result<u64>;

    fn poke_word(&mut self, addr: u64, word: u64) -> Result<()>;
}

impl<T: WordIo + ?Sized> WordIo for &mut T {
    fn peek_word(&self, addr: u64) -> Result<u64> {
        (**self).peek_word(addr)
    }

    fn poke_word(&mut self, addr: u64, word: u64) -> Result<()> {
        (**self).poke_word(addr, word)
    }
}

fn align_down(addr: u64) -> u64 {
    addr & !(WORD - 1)
}

/// The word-aligned span `[start, end)` covering `[addr, addr + len)`.
fn covering_span(addr: u64, len: usize) -> Result<(u64, u64)> {
    let end = addr
        .checked_add(len as u64)
        .and_then(|end| end.checked_add(WORD - 1))
        .map(align_down)
        .ok_or_else(|| Error::Input(format!("span of {len} bytes at {addr:#x} overflows")))?;

    Ok((align_down(addr), end))
}

/// Unaligned reads and writes of tracee memory.
///
/// Writes never disturb bytes outside of the written span: partially-covered words at
/// the edges are read back and merged before being written.
#[derive(Debug)]
pub struct Memory<W> {
    io: W,
}

impl<W: WordIo> Memory<W> {
    pub fn new(io: W) -> Self {
        Self { io }
    }

    pub fn into_inner(self) -> W {
        self.io
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(vec![]);
        }

        let (start, end) = covering_span(addr, len)?;

        let mut data = Vec::with_capacity((end - start) as usize);
        let mut word = start;
        while word < end {
            data.extend_from_slice(&self.io.peek_word(word)?.to_le_bytes());
            word += WORD;
        }

        let offset = (addr - start) as usize;
        data.truncate(offset + len);
        data.drain(..offset);

        Ok(data)
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let (start, end) = covering_span(addr, data.len())?;
        let write_end = addr + data.len() as u64;

        let mut word = start;
        while word < end {
            let lo = word.max(addr);
            let hi = (word + WORD).min(write_end);
            let src = &data[(lo - addr) as usize..(hi - addr) as usize];

            let mut bytes = if hi - lo == WORD {
                [0; WORD_SIZE]
            } else {
                self.io.peek_word(word)?.to_le_bytes()
            };

            let dst = (lo - word) as usize;
            bytes[dst..dst + src.len()].copy_from_slice(src);

            self.io.poke_word(word, u64::from_le_bytes(bytes))?;
            word += WORD;
        }

        Ok(())
    }

    /// Read a NUL-terminated string of at most `max` bytes, excluding the NUL.
    ///
    /// Reads stop at the first word containing a NUL, so a short string near the end of
    /// a mapping can be read even if `max` bytes could not.
    pub fn read_string(&self, addr: u64, max: usize) -> Result<Vec<u8>> {
        if max == 0 {
            return Err(Error::Input("string read length must be positive".into()));
        }

        let mut data = Vec::new();
        let mut cur = addr;

        while data.len() < max {
            let word = align_down(cur);
            let bytes = self.io.peek_word(word)?.to_le_bytes();

            for &b in &bytes[(cur - word) as usize..] {
                if b == 0 || data.len() == max {
                    return Ok(data);
                }
                data.push(b);
            }

            cur = word
                .checked_add(WORD)
                .ok_or_else(|| Error::Input(format!("string at {addr:#x} overflows")))?;
        }

        Ok(data)
    }

    /// Read one machine word at any address.
    pub fn read_word(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, WORD_SIZE)?;
        let bytes = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Internal("short word read".into()))?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Write one machine word at any address.
    pub fn write_word(&mut self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// In-memory address space for exercising word-granular consumers without a tracee.
#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;
    use std::collections::BTreeMap;

    use nix::errno::Errno;

    use super::*;
    use crate::sys::{Call, Request};
    use crate::Pid;

    #[derive(Debug, Default)]
    pub struct FakeWords {
        pub words: BTreeMap<u64, u64>,
        pub peeks: Cell<usize>,
        pub pokes: Vec<u64>,
    }

    impl FakeWords {
        /// Map `bytes` starting at word-aligned `addr`, zero-padding the last word.
        pub fn with_bytes(addr: u64, bytes: &[u8]) -> Self {
            assert_eq!(addr % WORD, 0);

            let mut fake = Self::default();
            for (i, chunk) in bytes.chunks(WORD_SIZE).enumerate() {
                let mut word = [0; WORD_SIZE];
                word[..chunk.len()].copy_from_slice(chunk);
                fake.words.insert(addr + i as u64 * WORD, u64::from_le_bytes(word));
            }
            fake
        }
    }

    impl WordIo for FakeWords {
        fn peek_word(&self, addr: u64) -> Result<u64> {
            assert_eq!(addr % WORD, 0, "unaligned peek");
            self.peeks.set(self.peeks.get() + 1);

            self.words
                .get(&addr)
                .copied()
                .ok_or_else(|| Error::from_errno(Call::Ptrace(Request::PeekData), Pid::from_raw(1), Errno::EIO))
        }

        fn poke_word(&mut self, addr: u64, word: u64) -> Result<()> {
            assert_eq!(addr % WORD, 0, "unaligned poke");

            if !self.words.contains_key(&addr) {
                return Err(Error::from_errno(Call::Ptrace(Request::PokeData), Pid::from_raw(1), Errno::EIO));
            }

            self.pokes.push(addr);
            self.words.insert(addr, word);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeWords;
    use super::*;

    const BASE: u64 = 0x1000;

    fn pattern() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn test_unaligned_read() {
        let mem = Memory::new(FakeWords::with_bytes(BASE, &pattern()));

        assert_eq!(mem.read(BASE + 3, 7).unwrap(), (3u8..10).collect::<Vec<_>>());
        assert_eq!(mem.read(BASE + 8, 8).unwrap(), (8u8..16).collect::<Vec<_>>());
        assert_eq!(mem.read(BASE + 31, 1).unwrap(), vec![31]);
    }

    #[test]
    fn test_zero_length_read_makes_no_calls() {
        let mem = Memory::new(FakeWords::default());
        assert_eq!(mem.read(0xdead, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(mem.into_inner().peeks.get(), 0);
    }

    #[test]
    fn test_overflowing_read() {
        let mem = Memory::new(FakeWords::default());
        assert!(matches!(mem.read(u64::MAX - 2, 8), Err(Error::Input(_))));
    }

    #[test]
    fn test_write_preserves_edges() {
        let mut mem = Memory::new(FakeWords::with_bytes(BASE, &pattern()));
        let before = mem.read(BASE, 32).unwrap();

        mem.write(BASE + 5, &[0xaa; 13]).unwrap();

        let after = mem.read(BASE, 32).unwrap();
        assert_eq!(&after[..5], &before[..5]);
        assert_eq!(&after[5..18], &[0xaa; 13]);
        assert_eq!(&after[18..], &before[18..]);

        // Three words touched, none outside the span.
        let fake = mem.into_inner();
        assert_eq!(fake.pokes, vec![BASE, BASE + 8, BASE + 16]);
    }

    #[test]
    fn test_aligned_write_skips_read_back() {
        let mut mem = Memory::new(FakeWords::with_bytes(BASE, &pattern()));
        mem.write(BASE + 8, &[0x55; 8]).unwrap();

        let fake = mem.into_inner();
        assert_eq!(fake.peeks.get(), 0);
        assert_eq!(fake.words[&(BASE + 8)], 0x5555_5555_5555_5555);
    }

    #[test]
    fn test_read_string() {
        let mut bytes = b"/tmp/file\0garbage".to_vec();
        bytes.resize(32, b'x');
        let mem = Memory::new(FakeWords::with_bytes(BASE, &bytes));

        assert_eq!(mem.read_string(BASE, 256).unwrap(), b"/tmp/file");
        assert_eq!(mem.read_string(BASE + 5, 256).unwrap(), b"file");
        assert_eq!(mem.read_string(BASE, 4).unwrap(), b"/tmp");
        assert!(matches!(mem.read_string(BASE, 0), Err(Error::Input(_))));
    }

    #[test]
    fn test_read_string_without_nul() {
        let mem = Memory::new(FakeWords::with_bytes(BASE, &[b'a'; 16]));

        assert_eq!(mem.read_string(BASE, 16).unwrap(), vec![b'a'; 16]);
        // Runs off the end of the mapping looking for a NUL.
        assert!(mem.read_string(BASE, 17).is_err());
    }

    #[test]
    fn test_word_sugar() {
        let mut mem = Memory::new(FakeWords::with_bytes(BASE, &pattern()));

        mem.write_word(BASE + 4, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(mem.read_word(BASE + 4).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(mem.read(BASE, 4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(mem.read(BASE + 12, 4).unwrap(), vec![12, 13, 14, 15]);
    }
}
