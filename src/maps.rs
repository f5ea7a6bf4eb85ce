//! Parsing of `/proc/<pid>/maps`.

use std::ops::Range;

use crate::error::{Error, Result};

/// A single entry in a tracee's memory map.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    pub range: Range<u64>,
    /// Four characters, e.g. `r-xp`.
    pub perms: String,
    pub offset: u64,
    pub dev: String,
    pub inode: u64,
    /// Backing file or pseudo-path such as `[heap]`. May contain spaces.
    pub path: Option<String>,
}

impl Mapping {
    pub fn readable(&self) -> bool {
        self.perms.starts_with('r')
    }

    pub fn writable(&self) -> bool {
        self.perms.as_bytes().get(1) == Some(&b'w')
    }

    pub fn executable(&self) -> bool {
        self.perms.as_bytes().get(2) == Some(&b'x')
    }

    pub fn shared(&self) -> bool {
        self.perms.as_bytes().get(3) == Some(&b's')
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.range.contains(&addr)
    }
}

fn bad_line(line: &str) -> Error {
    Error::Input(format!("malformed maps line: {line:?}"))
}

fn hex(field: &str, line: &str) -> Result<u64> {
    u64::from_str_radix(field, 16).map_err(|_| bad_line(line))
}

/// Parse one line: `start-end perms offset dev inode [path]`.
pub fn parse_line(line: &str) -> Result<Mapping> {
    // Split off the five fixed fields, leaving the path with its inner spaces intact.
    let mut rest = line.trim_end();
    let mut fields = [""; 5];

    for field in fields.iter_mut() {
        rest = rest.trim_start();
        let end = rest.find(' ').unwrap_or(rest.len());
        *field = &rest[..end];
        rest = &rest[end..];
    }

    let [range, perms, offset, dev, inode] = fields;

    let (start, end) = range.split_once('-').ok_or_else(|| bad_line(line))?;
    let range = hex(start, line)?..hex(end, line)?;

    if perms.len() != 4 {
        return Err(bad_line(line));
    }

    let offset = hex(offset, line)?;
    let inode = inode.parse().map_err(|_| bad_line(line))?;

    if dev.is_empty() {
        return Err(bad_line(line));
    }

    let path = rest.trim_start();
    let path = (!path.is_empty()).then(|| path.to_owned());

    Ok(Mapping {
        range,
        perms: perms.to_owned(),
        offset,
        dev: dev.to_owned(),
        inode,
        path,
    })
}

/// Parse the full contents of a maps file, skipping blank lines.
pub fn parse(content: &str) -> Result<Vec<Mapping>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
55d0c8a00000-55d0c8a02000 r--p 00000000 fc:02 7219570                    /usr/bin/cat
55d0c8a02000-55d0c8a07000 r-xp 00002000 fc:02 7219570                    /usr/bin/cat
55d0ca1e4000-55d0ca205000 rw-p 00000000 00:00 0                          [heap]
7f1a2c000000-7f1a2c021000 rw-s 00000000 00:05 1234                       /dev/shm/my file (deleted)
7f1a2c400000-7f1a2c401000 ---p 00000000 00:00 0

7ffd5b9e1000-7ffd5ba02000 rw-p 00000000 00:00 0                          [stack]
";

    #[test]
    fn test_parse_sample() {
        let maps = parse(SAMPLE).unwrap();
        assert_eq!(maps.len(), 6);

        let text = &maps[1];
        assert_eq!(text.range, 0x55d0c8a02000..0x55d0c8a07000);
        assert_eq!(text.perms, "r-xp");
        assert_eq!(text.offset, 0x2000);
        assert_eq!(text.dev, "fc:02");
        assert_eq!(text.inode, 7219570);
        assert_eq!(text.path.as_deref(), Some("/usr/bin/cat"));
        assert!(text.readable() && text.executable() && !text.writable() && !text.shared());
        assert!(text.contains(0x55d0c8a02000));
        assert!(!text.contains(0x55d0c8a07000));

        assert_eq!(maps[3].path.as_deref(), Some("/dev/shm/my file (deleted)"));
        assert!(maps[3].shared());

        assert_eq!(maps[4].path, None);
        assert!(!maps[4].readable());

        assert_eq!(maps[5].path.as_deref(), Some("[stack]"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("ZZZZ-aaaa r-xp 00000000 fc:02 1 /bin/true\n").is_err());
        assert!(parse("1000-2000 r-x 00000000 fc:02 1\n").is_err());
        assert!(parse("1000-2000 r-xp 00000000\n").is_err());
    }
}
