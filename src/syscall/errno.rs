//! Rendering of syscall return values, including in-band error codes.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use nix::errno::Errno;

/// Largest error code the kernel returns in-band, as `-errno`.
pub const MAX_ERRNO: i64 = 4095;

lazy_static! {
    static ref ERRNO_NAMES: BTreeMap<i32, (String, &'static str)> = (1..=MAX_ERRNO as i32)
        .map(Errno::from_i32)
        .filter(|&errno| errno != Errno::UnknownErrno)
        .map(|errno| (errno as i32, (format!("{errno:?}"), errno.desc())))
        .collect();
}

/// Symbolic name and description of a host error code.
pub fn lookup(code: i32) -> Option<(&'static str, &'static str)> {
    ERRNO_NAMES.get(&code).map(|(name, desc)| (name.as_str(), *desc))
}

/// True if a raw return value encodes an error.
pub fn is_error(ret: i64) -> bool {
    (-MAX_ERRNO..0).contains(&ret)
}

/// Render a return value: `-1 ENAME (description)` for errors, else decimal.
pub fn render_return(ret: i64) -> String {
    if !is_error(ret) {
        return ret.to_string();
    }

    let code = -ret as i32;
    match lookup(code) {
        Some((name, desc)) => format!("-1 {name} ({desc})"),
        None => format!("-1 errno {code}"),
    }
}
