//! Synthesized log sequence numbers.
//!
//! There is no real WAL behind this stream. One process-wide 64-bit
//! counter hands out positions; every caller that needs "a new LSN" gets
//! the counter advanced by a fixed step.

use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

const INITIAL: i64 = 0x0100_0000;
const STEP: i64 = 0x100;

static WAL_POSITION: Lazy<Mutex<i64>> = Lazy::new(|| Mutex::new(INITIAL));

/// A log sequence number, displayed as `HIGH/LOW` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Lsn(pub i64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:X}/{:X}",
            (self.0 >> 32) as u32,
            (self.0 & 0xFFFF_FFFF) as u32
        )
    }
}

/// Current position, without advancing.
pub fn current() -> Lsn {
    Lsn(*WAL_POSITION.lock())
}

/// Advance the counter and return the new position.
pub fn advance() -> Lsn {
    let mut position = WAL_POSITION.lock();
    *position += STEP;
    Lsn(*position)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_as_high_low_hex() {
        assert_eq!(Lsn(0x0100_0000).to_string(), "0/1000000");
        assert_eq!(Lsn(0x0000_0001_0000_0A00).to_string(), "1/A00");
    }

    #[test]
    fn advance_is_monotonic() {
        let first = advance();
        let second = advance();

        assert!(second > first);
        assert_eq!(second.0 - first.0, STEP);
        assert!(current() >= second);
    }

    #[test]
    fn display_matches_wire_regex() {
        let rendered = advance().to_string();
        let mut parts = rendered.split('/');
        let high = parts.next().unwrap();
        let low = parts.next().unwrap();

        assert!(high.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(low.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(parts.next().is_none());
    }
}
