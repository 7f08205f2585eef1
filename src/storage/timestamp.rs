//! The modification clock.
//!
//! Sync 1.5 timestamps are integers counting hundredths of a second since
//! the Unix epoch, rendered on the wire as `seconds.hh` with exactly two
//! decimals. Every timestamp handed out by [`now`] is monotonic
//! non-decreasing within the process: if the OS clock steps backwards the
//! last returned value is reused, so a later write can never carry an
//! earlier `modified` than the one before it.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A modification timestamp in hundredths of a second since the epoch.
pub type Timestamp = i64;

static LAST: Mutex<Timestamp> = Mutex::new(0);

/// Returns the current timestamp, monotonic non-decreasing.
pub fn now() -> Timestamp {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64 / 10)
        .unwrap_or(0);
    let mut last = LAST.lock();
    if wall > *last {
        *last = wall;
    }
    *last
}

/// Renders a timestamp in the `seconds.hh` wire format.
pub fn format(modified: Timestamp) -> String {
    format!("{}.{:02}", modified / 100, modified % 100)
}

/// Parses a `seconds.hh` wire value into a timestamp.
///
/// Accepts a plain integer (`"1004"`), or an integer with a decimal
/// fraction; fractional digits beyond the hundredths are truncated.
/// Rejects the empty string, signs, and anything non-numeric.
pub fn parse(s: &str) -> Option<Timestamp> {
    let (secs, frac) = match s.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (s, ""),
    };
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    let mut hundredths = 0;
    for (i, b) in frac.bytes().take(2).enumerate() {
        let digit = i64::from(b - b'0');
        hundredths += digit * if i == 0 { 10 } else { 1 };
    }
    secs.checked_mul(100)?.checked_add(hundredths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let mut prev = now();
        for _ in 0..1000 {
            let next = now();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn now_is_roughly_wall_clock() {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64
            / 10;
        let ts = now();
        assert!((ts - wall).abs() < 100, "ts {ts} vs wall {wall}");
    }

    #[test]
    fn format_renders_two_decimals() {
        assert_eq!(format(0), "0.00");
        assert_eq!(format(45), "0.45");
        assert_eq!(format(100), "1.00");
        assert_eq!(format(100456), "1004.56");
    }

    #[test]
    fn parse_accepts_wire_values() {
        assert_eq!(parse("1004.56"), Some(100456));
        assert_eq!(parse("1004.5"), Some(100450));
        assert_eq!(parse("1004"), Some(100400));
        assert_eq!(parse("0.00"), Some(0));
        // extra precision is truncated to hundredths
        assert_eq!(parse("1.239"), Some(123));
    }

    #[test]
    fn parse_rejects_garbage() {
        for bad in ["", "-1", "-1.0", "+1", "abcde", "1.2.3", "1,2", "1.x", " 1"] {
            assert_eq!(parse(bad), None, "{bad:?} should not parse");
        }
    }

    #[test]
    fn format_parse_round_trip() {
        for ts in [0, 1, 45, 99, 100, 12345, 100456, 9_999_999_999] {
            assert_eq!(parse(&format(ts)), Some(ts));
        }
    }
}
