//! Human-readable buffer sizes
//!
//! Parses strings like `"512"`, `"0.05k"` or `"1.5G"` into byte counts.
//! Suffixes are decimal (k = 10^3, M = 10^6, G = 10^9), case-insensitive, and
//! the first suffix found wins. A size that parses to zero is forced up to
//! one byte so internal chunked I/O always has room to work with.

use sysinfo::System;

/// Multiplier for a size suffix character, if it is one.
fn suffix_multiplier(c: char) -> Option<f64> {
    match c {
        'k' | 'K' => Some(1e3),
        'm' | 'M' => Some(1e6),
        'g' | 'G' => Some(1e9),
        _ => None,
    }
}

/// Longest leading prefix of `s` that parses as a float, as a value.
/// Unparseable input counts as zero, like `atof`.
fn leading_f64(s: &str) -> f64 {
    let s = s.trim_start();
    for end in (1..=s.len()).rev() {
        if !s.is_char_boundary(end) {
            continue;
        }
        if let Ok(v) = s[..end].parse::<f64>() {
            return v;
        }
    }
    0.0
}

/// Parse a human-readable size into bytes.
///
/// `"0.05k"` is 50 bytes, `"1.5G"` is 1_500_000_000. The minimum returned
/// value is 1.
pub fn parse_size(s: &str) -> u64 {
    let mut value = leading_f64(s);
    for c in s.chars() {
        if let Some(mult) = suffix_multiplier(c) {
            value *= mult;
            break;
        }
    }

    if value < 1.0 {
        1
    } else {
        value as u64
    }
}

/// A buffer size equal to `fraction` of the currently free system memory.
///
/// The minimum returned value is 1.
pub fn fraction_of_free_ram(fraction: f64) -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    let free = sys.free_memory() as f64;
    ((free * fraction.max(0.0)) as u64).max(1)
}
