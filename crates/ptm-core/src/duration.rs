//! Compact playtime durations ("10s", "2m2s", "1h2m2s").

use crate::{DomainError, DomainResult};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;

/// Formats whole seconds as the shortest lossless `h`/`m`/`s` string.
///
/// A unit is left out only when it is zero and no larger unit precedes it,
/// so every output parses back to the same count.
///
/// ```
/// use ptm_core::format_duration;
///
/// assert_eq!(format_duration(10), "10s");
/// assert_eq!(format_duration(122), "2m2s");
/// assert_eq!(format_duration(3722), "1h2m2s");
/// assert_eq!(format_duration(3600), "1h0m0s");
/// ```
pub fn format_duration(seconds: u64) -> String {
    if seconds < SECS_PER_MINUTE {
        format!("{seconds}s")
    } else if seconds < SECS_PER_HOUR {
        let mins = seconds / SECS_PER_MINUTE;
        let secs = seconds % SECS_PER_MINUTE;
        format!("{mins}m{secs}s")
    } else {
        let hours = seconds / SECS_PER_HOUR;
        let mins = (seconds % SECS_PER_HOUR) / SECS_PER_MINUTE;
        let secs = seconds % SECS_PER_MINUTE;
        format!("{hours}h{mins}m{secs}s")
    }
}

/// Parses a duration produced by [`format_duration`].
///
/// Also accepts abbreviated forms that drop trailing zero units
/// ("2m", "1h5m"). Units must appear at most once, in `h`, `m`, `s` order.
pub fn parse_duration(input: &str) -> DomainResult<u64> {
    let invalid = |reason: &str| DomainError::InvalidDuration {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let text = input.trim();
    if text.is_empty() {
        return Err(invalid("empty"));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    // Rank of the last unit seen; units must strictly decrease.
    let mut last_rank = u8::MAX;

    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let (rank, multiplier) = match ch {
            'h' => (2, SECS_PER_HOUR),
            'm' => (1, SECS_PER_MINUTE),
            's' => (0, 1),
            _ => return Err(invalid("unexpected character")),
        };
        if rank >= last_rank {
            return Err(invalid("units out of order or repeated"));
        }
        if digits.is_empty() {
            return Err(invalid("unit without a number"));
        }

        let value: u64 = digits.parse().map_err(|_| invalid("number too large"))?;
        let part = value
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("number too large"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| invalid("number too large"))?;

        digits.clear();
        last_rank = rank;
    }

    if !digits.is_empty() {
        return Err(invalid("trailing number without a unit"));
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_observed_shapes() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(10), "10s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m0s");
        assert_eq!(format_duration(122), "2m2s");
        assert_eq!(format_duration(125), "2m5s");
        assert_eq!(format_duration(3599), "59m59s");
        assert_eq!(format_duration(3722), "1h2m2s");
        assert_eq!(format_duration(7200), "2h0m0s");
    }

    #[test]
    fn test_format_large_hours() {
        assert_eq!(format_duration(100 * 3600 + 1), "100h0m1s");
    }

    #[test]
    fn test_round_trip_across_unit_boundaries() {
        let samples = (0..4000u64)
            .chain([86_399, 86_400, 359_999, 360_000, u64::MAX / 2, u64::MAX]);
        for seconds in samples {
            let text = format_duration(seconds);
            assert_eq!(parse_duration(&text), Ok(seconds), "round trip of {text}");
        }
    }

    #[test]
    fn test_parse_abbreviated_forms() {
        assert_eq!(parse_duration("2m"), Ok(120));
        assert_eq!(parse_duration("1h5m"), Ok(3900));
        assert_eq!(parse_duration("1h"), Ok(3600));
        assert_eq!(parse_duration("1h7s"), Ok(3607));
        assert_eq!(parse_duration(" 45s "), Ok(45));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "   ", "10", "s", "5x", "1m1h", "1s1s", "1h 2m", "-5s", "m5s"] {
            assert!(
                matches!(parse_duration(bad), Err(DomainError::InvalidDuration { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_duration("99999999999999999999s").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
    }
}
