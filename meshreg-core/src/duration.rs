//! Duration strings in the mesh's native notation (`"300ms"`, `"1m30s"`, `"2.5h"`).
//!
//! Timeouts in a [`ServiceSpec`](crate::spec::ServiceSpec) and the lock TTL in
//! the configuration are written this way. A value is an optional sign
//! followed by one or more `<decimal><unit>` pairs; the bare string `"0"` is
//! also accepted. Units: `ns`, `us` (`µs`, `μs`), `ms`, `s`, `m`, `h`.
//!
//! The grammar mirrors Go's `time.ParseDuration`, which is what the mesh
//! itself accepts. Crates such as `humantime` take a different grammar
//! (spaces, `d`/`min` units, no fractions), so they are not a drop-in here.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration {0:?}")]
    Invalid(String),

    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration {0:?} out of range")]
    Overflow(String),
}

/// A parsed, signed duration expressed in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SignedDuration {
    nanos: i128,
}

impl SignedDuration {
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// The magnitude as a std duration.
    pub fn unsigned_abs(&self) -> Duration {
        let n = self.nanos.unsigned_abs();
        Duration::new((n / 1_000_000_000) as u64, (n % 1_000_000_000) as u32)
    }

    /// The value as a std duration, or `None` when negative.
    pub fn to_std(&self) -> Option<Duration> {
        (!self.is_negative()).then(|| self.unsigned_abs())
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

// Largest magnitude representable as an i64 nanosecond count.
const MAX_NANOS: u128 = i64::MAX as u128;

/// Parse a duration string.
pub fn parse(input: &str) -> Result<SignedDuration, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if rest == "0" {
        return Ok(SignedDuration { nanos: 0 });
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = rest
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        if unit_len == 0 {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let overflow = || DurationError::Overflow(input.to_string());
        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| overflow())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(overflow)?;

        // Fractional digits beyond nanosecond precision are truncated.
        let mut place = scale;
        for digit in frac_part.bytes() {
            place /= 10;
            if place == 0 {
                break;
            }
            value += u128::from(digit - b'0') * place;
        }

        total = total.checked_add(value).ok_or_else(overflow)?;
        if total > MAX_NANOS {
            return Err(overflow());
        }
    }

    let nanos = total as i128;
    Ok(SignedDuration {
        nanos: if negative { -nanos } else { nanos },
    })
}

/// Parse a non-negative duration, as required for timeouts and TTLs.
pub fn parse_std(input: &str) -> Result<Duration, DurationError> {
    parse(input)?
        .to_std()
        .ok_or_else(|| DurationError::Invalid(input.to_string()))
}

/// Render a duration in the same notation, e.g. `1m30s` or `250ms`.
pub fn format(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    let nanos = d.as_nanos();
    if nanos < 1_000_000_000 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let sub = d.subsec_nanos();
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if h > 0 || m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if sub == 0 {
        out.push_str(&format!("{s}s"));
    } else {
        let frac = format!("{sub:09}");
        out.push_str(&format!("{s}.{}s", frac.trim_end_matches('0')));
    }
    out
}

/// `#[serde(with = "meshreg_core::duration::serde_str")]` for config fields.
pub mod serde_str {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        parse_std(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn parses_simple_units() {
        assert_eq!(parse_std("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_std("300ms").unwrap(), ms(300));
        assert_eq!(parse_std("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_std("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_std("10µs").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_std("7ns").unwrap(), Duration::from_nanos(7));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(parse_std("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_std("2h45m").unwrap(), Duration::from_secs(9900));
        assert_eq!(parse_std("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_std(".5s").unwrap(), ms(500));
        assert_eq!(parse_std("1.s").unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn bare_zero_is_accepted() {
        assert_eq!(parse_std("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_std("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn signs_are_parsed() {
        let d = parse("-1s").unwrap();
        assert!(d.is_negative());
        assert_eq!(d.unsigned_abs(), Duration::from_secs(1));
        assert!(parse_std("-1s").is_err());
        assert_eq!(parse_std("+2s").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(parse(""), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("-"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("5"), Err(DurationError::MissingUnit(_))));
        assert!(matches!(parse("soon"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("3d"), Err(DurationError::UnknownUnit { .. })));
        assert!(matches!(parse("."), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("1s "), Err(DurationError::UnknownUnit { .. })));
    }

    #[test]
    fn rejects_forms_outside_the_mesh_grammar() {
        assert!(parse("1h 30m").is_err());
        assert!(parse("2min").is_err());
        assert!(parse("1day").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(matches!(
            parse("9999999999999h"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn format_is_readable_and_reparses() {
        for d in [ms(250), Duration::from_secs(60), Duration::from_secs(90), ms(1500)] {
            assert_eq!(parse_std(&format(d)).unwrap(), d);
        }
        assert_eq!(format(Duration::from_secs(60)), "1m0s");
        assert_eq!(format(ms(250)), "250ms");
        assert_eq!(format(ms(1500)), "1.5s");
        assert_eq!(format(Duration::ZERO), "0s");
    }
}
