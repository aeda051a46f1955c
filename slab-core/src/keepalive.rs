//! Keep-alive encoding: `"0"` (immediate unload), `"-1"` (never), or a
//! duration literal such as `"5m"`, `"1h30m"`, `"30s"`.
//!
//! This mirrors the Go `time.ParseDuration` grammar closely enough for the
//! values this system actually emits (sequences of `<integer><unit>` with
//! `unit` one of `ns`, `us`, `ms`, `s`, `m`, `h`) — there is no crates.io
//! parser for that exact grammar, so it is hand-rolled here rather than
//! reached for.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The default idle timeout applied when a model's configuration does not
/// specify one.
pub const DEFAULT_KEEP_ALIVE: KeepAlive = KeepAlive::After(Duration::from_secs(5 * 60));

/// A runner's idle-unload policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeepAlive {
    /// Unload as soon as the last lease is released.
    Immediate,
    /// Never unload due to idleness; only an explicit `unload` removes it.
    Forever,
    /// Unload after this much idle time.
    After(Duration),
}

impl KeepAlive {
    /// Parse the wire encoding: `"0"`, `"-1"`, or a duration literal.
    pub fn parse(s: &str) -> Result<Self, KeepAliveParseError> {
        let s = s.trim();
        match s {
            "0" => Ok(KeepAlive::Immediate),
            "-1" => Ok(KeepAlive::Forever),
            _ => parse_duration_literal(s)
                .map(KeepAlive::After)
                .ok_or_else(|| KeepAliveParseError {
                    input: s.to_owned(),
                }),
        }
    }

    /// Encode back to the wire representation.
    pub fn encode(&self) -> String {
        match self {
            KeepAlive::Immediate => "0".to_owned(),
            KeepAlive::Forever => "-1".to_owned(),
            KeepAlive::After(d) => encode_duration_literal(*d),
        }
    }
}

impl Default for KeepAlive {
    fn default() -> Self {
        DEFAULT_KEEP_ALIVE
    }
}

impl fmt::Display for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl TryFrom<String> for KeepAlive {
    type Error = KeepAliveParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        KeepAlive::parse(&s)
    }
}

impl From<KeepAlive> for String {
    fn from(k: KeepAlive) -> Self {
        k.encode()
    }
}

/// Returned when a keep-alive string does not match the accepted grammar.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid keep-alive value: {input:?}")]
pub struct KeepAliveParseError {
    pub input: String,
}

fn unit_nanos(unit: &str) -> Option<u64> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        _ => return None,
    })
}

/// Parse a sequence of `<integer><unit>` pairs, e.g. `"1h30m"`, `"500ms"`.
fn parse_duration_literal(s: &str) -> Option<Duration> {
    if s.is_empty() {
        return None;
    }

    let mut total_nanos: u128 = 0;
    let mut rest = s;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return None;
        }
        let (num_str, after_num) = rest.split_at(digits_end);
        let value: u128 = num_str.parse().ok()?;

        let unit_end = after_num
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(after_num.len());
        if unit_end == 0 {
            return None;
        }
        let (unit_str, next_rest) = after_num.split_at(unit_end);
        let nanos_per_unit = unit_nanos(unit_str)?;

        total_nanos = total_nanos.checked_add(value.checked_mul(nanos_per_unit as u128)?)?;
        rest = next_rest;
    }

    let nanos: u64 = total_nanos.try_into().ok()?;
    Some(Duration::from_nanos(nanos))
}

/// Encode a [`Duration`] using the largest whole units that divide it evenly,
/// falling back to seconds when it doesn't divide cleanly into minutes/hours.
fn encode_duration_literal(d: Duration) -> String {
    let total_secs = d.as_secs();
    if d.subsec_nanos() == 0 {
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let seconds = total_secs % 60;

        let mut out = String::new();
        if hours > 0 {
            out.push_str(&format!("{hours}h"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}m"));
        }
        if seconds > 0 || out.is_empty() {
            out.push_str(&format!("{seconds}s"));
        }
        return out;
    }
    format!("{}ms", d.as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sentinels() {
        assert_eq!(KeepAlive::parse("0").unwrap(), KeepAlive::Immediate);
        assert_eq!(KeepAlive::parse("-1").unwrap(), KeepAlive::Forever);
    }

    #[test]
    fn parses_simple_durations() {
        assert_eq!(
            KeepAlive::parse("30s").unwrap(),
            KeepAlive::After(Duration::from_secs(30))
        );
        assert_eq!(
            KeepAlive::parse("5m").unwrap(),
            KeepAlive::After(Duration::from_secs(5 * 60))
        );
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            KeepAlive::parse("1h30m").unwrap(),
            KeepAlive::After(Duration::from_secs(90 * 60))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(KeepAlive::parse("forever").is_err());
        assert!(KeepAlive::parse("").is_err());
        assert!(KeepAlive::parse("5").is_err());
    }

    #[test]
    fn round_trips_through_canonical_form() {
        for input in ["0", "-1", "30s", "5m", "1h30m", "2h"] {
            let parsed = KeepAlive::parse(input).unwrap();
            let again = KeepAlive::parse(&parsed.encode()).unwrap();
            assert_eq!(parsed, again, "round-trip mismatch for {input:?}");
        }
    }

    #[test]
    fn default_is_five_minutes() {
        assert_eq!(
            KeepAlive::default(),
            KeepAlive::After(Duration::from_secs(300))
        );
    }
}
