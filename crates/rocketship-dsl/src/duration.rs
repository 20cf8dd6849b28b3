// Go-style duration strings: <number><ns|us|ms|s|m|h>, compound segments
// allowed ("1m30s"), fractional numbers allowed ("1.5s").

use std::time::Duration;

/// Error from parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid duration '{input}': {reason}")]
pub struct DurationParseError {
    pub input: String,
    pub reason: String,
}

impl DurationParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse a Go-style duration string
///
/// ```
/// use rocketship_dsl::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::new(input, "empty string"));
    }
    if trimmed.starts_with('-') {
        return Err(DurationParseError::new(input, "negative durations not allowed"));
    }

    let mut total = 0.0f64;
    let mut rest = trimmed;
    let mut saw_segment = false;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| DurationParseError::new(input, "missing unit"))?;
        if digits_end == 0 {
            return Err(DurationParseError::new(input, "missing number"));
        }

        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| DurationParseError::new(input, "invalid number"))?;

        let unit_end = rest[digits_end..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .map(|i| digits_end + i)
            .unwrap_or(rest.len());
        let unit = &rest[digits_end..unit_end];

        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3600.0 * 1_000_000_000.0,
            _ => {
                return Err(DurationParseError::new(
                    input,
                    format!("unknown unit '{}' (expected ns, us, ms, s, m, or h)", unit),
                ))
            }
        };

        total += number * nanos_per_unit;
        saw_segment = true;
        rest = &rest[unit_end..];
    }

    if !saw_segment {
        return Err(DurationParseError::new(input, "missing number"));
    }

    Ok(Duration::from_nanos(total as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_duration("100ns").unwrap(), Duration::from_nanos(100));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_fractional() {
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("0.5m").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_compound() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("1h30m10s").unwrap(),
            Duration::from_secs(3600 + 1800 + 10)
        );
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(parse_duration(" 2s ").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_negative() {
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn test_rejects_missing_unit() {
        assert!(parse_duration("100").is_err());
    }

    #[test]
    fn test_rejects_unknown_unit() {
        let err = parse_duration("5d").unwrap_err();
        assert!(err.reason.contains("unknown unit"));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
    }

    #[test]
    fn test_rejects_unit_only() {
        assert!(parse_duration("ms").is_err());
    }
}
