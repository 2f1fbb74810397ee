// Duration parsing for plan timeouts.
// Accepts the same grammar pipeline authors already write for timeouts:
// a sequence of decimal numbers, each with an optional fraction and a unit,
// such as "300ms", "1.5h" or "2h45m".

use std::time::Duration;

/// Error returned when a duration string cannot be parsed.
///
/// The message is user facing and is embedded verbatim by callers
/// (e.g. `parse timeout: time: invalid duration "bogus"`).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DurationParseError {
    message: String,
}

impl DurationParseError {
    fn invalid(input: &str) -> Self {
        Self {
            message: format!("time: invalid duration {input:?}"),
        }
    }

    fn missing_unit(input: &str) -> Self {
        Self {
            message: format!("time: missing unit in duration {input:?}"),
        }
    }

    fn unknown_unit(unit: &str, input: &str) -> Self {
        Self {
            message: format!("time: unknown unit {unit:?} in duration {input:?}"),
        }
    }
}

const NANOSECOND: u128 = 1;
const MICROSECOND: u128 = 1_000 * NANOSECOND;
const MILLISECOND: u128 = 1_000 * MICROSECOND;
const SECOND: u128 = 1_000 * MILLISECOND;
const MINUTE: u128 = 60 * SECOND;
const HOUR: u128 = 60 * MINUTE;

/// Largest representable duration, matching a signed 64-bit nanosecond count.
const MAX_NANOS: u128 = i64::MAX as u128;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(NANOSECOND),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(MICROSECOND),
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        _ => None,
    }
}

/// Parse a duration string such as `"1ms"`, `"1h30m"` or `"-2.5s"`.
///
/// Negative durations parse successfully and clamp to zero, so a negative
/// timeout expires immediately.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let mut s = input;
    let mut negative = false;

    if let Some(rest) = s.strip_prefix('-') {
        negative = true;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(DurationParseError::invalid(input));
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let first = s.as_bytes()[0];
        if !(first == b'.' || first.is_ascii_digit()) {
            return Err(DurationParseError::invalid(input));
        }

        // Integer part
        let int_len = s.bytes().take_while(u8::is_ascii_digit).count();
        let whole: u128 = if int_len > 0 {
            s[..int_len]
                .parse::<u128>()
                .ok()
                .filter(|v| *v <= MAX_NANOS)
                .ok_or_else(|| DurationParseError::invalid(input))?
        } else {
            0
        };
        s = &s[int_len..];

        // Fractional part
        let mut fraction: u128 = 0;
        let mut scale: u128 = 1;
        let mut frac_len = 0;
        if let Some(rest) = s.strip_prefix('.') {
            s = rest;
            for b in s.bytes().take_while(u8::is_ascii_digit) {
                // Digits beyond nanosecond precision cannot change the result.
                if scale < 10u128.pow(18) {
                    fraction = fraction * 10 + u128::from(b - b'0');
                    scale *= 10;
                }
                frac_len += 1;
            }
            s = &s[frac_len..];
        }

        if int_len == 0 && frac_len == 0 {
            // A bare "." with no digits on either side.
            return Err(DurationParseError::invalid(input));
        }

        // Unit
        let unit_len = s
            .char_indices()
            .find(|(_, c)| *c == '.' || c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        if unit_len == 0 {
            return Err(DurationParseError::missing_unit(input));
        }
        let unit = &s[..unit_len];
        s = &s[unit_len..];

        let per_unit =
            unit_nanos(unit).ok_or_else(|| DurationParseError::unknown_unit(unit, input))?;

        let mut value = whole
            .checked_mul(per_unit)
            .filter(|v| *v <= MAX_NANOS)
            .ok_or_else(|| DurationParseError::invalid(input))?;
        if fraction > 0 {
            value += fraction * per_unit / scale;
        }

        total = total
            .checked_add(value)
            .filter(|v| *v <= MAX_NANOS)
            .ok_or_else(|| DurationParseError::invalid(input))?;
    }

    if negative {
        return Ok(Duration::ZERO);
    }

    let secs = (total / SECOND) as u64;
    let nanos = (total % SECOND) as u32;
    Ok(Duration::new(secs, nanos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ns").unwrap(), Duration::from_nanos(250));
        assert_eq!(parse_duration("3us").unwrap(), Duration::from_micros(3));
        assert_eq!(parse_duration("3µs").unwrap(), Duration::from_micros(3));
    }

    #[test]
    fn parses_compound_and_fractional() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.s").unwrap(), Duration::from_secs(1));
        assert_eq!(
            parse_duration("2h45m30.5s").unwrap(),
            Duration::from_millis((2 * 3600 + 45 * 60 + 30) * 1000 + 500)
        );
    }

    #[test]
    fn zero_and_signs() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("+0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("+3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("-3s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn invalid_duration_message() {
        let err = parse_duration("bogus").unwrap_err();
        assert_eq!(err.to_string(), r#"time: invalid duration "bogus""#);

        assert_eq!(
            parse_duration("").unwrap_err().to_string(),
            r#"time: invalid duration """#
        );
        assert_eq!(
            parse_duration(".s").unwrap_err().to_string(),
            r#"time: invalid duration ".s""#
        );
    }

    #[test]
    fn missing_and_unknown_units() {
        assert_eq!(
            parse_duration("10").unwrap_err().to_string(),
            r#"time: missing unit in duration "10""#
        );
        assert_eq!(
            parse_duration("10y").unwrap_err().to_string(),
            r#"time: unknown unit "y" in duration "10y""#
        );
    }

    #[test]
    fn overflow_is_invalid() {
        assert!(parse_duration("9999999999999999999h").is_err());
        assert!(parse_duration("3000000h").is_err());
    }
}
