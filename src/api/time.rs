//! Graphite-style relative time parsing for the `from`/`until` query
//! parameters: epoch seconds, the literal `now`, or a `-<n><unit>` offset
//! from now (`s`, `min`/`m`, `h`, `d`, `w`, `mon`, `y`).

use crate::error::{CarbonApiError, ErrorKind};

pub fn parse_time(input: &str, now: i64) -> Result<i64, CarbonApiError> {
    let s = input.trim();
    if s.eq_ignore_ascii_case("now") {
        return Ok(now);
    }
    if let Ok(epoch) = s.parse::<i64>() {
        return Ok(epoch);
    }
    if let Some(rest) = s.strip_prefix('-') {
        return parse_offset(rest, now, -1);
    }
    if let Some(rest) = s.strip_prefix('+') {
        return parse_offset(rest, now, 1);
    }
    Err(CarbonApiError::new(ErrorKind::InvalidArg, format!("unparseable time: {input}")).invalid_arg())
}

fn parse_offset(rest: &str, now: i64, sign: i64) -> Result<i64, CarbonApiError> {
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return Err(CarbonApiError::new(ErrorKind::InvalidArg, format!("unparseable time offset: {rest}")).invalid_arg());
    }
    let n: i64 = rest[..digits_end].parse().unwrap();
    let unit = &rest[digits_end..];
    let seconds = match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => n,
        "min" | "mins" | "minute" | "minutes" => n * 60,
        "h" | "hour" | "hours" => n * 3600,
        "d" | "day" | "days" => n * 86400,
        "w" | "week" | "weeks" => n * 7 * 86400,
        "mon" | "month" | "months" => n * 30 * 86400,
        "y" | "year" | "years" => n * 365 * 86400,
        _ => {
            return Err(CarbonApiError::new(ErrorKind::UnknownTimeUnits, format!("unknown time unit: {unit}")).invalid_arg())
        }
    };
    Ok(now + sign * seconds)
}

/// Applies `truncate_time_sec` (rounds `from`/`until` down to a boundary, the
/// way a CDN-fronted deployment does to raise cache hit rates) when configured.
pub fn truncate(value: i64, truncate_sec: Option<i64>) -> i64 {
    match truncate_sec {
        Some(t) if t > 0 => (value / t) * t,
        _ => value,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_now_and_epoch() {
        assert_eq!(parse_time("now", 1000).unwrap(), 1000);
        assert_eq!(parse_time("500", 1000).unwrap(), 500);
    }

    #[test]
    fn parses_relative_offsets() {
        assert_eq!(parse_time("-1h", 3600).unwrap(), 0);
        assert_eq!(parse_time("-10min", 1000).unwrap(), 400);
        assert_eq!(parse_time("-1d", 86400).unwrap(), 0);
    }

    #[test]
    fn unknown_unit_is_an_error() {
        let err = parse_time("-5fortnights", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownTimeUnits);
    }

    #[test]
    fn truncate_rounds_down_to_boundary() {
        assert_eq!(truncate(125, Some(60)), 120);
        assert_eq!(truncate(125, None), 125);
    }
}
