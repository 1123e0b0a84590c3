//! Shared utilities for CLI commands.

use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use dt_core::Tracker;

/// Reads a JSON argument: the literal text, or standard input for `-`.
pub fn read_source(arg: &str) -> Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read standard input")?;
    Ok(input)
}

/// Parses an absolute time as RFC 3339 or Unix seconds.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let Ok(secs) = s.parse::<i64>() else {
        bail!("Invalid time: {s}. Use RFC 3339 (e.g., 2026-01-15T10:30:00Z) or Unix seconds");
    };
    DateTime::from_timestamp(secs, 0).with_context(|| format!("time out of range: {s}"))
}

/// Formats a progress value without a trailing `.0` for whole numbers.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Formats the current target, or `-` when the tracker has none.
pub fn format_target(tracker: &Tracker) -> String {
    tracker.target().map_or_else(|| "-".to_string(), format_number)
}

/// Short status for tables.
pub fn status(tracker: &Tracker) -> &'static str {
    match (tracker.is_completed(), tracker.is_limited()) {
        (true, true) => "completed, limited",
        (true, false) => "completed",
        (false, true) => "limited",
        (false, false) => "active",
    }
}

/// `current/total` stage label, 1-based.
pub fn stage_label(tracker: &Tracker) -> String {
    format!("{}/{}", tracker.stage() + 1, tracker.targets().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_accepts_rfc3339_and_unix_seconds() {
        let rfc = parse_timestamp("2026-01-15T10:30:00Z").unwrap();
        let unix = parse_timestamp("1768473000").unwrap();
        assert_eq!(rfc, unix);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("tomorrow").unwrap_err();
        assert!(err.to_string().contains("Invalid time"));
    }

    #[test]
    fn test_format_number_drops_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(12.5), "12.5");
    }

    #[test]
    fn test_format_target_handles_missing_target() {
        let name = dt_core::TrackerName::new("t").unwrap();
        assert_eq!(format_target(&Tracker::count(name.clone(), [10.0])), "10");
        assert_eq!(
            format_target(&Tracker::new(name, dt_core::TrackerKind::Count, Vec::new())),
            "-"
        );
    }
}
