//! Add command for registering trackers on a group.

use std::io::Write;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use dt_core::{Expiry, GroupId, Tracker};
use serde_json::Value;

use super::util;
use crate::Backend;

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Group to add the trackers to.
    pub group: String,

    /// Tracker definition as JSON: one object or an array. `-` reads stdin.
    pub definition: String,

    /// Expire the trackers this many seconds after adding them.
    #[arg(long)]
    pub expire: Option<u64>,

    /// Expire the trackers at this time (RFC 3339 or Unix seconds).
    #[arg(long, value_parser = util::parse_timestamp)]
    pub expire_at: Option<DateTime<Utc>>,
}

/// Parses one tracker object or an array of them.
pub fn parse_definitions(text: &str) -> Result<Vec<Tracker>> {
    let value: Value = serde_json::from_str(text).context("tracker definition is not valid JSON")?;
    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        _ => bail!("tracker definition must be a JSON object or array"),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).with_context(|| format!("invalid tracker at index {index}"))
        })
        .collect()
}

fn expiry(args: &AddArgs) -> Result<Expiry> {
    let expire = match args.expire {
        Some(secs) => Some(
            i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .with_context(|| format!("--expire {secs} is too large"))?,
        ),
        None => None,
    };
    Ok(Expiry {
        expire,
        expire_at: args.expire_at,
    })
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &AddArgs) -> Result<()> {
    let group_id = GroupId::new(args.group.as_str())?;
    let trackers = parse_definitions(&util::read_source(&args.definition)?)?;
    if trackers.is_empty() {
        bail!("no trackers to add");
    }

    let report = backend
        .engine
        .add_trackers(&group_id, trackers, expiry(args)?)
        .with_context(|| format!("failed to add trackers to group {group_id}"))?;

    for name in &report.added {
        writeln!(writer, "Added tracker {name} to group {group_id}")?;
    }
    for err in &report.rejected {
        writeln!(writer, "Rejected: {err}")?;
    }
    if !report.rejected.is_empty() {
        bail!("{} tracker(s) rejected", report.rejected.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use insta::assert_snapshot;

    fn args(group: &str, definition: &str) -> AddArgs {
        AddArgs {
            group: group.to_string(),
            definition: definition.to_string(),
            expire: None,
            expire_at: None,
        }
    }

    #[test]
    fn test_add_single_and_batch() {
        let backend = Backend::in_memory(&Config::default()).unwrap();
        let mut output = Vec::new();

        run(
            &mut output,
            &backend,
            &args("user-1", r#"{"name": "logins", "kind": "count", "targets": [3]}"#),
        )
        .unwrap();
        run(
            &mut output,
            &backend,
            &args(
                "user-1",
                r#"[
                    {"name": "spend", "kind": "accumulation", "key": "amount", "targets": [10, 50]},
                    {"name": "level", "kind": "numeric", "key": "level", "targets": [5]}
                ]"#,
            ),
        )
        .unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Added tracker logins to group user-1
        Added tracker spend to group user-1
        Added tracker level to group user-1
        ");
        let group_id = GroupId::new("user-1").unwrap();
        assert_eq!(backend.engine.get_trackers(&group_id, None).unwrap().len(), 3);
    }

    #[test]
    fn test_add_reports_rejections() {
        let backend = Backend::in_memory(&Config::default()).unwrap();
        let mut output = Vec::new();
        let definition = r#"[
            {"name": "a", "kind": "count", "targets": [1]},
            {"name": "a", "kind": "count", "targets": [2]},
            {"name": "b", "kind": "count", "targets": [3, 2]}
        ]"#;

        let err = run(&mut output, &backend, &args("g", definition)).unwrap_err();
        assert_eq!(err.to_string(), "2 tracker(s) rejected");
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Added tracker a to group g
        Rejected: tracker b has invalid target 2 at stage 1: targets must be finite, positive and strictly increasing
        Rejected: tracker a already exists in group g
        ");
    }

    #[test]
    fn test_add_rejects_malformed_definitions() {
        assert!(parse_definitions("42").is_err());
        assert!(parse_definitions("{not json").is_err());
        let err = parse_definitions(r#"[{"name": "x", "kind": "count"}]"#).unwrap_err();
        assert_eq!(err.to_string(), "invalid tracker at index 0");
    }

    #[test]
    fn test_add_with_expiry() {
        let backend = Backend::in_memory(&Config::default()).unwrap();
        let mut output = Vec::new();
        let mut args = args("g", r#"{"name": "daily", "kind": "count", "targets": [1]}"#);
        args.expire = Some(3600);

        run(&mut output, &backend, &args).unwrap();
        let group_id = GroupId::new("g").unwrap();
        let tracker = &backend.engine.get_trackers(&group_id, None).unwrap()[0];
        let remaining = tracker.expire_at().unwrap() - Utc::now();
        assert!(remaining <= Duration::hours(1));
        assert!(remaining > Duration::minutes(59));
    }
}
