//! List command for showing trackers and their progress.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use dt_core::{GroupId, Tracker, TrackerKind, TrackerName};
use serde::Serialize;

use super::util::{format_number, format_target, stage_label, status};
use crate::Backend;

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Group to list. Lists every stored group when omitted.
    pub group: Option<String>,

    /// Only show the tracker with this name.
    #[arg(long, requires = "group")]
    pub name: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Trackers of one group, for display.
#[derive(Debug, Clone, Serialize)]
pub struct GroupEntry {
    pub group: GroupId,
    pub trackers: Vec<Tracker>,
}

/// Collects the requested groups through the engine.
pub fn get_groups_for_display(backend: &Backend, args: &ListArgs) -> Result<Vec<GroupEntry>> {
    let group_ids = match &args.group {
        Some(group) => vec![GroupId::new(group.as_str())?],
        None => backend.store.group_ids().context("failed to list groups")?,
    };
    let name = args
        .name
        .as_deref()
        .map(TrackerName::new)
        .transpose()?;

    let mut entries = Vec::new();
    for group in group_ids {
        let trackers = backend.engine.get_trackers(&group, name.as_ref())?;
        if !trackers.is_empty() {
            entries.push(GroupEntry { group, trackers });
        }
    }
    Ok(entries)
}

fn kind_label(kind: &TrackerKind) -> String {
    match kind {
        TrackerKind::Count => "count".to_string(),
        TrackerKind::Numeric { key } => format!("numeric({key})"),
        TrackerKind::Accumulation { key } => format!("sum({key})"),
    }
}

/// Format groups for human-readable output.
pub fn format_groups(entries: &[GroupEntry]) -> String {
    let mut output = String::new();

    if entries.is_empty() {
        let _ = writeln!(output, "No trackers.");
        return output;
    }

    let _ = writeln!(
        output,
        "{:<12}  {:<14}  {:<14}  {:>5}  {:>12}  Status",
        "Group", "Tracker", "Kind", "Stage", "Progress"
    );
    for entry in entries {
        for tracker in &entry.trackers {
            let progress = format!(
                "{}/{}",
                format_number(tracker.progress()),
                format_target(tracker)
            );
            let _ = writeln!(
                output,
                "{:<12}  {:<14}  {:<14}  {:>5}  {:>12}  {}",
                entry.group.as_str(),
                tracker.name().as_str(),
                kind_label(tracker.kind()),
                stage_label(tracker),
                progress,
                status(tracker)
            );
        }
    }
    output
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &ListArgs) -> Result<()> {
    let entries = get_groups_for_display(backend, args)?;
    if args.json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else {
        write!(writer, "{}", format_groups(&entries))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use dt_core::{Event, Expiry};
    use insta::assert_snapshot;
    use serde_json::json;

    fn name(s: &str) -> TrackerName {
        TrackerName::new(s).unwrap()
    }

    fn args(group: Option<&str>) -> ListArgs {
        ListArgs {
            group: group.map(String::from),
            name: None,
            json: false,
        }
    }

    fn populated() -> Backend {
        let backend = Backend::in_memory(&Config::default()).unwrap();
        let alice = GroupId::new("alice").unwrap();
        let bob = GroupId::new("bob").unwrap();
        backend
            .engine
            .add_trackers(
                &alice,
                [
                    Tracker::count(name("logins"), [3.0]),
                    Tracker::accumulation(name("spend"), "amount", [10.0, 100.0]),
                ],
                Expiry::never(),
            )
            .unwrap();
        backend
            .engine
            .add_tracker(&bob, Tracker::numeric(name("level"), "level", [5.0]), Expiry::never())
            .unwrap();
        let event = Event::try_from(json!({"amount": 25, "level": 2})).unwrap();
        backend.engine.track(&alice, &event).unwrap();
        backend.engine.track(&bob, &event).unwrap();
        backend
    }

    #[test]
    fn test_list_empty() {
        let backend = Backend::in_memory(&Config::default()).unwrap();
        let mut output = Vec::new();
        run(&mut output, &backend, &args(None)).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @"No trackers.");
    }

    #[test]
    fn test_list_all_groups() {
        let backend = populated();
        let mut output = Vec::new();
        run(&mut output, &backend, &args(None)).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Group         Tracker         Kind            Stage      Progress  Status
        alice         logins          count             1/1           1/3  active
        alice         spend           sum(amount)       2/2        25/100  active
        bob           level           numeric(level)    1/1           2/5  active
        ");
    }

    #[test]
    fn test_list_single_tracker_as_json() {
        let backend = populated();
        let mut output = Vec::new();
        let args = ListArgs {
            group: Some("bob".to_string()),
            name: Some("level".to_string()),
            json: true,
        };
        run(&mut output, &backend, &args).unwrap();

        let parsed: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(parsed[0]["group"], "bob");
        assert_eq!(parsed[0]["trackers"][0]["name"], "level");
        assert_eq!(parsed[0]["trackers"][0]["progress"], 2.0);
    }
}
