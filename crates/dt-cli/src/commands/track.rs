//! Track command: feed one event to a group.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use clap::Args;
use dt_core::{Event, GroupId, Outcome, Tracker, TrackerName};
use serde::Serialize;

use super::util::{self, format_number, format_target, stage_label, status};
use crate::Backend;

#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Group the event belongs to.
    pub group: String,

    /// Event as a JSON object. `-` reads stdin.
    pub event: String,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// JSON output structure.
#[derive(Debug, Serialize)]
pub struct JsonOutcome<'a> {
    pub group: &'a GroupId,
    pub dirtied: &'a [Tracker],
    pub completed: Vec<&'a TrackerName>,
    pub limited: Vec<&'a TrackerName>,
    pub errors: Vec<String>,
}

impl<'a> JsonOutcome<'a> {
    pub fn new(group: &'a GroupId, outcome: &'a Outcome) -> Self {
        Self {
            group,
            dirtied: &outcome.dirtied,
            completed: outcome.completed.iter().map(Tracker::name).collect(),
            limited: outcome.limited.iter().map(Tracker::name).collect(),
            errors: outcome.errors.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Format an outcome for human-readable output.
pub fn format_outcome(group_id: &GroupId, outcome: &Outcome) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "Group {group_id}: {} updated, {} completed, {} limited",
        outcome.dirtied.len(),
        outcome.completed.len(),
        outcome.limited.len()
    );
    for tracker in &outcome.dirtied {
        let _ = writeln!(
            output,
            "  {}  {}/{}  stage {}  {}",
            tracker.name(),
            format_number(tracker.progress()),
            format_target(tracker),
            stage_label(tracker),
            status(tracker)
        );
    }
    for err in &outcome.errors {
        let _ = writeln!(output, "  error: {err}");
    }
    output
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &TrackArgs) -> Result<()> {
    let group_id = GroupId::new(args.group.as_str())?;
    let text = util::read_source(&args.event)?;
    let value: serde_json::Value =
        serde_json::from_str(&text).context("event is not valid JSON")?;
    let event = Event::try_from(value)?;

    let outcome = backend
        .engine
        .track(&group_id, &event)
        .with_context(|| format!("failed to track event for group {group_id}"))?;

    if args.json {
        let json = serde_json::to_string_pretty(&JsonOutcome::new(&group_id, &outcome))?;
        writeln!(writer, "{json}")?;
    } else {
        write!(writer, "{}", format_outcome(&group_id, &outcome))?;
    }
    Ok(())
}
