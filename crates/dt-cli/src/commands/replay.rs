//! Replay command: feed a JSON Lines file of events through the engine.
//!
//! Each line is `{"group": "<id>", "event": {...}}`. Events of one group are
//! applied in file order; different groups are replayed in parallel.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use dt_core::{Engine, Event, GroupId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::Backend;

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// JSON Lines file to replay. `-` reads stdin.
    pub input: PathBuf,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayLine {
    group: GroupId,
    event: Event,
}

/// Events of one group, in input order.
#[derive(Debug)]
pub struct GroupEvents {
    pub group: GroupId,
    pub events: Vec<Event>,
}

/// Totals for one replayed group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub events: usize,
    pub updated: usize,
    pub completed: usize,
    pub limited: usize,
    pub errors: usize,
}

/// Parses JSON Lines input into per-group batches, ordered by first appearance.
pub fn parse_lines(input: &str) -> Result<Vec<GroupEvents>> {
    let mut batches: Vec<GroupEvents> = Vec::new();
    let mut index: HashMap<GroupId, usize> = HashMap::new();
    for (number, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ReplayLine = serde_json::from_str(line)
            .with_context(|| format!("invalid replay record on line {}", number + 1))?;
        let slot = *index.entry(parsed.group.clone()).or_insert_with(|| {
            batches.push(GroupEvents {
                group: parsed.group.clone(),
                events: Vec::new(),
            });
            batches.len() - 1
        });
        batches[slot].events.push(parsed.event);
    }
    Ok(batches)
}

fn replay_group(engine: &Engine, batch: &GroupEvents) -> Result<GroupSummary> {
    let mut summary = GroupSummary {
        group: batch.group.to_string(),
        events: batch.events.len(),
        ..GroupSummary::default()
    };
    for event in &batch.events {
        let outcome = engine
            .track(&batch.group, event)
            .with_context(|| format!("replay failed for group {}", batch.group))?;
        summary.updated += outcome.dirtied.len();
        summary.completed += outcome.completed.len();
        summary.limited += outcome.limited.len();
        summary.errors += outcome.errors.len();
    }
    Ok(summary)
}

/// Replays every batch. Groups run on the rayon pool.
pub fn replay(engine: &Engine, batches: &[GroupEvents]) -> Result<Vec<GroupSummary>> {
    batches
        .par_iter()
        .map(|batch| replay_group(engine, batch))
        .collect()
}

/// Format summaries for human-readable output.
pub fn format_summaries(summaries: &[GroupSummary]) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:<12}  {:>6}  {:>7}  {:>9}  {:>7}  {:>6}",
        "Group", "Events", "Updated", "Completed", "Limited", "Errors"
    );
    let mut total = GroupSummary {
        group: "total".to_string(),
        ..GroupSummary::default()
    };
    for summary in summaries {
        total.events += summary.events;
        total.updated += summary.updated;
        total.completed += summary.completed;
        total.limited += summary.limited;
        total.errors += summary.errors;
    }
    for summary in summaries.iter().chain(std::iter::once(&total)) {
        let _ = writeln!(
            output,
            "{:<12}  {:>6}  {:>7}  {:>9}  {:>7}  {:>6}",
            summary.group,
            summary.events,
            summary.updated,
            summary.completed,
            summary.limited,
            summary.errors
        );
    }
    output
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &ReplayArgs) -> Result<()> {
    let input = if args.input.as_os_str() == "-" {
        super::util::read_source("-")?
    } else {
        std::fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?
    };
    let batches = parse_lines(&input)?;
    tracing::debug!(groups = batches.len(), "replaying events");

    let summaries = replay(&backend.engine, &batches)?;
    if args.json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&summaries)?)?;
    } else {
        write!(writer, "{}", format_summaries(&summaries))?;
    }
    Ok(())
}
