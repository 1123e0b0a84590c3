//! Reset command.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use dt_core::{GroupId, ResetPolicy, TrackerName};

use super::util::{format_number, format_target, stage_label, status};
use crate::Backend;

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Group of the tracker.
    pub group: String,

    /// Tracker to reset.
    pub name: String,

    /// What to reset: progress, limiter or all.
    #[arg(long, default_value_t = ResetPolicy::All)]
    pub policy: ResetPolicy,
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &ResetArgs) -> Result<()> {
    let group_id = GroupId::new(args.group.as_str())?;
    let name = TrackerName::new(args.name.as_str())?;

    let tracker = backend.engine.reset_tracker(&group_id, &name, args.policy)?;
    writeln!(
        writer,
        "Reset {} of tracker {name} in group {group_id}: {}/{} stage {} {}",
        args.policy,
        format_number(tracker.progress()),
        format_target(&tracker),
        stage_label(&tracker),
        status(&tracker)
    )?;
    Ok(())
}
