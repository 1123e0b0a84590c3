//! Remove command.

use std::io::Write;

use anyhow::Result;
use clap::Args;
use dt_core::{GroupId, TrackerName};

use crate::Backend;

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Group to remove trackers from.
    pub group: String,

    /// Tracker to remove. Removes every tracker of the group when omitted.
    pub name: Option<String>,
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &RemoveArgs) -> Result<()> {
    let group_id = GroupId::new(args.group.as_str())?;
    let name = args
        .name
        .as_deref()
        .map(TrackerName::new)
        .transpose()?;

    let removed = backend.engine.remove_tracker(&group_id, name.as_ref())?;
    for tracker in &removed {
        writeln!(writer, "Removed tracker {} from group {group_id}", tracker.name())?;
    }
    Ok(())
}
