//! Flush command for deleting all tracker state.

use std::io::Write;

use anyhow::{Result, bail};
use clap::Args;
use dt_core::Error;

use crate::Backend;

#[derive(Debug, Args)]
pub struct FlushArgs {
    /// Confirm deleting every group. Required.
    #[arg(long)]
    pub yes: bool,
}

pub fn run<W: Write>(writer: &mut W, backend: &Backend, args: &FlushArgs) -> Result<()> {
    match backend.engine.flush(args.yes) {
        Ok(()) => {}
        Err(Error::ConfirmationRequired) => {
            bail!("flush deletes every tracker group; rerun with --yes to confirm")
        }
        Err(err) => return Err(err.into()),
    }
    writeln!(writer, "Flushed all tracker groups")?;
    Ok(())
}
