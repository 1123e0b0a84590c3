//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::{add, flush, list, remove, replay, reset, track};

/// Staged progress tracking over arbitrary events.
///
/// Trackers belong to groups (a user, a device, a client). Each event fed
/// to a group advances the trackers whose conditions and limiters allow it.
#[derive(Debug, Parser)]
#[command(name = "dt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Add one or more trackers to a group.
    Add(add::AddArgs),

    /// Evaluate one event against a group.
    Track(track::TrackArgs),

    /// Replay a JSON Lines file of events, groups in parallel.
    Replay(replay::ReplayArgs),

    /// Show trackers.
    List(list::ListArgs),

    /// Remove one tracker, or every tracker of a group.
    Remove(remove::RemoveArgs),

    /// Rewind a tracker's progress, limiters, or both.
    Reset(reset::ResetArgs),

    /// Delete every group from the store and cache.
    Flush(flush::FlushArgs),
}
