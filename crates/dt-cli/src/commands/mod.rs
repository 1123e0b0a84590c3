//! CLI subcommand implementations.

pub mod add;
pub mod flush;
pub mod list;
pub mod remove;
pub mod replay;
pub mod reset;
pub mod track;
pub mod util;
