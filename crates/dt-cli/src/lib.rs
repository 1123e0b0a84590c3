//! Tracking engine CLI library.
//!
//! This crate provides the `dt` command-line interface over the SQLite
//! backends.

mod backend;
mod cli;
pub mod commands;
mod config;

pub use backend::Backend;
pub use cli::{Cli, Commands};
pub use config::Config;
