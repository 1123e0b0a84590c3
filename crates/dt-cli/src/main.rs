use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dt_cli::commands::{add, flush, list, remove, replay, reset, track};
use dt_cli::{Backend, Cli, Commands, Config};

/// Load config and open the configured backends.
fn open_backend(config_path: Option<&Path>) -> Result<Backend> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Backend::open(&config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let backend = open_backend(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Add(args) => add::run(&mut stdout, &backend, args)?,
        Commands::Track(args) => track::run(&mut stdout, &backend, args)?,
        Commands::Replay(args) => replay::run(&mut stdout, &backend, args)?,
        Commands::List(args) => list::run(&mut stdout, &backend, args)?,
        Commands::Remove(args) => remove::run(&mut stdout, &backend, args)?,
        Commands::Reset(args) => reset::run(&mut stdout, &backend, args)?,
        Commands::Flush(args) => flush::run(&mut stdout, &backend, args)?,
    }
    stdout.flush()?;

    Ok(())
}
