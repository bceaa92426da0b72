//! Simmer - web asset builder and development server.

use anyhow::Result;
use clap::{ColorChoice, Parser};
use simmer::cli::{self, Cli, Commands, build::build_project, dev::run_dev};
use simmer::logger;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    cli::shutdown::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = cli::load_config(&cli)?;
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    match &cli.command {
        Commands::Build { .. } => runtime.block_on(build_project(&config)).map(|_| ()),
        Commands::Dev { .. } => run_dev(&config, &runtime),
    }
}
