mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use d64_core::{CancelToken, Config};
use tracing::{debug, error, warn};

use cli::{Cli, Commands};
use commands::App;

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if cli.serial.is_some() {
        config.serial = cli.serial.clone();
    }
    debug!(?config, "Configuration");

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!(error = %e, "Cannot install Ctrl+C handler");
    }

    let app = App {
        config,
        cancel,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    match &cli.command {
        Commands::List => commands::list(&app),
        Commands::Upload(args) => commands::upload(&app, args),
        Commands::Download(args) => commands::download(&app, args),
        Commands::Cic { cic } => commands::cic(&app, cic),
        Commands::Savetype { save_type } => commands::savetype(&app, save_type),
        Commands::Extended { enable } => commands::extended(&app, enable),
        Commands::Firmware { command } => commands::firmware(&app, command),
        Commands::Debug => commands::debug(&app),
    }
}

/// Default log directive; `RUST_LOG` still overrides it.
fn log_level(quiet: bool, verbose: bool) -> tracing::Level {
    if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::ERROR
    } else {
        tracing::Level::INFO
    }
}

fn main() {
    let cli = Cli::parse();

    let level = log_level(cli.quiet, cli.verbose);
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    if let Err(e) = run(cli) {
        match e.downcast_ref::<d64_core::Error>() {
            Some(d64_core::Error::Cancelled) => error!("SIGINT caught, exiting"),
            _ => error!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}
