use anyhow::Result;
use clap::Parser;

use inwatch::Settings;
use inwatch::cli::commands::{init, watch};
use inwatch::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    inwatch::logging::init_with_config(&config.logging);

    match &cli.command {
        Commands::Init { force } => init::run_init(*force),
        Commands::Config => {
            let source = cli.config.clone().or_else(Settings::config_path);
            init::run_config(&config, source);
        }
        Commands::Watch(args) => watch::run_watch(args, &config)?,
    }

    Ok(())
}
