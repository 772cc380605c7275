//! CLI argument parsing using clap.

use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;
use std::time::Duration;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Inotify watch manager
#[derive(Parser)]
#[command(
    name = "inwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch directories through inotify",
    long_about = "Watch files and directory trees through inotify, following new \
                  subdirectories and dropping watches whose target moved.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Set up .inwatch directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,

    /// Watch paths and print events
    #[command(
        about = "Watch paths and print one line per event",
        after_help = "Output columns (tab separated):\n  wd  EVENTS  cookie  path\n\nExamples:\n  inwatch watch /tmp/x\n  inwatch watch -r --auto-add src\n  inwatch watch -e create,delete --timeout 10 /tmp/x"
    )]
    Watch(WatchArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Files or directories to watch
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Watch every directory below each path
    #[arg(short, long)]
    pub recursive: bool,

    /// Events to print, e.g. "create,delete" or "all" (overrides config)
    #[arg(short, long, value_name = "EVENTS")]
    pub events: Option<String>,

    /// Watch directories created under watched directories
    #[arg(long)]
    pub auto_add: bool,

    /// Drop watches whose target is moved
    #[arg(long)]
    pub remove_moved: bool,

    /// Watch symlinks themselves instead of their targets
    #[arg(long)]
    pub no_follow: bool,

    /// Add recursive watches children first
    #[arg(long)]
    pub bottom_up: bool,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Dispatch events from a background thread
    #[arg(long)]
    pub threaded: bool,
}

/// Parse a non-negative, finite number of seconds.
fn parse_timeout(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    if secs < 0.0 {
        return Err(format!("'{value}' is negative"));
    }
    Duration::try_from_secs_f64(secs).map_err(|err| format!("'{value}': {err}"))
}
