//! Huddle CLI - run and inspect a collaboration coordination server.
//!
//! This binary provides a `huddle` command that loads a TOML configuration,
//! starts a server and reports its status.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use huddle_core::HuddleConfig;
use huddle_core::logging::init_logging;

use commands::{config, demo, serve};

/// Huddle - coordination engine for collaborating workers
#[derive(Parser, Debug)]
#[command(name = "huddle", author, version, about = "Huddle - collaboration coordination server")]
struct Args {
    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a server and run until interrupted
    ///
    /// Prints the status snapshot on shutdown.
    Serve {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Output the final status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a scripted collaboration session and print what happened
    ///
    /// Registers workers, opens a space with a whiteboard and shared files,
    /// exercises locking and messaging, then prints the server status.
    Demo {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HuddleConfig> {
    let config = match path {
        Some(path) => HuddleConfig::load(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?,
        None => HuddleConfig::default(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut huddle_config = load_config(args.config.as_ref())?;
    if let Some(level) = args.log_level {
        huddle_config.logging.level = level;
    }
    init_logging(&huddle_config.logging)?;

    match args.command {
        Command::Serve { duration_secs, json } => {
            serve::execute(huddle_config, duration_secs, json).await
        }
        Command::Demo { json } => demo::execute(huddle_config, json),
        Command::Config { json } => config::execute(&huddle_config, json),
    }
}
