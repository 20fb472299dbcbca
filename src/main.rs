//! statecraft - hierarchical state machine runner
//!
//! Loads statecharts from YAML or JSON and validates them, runs them
//! against scripted events, or drives them from an interactive REPL.

mod commands;
mod config;
mod repl;
mod script;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statecraft")]
#[command(about = "Run and inspect hierarchical state machines")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "STATECRAFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a chart and report problems
    Validate {
        /// Chart file (.yaml, .yml or .json)
        chart: PathBuf,
    },

    /// Start a chart, post events, and process them
    Run {
        /// Chart file (.yaml, .yml or .json)
        chart: PathBuf,

        /// Event script to post after the -e events
        #[arg(long)]
        events: Option<PathBuf>,

        /// Event type to post (repeatable)
        #[arg(short = 'e', long = "event")]
        event: Vec<String>,
    },

    /// Drive a chart interactively
    Repl {
        /// Chart file (.yaml, .yml or .json)
        chart: PathBuf,
    },

    /// Print the effective configuration
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return Err(e.into());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    colored::control::set_override(config.output.color);
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    let result = match cli.command {
        Commands::Repl { chart } => return repl::run(&chart, &config),
        Commands::Validate { chart } => commands::validate(&chart),
        Commands::Run {
            chart,
            events,
            event,
        } => commands::run(&chart, events.as_deref(), &event, &config),
        Commands::Config { write } => commands::show_config(&config, write.as_deref()),
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
