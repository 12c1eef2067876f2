//! geotrigger CLI - Command-line interface
//!
//! Replays recorded routes against a set of trigger conditions and inspects
//! how conditions are classified at a given location.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::check::CheckArgs;
use commands::config::ConfigCommands;
use commands::replay::ReplayArgs;
use error::CliError;
use runner::{CliRunner, GlobalOptions};

#[derive(Debug, Parser)]
#[command(name = "geotrigger", version, about = "Proximity triggers for geo-anchored conditions")]
struct Cli {
    /// Configuration file (defaults to the per-user config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a route file and report conditions as they come into range
    Replay {
        /// Route file: JSON array of {"lat": .., "long": ..} points
        route: PathBuf,

        /// Conditions file (JSON array); uses the configured service if omitted
        #[arg(long)]
        conditions: Option<PathBuf>,

        /// Seconds between route points
        #[arg(long)]
        interval: Option<f64>,

        /// Lower bound of simulated speed in m/s
        #[arg(long)]
        min_speed: Option<f64>,

        /// Upper bound of simulated speed in m/s
        #[arg(long)]
        max_speed: Option<f64>,

        /// Start over after the last point instead of exiting
        #[arg(long = "loop")]
        looping: bool,

        /// Local user identity; enables self-origin suppression
        #[arg(long)]
        identity: Option<String>,

        /// Maximum retrieval range in meters
        #[arg(long)]
        max_range: Option<f64>,

        /// Categories handled by a simulated camera (repeatable)
        #[arg(long = "actuator", value_name = "CATEGORY")]
        actuators: Vec<String>,

        /// Simulated capture time in milliseconds
        #[arg(long, default_value_t = 500)]
        capture_delay_ms: u64,

        /// Post flushed triggers to the configured service instead of stdout
        #[arg(long)]
        post_results: bool,
    },

    /// Classify the conditions in a file against one location
    Check {
        /// Conditions file (JSON array)
        conditions: PathBuf,

        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Speed in m/s
        #[arg(long)]
        speed: Option<f64>,

        /// Bearing in degrees clockwise from north
        #[arg(long)]
        bearing: Option<f64>,

        /// Maximum retrieval range in meters
        #[arg(long)]
        max_range: Option<f64>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let options = GlobalOptions {
        config: cli.config,
        verbose: cli.verbose,
        log_file: cli.log_file,
    };

    match cli.command {
        Commands::Config { command } => commands::config::run(command, options.config.as_deref()),
        Commands::Replay {
            route,
            conditions,
            interval,
            min_speed,
            max_speed,
            looping,
            identity,
            max_range,
            actuators,
            capture_delay_ms,
            post_results,
        } => {
            let runner = CliRunner::new(&options)?;
            commands::replay::run(
                &runner,
                ReplayArgs {
                    route,
                    conditions,
                    interval_secs: interval,
                    min_speed,
                    max_speed,
                    looping,
                    identity,
                    max_range,
                    actuators,
                    capture_delay_ms,
                    post_results,
                },
            )
        }
        Commands::Check {
            conditions,
            lat,
            lon,
            speed,
            bearing,
            max_range,
        } => {
            let runner = CliRunner::new(&options)?;
            commands::check::run(
                &runner,
                CheckArgs {
                    conditions,
                    latitude: lat,
                    longitude: lon,
                    speed,
                    bearing,
                    max_range,
                },
            )
        }
    }
}
