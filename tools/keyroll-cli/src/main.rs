//! Keyroll CLI: inspect songs and export them as tall piano-roll images.
//!
//! Usage:
//!   keyroll export <SONG>   Export a song to one tall PNG
//!   keyroll plan <SONG>     Show how the export is split into passes
//!   keyroll info <SONG>     Show song information
//!   keyroll check           Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use keyroll_common::config::AppConfig;
use keyroll_render_engine::export::Exporter;

mod commands;

#[derive(Parser)]
#[command(
    name = "keyroll",
    about = "MIDI piano-roll viewer with tall image export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Export geometry overrides shared by `export` and `plan`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GeometryArgs {
    /// Pixels per second of song time
    #[arg(long)]
    resolution: Option<f64>,

    /// Render buffer width, which is also the image width
    #[arg(long)]
    width: Option<u32>,

    /// Render buffer height
    #[arg(long)]
    buffer_height: Option<u32>,

    /// Semitones added to every note
    #[arg(long, allow_hyphen_values = true)]
    pitch_shift: Option<i32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a song to a tall PNG image
    Export {
        /// Song file (.json, .mid, .midi)
        song: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        geometry: GeometryArgs,

        /// Roll style JSON file
        #[arg(long)]
        style: Option<PathBuf>,
    },

    /// Print the pass plan for an export
    Plan {
        /// Song file (.json, .mid, .midi)
        song: PathBuf,

        #[command(flatten)]
        geometry: GeometryArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show song information
    Info {
        /// Song file (.json, .mid, .midi)
        song: PathBuf,
    },

    /// Show the effective configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    keyroll_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            song,
            output,
            geometry,
            style,
        } => {
            let exporter = Exporter::new();
            commands::export::run(&exporter, &config, song, output, geometry, style).await
        }
        Commands::Plan {
            song,
            geometry,
            json,
        } => commands::plan::run(&config, song, geometry, json),
        Commands::Info { song } => commands::info::run(&config, song),
        Commands::Check => commands::check::run(&config),
    }
}
