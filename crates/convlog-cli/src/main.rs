mod config;
mod replay;
mod telemetry;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG: &str = "convlog.toml";

#[derive(Parser)]
#[command(
    name = "convlog",
    version,
    about = "convlog - conversation transcript tracker"
)]
struct Cli {
    /// Path to configuration file [default: convlog.toml, optional]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for run-trace files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory for transcripts
    #[arg(long)]
    transcript_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines client script through the tracker
    Replay {
        /// Script file
        script: PathBuf,

        /// Pause between steps, in milliseconds
        #[arg(long, default_value_t = 0)]
        pace_ms: u64,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => config::load_config(path, true)?,
        None => config::load_config(Path::new(DEFAULT_CONFIG), false)?,
    };
    config.apply_env(|name| std::env::var(name).ok());
    config.apply_flags(cli.log_dir, cli.transcript_dir);

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Replay { script, pace_ms } => {
            let (_guard, log_file) = telemetry::init(&config.paths.log_dir)?;
            warn!(log_file = %log_file.display(), "convlog started");

            let text = std::fs::read_to_string(&script)?;
            let steps = replay::parse_script(&text)?;
            let summary = replay::run(&config, steps, Duration::from_millis(pace_ms)).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
