//! Video Digest CLI
//!
//! Command-line front end for the adaptive video analysis pipeline.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::analyze::AnalyzeCommand;
use commands::config::ConfigCommand;

#[derive(Parser)]
#[command(
    name = "video-digest",
    version,
    about = "Caption and transcribe videos into a timestamped report",
    long_about = "Samples frames adaptively (scene changes plus a minimum rate), captions them in\n\
                  batches with a vision-language model and transcribes the audio track with\n\
                  Whisper. Both branches run concurrently.",
    after_help = "EXAMPLES:\n  \
                  # Analyze with defaults\n  \
                  video-digest analyze lecture.mp4\n\n  \
                  # Denser sampling, German audio, JSON output\n  \
                  video-digest analyze --max-interval 4 --language de --json talk.mkv\n\n  \
                  # Show the effective configuration\n  \
                  video-digest config --config digest.yaml\n\n\
                  MODELS:\n  \
                  Speech weights default to int8, so models/whisper/ggml-base.bin is loaded\n  \
                  as models/whisper/ggml-base-q8_0.bin. Set models.speech_precision: full to\n  \
                  load the configured file as is. `video-digest config` lists the files used.\n\n\
                  Set RUST_LOG to override the log filter, VIDEO_DIGEST_THREADS to cap threads."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one video and print its report
    Analyze(AnalyzeCommand),

    /// Print the effective configuration as YAML
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Config(_) => "warn",
        Commands::Analyze(_) if cli.verbose => "debug",
        Commands::Analyze(_) => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout carries only the report
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Analyze(cmd) => cmd.execute().await,
        Commands::Config(cmd) => cmd.execute(),
    }
}
