use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "framepress")]
#[command(author, version, about = "Adaptive video compression with format preservation")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compress a video toward a target size
    Compress {
        /// Input video file
        #[arg(required = true)]
        input: PathBuf,

        /// Target output size in megabytes
        #[arg(short, long)]
        target_mb: f64,

        /// Quality tier: highest, high, balanced, fast (defaults to config)
        #[arg(long)]
        tier: Option<String>,

        /// Drop the source audio
        #[arg(long)]
        no_audio: bool,

        /// Allow switching container family
        #[arg(long)]
        no_preserve_format: bool,

        /// Directory for the output file (defaults to the input's directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the extracted thumbnail here
        #[arg(long)]
        thumbnail: Option<PathBuf>,

        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Probe a media file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the resolved preset table and bitrate brackets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
