use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Transcribe and translate subtitles for video files", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every command that produces subtitles
#[derive(clap::Args, Debug, Clone)]
pub struct RunOptions {
    /// Output languages (comma-separated), e.g. en,es,fr
    #[arg(short, long)]
    pub languages: String,

    /// Whisper model to transcribe with (tiny, base, small, medium, large)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Translation backend (deepl, google, ollama)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// DeepL API key; also read from DEEPL_API_KEY
    #[arg(long, env = "DEEPL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Write WebVTT instead of SRT
    #[arg(long)]
    pub webvtt: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate translated subtitles for a single media file
    Process {
        /// Input media file
        input: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Generate subtitles for several files, or every media file in a directory
    Batch {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Manage the transcription cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List the detected graphics cards
    Gpus,

    /// List the supported language codes
    Languages,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// List cached transcriptions, most recently used first
    List,

    /// Remove every cached transcription
    Clear,

    /// Show cache statistics
    Info,
}
