//! videosubtitles - transcribe media on the local GPUs and translate the
//! subtitles into any number of languages.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use video_subtitles::cache::TranscriptionCache;
use video_subtitles::cli::{Args, CacheAction, Commands, RunOptions};
use video_subtitles::config::{Config, SubtitleFormat};
use video_subtitles::gpu::{NvidiaSmiProbe, ResourcePool};
use video_subtitles::language::{LANGUAGE_CODES, parse_languages};
use video_subtitles::shutdown::{ShutdownSignal, install_ctrl_c};
use video_subtitles::workflow::Workflow;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;
    info!("videosubtitles version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Gpus => {
            let pool = ResourcePool::from_probe(&NvidiaSmiProbe::new(&config.transcriber.gpu_probe_path))?;
            println!("Found the following Nvidia/CUDA video cards:");
            for card in pool.cards() {
                println!("  [{}]: {}, {:.1} GB", card.id, card.name, card.memory_gb);
            }
        }
        Commands::Languages => {
            println!("{:<8} {}", "Code", "Language");
            println!("{}", "-".repeat(32));
            for (code, name) in LANGUAGE_CODES {
                println!("{:<8} {}", code, name);
            }
        }
        Commands::Cache { action } => {
            let mut cache = TranscriptionCache::open(&config.cache.directory, config.cache.capacity)?;
            match action {
                CacheAction::List => {
                    let entries = cache.entries();
                    if entries.is_empty() {
                        println!("No cached transcriptions found.");
                    } else {
                        println!("\nCached Transcriptions:");
                        println!("{:<20} {:<60}", "Last used", "Transcript");
                        println!("{}", "-".repeat(80));
                        for entry in entries {
                            println!(
                                "{:<20} {:<60}",
                                entry.last_access.format("%Y-%m-%d %H:%M:%S"),
                                entry.transcript_path().display()
                            );
                        }
                    }
                }
                CacheAction::Clear => {
                    let removed = cache.clear()?;
                    println!("Cleared {} cached transcriptions", removed);
                }
                CacheAction::Info => {
                    let entries = cache.entries();
                    let bytes: usize = entries.iter().map(|e| e.transcript_text.len()).sum();
                    println!("\nCache Statistics:");
                    println!("Location: {}", config.cache.directory.display());
                    println!("Entries: {} / {}", cache.len(), cache.capacity());
                    println!("Transcript size: {:.2} KB", bytes as f64 / 1024.0);
                    if let Some(newest) = entries.first() {
                        println!("Most recent: {}", newest.last_access.format("%Y-%m-%d %H:%M:%S"));
                    }
                    if let Some(oldest) = entries.last() {
                        println!("Least recent: {}", oldest.last_access.format("%Y-%m-%d %H:%M:%S"));
                    }
                }
            }
        }
        Commands::Process { input, options } => {
            let languages = apply_options(&mut config, &options)?;
            run(config, vec![input], &languages).await?;
        }
        Commands::Batch { inputs, options } => {
            let languages = apply_options(&mut config, &options)?;
            run(config, inputs, &languages).await?;
        }
    }

    Ok(())
}

/// Fold command-line overrides into the loaded configuration
fn apply_options(config: &mut Config, options: &RunOptions) -> Result<Vec<String>> {
    if let Some(model) = &options.model {
        config.transcriber.model = model.parse()?;
    }
    if let Some(backend) = &options.backend {
        config.translate.backend = backend.parse()?;
    }
    if options.api_key.is_some() {
        config.translate.api_key = options.api_key.clone();
    }
    if options.webvtt {
        config.output.format = SubtitleFormat::WebVtt;
    }
    config.validate()?;
    Ok(parse_languages(&options.languages)?)
}

async fn run(config: Config, inputs: Vec<PathBuf>, languages: &[String]) -> Result<()> {
    let (handle, mut shutdown) = ShutdownSignal::new();
    install_ctrl_c(handle);

    let mut workflow = Workflow::new(config).await?;

    let mut files = Vec::new();
    let mut directories = Vec::new();
    for input in inputs {
        if input.is_dir() {
            directories.push(input);
        } else {
            files.push(input);
        }
    }

    let mut artifacts = Vec::new();
    if !files.is_empty() {
        artifacts.extend(workflow.process_files(&files, languages, &mut shutdown).await.inspect_err(report)?);
    }
    for dir in directories {
        artifacts.extend(
            workflow
                .process_directory(&dir, languages, &mut shutdown)
                .await
                .inspect_err(report)?,
        );
    }

    for artifact in &artifacts {
        println!("{}", artifact.path.display());
    }
    info!("Done translating {} subtitle file(s)", artifacts.len());
    Ok(())
}

fn report(e: &video_subtitles::error::SubtitleError) {
    error!("{} stage failed: {}", e.stage(), e);
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".video-subtitles").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "video-subtitles.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // The guard must outlive every log call
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("video-subtitles.log").display()
    );

    Ok(())
}
