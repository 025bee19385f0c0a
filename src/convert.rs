// Subtitle format conversion
//
// Two converters produce WebVTT from SRT:
// - Native: rewrites the cues in-process
// - Ffmpeg: shells out to ffmpeg, for setups that already depend on it

use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tokio::fs;
use tracing::{debug, info};

use crate::config::{ConverterKind, OutputConfig};
use crate::error::{Result, SubtitleError};
use crate::subtitle::srt_to_vtt;

/// Converts an `.srt` file into another subtitle format
#[async_trait]
pub trait SubtitleConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<()>;

    fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating converters
pub struct ConverterFactory;

impl ConverterFactory {
    pub fn create_converter(config: &OutputConfig) -> Box<dyn SubtitleConverter> {
        match config.converter {
            ConverterKind::Native => Box::new(NativeVttConverter),
            ConverterKind::Ffmpeg => Box::new(FfmpegConverter::new(config.ffmpeg_path.clone())),
        }
    }
}

pub struct NativeVttConverter;

#[async_trait]
impl SubtitleConverter for NativeVttConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let content = fs::read_to_string(input).await?;
        fs::write(output, srt_to_vtt(&content)?).await?;
        Ok(())
    }
}

/// Command line for an external converter
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub async fn execute(&self) -> Result<()> {
        debug!("Executing: {} {:?}", self.binary_path, self.args);

        let output = tokio::process::Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| SubtitleError::Assembly(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubtitleError::Assembly(format!("{} failed: {}", self.description, stderr.trim())));
        }
        Ok(())
    }
}

pub struct FfmpegConverter {
    binary_path: String,
}

impl FfmpegConverter {
    pub fn new(binary_path: String) -> Self {
        Self { binary_path }
    }

    pub fn command(&self, input: &Path, output: &Path) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Subtitle conversion")
            .overwrite()
            .input(input)
            .output(output)
    }
}

#[async_trait]
impl SubtitleConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        self.command(input, output).execute().await
    }

    fn check_availability(&self) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .arg("-version")
            .output()
            .map_err(|e| SubtitleError::Config(format!("ffmpeg not found: {}", e)))?;

        if output.status.success() {
            info!("ffmpeg is available");
            Ok(())
        } else {
            Err(SubtitleError::Config("ffmpeg version check failed".to_string()))
        }
    }
}
