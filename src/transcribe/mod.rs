// Transcription backend boundary
//
// The transcription itself runs in an external program. This module knows:
// - how much card memory each whisper model needs
// - how to build the scheduler job that produces `<output_dir>/out.srt`
//
// To add another transcription program, implement TranscriptionBackend and
// return it from TranscriberFactory.

pub mod transcribe_anything;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SubtitleError};
use crate::scheduler::JobCommand;

/// File name of the transcript inside a transcription output directory
pub const TRANSCRIPT_FILE: &str = "out.srt";

/// Whisper model sizes accepted by the transcription backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhisperModel {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl WhisperModel {
    pub const ALL: [WhisperModel; 5] = [
        WhisperModel::Tiny,
        WhisperModel::Base,
        WhisperModel::Small,
        WhisperModel::Medium,
        WhisperModel::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Tiny => "tiny",
            WhisperModel::Base => "base",
            WhisperModel::Small => "small",
            WhisperModel::Medium => "medium",
            WhisperModel::Large => "large",
        }
    }

    /// Card memory, in GB, the model needs to run
    pub fn required_memory_gb(&self) -> f64 {
        match self {
            WhisperModel::Tiny | WhisperModel::Base => 1.0,
            WhisperModel::Small => 2.0,
            WhisperModel::Medium => 5.0,
            WhisperModel::Large => 10.0,
        }
    }
}

impl fmt::Display for WhisperModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = SubtitleError;

    fn from_str(s: &str) -> Result<Self> {
        WhisperModel::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s.to_lowercase())
            .ok_or_else(|| SubtitleError::Config(format!("Unknown model: {}", s)))
    }
}

/// One source file to transcribe
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    pub source: PathBuf,
    pub model: WhisperModel,
    pub language: String,
    pub output_dir: PathBuf,
}

impl TranscriptionRequest {
    pub fn transcript_path(&self) -> PathBuf {
        self.output_dir.join(TRANSCRIPT_FILE)
    }
}

/// External transcription program
pub trait TranscriptionBackend: Send + Sync {
    /// Fail early if the program cannot be run at all
    fn check_availability(&self) -> Result<()>;

    /// Job that writes the transcript for `request` when run on a card
    fn job(&self, request: &TranscriptionRequest) -> Box<dyn JobCommand>;
}

/// Factory for creating transcription backends
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_default(binary_path: &str) -> Box<dyn TranscriptionBackend> {
        Box::new(transcribe_anything::TranscribeAnything::new(binary_path))
    }
}

/// Directory the source-language transcript is written to, `text_<stem>/<lang>`
pub fn transcript_dir_for(source: &Path, language: &str) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .ok_or_else(|| SubtitleError::Config(format!("Invalid source filename: {}", source.display())))?
        .to_string_lossy();
    let parent = source.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!("text_{}", stem)).join(language))
}
