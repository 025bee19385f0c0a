use std::fmt;

use thiserror::Error;

use crate::scheduler::JobReport;

/// Workflow stage an error originated from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Scheduling,
    Transcription,
    Translation(String),
    Assembly,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::Scheduling => write!(f, "scheduling"),
            Stage::Transcription => write!(f, "transcription"),
            Stage::Translation(language) => write!(f, "translation to {}", language),
            Stage::Assembly => write!(f, "assembly"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SubtitleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scheduling: no Nvidia/CUDA video cards found")]
    NoCardsFound,

    #[error("scheduling: GPU enumeration failed: {0}")]
    GpuProbe(String),

    #[error(
        "scheduling: job '{job}' requires {required_gb:.1} GB but at most {available_gb:.1} GB can be offered"
    )]
    InsufficientResources {
        job: String,
        required_gb: f64,
        available_gb: f64,
    },

    #[error("scheduling: {failed} of {} job(s) failed", .report.len())]
    JobBatchFailed { failed: usize, report: Vec<JobReport> },

    #[error("scheduling: card {0} is already in use")]
    CardBusy(u32),

    #[error("transcription: {0}")]
    Transcription(String),

    #[error("translation to {language}: failed after {attempts} attempt(s): {cause}")]
    TranslationFailed {
        language: String,
        attempts: u32,
        cause: String,
    },

    #[error("assembly: {0}")]
    Assembly(String),

    #[error("{stage}: interrupted ({finished} finished, {pending} not started)")]
    Interrupted {
        stage: Stage,
        finished: usize,
        pending: usize,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid subtitle file: {0}")]
    InvalidSubtitle(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl SubtitleError {
    /// The stage of the workflow this error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            SubtitleError::NoCardsFound
            | SubtitleError::GpuProbe(_)
            | SubtitleError::InsufficientResources { .. }
            | SubtitleError::JobBatchFailed { .. }
            | SubtitleError::CardBusy(_) => Stage::Scheduling,
            SubtitleError::Transcription(_) | SubtitleError::Cache(_) => Stage::Transcription,
            SubtitleError::TranslationFailed { language, .. } => {
                Stage::Translation(language.clone())
            }
            SubtitleError::Assembly(_) => Stage::Assembly,
            SubtitleError::Interrupted { stage, .. } => stage.clone(),
            _ => Stage::Setup,
        }
    }
}

pub type Result<T> = std::result::Result<T, SubtitleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attribution() {
        let err = SubtitleError::TranslationFailed {
            language: "fr".to_string(),
            attempts: 5,
            cause: "timeout".to_string(),
        };
        assert_eq!(err.stage(), Stage::Translation("fr".to_string()));
        assert!(err.to_string().starts_with("translation to fr"));

        assert_eq!(SubtitleError::NoCardsFound.stage(), Stage::Scheduling);
        assert_eq!(
            SubtitleError::Assembly("disk full".to_string()).stage(),
            Stage::Assembly
        );
    }
}
