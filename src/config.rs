use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, SubtitleError};
use crate::transcribe::WhisperModel;

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_attempt_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the transcription binary (e.g., transcribe_anything)
    pub binary_path: String,
    /// Path to nvidia-smi, used to enumerate cards
    pub gpu_probe_path: String,
    /// Whisper model to transcribe with
    pub model: WhisperModel,
    /// Language spoken in the source media
    pub source_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Which translation service to call
    pub backend: TranslationBackendKind,
    /// DeepL authentication key; keys ending in ":fx" use the free endpoint
    pub api_key: Option<String>,
    /// Ollama endpoint URL
    pub ollama_endpoint: String,
    /// LLM model to use with the Ollama backend
    pub ollama_model: String,
    /// Attempts per language before giving up
    pub max_attempts: u32,
    /// Worker count for bounded-parallel execution
    pub parallel_workers: usize,
    /// Wall-clock limit for a single attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranslationBackendKind {
    /// Paid, low-latency DeepL REST API
    DeeplApi,
    /// Free web endpoint, slow per call
    GoogleWeb,
    /// Local LLM served by Ollama
    Ollama,
}

impl std::str::FromStr for TranslationBackendKind {
    type Err = SubtitleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "deepl" | "deepl-api" | "deeplapi" => Ok(Self::DeeplApi),
            "google" | "google-web" | "googleweb" | "free" => Ok(Self::GoogleWeb),
            "ollama" => Ok(Self::Ollama),
            other => Err(SubtitleError::Config(format!("Unknown translation backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between completion polls of running jobs
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the persisted transcription cache
    pub directory: PathBuf,
    /// Maximum number of cached transcripts
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Container format of the final subtitle files
    pub format: SubtitleFormat,
    /// How `.srt` files are converted when another format is requested
    pub converter: ConverterKind,
    /// Path to ffmpeg, used by the ffmpeg converter
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
}

impl SubtitleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::WebVtt => "vtt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConverterKind {
    Native,
    Ffmpeg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transcriber: TranscriberConfig {
                binary_path: "transcribe_anything".to_string(),
                gpu_probe_path: "nvidia-smi".to_string(),
                model: WhisperModel::Medium,
                source_language: "en".to_string(),
            },
            translate: TranslateConfig {
                backend: TranslationBackendKind::DeeplApi,
                api_key: None,
                ollama_endpoint: "http://localhost:11434".to_string(),
                ollama_model: "llama3.2:3b".to_string(),
                max_attempts: 5,
                parallel_workers: 8,
                attempt_timeout_secs: default_attempt_timeout_secs(),
            },
            scheduler: SchedulerConfig {
                poll_interval_ms: default_poll_interval_ms(),
            },
            cache: CacheConfig {
                directory: PathBuf::from(".video-subtitles").join("cache"),
                capacity: 16,
            },
            output: OutputConfig {
                format: SubtitleFormat::Srt,
                converter: ConverterKind::Native,
                ffmpeg_path: "ffmpeg".to_string(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubtitleError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| SubtitleError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.translate.max_attempts == 0 {
            return Err(SubtitleError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.translate.parallel_workers == 0 {
            return Err(SubtitleError::Config("parallel_workers must be at least 1".to_string()));
        }
        if self.cache.capacity == 0 {
            return Err(SubtitleError::Config("cache capacity must be at least 1".to_string()));
        }
        if self.translate.backend == TranslationBackendKind::DeeplApi && self.translate.api_key.is_none() {
            return Err(SubtitleError::Config(
                "the DeepL backend needs an api_key; use the google backend for free translation".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_limits() {
        let config = Config::default();
        assert_eq!(config.translate.max_attempts, 5);
        assert_eq!(config.translate.parallel_workers, 8);
        assert_eq!(config.cache.capacity, 16);
        assert_eq!(config.scheduler.poll_interval_ms, 250);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = Config::default();
        config.translate.backend = TranslationBackendKind::GoogleWeb;
        config.output.format = SubtitleFormat::WebVtt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.translate.backend, TranslationBackendKind::GoogleWeb);
        assert_eq!(loaded.output.format, SubtitleFormat::WebVtt);
        assert_eq!(loaded.transcriber.model, WhisperModel::Medium);
    }

    #[test]
    fn test_deepl_requires_key() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(SubtitleError::Config(_))));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("free".parse::<TranslationBackendKind>().unwrap(), TranslationBackendKind::GoogleWeb);
        assert_eq!("DeepL".parse::<TranslationBackendKind>().unwrap(), TranslationBackendKind::DeeplApi);
        assert!("bing".parse::<TranslationBackendKind>().is_err());
    }
}
