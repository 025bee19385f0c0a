// Translation backends and the per-language pipeline
//
// Backends are interchangeable behind TranslationBackend and are picked once
// per run by TranslatorFactory:
// - DeepL: paid REST API, fast, translated one language at a time
// - GoogleWeb: free web endpoint, slow per call, translated in parallel
// - Ollama: local LLM, one language at a time
//
// Each backend also owns its language-code conventions.

pub mod deepl;
pub mod google;
pub mod ollama;
pub mod pipeline;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use pipeline::{TranslationPipeline, TranslationTask};

use crate::config::{TranslateConfig, TranslationBackendKind};
use crate::error::{Result, SubtitleError};

/// Failure of a single backend call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Worth another attempt (network trouble, rate limits, timeouts)
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying cannot help (bad credentials, unsupported language)
    #[error("fatal: {0}")]
    Fatal(String),
}

impl BackendError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            BackendError::Transient(message)
        } else {
            BackendError::Fatal(message)
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => BackendError::from_status(status, &e.to_string()),
            None => BackendError::Transient(e.to_string()),
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// How the tasks of one pipeline run are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPolicy {
    /// One language at a time, in submission order
    Sequential,
    /// Up to the configured number of languages at once
    BoundedParallel,
}

/// Whether a language code is used as the source or the target of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageRole {
    Source,
    Target,
}

/// A translation service
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execution policy that suits this backend's latency
    fn policy(&self) -> ExecutionPolicy;

    /// Convert one of our language codes into the backend's spelling
    fn language_code(&self, code: &str, role: LanguageRole) -> String;

    /// Translate every text, returning one translation per input in order
    async fn translate(&self, texts: &[String], from: &str, to: &str) -> BackendResult<Vec<String>>;

    /// Verify the service can be reached before any work starts
    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory for creating translation backends
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_backend(config: &TranslateConfig) -> Result<Arc<dyn TranslationBackend>> {
        let timeout = Duration::from_secs(config.attempt_timeout_secs);
        let backend: Arc<dyn TranslationBackend> = match config.backend {
            TranslationBackendKind::DeeplApi => {
                let api_key = config
                    .api_key
                    .clone()
                    .ok_or_else(|| SubtitleError::Config("DeepL backend requires an api_key".to_string()))?;
                Arc::new(deepl::DeeplBackend::new(api_key, timeout)?)
            }
            TranslationBackendKind::GoogleWeb => Arc::new(google::GoogleWebBackend::new(timeout)?),
            TranslationBackendKind::Ollama => Arc::new(ollama::OllamaBackend::new(
                config.ollama_endpoint.clone(),
                config.ollama_model.clone(),
                timeout,
            )?),
        };
        Ok(backend)
    }
}

/// Build an HTTP client with a request timeout
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("video-subtitles/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            BackendError::from_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::BAD_GATEWAY, ""),
            BackendError::Transient(_)
        ));
        assert!(matches!(
            BackendError::from_status(StatusCode::FORBIDDEN, "bad key"),
            BackendError::Fatal(_)
        ));
    }

    #[test]
    fn test_factory_selects_policy() {
        let mut config = crate::config::Config::default().translate;

        config.backend = TranslationBackendKind::GoogleWeb;
        let google = TranslatorFactory::create_backend(&config).unwrap();
        assert_eq!(google.policy(), ExecutionPolicy::BoundedParallel);

        config.backend = TranslationBackendKind::DeeplApi;
        assert!(TranslatorFactory::create_backend(&config).is_err());
        config.api_key = Some("key:fx".to_string());
        let deepl = TranslatorFactory::create_backend(&config).unwrap();
        assert_eq!(deepl.policy(), ExecutionPolicy::Sequential);
        assert_eq!(deepl.name(), "deepl");
    }
}
