use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, SubtitleError};
use crate::language::language_name;
use super::{BackendError, BackendResult, ExecutionPolicy, LanguageRole, TranslationBackend, http_client};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TranslationResult {
    text: String,
}

/// Local LLM served by Ollama
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(endpoint: String, model: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint,
            model,
        })
    }

    async fn translate_one(&self, text: &str, from: &str, to: &str) -> BackendResult<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: build_translation_prompt(text, from, to),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!("Sending translation request to: {}", url);

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &error_text));
        }

        let generated: GenerateResponse = response.json().await?;
        let raw_response = generated.response.trim();
        debug!("Raw Ollama response: {}", raw_response);

        if raw_response.is_empty() {
            return Err(BackendError::Transient("Empty translation received".to_string()));
        }

        if let Ok(result) = serde_json::from_str::<TranslationResult>(raw_response) {
            return Ok(result.text.trim().to_string());
        }
        Ok(raw_response.to_string())
    }
}

/// Prompt asking for a JSON-wrapped translation of a single subtitle text
fn build_translation_prompt(text: &str, from: &str, to: &str) -> String {
    format!(
        "You are a professional subtitle translator.\n\
         \n\
         CRITICAL: Translate the text from {} to {} ONLY. Do not translate to any other language.\n\
         \n\
         Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
         Do not include any explanations, alternatives, or text in other languages.\n\
         Keep line breaks where they appear in the source.\n\
         \n\
         [Text to translate]\n\
         {}\n",
        from, to, to, text
    )
}

#[async_trait]
impl TranslationBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn policy(&self) -> ExecutionPolicy {
        // The model already saturates the local GPU
        ExecutionPolicy::Sequential
    }

    fn language_code(&self, code: &str, _role: LanguageRole) -> String {
        language_name(code)
            .map(str::to_string)
            .unwrap_or_else(|| code.to_string())
    }

    async fn translate(&self, texts: &[String], from: &str, to: &str) -> BackendResult<Vec<String>> {
        let mut translated = Vec::with_capacity(texts.len());
        for text in texts {
            translated.push(self.translate_one(text, from, to).await?);
        }
        Ok(translated)
    }

    /// Check that Ollama is up and the model is pulled
    async fn check_availability(&self) -> Result<()> {
        let url = format!("{}/api/show", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "name": self.model }))
            .send()
            .await
            .map_err(|e| SubtitleError::Config(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            info!("Ollama model '{}' is available", self.model);
            Ok(())
        } else {
            Err(SubtitleError::Config(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                self.model, self.model
            )))
        }
    }
}
