use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use super::{BackendError, BackendResult, ExecutionPolicy, LanguageRole, TranslationBackend, http_client};

const ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Free Google web translation endpoint, one request per text
pub struct GoogleWebBackend {
    client: Client,
}

impl GoogleWebBackend {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
        })
    }

    async fn translate_one(&self, text: &str, from: &str, to: &str) -> BackendResult<String> {
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[("client", "gtx"), ("sl", from), ("tl", to), ("dt", "t"), ("q", text)])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        let body: Value = response.json().await?;
        extract_translation(&body)
    }
}

/// Join the translated sentence pieces of a `translate_a/single` reply.
///
/// The reply is a nested array whose first element lists
/// `[translated, original, ...]` pairs, one per sentence.
fn extract_translation(body: &Value) -> BackendResult<String> {
    let sentences = body
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Transient(format!("unexpected response shape: {}", body)))?;

    Ok(sentences
        .iter()
        .filter_map(|s| s.get(0).and_then(Value::as_str))
        .collect::<String>())
}

#[async_trait]
impl TranslationBackend for GoogleWebBackend {
    fn name(&self) -> &'static str {
        "google-web"
    }

    fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::BoundedParallel
    }

    fn language_code(&self, code: &str, _role: LanguageRole) -> String {
        match code.to_lowercase().as_str() {
            "zh" => "zh-CN".to_string(),
            "nb" => "no".to_string(),
            "en-gb" | "en-us" => "en".to_string(),
            "pt-br" | "pt-pt" => "pt".to_string(),
            other => other.to_string(),
        }
    }

    async fn translate(&self, texts: &[String], from: &str, to: &str) -> BackendResult<Vec<String>> {
        debug!("Google: translating {} text(s) {} -> {}", texts.len(), from, to);
        let mut translated = Vec::with_capacity(texts.len());
        for text in texts {
            translated.push(self.translate_one(text, from, to).await?);
        }
        Ok(translated)
    }
}
