use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use super::{BackendError, BackendResult, ExecutionPolicy, LanguageRole, TranslationBackend, http_client};

const PAID_ENDPOINT: &str = "https://api.deepl.com/v2/translate";
const FREE_ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";

/// DeepL accepts at most this many texts per request
const MAX_TEXTS_PER_REQUEST: usize = 50;

#[derive(Debug, Serialize)]
struct DeeplRequest<'a> {
    text: &'a [String],
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeeplResponse {
    translations: Vec<DeeplTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeeplTranslation {
    text: String,
}

/// DeepL REST API
pub struct DeeplBackend {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl DeeplBackend {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        // Free-tier keys carry a ":fx" suffix and live on a separate host
        let endpoint = if api_key.ends_with(":fx") {
            FREE_ENDPOINT
        } else {
            PAID_ENDPOINT
        };

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn translate_chunk(&self, texts: &[String], from: &str, to: &str) -> BackendResult<Vec<String>> {
        let request = DeeplRequest {
            text: texts,
            source_lang: from,
            target_lang: to,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &body));
        }

        let parsed: DeeplResponse = response.json().await?;
        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
    }
}

#[async_trait]
impl TranslationBackend for DeeplBackend {
    fn name(&self) -> &'static str {
        "deepl"
    }

    fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::Sequential
    }

    fn language_code(&self, code: &str, role: LanguageRole) -> String {
        let code = code.to_uppercase();
        match role {
            // Source languages are never regional
            LanguageRole::Source => code.split('-').next().unwrap_or_default().to_string(),
            LanguageRole::Target => match code.as_str() {
                "EN" => "EN-US".to_string(),
                "PT" => "PT-PT".to_string(),
                _ => code,
            },
        }
    }

    async fn translate(&self, texts: &[String], from: &str, to: &str) -> BackendResult<Vec<String>> {
        debug!("DeepL: translating {} text(s) {} -> {}", texts.len(), from, to);
        let mut translated = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_TEXTS_PER_REQUEST) {
            translated.extend(self.translate_chunk(chunk, from, to).await?);
        }
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        let backend = DeeplBackend::new("key".to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(backend.language_code("en", LanguageRole::Source), "EN");
        assert_eq!(backend.language_code("pt-br", LanguageRole::Source), "PT");
        assert_eq!(backend.language_code("en", LanguageRole::Target), "EN-US");
        assert_eq!(backend.language_code("pt-br", LanguageRole::Target), "PT-BR");
        assert_eq!(backend.language_code("zh", LanguageRole::Target), "ZH");
    }

    #[test]
    fn test_free_keys_use_free_endpoint() {
        let free = DeeplBackend::new("abc:fx".to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(free.endpoint(), FREE_ENDPOINT);
        let paid = DeeplBackend::new("abc".to_string(), Duration::from_secs(5)).unwrap();
        assert_eq!(paid.endpoint(), PAID_ENDPOINT);
    }
}
