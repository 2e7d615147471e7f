use crate::error::VoiceError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for an Ollama-style `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct LanguageModelClient {
    http: reqwest::Client,
    url: String,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl LanguageModelClient {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, VoiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Llm(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: url.into(),
            model: model.into(),
            max_tokens,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends one prompt and returns the generated text.
    ///
    /// Exactly one request is made; there is no retry. An empty response
    /// counts as a failure.
    pub async fn generate(&self, prompt: &str) -> Result<String, VoiceError> {
        tracing::info!(url = %self.url, model = %self.model, "sending prompt to LLM");

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "LLM returned an error status");
            return Err(VoiceError::Llm(format!("LLM returned status {}", status)));
        }

        let body: GenerateResponse = response.json().await.map_err(|e| self.transport_error(e))?;
        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(VoiceError::Llm("LLM returned an empty response".to_string()));
        }

        tracing::info!(response = %text, "LLM response");
        Ok(text)
    }

    fn transport_error(&self, e: reqwest::Error) -> VoiceError {
        if e.is_timeout() {
            VoiceError::UpstreamTimeout(self.timeout.as_secs())
        } else {
            VoiceError::Llm(format!("error connecting to LLM service at {}: {}", self.url, e))
        }
    }
}
