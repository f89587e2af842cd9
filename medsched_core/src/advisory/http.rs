//! HTTP client for a Gemini-style `generateContent` endpoint.

use super::{AdvisoryClient, AdvisoryError, AdvisoryPrompt};
use crate::config::AdvisoryConfig;
use crate::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BODY_PREVIEW_CHARS: usize = 180;

/// Advisory client backed by a remote generative model
#[derive(Clone)]
pub struct HttpAdvisoryClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateCandidate {
    #[serde(default)]
    content: Content,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

impl fmt::Debug for HttpAdvisoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAdvisoryClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpAdvisoryClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("medsched/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    pub fn from_config(config: &AdvisoryConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
            config.call_timeout(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    fn map_error(&self, err: reqwest::Error) -> AdvisoryError {
        if err.is_timeout() {
            AdvisoryError::Timeout(self.timeout)
        } else {
            AdvisoryError::Transport(err.to_string())
        }
    }

    async fn generate(&self, prompt: &AdvisoryPrompt) -> std::result::Result<String, AdvisoryError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![Part {
                    text: prompt.render(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: 0.2,
            },
        };

        tracing::debug!("Requesting advisory recommendation from {}", self.model);
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        if !status.is_success() {
            return Err(AdvisoryError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_PREVIEW_CHARS).collect(),
            });
        }

        extract_text(&body)
    }
}

impl AdvisoryClient for HttpAdvisoryClient {
    fn advise(
        &self,
        prompt: &AdvisoryPrompt,
    ) -> impl Future<Output = std::result::Result<String, AdvisoryError>> + Send {
        self.generate(prompt)
    }
}

/// Concatenated text parts of the first candidate
fn extract_text(body: &str) -> std::result::Result<String, AdvisoryError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|e| AdvisoryError::Malformed(e.to_string()))?;
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| AdvisoryError::Malformed("response has no candidates".into()))?;

    let text: String = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect();
    if text.trim().is_empty() {
        return Err(AdvisoryError::Malformed("response has no text".into()));
    }
    Ok(text)
}
