// Remote embedding and generation client
// Blocking ureq calls run on the tokio blocking pool behind an async trait


#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use url::Url;

use crate::config::{Config, RemoteConfig};
use crate::{RagError, Result};

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;
const BACKOFF_UNIT_MS: u64 = 1000;
const API_KEY_HEADER: &str = "x-api-key";

const EMBEDDING_PATH: &str = "api/ai/embedding";
const BATCH_EMBEDDING_PATH: &str = "api/ai/embedding/batch";
const GENERATE_PATH: &str = "api/ai/generate";

/// Remote embedding and reasoning provider
#[async_trait]
pub trait RemoteEngine: Send + Sync {
    async fn embed(&self, text: &str, dimension: usize) -> Result<Vec<f32>>;

    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>>;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct EmbeddingOptions<'a> {
    dimension: usize,
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
    options: EmbeddingOptions<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    texts: &'a [String],
    options: EmbeddingOptions<'a>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    success: bool,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    success: bool,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    success: bool,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`RemoteEngine`]
#[derive(Debug, Clone)]
pub struct HttpRemoteEngine {
    base_url: Url,
    embedding_model: String,
    generation_model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
    backoff_unit: Duration,
}

impl HttpRemoteEngine {
    #[inline]
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let base_url = config.base_url()?;

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            generation_model: config.generation_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: config.api_key.as_ref().map(|key| key.expose().to_string()),
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: if config.retry_attempts == 0 {
                DEFAULT_RETRY_ATTEMPTS
            } else {
                config.retry_attempts
            },
            backoff_unit: Duration::from_millis(BACKOFF_UNIT_MS),
        })
    }

    /// Build a client when a credential is configured, `None` otherwise
    #[inline]
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.has_remote_credential() {
            debug!("No remote credential configured, remote engine disabled");
            return Ok(None);
        }
        Self::new(&config.remote).map(Some)
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[inline]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn run_blocking<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Self) -> anyhow::Result<T> + Send + 'static,
    {
        let client = self.clone();
        tokio::task::spawn_blocking(move || call(&client))
            .await
            .map_err(|e| RagError::Network(format!("{} task failed: {}", operation, e)))?
            .map_err(|e| RagError::Network(format!("{} failed: {:#}", operation, e)))
    }

    fn post_json<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<String> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))?;

        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        self.make_request_with_retry(|| {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key.as_str());
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn blocking_embed(&self, text: &str, dimension: usize) -> anyhow::Result<Vec<f32>> {
        debug!("Requesting remote embedding (chars: {})", text.chars().count());

        let request = EmbedRequest {
            text,
            options: EmbeddingOptions {
                dimension,
                model: &self.embedding_model,
            },
        };
        let response_text = self
            .post_json(EMBEDDING_PATH, &request)
            .context("Failed to generate embedding")?;

        let response: EmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embedding response")?;

        match (response.success, response.embedding) {
            (true, Some(embedding)) => Ok(embedding),
            _ => Err(anyhow!(
                "Remote embedding rejected: {}",
                response.error.as_deref().unwrap_or("no embedding returned")
            )),
        }
    }

    fn blocking_embed_batch(
        &self,
        texts: &[String],
        dimension: usize,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        debug!("Requesting {} remote embeddings", texts.len());

        let request = BatchEmbedRequest {
            texts,
            options: EmbeddingOptions {
                dimension,
                model: &self.embedding_model,
            },
        };
        let response_text = self
            .post_json(BATCH_EMBEDDING_PATH, &request)
            .context("Failed to generate batch embeddings")?;

        let response: BatchEmbedResponse = serde_json::from_str(&response_text)
            .context("Failed to parse batch embedding response")?;

        let embeddings = match (response.success, response.embeddings) {
            (true, Some(embeddings)) => embeddings,
            _ => {
                return Err(anyhow!(
                    "Remote batch embedding rejected: {}",
                    response.error.as_deref().unwrap_or("no embeddings returned")
                ));
            }
        };

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                embeddings.len()
            ));
        }
        Ok(embeddings)
    }

    fn blocking_generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!("Requesting remote generation (chars: {})", prompt.chars().count());

        let request = GenerateRequest {
            prompt,
            model: &self.generation_model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response_text = self
            .post_json(GENERATE_PATH, &request)
            .context("Failed to generate response")?;

        let response: GenerateResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generation response")?;

        match (response.success, response.text) {
            (true, Some(text)) if !text.trim().is_empty() => Ok(text),
            _ => Err(anyhow!(
                "Remote generation rejected: {}",
                response.error.as_deref().unwrap_or("empty response")
            )),
        }
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> anyhow::Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            warn!("Non-retryable error: {}", error);
                            false
                        }
                    };

                    if !should_retry {
                        return Err(anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let factor = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        let delay = self.backoff_unit.saturating_mul(factor as u32);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl RemoteEngine for HttpRemoteEngine {
    async fn embed(&self, text: &str, dimension: usize) -> Result<Vec<f32>> {
        let text = text.to_string();
        self.run_blocking("Remote embedding", move |client| {
            client.blocking_embed(&text, dimension)
        })
        .await
        .map_err(|e| RagError::EmbeddingGeneration(e.to_string()))
    }

    async fn embed_batch(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let texts = texts.to_vec();
        self.run_blocking("Remote batch embedding", move |client| {
            client.blocking_embed_batch(&texts, dimension)
        })
        .await
        .map_err(|e| RagError::EmbeddingGeneration(e.to_string()))
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.to_string();
        self.run_blocking("Remote generation", move |client| client.blocking_generate(&prompt))
            .await
    }
}
