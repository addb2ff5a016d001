//! Embedder adapters: turn the active question into a query vector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingDriver, EmbeddingVector};
use crate::utils::retry::{RetryConfig, RetryOutcome, with_retry};

/// Converts text into a validated [`EmbeddingVector`].
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single non-empty text.
    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingVector, EmbeddingError>;

    /// Check the embedding service is reachable.
    async fn health_check(&self) -> Result<(), EmbeddingError>;

    /// Model identifier reported in status output.
    fn model(&self) -> &str;
}

/// Build the configured embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.driver {
        EmbeddingDriver::Gemini => Ok(Arc::new(GeminiEmbedder::new(config)?)),
        EmbeddingDriver::Tei => Ok(Arc::new(TeiEmbedder::new(config)?)),
    }
}

fn build_client(timeout_secs: u64) -> Result<Client, EmbeddingError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))
}

/// Send a request, mapping transport failures and non-2xx statuses.
async fn send(request: RequestBuilder) -> Result<Response, EmbeddingError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            EmbeddingError::Timeout
        } else if e.is_connect() {
            EmbeddingError::ConnectionError(e.to_string())
        } else {
            EmbeddingError::RequestError(e)
        }
    })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::ServerError(format!(
            "status {}: {}",
            status, body
        )));
    }

    Ok(response)
}

fn finish(
    outcome: RetryOutcome<Vec<f32>, EmbeddingError>,
    dimension: usize,
) -> Result<EmbeddingVector, EmbeddingError> {
    match outcome {
        RetryOutcome::Success(values) => EmbeddingVector::try_new(values, Some(dimension)),
        RetryOutcome::Failed { last_error, attempts } => {
            tracing::warn!(attempts, error = %last_error, "embedding request failed");
            Err(last_error)
        }
        RetryOutcome::Cancelled { .. } => Err(EmbeddingError::Cancelled),
    }
}

#[derive(Debug, Serialize)]
struct GeminiEmbedRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    #[serde(default)]
    embedding: Option<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    #[serde(default)]
    values: Option<Vec<f32>>,
}

/// Google Generative Language `embedContent` adapter.
#[derive(Debug, Clone)]
pub struct GeminiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    dimension: usize,
    retry: RetryConfig,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            EmbeddingError::ConnectionError(
                "missing API key (set GEMINI_API_KEY or API_KEY)".to_string(),
            )
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dimension: config.dimension as usize,
            retry: RetryConfig::with_retries(config.max_retries),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/v1beta/models/{}:embedContent", self.base_url, self.model);
        let request = GeminiEmbedRequest {
            model: format!("models/{}", self.model),
            content: GeminiContent {
                parts: [GeminiPart { text }],
            },
        };

        let response = send(
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&request),
        )
        .await?;

        let body: GeminiEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        body.embedding
            .and_then(|e| e.values)
            .ok_or_else(|| EmbeddingError::InvalidResponse("response has no embedding".to_string()))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let outcome = with_retry(&self.retry, cancel, || self.embed_once(text)).await;
        finish(outcome, self.dimension)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model);
        send(self.client.get(&url).header("x-goog-api-key", &self.api_key)).await?;
        Ok(())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct TeiEmbedRequest<'a> {
    inputs: [&'a str; 1],
    truncate: bool,
}

/// Self-hosted text-embeddings-inference adapter.
#[derive(Debug, Clone)]
pub struct TeiEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    retry: RetryConfig,
}

impl TeiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension as usize,
            retry: RetryConfig::with_retries(config.max_retries),
        })
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embed", self.base_url);
        let request = TeiEmbedRequest {
            inputs: [text],
            truncate: true,
        };

        let response = send(self.client.post(&url).json(&request)).await?;
        let embeddings: Vec<Vec<f32>> = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }
}

#[async_trait]
impl Embedder for TeiEmbedder {
    async fn embed(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<EmbeddingVector, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let outcome = with_retry(&self.retry, cancel, || self.embed_once(text)).await;
        finish(outcome, self.dimension)
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        let url = format!("{}/health", self.base_url);
        send(self.client.get(&url)).await?;
        Ok(())
    }

    fn model(&self) -> &str {
        &self.model
    }
}
