//! Pinecone vector store backend over the data-plane REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{IndexInfo, VectorStore};
use crate::error::VectorStoreError;
use crate::models::{EmbeddingVector, RawMatch, VectorStoreConfig};

const API_VERSION: &str = "2024-10";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: u64,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexStats {
    #[serde(default)]
    dimension: Option<u64>,
    #[serde(default)]
    total_vector_count: u64,
}

/// Pinecone index backend scoped to a single namespace.
pub struct PineconeBackend {
    client: Client,
    host: String,
    index: String,
    namespace: String,
    api_key: String,
}

impl PineconeBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        if config.url.trim().is_empty() {
            return Err(VectorStoreError::ClientError(
                "Pinecone index host is not configured (set PINECONE_INDEX_HOST)".to_string(),
            ));
        }
        let api_key = config.api_key.clone().ok_or_else(|| {
            VectorStoreError::ClientError("missing PINECONE_API_KEY".to_string())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            host: normalize_host(&config.url),
            index: config.index.clone(),
            namespace: config.namespace.clone(),
            api_key,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, VectorStoreError> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                VectorStoreError::ConnectionError(e.to_string())
            } else {
                VectorStoreError::ClientError(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::SearchError(format!(
                "status {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

/// Accept bare hosts as printed by the Pinecone console.
fn normalize_host(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[async_trait]
impl VectorStore for PineconeBackend {
    async fn query(
        &self,
        vector: &EmbeddingVector,
        top_k: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError> {
        let request = QueryRequest {
            namespace: &self.namespace,
            vector: vector.as_slice(),
            top_k,
            include_metadata: true,
            include_values: false,
        };

        let response = self.send(self.post("/query").json(&request)).await?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| VectorStoreError::MalformedResponse(e.to_string()))?;

        Ok(body
            .matches
            .into_iter()
            .map(|m| {
                RawMatch::new(
                    m.id,
                    m.score.unwrap_or(f32::NAN),
                    m.metadata.unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.index_info().await.map(|info| info.is_some())
    }

    async fn index_info(&self) -> Result<Option<IndexInfo>, VectorStoreError> {
        let response = self
            .send(self.post("/describe_index_stats").json(&serde_json::json!({})))
            .await?;
        let stats: IndexStats = response
            .json()
            .await
            .map_err(|e| VectorStoreError::MalformedResponse(e.to_string()))?;

        Ok(Some(IndexInfo {
            vector_count: stats.total_vector_count,
            dimension: stats.dimension,
        }))
    }

    fn index(&self) -> &str {
        &self.index
    }
}
