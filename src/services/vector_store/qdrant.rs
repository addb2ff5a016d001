//! Qdrant vector store backend implementation.
//!
//! The collection is the only scope. `vector_store.namespace` is a Pinecone
//! concept and is not applied here; keep one corpus per collection.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{PointId, SearchPoints, SearchPointsBuilder};
use serde_json::{Map, Number, Value};

use super::{IndexInfo, VectorStore};
use crate::error::VectorStoreError;
use crate::models::{DEFAULT_QDRANT_URL, EmbeddingVector, RawMatch, VectorStoreConfig};

/// Qdrant collection backend. The collection name is the configured index.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
}

impl QdrantBackend {
    pub fn new(config: &VectorStoreConfig) -> Result<Self, VectorStoreError> {
        let url = if config.url.trim().is_empty() {
            DEFAULT_QDRANT_URL
        } else {
            config.url.as_str()
        };

        let mut builder = Qdrant::from_url(url);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))?;

        if config.namespace != crate::models::DEFAULT_NAMESPACE {
            tracing::warn!(
                namespace = %config.namespace,
                collection = %config.index,
                "namespace is ignored by the qdrant backend"
            );
        }

        Ok(Self {
            client,
            collection: config.index.clone(),
        })
    }

    fn search_request(&self, vector: &EmbeddingVector, top_k: u64) -> SearchPoints {
        SearchPointsBuilder::new(&self.collection, vector.as_slice().to_vec(), top_k)
            .with_payload(true)
            .build()
    }
}

fn point_id_string(id: Option<&PointId>) -> String {
    match id.and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Convert a Qdrant payload value into plain JSON.
fn kind_to_json(kind: Option<&Kind>) -> Value {
    match kind {
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::IntegerValue(n)) => Value::Number((*n).into()),
        Some(Kind::DoubleValue(d)) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .iter()
                .map(|v| kind_to_json(v.kind.as_ref()))
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(payload_to_json(&s.fields)),
        Some(Kind::NullValue(_)) | None => Value::Null,
    }
}

fn payload_to_json(payload: &HashMap<String, qdrant_client::qdrant::Value>) -> Map<String, Value> {
    payload
        .iter()
        .map(|(key, value)| (key.clone(), kind_to_json(value.kind.as_ref())))
        .collect()
}

#[async_trait]
impl VectorStore for QdrantBackend {
    async fn query(
        &self,
        vector: &EmbeddingVector,
        top_k: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError> {
        let results = self
            .client
            .search_points(self.search_request(vector, top_k))
            .await
            .map_err(|e| VectorStoreError::SearchError(e.to_string()))?;

        Ok(results
            .result
            .into_iter()
            .map(|point| {
                RawMatch::new(
                    point_id_string(point.id.as_ref()),
                    point.score,
                    payload_to_json(&point.payload),
                )
            })
            .collect())
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::ConnectionError(e.to_string()))
    }

    async fn index_info(&self) -> Result<Option<IndexInfo>, VectorStoreError> {
        match self.client.collection_info(&self.collection).await {
            Ok(info) => Ok(Some(IndexInfo {
                vector_count: info.result.map_or(0, |r| r.points_count.unwrap_or(0)),
                dimension: None,
            })),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("not found") || msg.contains("doesn't exist") {
                    Ok(None)
                } else {
                    Err(VectorStoreError::SearchError(msg))
                }
            }
        }
    }

    fn index(&self) -> &str {
        &self.collection
    }
}
