//! Vector store abstraction layer.
//!
//! The review corpus lives in an external nearest-neighbour service. This
//! module hides which one (Pinecone over REST, Qdrant over gRPC) behind the
//! [`VectorStore`] trait so the retriever only deals in [`RawMatch`]es.

mod pinecone;
mod qdrant;

pub use pinecone::PineconeBackend;
pub use qdrant::QdrantBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::VectorStoreError;
use crate::models::{EmbeddingVector, RawMatch, VectorDriver, VectorStoreConfig};

/// Index/collection information for status output.
#[derive(Debug, Clone, Default)]
pub struct IndexInfo {
    pub vector_count: u64,
    pub dimension: Option<u64>,
}

/// Abstract trait for nearest-neighbour queries.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `top_k` matches with metadata, in the store's ranking order.
    async fn query(
        &self,
        vector: &EmbeddingVector,
        top_k: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError>;

    /// Check if the vector store is healthy and accessible.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Returns None if the index/collection does not exist.
    async fn index_info(&self) -> Result<Option<IndexInfo>, VectorStoreError>;

    /// Index or collection name.
    fn index(&self) -> &str;
}

/// Create a vector store backend based on configuration.
pub fn create_backend(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.driver {
        VectorDriver::Pinecone => Ok(Arc::new(PineconeBackend::new(config)?)),
        VectorDriver::Qdrant => Ok(Arc::new(QdrantBackend::new(config)?)),
    }
}
