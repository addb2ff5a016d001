//! Retriever: ranked review records for a query vector.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::RetrievalError;
use crate::models::{EmbeddingVector, RawMatch, RetrievalResult, RetrievedRecord};
use crate::services::vector_store::VectorStore;
use crate::utils::retry::{RetryConfig, RetryOutcome, with_retry};

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    retry: RetryConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::none(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Query the store and keep the well-formed matches.
    ///
    /// A match missing `review`, `subject` or `stars` is skipped with a
    /// warning; the remaining records are still returned. An empty result
    /// is not an error.
    pub async fn retrieve(
        &self,
        vector: &EmbeddingVector,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalResult, RetrievalError> {
        if top_k == 0 {
            return Err(RetrievalError::InvalidTopK);
        }

        let outcome = with_retry(&self.retry, cancel, || self.store.query(vector, top_k as u64)).await;
        let matches = match outcome {
            RetryOutcome::Success(matches) => matches,
            RetryOutcome::Failed { last_error, .. } => return Err(last_error.into()),
            RetryOutcome::Cancelled { .. } => return Err(RetrievalError::Cancelled),
        };

        Ok(rank_matches(matches, top_k))
    }
}

/// Validate raw matches and rank the survivors.
pub fn rank_matches(matches: Vec<RawMatch>, top_k: usize) -> RetrievalResult {
    let total = matches.len();
    let records: Vec<RetrievedRecord> = matches
        .into_iter()
        .filter_map(|raw| {
            let id = raw.id.clone();
            match RetrievedRecord::try_from(raw) {
                Ok(record) => Some(record),
                Err(reason) => {
                    tracing::warn!(id = %id, %reason, "skipping malformed match");
                    None
                }
            }
        })
        .collect();

    if records.len() < total {
        tracing::debug!(kept = records.len(), total, "dropped malformed matches");
    }

    RetrievalResult::ranked(records, top_k)
}
