//! In-memory collaborators for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{EmbeddingError, GenerationError, VectorStoreError};
use crate::models::{AugmentedPrompt, EmbeddingVector, RawMatch};
use crate::services::embedding::Embedder;
use crate::services::generation::{ChunkResult, ChunkStream, Generator, ResponseChunk};
use crate::services::vector_store::{IndexInfo, VectorStore};

pub(crate) struct FakeEmbedder {
    pub calls: AtomicU32,
    pub fail: bool,
    pub texts: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub(crate) fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: false,
            texts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    /// Every text passed to `embed`, in call order.
    pub(crate) fn embedded_texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> Result<EmbeddingVector, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(EmbeddingError::EmptyVector);
        }
        EmbeddingVector::try_new(vec![0.01; 768], Some(768))
    }

    async fn health_check(&self) -> Result<(), EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::ConnectionError("refused".to_string()));
        }
        Ok(())
    }

    fn model(&self) -> &str {
        "fake-embedding"
    }
}

/// Store returning canned matches or a connection error.
pub(crate) struct FakeStore {
    pub matches: Vec<RawMatch>,
    pub fail: bool,
    pub calls: AtomicU32,
}

impl FakeStore {
    pub(crate) fn with_matches(matches: Vec<RawMatch>) -> Self {
        Self {
            matches,
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            matches: Vec::new(),
            fail: true,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FakeStore {
    async fn query(
        &self,
        _vector: &EmbeddingVector,
        top_k: u64,
    ) -> Result<Vec<RawMatch>, VectorStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(VectorStoreError::ConnectionError("connection refused".to_string()));
        }
        Ok(self.matches.iter().take(top_k as usize).cloned().collect())
    }

    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(!self.fail)
    }

    async fn index_info(&self) -> Result<Option<IndexInfo>, VectorStoreError> {
        Ok(Some(IndexInfo {
            vector_count: self.matches.len() as u64,
            dimension: None,
        }))
    }

    fn index(&self) -> &str {
        "fake"
    }
}

/// Replays scripted chunks, then an optional error. With `hold_open` the
/// sender is kept so the stream never ends on its own.
pub(crate) struct FakeGenerator {
    pub items: Vec<&'static str>,
    pub error: Option<&'static str>,
    pub blocked: bool,
    pub refuse: bool,
    pub hold_open: bool,
    pub calls: AtomicU32,
    pub last_prompt: Mutex<Option<AugmentedPrompt>>,
    pub senders: Mutex<Vec<mpsc::Sender<ChunkResult>>>,
}

impl FakeGenerator {
    pub(crate) fn answering(items: Vec<&'static str>) -> Self {
        Self {
            items,
            error: None,
            blocked: false,
            refuse: false,
            hold_open: false,
            calls: AtomicU32::new(0),
            last_prompt: Mutex::new(None),
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_after(items: Vec<&'static str>, error: &'static str) -> Self {
        Self {
            error: Some(error),
            ..Self::answering(items)
        }
    }

    /// Fails before any chunk exists.
    pub(crate) fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::answering(Vec::new())
        }
    }

    /// Opens the stream, then reports a safety block as its first item.
    pub(crate) fn blocked() -> Self {
        Self {
            blocked: true,
            ..Self::answering(vec!["never sent"])
        }
    }

    pub(crate) fn hanging() -> Self {
        Self {
            hold_open: true,
            ..Self::answering(vec!["first"])
        }
    }

    pub(crate) fn final_segment(&self) -> String {
        self.last_prompt
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|p| p.final_segment().map(|s| s.text.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Generator for FakeGenerator {
    async fn stream(
        &self,
        prompt: &AugmentedPrompt,
        _cancel: &CancellationToken,
    ) -> Result<ChunkStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        if self.refuse {
            return Err(GenerationError::ServerError("status 503: overloaded".to_string()));
        }

        let (tx, stream) = ChunkStream::channel(self.items.len() + 1);
        if self.blocked {
            tx.try_send(Err(GenerationError::Blocked("SAFETY".to_string())))
                .unwrap();
            return Ok(stream);
        }
        for item in &self.items {
            tx.try_send(Ok(ResponseChunk::new(*item))).unwrap();
        }
        if let Some(error) = self.error {
            tx.try_send(Err(GenerationError::StreamError(error.to_string())))
                .unwrap();
        }
        if self.hold_open {
            self.senders.lock().unwrap().push(tx);
        }
        Ok(stream)
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    fn model(&self) -> &str {
        "fake-generator"
    }
}

/// A well-formed review match.
pub(crate) fn review(id: &str, score: f32, subject: &str, stars: f64) -> RawMatch {
    let metadata: Map<String, Value> = json!({
        "review": format!("{id} explains {subject} well"),
        "subject": subject,
        "stars": stars,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();
    RawMatch::new(id, score, metadata)
}

pub(crate) fn physics_matches() -> Vec<RawMatch> {
    vec![
        review("Dr. Emily Carter", 0.91, "Physics", 4.0),
        review("Prof. James Smith", 0.87, "Physics", 5.0),
        review("Dr. Linda Brown", 0.80, "Physics", 3.5),
    ]
}
