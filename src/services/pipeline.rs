//! Pipeline Orchestrator.
//!
//! One request moves through `Received → Embedding → Retrieving → Composing
//! → Streaming → Done`, or ends in `Failed(stage, cause)`. Stages run in
//! order; only the generation stream outlives [`Pipeline::run`].
//!
//! Failure policy:
//! - validation, embedding and composition failures abort before any
//!   generation request is made
//! - retrieval failures are logged and the request continues with no context
//! - a generation failure before the first chunk is returned by
//!   [`Pipeline::run`]; once a chunk exists, failures arrive as the last item
//!   of the [`AnswerStream`]

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{
    AppError, EmbeddingError, GenerationError, PipelineError, RetrievalError, Stage,
};
use crate::models::{Config, Conversation, ConversationMessage, RetrievalResult};
use crate::services::composer::PromptComposer;
use crate::services::embedding::{Embedder, create_embedder};
use crate::services::generation::{ChunkStream, Generator, ResponseChunk, create_generator};
use crate::services::retriever::Retriever;
use crate::services::vector_store::create_backend;
use crate::utils::retry::RetryConfig;

/// Observable progress of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Embedding,
    Retrieving,
    Composing,
    Streaming,
    Done,
    Failed { stage: Stage, cause: String },
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Received => f.write_str("received"),
            PipelineState::Embedding => f.write_str("embedding"),
            PipelineState::Retrieving => f.write_str("retrieving"),
            PipelineState::Composing => f.write_str("composing"),
            PipelineState::Streaming => f.write_str("streaming"),
            PipelineState::Done => f.write_str("done"),
            PipelineState::Failed { stage, cause } => write!(f, "failed at {stage}: {cause}"),
        }
    }
}

/// Callback invoked on every state transition.
pub type StageObserver = Arc<dyn Fn(&PipelineState) + Send + Sync>;

/// Shared notification hooks for one pipeline and its answer streams.
#[derive(Clone, Default)]
struct Observers {
    hooks: Arc<Vec<StageObserver>>,
    request_id: Option<Uuid>,
}

impl Observers {
    fn for_request(&self, request_id: Uuid) -> Self {
        Self {
            hooks: Arc::clone(&self.hooks),
            request_id: Some(request_id),
        }
    }

    fn notify(&self, state: PipelineState) {
        match &state {
            PipelineState::Failed { .. } => tracing::error!(state = %state, "request failed"),
            PipelineState::Done => tracing::info!(request_id = ?self.request_id, "request done"),
            _ => tracing::debug!(state = %state, "stage"),
        }
        for hook in self.hooks.iter() {
            hook(&state);
        }
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        self.notify(PipelineState::Failed {
            stage: error.stage(),
            cause: error.to_string(),
        });
        error
    }
}

/// The request pipeline. Collaborators are built once and shared across
/// concurrent requests; nothing here is mutated per request.
pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    retriever: Retriever,
    composer: PromptComposer,
    generator: Arc<dyn Generator>,
    top_k: usize,
    observers: Observers,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Retriever,
        composer: PromptComposer,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            embedder,
            retriever,
            composer,
            generator,
            top_k: crate::models::DEFAULT_TOP_K as usize,
            observers: Observers::default(),
        }
    }

    /// Build every configured adapter.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let embedder = create_embedder(&config.embedding)?;
        let store = create_backend(&config.vector_store)?;
        let retriever = Retriever::new(store)
            .with_retry(RetryConfig::with_retries(config.vector_store.max_retries));
        let generator = create_generator(&config.generation)?;
        let composer = PromptComposer::from_override(config.generation.system_prompt.as_deref());

        Ok(Self::new(embedder, retriever, composer, generator)
            .with_top_k(config.vector_store.top_k as usize))
    }

    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Register a hook that sees every state transition.
    #[must_use]
    pub fn with_observer(mut self, observer: impl Fn(&PipelineState) + Send + Sync + 'static) -> Self {
        let mut hooks: Vec<StageObserver> = self.observers.hooks.iter().cloned().collect();
        hooks.push(Arc::new(observer));
        self.observers.hooks = Arc::new(hooks);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Validate `messages` and run the pipeline.
    pub async fn run(
        &self,
        messages: Vec<ConversationMessage>,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, PipelineError> {
        let observers = self.observers.for_request(Uuid::new_v4());
        let conversation = self.receive(&observers, Conversation::new(messages))?;
        self.execute(conversation, observers, cancel).await
    }

    /// Validate a raw request body and run the pipeline.
    pub async fn run_json(
        &self,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, PipelineError> {
        let observers = self.observers.for_request(Uuid::new_v4());
        let conversation = self.receive(&observers, Conversation::from_slice(body))?;
        self.execute(conversation, observers, cancel).await
    }

    /// Run an already validated conversation.
    pub async fn run_conversation(
        &self,
        conversation: Conversation,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, PipelineError> {
        let observers = self.observers.for_request(Uuid::new_v4());
        observers.notify(PipelineState::Received);
        self.execute(conversation, observers, cancel).await
    }

    fn receive(
        &self,
        observers: &Observers,
        validated: Result<Conversation, crate::error::ValidationError>,
    ) -> Result<Conversation, PipelineError> {
        observers.notify(PipelineState::Received);
        validated.map_err(|e| observers.fail(e.into()))
    }

    async fn execute(
        &self,
        conversation: Conversation,
        observers: Observers,
        cancel: &CancellationToken,
    ) -> Result<AnswerStream, PipelineError> {
        let request_id = observers.request_id.unwrap_or_else(Uuid::new_v4);
        let span = tracing::info_span!("request", id = %request_id);

        async move {
            tracing::info!(
                messages = conversation.len(),
                query = %crate::utils::preview(conversation.query(), 80),
                "request received"
            );

            observers.notify(PipelineState::Embedding);
            let vector = match self.embedder.embed(conversation.query(), cancel).await {
                Ok(vector) => vector,
                Err(EmbeddingError::Cancelled) => {
                    return Err(observers.fail(PipelineError::Cancelled(Stage::Embedding)));
                }
                Err(e) => return Err(observers.fail(e.into())),
            };

            observers.notify(PipelineState::Retrieving);
            let retrieval = match self.retriever.retrieve(&vector, self.top_k, cancel).await {
                Ok(result) => result,
                Err(RetrievalError::Cancelled) => {
                    return Err(observers.fail(PipelineError::Cancelled(Stage::Retrieving)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "retrieval failed, continuing without context");
                    RetrievalResult::empty()
                }
            };
            tracing::debug!(records = retrieval.len(), "retrieved context");

            observers.notify(PipelineState::Composing);
            if cancel.is_cancelled() {
                return Err(observers.fail(PipelineError::Cancelled(Stage::Composing)));
            }
            let prompt = self
                .composer
                .compose(conversation.prior(), conversation.query(), &retrieval)
                .map_err(|e| observers.fail(e.into()))?;
            tracing::debug!(segments = prompt.len(), chars = prompt.char_count(), "prompt composed");

            observers.notify(PipelineState::Streaming);
            let mut chunks = match self.generator.stream(&prompt, cancel).await {
                Ok(chunks) => chunks,
                Err(GenerationError::Cancelled) => {
                    return Err(observers.fail(PipelineError::Cancelled(Stage::Streaming)));
                }
                Err(e) => return Err(observers.fail(e.into())),
            };

            // An error in place of the first chunk is still a failed request,
            // not a started answer.
            let first = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                first = chunks.next() => Some(first),
            };
            let pending = match first {
                None | Some(Some(Err(GenerationError::Cancelled))) => {
                    return Err(observers.fail(PipelineError::Cancelled(Stage::Streaming)));
                }
                Some(Some(Err(e))) => return Err(observers.fail(e.into())),
                Some(Some(Ok(chunk))) => Some(chunk),
                Some(None) => None,
            };

            Ok(AnswerStream::new(chunks, pending, cancel.clone(), observers))
        }
        .instrument(span)
        .await
    }
}

/// The live answer: chunks in generation order, then at most one terminal
/// error. Dropping it releases the generation stream.
pub struct AnswerStream {
    chunks: ChunkStream,
    pending: Option<ResponseChunk>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    observers: Observers,
    emitted: usize,
    finished: bool,
}

impl AnswerStream {
    fn new(
        chunks: ChunkStream,
        pending: Option<ResponseChunk>,
        cancel: CancellationToken,
        observers: Observers,
    ) -> Self {
        Self {
            chunks,
            pending,
            cancelled: Box::pin(cancel.cancelled_owned()),
            observers,
            emitted: 0,
            finished: false,
        }
    }

    /// Request id shared with the log span.
    pub fn request_id(&self) -> Option<Uuid> {
        self.observers.request_id
    }

    /// Chunks forwarded so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn finish_with(&mut self, error: PipelineError) -> Poll<Option<Result<ResponseChunk, PipelineError>>> {
        self.finished = true;
        tracing::debug!(emitted = self.emitted, "stream ended early");
        Poll::Ready(Some(Err(self.observers.fail(error))))
    }
}

impl Stream for AnswerStream {
    type Item = Result<ResponseChunk, PipelineError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.cancelled.as_mut().poll(cx).is_ready() {
            return self.finish_with(PipelineError::Cancelled(Stage::Streaming));
        }

        if let Some(chunk) = self.pending.take() {
            self.emitted += 1;
            return Poll::Ready(Some(Ok(chunk)));
        }

        match Pin::new(&mut self.chunks).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.emitted += 1;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(GenerationError::Cancelled))) => {
                self.finish_with(PipelineError::Cancelled(Stage::Streaming))
            }
            Poll::Ready(Some(Err(e))) => self.finish_with(e.into()),
            Poll::Ready(None) => {
                self.finished = true;
                self.observers.notify(PipelineState::Done);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusClass;
    use crate::models::SegmentKind;
    use crate::services::composer::RESULT_HEADING;
    use crate::services::fakes::{FakeEmbedder, FakeGenerator, FakeStore, physics_matches};
    use futures::StreamExt;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    struct Harness {
        embedder: Arc<FakeEmbedder>,
        store: Arc<FakeStore>,
        generator: Arc<FakeGenerator>,
        states: Arc<Mutex<Vec<PipelineState>>>,
        pipeline: Pipeline,
    }

    fn harness(embedder: FakeEmbedder, store: FakeStore, generator: FakeGenerator) -> Harness {
        let embedder = Arc::new(embedder);
        let store = Arc::new(store);
        let generator = Arc::new(generator);
        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&states);

        let pipeline = Pipeline::new(
            embedder.clone(),
            Retriever::new(store.clone()),
            PromptComposer::default(),
            generator.clone(),
        )
        .with_observer(move |state| recorded.lock().unwrap().push(state.clone()));

        Harness {
            embedder,
            store,
            generator,
            states,
            pipeline,
        }
    }

    async fn drain(stream: AnswerStream) -> (String, Option<PipelineError>) {
        let mut text = String::new();
        let mut error = None;
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => text.push_str(&chunk.text),
                Err(e) => error = Some(e),
            }
        }
        (text, error)
    }

    #[tokio::test]
    async fn test_happy_path_reaches_done() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::answering(vec!["Title: \"Top 3 Professors for Physics\"", "\nProfessor 1:", " Dr. Emily Carter"]),
        );

        let stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .unwrap();
        let (text, error) = drain(stream).await;

        assert!(error.is_none());
        assert_eq!(
            text,
            "Title: \"Top 3 Professors for Physics\"\nProfessor 1: Dr. Emily Carter"
        );
        assert_eq!(
            *h.states.lock().unwrap(),
            vec![
                PipelineState::Received,
                PipelineState::Embedding,
                PipelineState::Retrieving,
                PipelineState::Composing,
                PipelineState::Streaming,
                PipelineState::Done,
            ]
        );

        let last = h.generator.final_segment();
        assert!(last.starts_with("best physics professors\n\n"));
        assert_eq!(last.matches(RESULT_HEADING).count(), 3);
        let carter = last.find("Dr. Emily Carter").unwrap();
        let brown = last.find("Dr. Linda Brown").unwrap();
        assert!(carter < brown);
    }

    #[tokio::test]
    async fn test_zero_matches_still_streams() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(Vec::new()),
            FakeGenerator::answering(vec!["No reviews matched."]),
        );

        let stream = h
            .pipeline
            .run(vec![ConversationMessage::user("who teaches underwater basket weaving?")], &CancellationToken::new())
            .await
            .unwrap();
        let (text, _) = drain(stream).await;

        assert_eq!(text, "No reviews matched.");
        assert!(h.states.lock().unwrap().contains(&PipelineState::Streaming));
        assert_eq!(h.generator.final_segment(), "who teaches underwater basket weaving?");
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_to_empty_context() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::failing(),
            FakeGenerator::answering(vec!["General advice."]),
        );

        let stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .unwrap();
        let (text, error) = drain(stream).await;

        assert!(error.is_none());
        assert_eq!(text, "General advice.");
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
        assert!(!h.generator.final_segment().contains(RESULT_HEADING));
        assert_eq!(h.states.lock().unwrap().last(), Some(&PipelineState::Done));
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_external_calls() {
        let bodies: [&[u8]; 4] = [b"[]", b"{\"role\":\"user\"}", b"not json", b"\"text\""];
        for body in bodies {
            let h = harness(
                FakeEmbedder::ok(),
                FakeStore::with_matches(physics_matches()),
                FakeGenerator::answering(vec!["unused"]),
            );

            let err = h
                .pipeline
                .run_json(body, &CancellationToken::new())
                .await
                .err()
                .unwrap();

            assert!(matches!(err, PipelineError::Validation(_)));
            assert_eq!(err.status_class(), StatusClass::Client);
            assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
            assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
            assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
            assert!(matches!(
                h.states.lock().unwrap().last(),
                Some(PipelineState::Failed { stage: Stage::Received, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_embedding_failure_skips_generation() {
        let h = harness(
            FakeEmbedder::failing(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::answering(vec!["unused"]),
        );

        let err = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert_eq!(err.stage(), Stage::Embedding);
        assert_eq!(err.status_class(), StatusClass::Server);
        assert_eq!(h.store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mid_stream_error_after_emitted_chunks() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::failing_after(vec!["Title:", " Top 3"], "connection reset"),
        );

        let mut stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().text, "Title:");
        assert_eq!(stream.next().await.unwrap().unwrap().text, " Top 3");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, PipelineError::Generation(GenerationError::StreamError(_))));
        assert!(stream.next().await.is_none());
        assert_eq!(stream.emitted(), 2);

        assert!(matches!(
            h.states.lock().unwrap().last(),
            Some(PipelineState::Failed { stage: Stage::Streaming, .. })
        ));
    }

    #[tokio::test]
    async fn test_history_passes_through_in_order() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::answering(vec!["ok"]),
        );
        let messages = vec![
            ConversationMessage::user("I need a physics professor"),
            ConversationMessage::assistant("Any preferences?"),
            ConversationMessage::user("clear explanations"),
        ];

        let stream = h
            .pipeline
            .run(messages, &CancellationToken::new())
            .await
            .unwrap();
        drain(stream).await;

        let prompt = h.generator.last_prompt.lock().unwrap().clone().unwrap();
        let kinds: Vec<SegmentKind> = prompt.segments().iter().map(|s| s.kind).collect();
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], SegmentKind::Instructions);
        assert_eq!(prompt.segments()[1].text, "I need a physics professor");
        assert_eq!(prompt.segments()[2].text, "Any preferences?");
        assert!(prompt.segments()[3].text.starts_with("clear explanations"));
        assert_eq!(h.embedder.embedded_texts(), vec!["clear explanations".to_string()]);
    }

    #[tokio::test]
    async fn test_error_before_first_chunk_fails_run() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::blocked(),
        );

        let err = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, PipelineError::Generation(GenerationError::Blocked(_))));
        assert_eq!(err.status_class(), StatusClass::Server);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            h.states.lock().unwrap().last(),
            Some(PipelineState::Failed { stage: Stage::Streaming, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_generation_reaches_done() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::answering(Vec::new()),
        );

        let stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .unwrap();
        let (text, error) = drain(stream).await;

        assert!(text.is_empty());
        assert!(error.is_none());
        assert_eq!(h.states.lock().unwrap().last(), Some(&PipelineState::Done));
    }

    #[tokio::test]
    async fn test_cancellation_stops_forwarding() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::hanging(),
        );
        let cancel = CancellationToken::new();

        let mut stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &cancel)
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().text, "first");

        cancel.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.status_class(), StatusClass::Cancelled);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::answering(vec!["unused"]),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &cancel)
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_class(), StatusClass::Cancelled);
        assert_eq!(h.generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropping_answer_closes_generation_channel() {
        let h = harness(
            FakeEmbedder::ok(),
            FakeStore::with_matches(physics_matches()),
            FakeGenerator::hanging(),
        );

        let stream = h
            .pipeline
            .run(vec![ConversationMessage::user("best physics professors")], &CancellationToken::new())
            .await
            .unwrap();
        drop(stream);

        let senders = h.generator.senders.lock().unwrap();
        assert!(senders[0].is_closed());
    }
}
