//! Error types for the review question-answering pipeline.

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors raised while validating an inbound conversation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("conversation must contain at least one message")]
    EmptyConversation,

    #[error("conversation must be a sequence of messages: {0}")]
    NotASequence(String),

    #[error("the last message has no content to answer")]
    EmptyQuery,

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("failed to connect to embedding service: {0}")]
    ConnectionError(String),

    #[error("embedding service error: {0}")]
    ServerError(String),

    #[error("embedding request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding service returned an empty vector")]
    EmptyVector,

    #[error("embedding contains a non-finite value at index {index}")]
    NonFiniteValue { index: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding timeout")]
    Timeout,

    #[error("embedding cancelled")]
    Cancelled,
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::ConnectionError(_) | EmbeddingError::Timeout => true,
            // 5xx and throttling responses are worth another attempt
            EmbeddingError::ServerError(msg) => {
                msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("504")
                    || msg.contains("429")
                    || msg.to_lowercase().contains("unavailable")
                    || msg.to_lowercase().contains("too many requests")
            }
            EmbeddingError::RequestError(e) => e.is_timeout() || e.is_connect(),
            EmbeddingError::EmptyInput
            | EmbeddingError::InvalidResponse(_)
            | EmbeddingError::EmptyVector
            | EmbeddingError::NonFiniteValue { .. }
            | EmbeddingError::DimensionMismatch { .. }
            | EmbeddingError::Cancelled => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    ConnectionError(String),

    #[error("search error: {0}")]
    SearchError(String),

    #[error("vector store client error: {0}")]
    ClientError(String),

    #[error("malformed vector store response: {0}")]
    MalformedResponse(String),
}

impl Retryable for VectorStoreError {
    fn is_retryable(&self) -> bool {
        match self {
            VectorStoreError::ConnectionError(_) => true,
            VectorStoreError::SearchError(msg) | VectorStoreError::ClientError(msg) => {
                let msg_lower = msg.to_lowercase();
                msg_lower.contains("timeout")
                    || msg_lower.contains("connection")
                    || msg_lower.contains("unavailable")
                    || msg_lower.contains("too many")
            }
            VectorStoreError::MalformedResponse(_) => false,
        }
    }
}

/// Errors surfaced by the retriever. The pipeline absorbs these.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("vector store error: {0}")]
    Store(#[from] VectorStoreError),

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("retrieval cancelled")]
    Cancelled,
}

/// Errors building the augmented prompt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("system instructions are empty")]
    EmptyInstructions,

    #[error("current user text is empty")]
    EmptyQuery,
}

/// Errors related to the streamed generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to connect to generation service: {0}")]
    ConnectionError(String),

    #[error("generation service error: {0}")]
    ServerError(String),

    #[error("generation stream failed: {0}")]
    StreamError(String),

    #[error("invalid generation event: {0}")]
    InvalidEvent(String),

    #[error("generation blocked: {0}")]
    Blocked(String),

    #[error("generation cancelled")]
    Cancelled,
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Pipeline stage at which a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Embedding,
    Retrieving,
    Composing,
    Streaming,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Composing => "composing",
            Stage::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// How the transport should classify a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// The caller sent malformed input (4xx).
    Client,
    /// A collaborator failed (5xx).
    Server,
    /// The caller went away or the deadline elapsed; not reported.
    Cancelled,
}

/// Fatal pipeline errors. Retrieval failures never appear here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("prompt composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("request cancelled during {0}")]
    Cancelled(Stage),
}

impl PipelineError {
    /// Stage the pipeline was in when this error ended it.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Validation(_) => Stage::Received,
            PipelineError::Embedding(_) => Stage::Embedding,
            PipelineError::Composition(_) => Stage::Composing,
            PipelineError::Generation(_) => Stage::Streaming,
            PipelineError::Cancelled(stage) => *stage,
        }
    }

    pub fn status_class(&self) -> StatusClass {
        match self {
            PipelineError::Validation(_) => StatusClass::Client,
            PipelineError::Cancelled(_)
            | PipelineError::Embedding(EmbeddingError::Cancelled)
            | PipelineError::Generation(GenerationError::Cancelled) => StatusClass::Cancelled,
            _ => StatusClass::Server,
        }
    }
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("{0}")]
    Other(String),
}
