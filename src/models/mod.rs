mod config;
mod format;
mod message;
mod prompt;
mod retrieval;
mod vector;

pub use config::{
    Config, DEFAULT_BIND, DEFAULT_EMBEDDING_MODEL, DEFAULT_GEMINI_URL, DEFAULT_GENERATION_MODEL,
    DEFAULT_INDEX, DEFAULT_NAMESPACE, DEFAULT_QDRANT_URL, DEFAULT_TOP_K, EmbeddingConfig,
    EmbeddingDriver, GenerationConfig, MAX_TOP_K, SearchConfig, ServerConfig, VectorDriver,
    VectorStoreConfig,
};
pub use format::OutputFormat;
pub use message::{Conversation, ConversationMessage, Role};
pub use prompt::{AugmentedPrompt, PromptSegment, SegmentKind};
pub use retrieval::{
    MalformedMatch, REVIEW_KEY, RawMatch, RetrievalResult, RetrievedRecord, ReviewMetadata,
    STARS_KEY, SUBJECT_KEY,
};
pub use vector::{DEFAULT_EMBEDDING_DIMENSION, EmbeddingVector};
