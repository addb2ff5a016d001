pub mod composer;
pub mod embedding;
#[cfg(test)]
pub(crate) mod fakes;
pub mod generation;
pub mod pipeline;
pub mod retriever;
pub mod vector_store;

pub use composer::{DEFAULT_SYSTEM_PROMPT, PromptComposer, compose};
pub use embedding::{Embedder, GeminiEmbedder, TeiEmbedder, create_embedder};
pub use generation::{ChunkStream, GeminiGenerator, Generator, ResponseChunk, create_generator};
pub use pipeline::{AnswerStream, Pipeline, PipelineState, StageObserver};
pub use retriever::Retriever;
pub use vector_store::{IndexInfo, VectorStore, create_backend};
