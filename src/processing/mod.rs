//! Answering pipeline: chunking, indexing, retrieval, and answer orchestration.

pub mod chunking;
mod service;
pub mod types;

pub use service::{AnswerApi, AnswerService, InitError};
pub use types::{ChunkingError, IndexHandle, PipelineError};
