//! Core data types and error definitions for the answering pipeline.

use crate::{
    document::DocumentError, embedding::EmbeddingClientError, llm::LlmClientError,
    qdrant::QdrantError,
};
use anyhow::Error as TokenizerError;
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Configuration requested an impossible budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Model we attempted to load a tokenizer for.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Errors emitted by the answering pipeline. Any of them aborts the whole request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request itself was unusable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The document could not be fetched or parsed.
    #[error("{0}")]
    Document(#[from] DocumentError),
    /// Chunking step failed to segment the document.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed while indexing the document.
    #[error("Failed to embed document: {0}")]
    Embedding(#[source] EmbeddingClientError),
    /// Vector index creation or upsert failed.
    #[error("Failed to build vector index: {0}")]
    Index(#[source] QdrantError),
    /// Embedding the question failed.
    #[error("Failed to embed question '{question}': {source}")]
    QuestionEmbedding {
        /// Question being processed.
        question: String,
        /// Underlying provider failure.
        #[source]
        source: EmbeddingClientError,
    },
    /// Similarity search failed.
    #[error("Failed to retrieve context for question '{question}': {source}")]
    Retrieval {
        /// Question being processed.
        question: String,
        /// Underlying Qdrant failure.
        #[source]
        source: QdrantError,
    },
    /// Completion provider failed.
    #[error("Failed to get answer for question '{question}': {source}")]
    Answer {
        /// Question being processed.
        question: String,
        /// Underlying provider failure.
        #[source]
        source: LlmClientError,
    },
    /// Completion provider returned only whitespace.
    #[error("Failed to get answer for question: {question}")]
    EmptyAnswer {
        /// Question being processed.
        question: String,
    },
}

impl PipelineError {
    /// Whether the failure was caused by the caller's input rather than a backend.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::Document(_))
    }
}

/// Handle to the request-scoped vector index built for one document.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    /// Qdrant collection holding the document's points.
    pub collection: String,
    /// Number of points written.
    pub points: usize,
}
