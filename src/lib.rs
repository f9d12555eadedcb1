#![deny(missing_docs)]

//! Core library for the document question answering service.

/// HTTP routing and REST handlers.
pub mod api;
/// Bearer token authentication middleware.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Document loading and text extraction.
pub mod document;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Completion client abstraction and prompt assembly.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Answering pipeline: chunking, indexing, retrieval, and generation.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
