//! Answering service coordinating document loading, indexing, retrieval, and generation.

use crate::{
    config::Config,
    document::{DocumentError, DocumentInput, DocumentLoader},
    embedding::{EmbeddingClient, EmbeddingClientError, embed_in_batches, get_embedding_client},
    llm::{AnswerClient, AnswerRequest, LlmClientError, get_answer_client},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        chunking::{ChunkSettings, PreparedChunk, split_document},
        types::{IndexHandle, PipelineError},
    },
    qdrant::{PointInsert, QdrantError, QdrantService},
};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while constructing the service's clients at startup.
#[derive(Debug, Error)]
pub enum InitError {
    /// Document loader HTTP client failed to build.
    #[error("document loader: {0}")]
    Document(#[from] DocumentError),
    /// Embedding client failed to build.
    #[error("embedding client: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Completion client failed to build.
    #[error("completion client: {0}")]
    Llm(#[from] LlmClientError),
    /// Qdrant client failed to build.
    #[error("qdrant client: {0}")]
    Qdrant(#[from] QdrantError),
}

/// Abstraction over the answering pipeline used by the HTTP surface.
#[async_trait]
pub trait AnswerApi: Send + Sync {
    /// Load the document, index it, and answer every question in order.
    async fn answer_questions(
        &self,
        document: DocumentInput,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Runs the linear pipeline: load, split, embed, upsert, then retrieve and answer per question.
///
/// Every request gets its own Qdrant collection, so concurrent requests never see each other's
/// chunks. The service holds only immutable clients and atomic counters; share it through an
/// `Arc`.
pub struct AnswerService {
    loader: DocumentLoader,
    embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
    answer_client: Box<dyn AnswerClient + Send + Sync>,
    qdrant_service: QdrantService,
    metrics: PipelineMetrics,
    chunk_settings: ChunkSettings,
    collection_prefix: String,
    embedding_dimension: usize,
    embedding_batch_size: usize,
    top_k: usize,
    drop_after_request: bool,
}

impl AnswerService {
    /// Build the service with providers selected by configuration.
    pub fn new(config: &Config) -> Result<Self, InitError> {
        tracing::info!("Initializing provider clients");
        let embedding_client = get_embedding_client(config)?;
        let answer_client = get_answer_client(config)?;
        Self::with_clients(config, embedding_client, answer_client)
    }

    /// Build the service around caller-supplied embedding and completion clients.
    pub fn with_clients(
        config: &Config,
        embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
        answer_client: Box<dyn AnswerClient + Send + Sync>,
    ) -> Result<Self, InitError> {
        Ok(Self {
            loader: DocumentLoader::new(config)?,
            embedding_client,
            answer_client,
            qdrant_service: QdrantService::new(config)?,
            metrics: PipelineMetrics::new(),
            chunk_settings: ChunkSettings {
                chunk_size: config.text_splitter_chunk_size,
                overlap: config.text_splitter_chunk_overlap,
                unit: config.text_splitter_unit,
                model: config.embedding_model.clone(),
            },
            collection_prefix: config.qdrant_collection_prefix.clone(),
            embedding_dimension: config.embedding_dimension,
            embedding_batch_size: config.embedding_batch_size,
            top_k: config.retrieval_top_k,
            drop_after_request: config.index_drop_after_request,
        })
    }

    /// Load the document, index it, and answer every question in order.
    pub async fn answer_questions(
        &self,
        document: DocumentInput,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        let result = self.run_pipeline(document, &questions).await;
        match &result {
            Ok((handle, answers)) => {
                self.metrics
                    .record_success(handle.points as u64, answers.len() as u64);
                tracing::info!(
                    collection = %handle.collection,
                    chunks = handle.points,
                    questions = answers.len(),
                    "Request completed"
                );
            }
            Err(error) => {
                self.metrics.record_failure();
                if error.is_client_error() {
                    tracing::warn!(error = %error, "Request rejected");
                } else {
                    tracing::error!(error = %error, "Request failed");
                }
            }
        }
        result.map(|(_, answers)| answers)
    }

    async fn run_pipeline(
        &self,
        document: DocumentInput,
        questions: &[String],
    ) -> Result<(IndexHandle, Vec<String>), PipelineError> {
        validate_questions(questions)?;

        let document = self.loader.load(document).await?;
        let chunks = split_document(&document.text, &self.chunk_settings)?;
        if chunks.is_empty() {
            return Err(DocumentError::Empty.into());
        }
        tracing::info!(
            source = %document.source,
            chunks = chunks.len(),
            "Document loaded and split"
        );

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = embed_in_batches(
            self.embedding_client.as_ref(),
            &texts,
            self.embedding_batch_size,
            self.embedding_dimension,
        )
        .await
        .map_err(PipelineError::Embedding)?;

        let collection = self.collection_name();
        let guard = self.drop_after_request.then(|| CollectionGuard {
            qdrant: self.qdrant_service.clone(),
            collection: collection.clone(),
            armed: true,
        });
        let outcome: Result<(IndexHandle, Vec<String>), PipelineError> = async {
            let handle = self
                .build_index(&collection, &document.source, chunks, vectors)
                .await?;
            let answers = self.answer_all(&handle, questions).await?;
            Ok((handle, answers))
        }
        .await;

        if let Some(guard) = guard {
            guard.release().await;
        }
        outcome
    }

    async fn build_index(
        &self,
        collection: &str,
        source: &str,
        chunks: Vec<PreparedChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<IndexHandle, PipelineError> {
        if chunks.len() != vectors.len() {
            return Err(PipelineError::Index(QdrantError::PointCountMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            }));
        }

        self.qdrant_service
            .create_collection(collection, self.embedding_dimension as u64)
            .await
            .map_err(PipelineError::Index)?;

        let points = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| PointInsert {
                text: chunk.text,
                chunk_index: chunk.index,
                chunk_hash: chunk.chunk_hash,
                vector,
            })
            .collect();

        let indexed = self
            .qdrant_service
            .index_points(collection, source, points)
            .await
            .map_err(PipelineError::Index)?;
        tracing::debug!(collection, points = indexed, "Vector index built");

        Ok(IndexHandle {
            collection: collection.to_string(),
            points: indexed,
        })
    }

    async fn answer_all(
        &self,
        handle: &IndexHandle,
        questions: &[String],
    ) -> Result<Vec<String>, PipelineError> {
        let mut answers = Vec::with_capacity(questions.len());
        for (position, question) in questions.iter().enumerate() {
            tracing::debug!(position, question = %question, "Answering question");
            answers.push(self.answer_one(handle, question).await?);
        }
        Ok(answers)
    }

    async fn answer_one(
        &self,
        handle: &IndexHandle,
        question: &str,
    ) -> Result<String, PipelineError> {
        let mut vectors = embed_in_batches(
            self.embedding_client.as_ref(),
            &[question.to_string()],
            1,
            self.embedding_dimension,
        )
        .await
        .map_err(|source| PipelineError::QuestionEmbedding {
            question: question.to_string(),
            source,
        })?;
        let vector = vectors
            .pop()
            .ok_or_else(|| PipelineError::QuestionEmbedding {
                question: question.to_string(),
                source: EmbeddingClientError::InvalidResponse("no vector returned".into()),
            })?;

        let hits = self
            .qdrant_service
            .search_points(&handle.collection, vector, self.top_k)
            .await
            .map_err(|source| PipelineError::Retrieval {
                question: question.to_string(),
                source,
            })?;
        let context: Vec<String> = hits
            .iter()
            .filter_map(|hit| hit.text().map(str::to_string))
            .collect();
        tracing::debug!(hits = hits.len(), excerpts = context.len(), "Context retrieved");

        let answer = self
            .answer_client
            .generate_answer(&AnswerRequest {
                question: question.to_string(),
                context,
            })
            .await
            .map_err(|source| PipelineError::Answer {
                question: question.to_string(),
                source,
            })?;

        if answer.trim().is_empty() {
            return Err(PipelineError::EmptyAnswer {
                question: question.to_string(),
            });
        }
        Ok(answer)
    }

    fn collection_name(&self) -> String {
        format!("{}-{}", self.collection_prefix, Uuid::new_v4().simple())
    }

    /// Return the current pipeline metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Deletes the request collection once released, or in the background if the request future is
/// dropped first (client disconnect).
struct CollectionGuard {
    qdrant: QdrantService,
    collection: String,
    armed: bool,
}

impl CollectionGuard {
    async fn release(mut self) {
        self.armed = false;
        drop_collection(&self.qdrant, &self.collection).await;
    }
}

impl Drop for CollectionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                collection = %self.collection,
                "No runtime left to drop abandoned collection"
            );
            return;
        };
        let qdrant = self.qdrant.clone();
        let collection = std::mem::take(&mut self.collection);
        tracing::info!(
            collection = %collection,
            "Request abandoned; dropping collection in background"
        );
        runtime.spawn(async move {
            drop_collection(&qdrant, &collection).await;
        });
    }
}

async fn drop_collection(qdrant: &QdrantService, collection: &str) {
    if let Err(error) = qdrant.delete_collection(collection).await {
        tracing::warn!(collection, error = %error, "Failed to drop request collection");
    }
}

fn validate_questions(questions: &[String]) -> Result<(), PipelineError> {
    if questions.is_empty() {
        return Err(PipelineError::InvalidRequest(
            "questions must not be empty".into(),
        ));
    }
    if let Some(position) = questions.iter().position(|q| q.trim().is_empty()) {
        return Err(PipelineError::InvalidRequest(format!(
            "question {position} is blank"
        )));
    }
    Ok(())
}

#[async_trait]
impl AnswerApi for AnswerService {
    async fn answer_questions(
        &self,
        document: DocumentInput,
        questions: Vec<String>,
    ) -> Result<Vec<String>, PipelineError> {
        AnswerService::answer_questions(self, document, questions).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        AnswerService::metrics_snapshot(self)
    }
}
