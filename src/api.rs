//! HTTP surface for the question answering service.
//!
//! - `POST /hackrx/run` – JSON `{ "documents": "<url or path>", "questions": [..] }`, returns
//!   `{ "answers": [..] }` in question order. Requires `Authorization: Bearer <token>`.
//! - `POST /hackrx/upload` – multipart form with a `file` part and `questions` parts (one per
//!   question, or a single JSON array). Same auth, pipeline, and response as `/hackrx/run`.
//! - `GET /hackrx/health`, `GET /health` – static healthy status, no auth.
//! - `GET /hackrx/docs` – machine-readable command catalog, no auth.
//! - `GET /metrics` – pipeline counters, no auth.
//!
//! Errors are returned as `{ "detail": "<message>" }` with a status derived from the failure.

use crate::auth::{BearerAuth, require_bearer};
use crate::document::DocumentInput;
use crate::metrics::MetricsSnapshot;
use crate::processing::{AnswerApi, PipelineError};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Multipart overhead allowed on top of the document byte limit.
const MULTIPART_SLACK_BYTES: usize = 64 * 1024;

/// Build the HTTP router. Only the answering routes sit behind `auth`.
pub fn create_router<S>(service: Arc<S>, auth: BearerAuth, max_document_bytes: usize) -> Router
where
    S: AnswerApi + 'static,
{
    let protected = Router::new()
        .route("/hackrx/run", post(run_query::<S>))
        .route(
            "/hackrx/upload",
            post(run_upload::<S>).layer(DefaultBodyLimit::max(
                max_document_bytes.saturating_add(MULTIPART_SLACK_BYTES),
            )),
        )
        .route_layer(middleware::from_fn_with_state(auth, require_bearer));

    Router::new()
        .route("/hackrx/health", get(health_check))
        .route("/health", get(health_check))
        .route("/hackrx/docs", get(get_commands))
        .route("/metrics", get(get_metrics::<S>))
        .merge(protected)
        .with_state(service)
}

/// Request body for `POST /hackrx/run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// URL or local path of the document to answer from.
    pub documents: String,
    /// Questions answered in order.
    pub questions: Vec<String>,
}

/// Success response for both answering routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    /// One answer per question, in question order.
    pub answers: Vec<String>,
}

async fn run_query<S>(
    State(service): State<Arc<S>>,
    request: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, AppError>
where
    S: AnswerApi,
{
    let Json(RunRequest {
        documents,
        questions,
    }) = request?;
    tracing::info!(questions = questions.len(), "Run request received");
    let answers = service
        .answer_questions(DocumentInput::Reference(documents), questions)
        .await?;
    Ok(Json(RunResponse { answers }))
}

async fn run_upload<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RunResponse>, AppError>
where
    S: AnswerApi,
{
    let (document, questions) = read_upload_form(multipart?).await?;
    tracing::info!(questions = questions.len(), "Upload request received");
    let answers = service.answer_questions(document, questions).await?;
    Ok(Json(RunResponse { answers }))
}

async fn read_upload_form(
    mut multipart: Multipart,
) -> Result<(DocumentInput, Vec<String>), AppError> {
    let mut document = None;
    let mut questions = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(AppError::multipart)? {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(AppError::multipart)?;
                document = Some(DocumentInput::Upload {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("questions") => {
                let value = field.text().await.map_err(AppError::multipart)?;
                questions.extend(parse_question_field(&value)?);
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    let document =
        document.ok_or_else(|| AppError::bad_request("multipart field 'file' is required"))?;
    Ok((document, questions))
}

/// A `questions` part is either a JSON array of strings or a single question.
fn parse_question_field(value: &str) -> Result<Vec<String>, AppError> {
    let trimmed = value.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|error| AppError::bad_request(format!("invalid questions array: {error}")))
    } else {
        Ok(vec![trimmed.to_string()])
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: AnswerApi,
{
    Json(service.metrics_snapshot())
}

#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    authenticated: bool,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by clients and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "run",
                method: "POST",
                path: "/hackrx/run",
                authenticated: true,
                description: "Fetch a document by URL or path, index it, and answer each question in order. Returns { \"answers\": [string] }.",
                request_example: Some(json!({
                    "documents": "https://example.org/policy.pdf",
                    "questions": ["What is the grace period for premium payment?"]
                })),
            },
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/hackrx/upload",
                authenticated: true,
                description: "Multipart variant of run: a 'file' part plus 'questions' parts (one per question or a JSON array).",
                request_example: None,
            },
            CommandDescriptor {
                name: "health",
                method: "GET",
                path: "/hackrx/health",
                authenticated: false,
                description: "Static liveness probe returning { \"status\": \"healthy\" }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                authenticated: false,
                description: "Request, question, and chunk counters since startup.",
                request_example: None,
            },
        ],
    })
}

/// Error wrapper converting pipeline and form failures into HTTP responses.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    detail: String,
}

impl AppError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    fn multipart(error: MultipartError) -> Self {
        Self {
            status: error.status(),
            detail: error.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        let status = if error.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: error.to_string(),
        }
    }
}
