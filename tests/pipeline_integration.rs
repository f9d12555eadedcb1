use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use docqa::{
    api::create_router,
    auth::BearerAuth,
    config::{ChunkUnit, Config, Provider},
    processing::AnswerService,
};
use httpmock::{
    Method::{DELETE, GET, POST, PUT},
    Mock, MockServer,
};
use serde_json::{Value, json};
use std::{io::Write, sync::Arc};
use tower::ServiceExt;

const DIMENSION: usize = 4;
const POLICY_TEXT: &str = "A grace period of thirty days is allowed for premium payment. \
Pre-existing diseases are covered after thirty-six months of continuous coverage. \
Maternity expenses are covered after twenty-four months.";

fn config_for(server: &MockServer) -> Config {
    Config {
        auth_token: "integration-secret".into(),
        qdrant_url: server.base_url(),
        qdrant_api_key: Some("qdrant-key".into()),
        qdrant_collection_prefix: "docqa-it".into(),
        embedding_provider: Provider::Ollama,
        embedding_model: "nomic-embed-text".into(),
        embedding_dimension: DIMENSION,
        embedding_batch_size: 1,
        llm_provider: Provider::Ollama,
        llm_model: "llama3".into(),
        llm_temperature: 0.0,
        ollama_url: server.base_url(),
        openai_api_key: None,
        openai_base_url: "http://127.0.0.1:9".into(),
        text_splitter_chunk_size: 80,
        text_splitter_chunk_overlap: 10,
        text_splitter_unit: ChunkUnit::Characters,
        retrieval_top_k: 2,
        document_max_bytes: 1024 * 1024,
        document_allow_local: false,
        document_local_root: None,
        index_drop_after_request: true,
        http_timeout_secs: 5,
        server_port: None,
    }
}

fn app(config: &Config) -> Router {
    let service = AnswerService::new(config).expect("service");
    create_router(
        Arc::new(service),
        BearerAuth::new(&config.auth_token),
        config.document_max_bytes as usize,
    )
}

fn run_request(token: &str, documents: &str, questions: &[&str]) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/hackrx/run")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(
            json!({ "documents": documents, "questions": questions }).to_string(),
        ))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

struct Backends<'a> {
    create: Mock<'a>,
    upsert: Mock<'a>,
    query: Mock<'a>,
    drop: Mock<'a>,
    embed: Mock<'a>,
    generate: Mock<'a>,
}

async fn mock_backends(server: &MockServer, create_status: u16) -> Backends<'_> {
    let create = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path_contains("/collections/docqa-it-")
                .header("api-key", "qdrant-key")
                .json_body_partial(r#"{"vectors":{"size":4}}"#);
            then.status(create_status)
                .json_body(json!({ "status": "ok", "result": true }));
        })
        .await;
    let upsert = server
        .mock_async(|when, then| {
            when.method(PUT)
                .path_contains("/points")
                .query_param("wait", "true");
            then.status(200)
                .json_body(json!({ "status": "ok", "result": { "status": "completed" } }));
        })
        .await;
    let query = server
        .mock_async(|when, then| {
            when.method(POST)
                .path_contains("/points/query")
                .json_body_partial(r#"{"limit":2,"with_payload":true}"#);
            then.status(200).json_body(json!({
                "status": "ok",
                "result": { "points": [
                    { "id": "a", "score": 0.92, "payload": { "text": "A grace period of thirty days is allowed for premium payment." } },
                    { "id": "b", "score": 0.81, "payload": { "text": "Maternity expenses are covered after twenty-four months." } }
                ] }
            }));
        })
        .await;
    let drop = server
        .mock_async(|when, then| {
            when.method(DELETE).path_contains("/collections/docqa-it-");
            then.status(200)
                .json_body(json!({ "status": "ok", "result": true }));
        })
        .await;
    let embed = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embed")
                .json_body_partial(r#"{"model":"nomic-embed-text"}"#);
            then.status(200)
                .json_body(json!({ "embeddings": [[0.1, 0.2, 0.3, 0.4]] }));
        })
        .await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"model":"llama3","stream":false}"#);
            then.status(200)
                .json_body(json!({ "response": " The grace period is thirty days. ", "done": true }));
        })
        .await;

    Backends {
        create,
        upsert,
        query,
        drop,
        embed,
        generate,
    }
}

#[tokio::test]
async fn run_answers_every_question_against_a_fresh_index() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 200).await;
    let document = server
        .mock_async(|when, then| {
            when.method(GET).path("/policy.txt");
            then.status(200)
                .header("content-type", "text/plain")
                .body(POLICY_TEXT);
        })
        .await;

    let config = config_for(&server);
    let questions = [
        "What is the grace period?",
        "When are pre-existing diseases covered?",
        "Is maternity covered?",
    ];
    let response = app(&config)
        .oneshot(run_request(
            "integration-secret",
            &server.url("/policy.txt"),
            &questions,
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let answers = body["answers"].as_array().expect("answers array");
    assert_eq!(answers.len(), questions.len());
    assert!(answers.iter().all(|a| a == "The grace period is thirty days."));

    document.assert();
    backends.create.assert();
    backends.upsert.assert();
    backends.query.assert_hits(questions.len());
    backends.generate.assert_hits(questions.len());
    backends.drop.assert();
    // One call per chunk plus one per question.
    assert!(backends.embed.hits() > questions.len());
}

#[tokio::test]
async fn index_failure_aborts_before_any_answer() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 500).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/policy.txt");
            then.status(200).body(POLICY_TEXT);
        })
        .await;

    let config = config_for(&server);
    let response = app(&config)
        .oneshot(run_request(
            "integration-secret",
            &server.url("/policy.txt"),
            &["What is the grace period?"],
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(
        body["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("vector index")
    );
    backends.create.assert();
    backends.upsert.assert_hits(0);
    backends.generate.assert_hits(0);
    backends.drop.assert();
}

#[tokio::test]
async fn rejected_tokens_never_reach_backends() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 200).await;
    let document = server
        .mock_async(|when, then| {
            when.method(GET).path("/policy.txt");
            then.status(200).body(POLICY_TEXT);
        })
        .await;

    let config = config_for(&server);
    let response = app(&config)
        .oneshot(run_request(
            "wrong-secret",
            &server.url("/policy.txt"),
            &["What is the grace period?"],
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    document.assert_hits(0);
    backends.embed.assert_hits(0);
    backends.create.assert_hits(0);
}

#[tokio::test]
async fn local_document_is_read_inside_allowed_root() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 200).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("policy.txt");
    let mut file = std::fs::File::create(&path).expect("create file");
    file.write_all(POLICY_TEXT.as_bytes()).expect("write file");

    let mut config = config_for(&server);
    config.document_allow_local = true;
    config.document_local_root = Some(dir.path().to_path_buf());

    let response = app(&config)
        .oneshot(run_request(
            "integration-secret",
            path.to_str().expect("utf8 path"),
            &["What is the grace period?"],
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    backends.generate.assert_hits(1);
}

#[tokio::test]
async fn unreachable_document_is_a_client_error() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 200).await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/missing.pdf");
            then.status(404);
        })
        .await;

    let config = config_for(&server);
    let response = app(&config)
        .oneshot(run_request(
            "integration-secret",
            &server.url("/missing.pdf"),
            &["What is the grace period?"],
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    backends.create.assert_hits(0);
    backends.embed.assert_hits(0);
}

#[tokio::test]
async fn local_paths_without_a_root_are_refused() {
    let server = MockServer::start_async().await;
    let backends = mock_backends(&server, 200).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("environ");
    std::fs::write(&path, "OPENAI_API_KEY=sk-should-not-leak").expect("write file");

    let mut config = config_for(&server);
    config.document_allow_local = true;
    config.document_local_root = None;

    let response = app(&config)
        .oneshot(run_request(
            "integration-secret",
            path.to_str().expect("utf8 path"),
            &["What is the key?"],
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(
        body["detail"]
            .as_str()
            .unwrap_or_default()
            .contains("local document access denied")
    );
    backends.embed.assert_hits(0);
    backends.generate.assert_hits(0);
    backends.create.assert_hits(0);
}
