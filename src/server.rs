//! HTTP front-end for the query engine.

use axum::{
    Router,
    routing::{get, post},
    extract::State,
    response::{IntoResponse, Response},
    Json,
    http::{Method, StatusCode},
};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{CorsLayer, Any};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use chrono::Utc;
use uuid::Uuid;

use crate::config::ServerSettings;
use crate::error::{ErrorCategory, RagError};
use crate::models::{AskRequest, IndexInfo};
use crate::rag::persistence::{self, Manifest};
use crate::rag::QueryEngine;

pub struct AppState {
    engine: QueryEngine,
    index_dir: PathBuf,
    /// Manifest of the build currently behind `engine.index()`.
    manifest: RwLock<Option<Manifest>>,
    default_k: usize,
    max_k: usize,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        engine: QueryEngine,
        index_dir: PathBuf,
        manifest: Option<Manifest>,
        settings: &ServerSettings,
    ) -> Self {
        Self {
            engine,
            index_dir,
            manifest: RwLock::new(manifest),
            default_k: settings.default_k,
            max_k: settings.max_k,
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
        }
    }
}

pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorCategory::NotFound => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Transient => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Permanent => StatusCode::BAD_GATEWAY,
        ErrorCategory::DataIntegrity | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(error: &RagError) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": error.to_string(),
        "category": error.category(),
    }))
}

pub struct ApiError(RagError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.0.category()), error_body(&self.0)).into_response()
    }
}

impl From<RagError> for ApiError {
    fn from(e: RagError) -> Self {
        Self(e)
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    // CORS設定
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/ask", post(ask_handler))
        .route("/api/v1/index", get(index_info_handler))
        .route("/api/v1/index/reload", post(reload_handler))
        .route("/api/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(state.request_timeout))
                .layer(cors),
        )
        .with_state(state)
}

async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> Result<Response, ApiError> {
    // 空の質問は何もしない
    if request.question.trim().is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let request_id = Uuid::new_v4();
    // k = 0 is a valid query with an empty result.
    let k = request.k.unwrap_or(state.default_k).min(state.max_k);
    tracing::info!("Question {} (k={})", request_id, k);

    let answer = state.engine.answer(&request.question, k).await.map_err(|e| {
        tracing::error!("Question {} failed: {}", request_id, e);
        ApiError(e)
    })?;

    if !answer.completion.is_available() {
        tracing::warn!("Question {} answered without completion", request_id);
    }

    Ok(Json(answer).into_response())
}

async fn index_info_handler(State(state): State<Arc<AppState>>) -> Response {
    let manifest = state.manifest.read().unwrap_or_else(|e| e.into_inner());
    match manifest.as_ref() {
        Some(m) => Json(m.info()).into_response(),
        None => (StatusCode::NOT_FOUND, error_body(&RagError::IndexNotLoaded)).into_response(),
    }
}

async fn reload_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IndexInfo>, ApiError> {
    let dir = state.index_dir.clone();
    let (store, manifest) = tokio::task::spawn_blocking(move || persistence::load(&dir))
        .await
        .map_err(|e| RagError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

    // ハンドルとマニフェストを同時に更新
    let mut current = state.manifest.write().unwrap_or_else(|e| e.into_inner());
    state.engine.index().replace(store);
    let info = manifest.info();
    *current = Some(manifest);
    tracing::info!("Index reloaded: {} rows", info.rows);
    Ok(Json(info))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let rows = state.engine.index().current().map(|s| s.len()).ok();

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "index": {
            "loaded": rows.is_some(),
            "rows": rows,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatCompletion;
    use crate::error::{FailureKind, ServiceError};
    use crate::models::Record;
    use crate::rag::embeddings::Embedder;
    use crate::rag::prompt::PromptBuilder;
    use crate::rag::retry::RetryPolicy;
    use crate::rag::store::{DocumentStore, IndexHandle};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            match text {
                t if t.contains("revoked") => Err(ServiceError::new(FailureKind::Unauthorized, "invalid key")),
                t if t.contains("slow") => Err(ServiceError::new(FailureKind::Timeout, "timed out")),
                t if t.contains("bill") => Ok(vec![1.0, 0.1]),
                _ => Ok(vec![0.1, 1.0]),
            }
        }

        fn model_name(&self) -> &str {
            "keyword"
        }
    }

    struct FixedChat;

    #[async_trait]
    impl ChatCompletion for FixedChat {
        async fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
            Ok("Billing totals are wrong.".to_string())
        }
    }

    fn sample_store() -> DocumentStore {
        let mut store = DocumentStore::new(2, "keyword").unwrap();
        store.push(Record::new("1", "c1", "billing total wrong"), &[1.0, 0.0]).unwrap();
        store.push(Record::new("2", "c2", "login loops"), &[0.0, 1.0]).unwrap();
        store
    }

    fn test_app(store: Option<DocumentStore>, index_dir: PathBuf) -> Router {
        let engine = QueryEngine::new(
            Arc::new(KeywordEmbedder),
            Arc::new(FixedChat),
            Arc::new(IndexHandle::new(store)),
            PromptBuilder::new(4000),
        )
        .with_retry(RetryPolicy::none());
        app(Arc::new(AppState::new(engine, index_dir, None, &ServerSettings::default())))
    }

    async fn ask(app: Router, body: Value) -> (StatusCode, Option<Value>) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<Value>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice(&bytes).unwrap())
        };
        (status, json)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_answer_with_sources() {
        let app = test_app(Some(sample_store()), PathBuf::from("unused"));
        let (status, body) = ask(app, serde_json::json!({"question": "billing?", "k": 1})).await;

        assert_eq!(status, StatusCode::OK);
        let body = body.unwrap();
        assert_eq!(body["completion"]["status"], "answered");
        assert_eq!(body["completion"]["text"], "Billing totals are wrong.");
        assert_eq!(body["sources"].as_array().unwrap().len(), 1);
        assert_eq!(body["sources"][0]["id"], "1");
    }

    #[tokio::test]
    async fn test_empty_question_is_no_content() {
        let app = test_app(None, PathBuf::from("unused"));
        let (status, body) = ask(app, serde_json::json!({"question": "   "})).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_zero_k_returns_no_sources() {
        let app = test_app(Some(sample_store()), PathBuf::from("unused"));
        let (status, body) = ask(app, serde_json::json!({"question": "billing?", "k": 0})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.unwrap()["sources"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_index_is_unavailable() {
        let app = test_app(None, PathBuf::from("unused"));
        let (status, body) = ask(app.clone(), serde_json::json!({"question": "billing?"})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.unwrap()["category"], "not_found");

        let (status, body) = send(app, get_request("/api/v1/index")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.unwrap()["error"], "no index loaded");
    }

    #[tokio::test]
    async fn test_embedding_failures_map_to_gateway_errors() {
        let app = test_app(Some(sample_store()), PathBuf::from("unused"));

        let (status, body) = ask(app.clone(), serde_json::json!({"question": "revoked key"})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let body = body.unwrap();
        assert_eq!(body["category"], "permanent");
        assert!(body["error"].as_str().unwrap().contains("invalid key"));

        let (status, body) = ask(app, serde_json::json!({"question": "slow network"})).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body.unwrap()["category"], "transient");
    }

    #[tokio::test]
    async fn test_reload_serves_new_build() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        let app = test_app(None, dir.clone());

        let reload = || Request::builder().method("POST").uri("/api/v1/index/reload").body(Body::empty()).unwrap();

        let (status, _) = send(app.clone(), reload()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        persistence::save(&sample_store(), &dir).unwrap();
        let (status, body) = send(app.clone(), reload()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["rows"], 2);

        let (status, body) = send(app.clone(), get_request("/api/v1/index")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["embedding_model"], "keyword");

        let (status, body) = ask(app, serde_json::json!({"question": "login?", "k": 1})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap()["sources"][0]["id"], "2");
    }

    #[tokio::test]
    async fn test_corrupt_build_is_internal_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("index");
        persistence::save(&sample_store(), &dir).unwrap();
        std::fs::write(dir.join(persistence::METADATA_FILE), b"{}\n").unwrap();

        let app = test_app(None, dir);
        let request = Request::builder().method("POST").uri("/api/v1/index/reload").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.unwrap()["category"], "data_integrity");
    }

    #[test]
    fn test_status_per_category() {
        assert_eq!(status_for(ErrorCategory::InvalidInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorCategory::NotFound), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorCategory::Transient), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorCategory::Permanent), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorCategory::DataIntegrity), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_input_renders_json() {
        let response = ApiError(RagError::InvalidInput("k too large".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["category"], "invalid_input");
        assert_eq!(body["error"], "invalid input: k too large");
    }
}
