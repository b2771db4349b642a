use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use ragchat_retrieval::{AddOutcome, EngineStats, RetrievalEngine};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    error::ApiError,
    protocol::{
        AddDocumentResponse, DocumentsResponse, GetDocumentRequest, GetDocumentResponse,
        MessageResponse, SearchRequest, SearchResponse, SearchSimilarRequest,
        SearchSimilarResponse,
    },
};

/// Name of the multipart field carrying the uploaded file.
const UPLOAD_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RetrievalEngine>,
}

impl AppState {
    pub fn new(engine: RetrievalEngine) -> Self {
        Self { engine: Arc::new(engine) }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes.
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8002, body_limit: 64 * 1024 * 1024 }
    }
}

pub fn app_router(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/documents", get(documents))
        .route("/add_document", post(add_document))
        .route("/search", post(search))
        .route("/search_similar", post(search_similar))
        .route("/get_document", post(get_document))
        .route("/reset", post(reset))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = app_router(state, config.body_limit);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| "invalid host/port for ragchat-server")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("ragchat-server listening on http://{}", addr);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("ragchat-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status":"ok","service":"ragchat-server"}))
}

async fn stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats().await)
}

async fn documents(State(state): State<AppState>) -> Json<DocumentsResponse> {
    Json(DocumentsResponse { documents: state.engine.document_names().await })
}

async fn add_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AddDocumentResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("the uploaded file has no file name"))?;
        let bytes = field.bytes().await?;

        let outcome = state.engine.add_document(&name, bytes.to_vec()).await?;
        let message = match &outcome {
            AddOutcome::Added { .. } => "File uploaded successfully",
            AddOutcome::Duplicate { .. } => "File already present, upload ignored",
        };
        return Ok(Json(AddDocumentResponse { message: message.to_string(), outcome }));
    }

    Err(ApiError::bad_request(format!("multipart field '{UPLOAD_FIELD}' is required")))
}

async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let top_k = usize::try_from(request.top_k).map_err(|_| {
        ApiError::bad_request(format!("top_k must be at least 1, got {}", request.top_k))
    })?;
    let response = state.engine.search(&request.prompt, top_k).await?;
    Ok(Json(SearchResponse { response }))
}

async fn search_similar(
    State(state): State<AppState>,
    Json(request): Json<SearchSimilarRequest>,
) -> Result<Json<SearchSimilarResponse>, ApiError> {
    let names = state.engine.list_documents_with_fragment(&request.fragment).await?;
    Ok(Json(SearchSimilarResponse { search_results: names.into_iter().collect() }))
}

async fn get_document(
    State(state): State<AppState>,
    Json(request): Json<GetDocumentRequest>,
) -> Result<Json<GetDocumentResponse>, ApiError> {
    let text = state.engine.get_document_text(&request.name).await?;
    Ok(Json(GetDocumentResponse { text }))
}

async fn reset(State(state): State<AppState>) -> (StatusCode, Json<MessageResponse>) {
    state.engine.reset().await;
    (StatusCode::OK, Json(MessageResponse { message: "Index reset".to_string() }))
}
