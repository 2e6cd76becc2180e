//! HTTP API over [`RagService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `PUT`    | `/tenants/{tenant}/document?filename=<name>` | Upload a document (raw body) and rebuild the tenant's corpus |
//! | `POST`   | `/tenants/{tenant}/query` | Ask a question: `{"question": "..."}` |
//! | `GET`    | `/tenants/{tenant}` | Tenant status and index manifest |
//! | `DELETE` | `/tenants/{tenant}` | Remove all tenant data (`204`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_database", "message": "No database found for this tenant. ..." } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `invalid_tenant`, `invalid_request`, `invalid_file` | 400 |
//! | `no_database`, `no_match` | 404 |
//! | `upload_failed`, `storage_error` | 500 |
//! | `processing_error` | 502 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::RagError;
use crate::models::{IngestReport, ScoredChunk};
use crate::service::{RagService, TenantStatus};
use crate::tenant::TenantId;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config, service: Arc<RagService>) -> anyhow::Result<()> {
    let app = router(service, config.storage.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("Listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router. Bodies larger than `max_upload_bytes` are refused
/// before they reach the service.
pub fn router(service: Arc<RagService>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tenants/{tenant}/document", put(handle_upload))
        .route("/tenants/{tenant}/query", post(handle_query))
        .route(
            "/tenants/{tenant}",
            get(handle_status).delete(handle_remove),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Load(_) | RagError::InvalidTenant(_) | RagError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            RagError::NotFound(_) | RagError::RetrievalMiss { .. } => StatusCode::NOT_FOUND,
            RagError::IndexBuild { .. } | RagError::Storage { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RagError::Retrieval { .. } | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::warn!(code = err.kind(), error = %err, "request failed");
        }
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.user_message(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "invalid_request".to_string(),
        message: message.into(),
    }
}

fn tenant_from_path(raw: &str) -> Result<TenantId, AppError> {
    TenantId::new(raw).map_err(AppError::from)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ PUT /tenants/{tenant}/document ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<UploadParams>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let tenant = tenant_from_path(&tenant)?;
    let filename = params
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    let body = body.map_err(|rejection| AppError {
        status: rejection.status(),
        code: "invalid_file".to_string(),
        message: rejection.body_text(),
    })?;

    let report = state
        .service
        .ingest(&tenant, &filename, body.to_vec())
        .await?;
    Ok(Json(report))
}

// ============ POST /tenants/{tenant}/query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    sources: Vec<ScoredChunk>,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let tenant = tenant_from_path(&tenant)?;
    let Json(request) = body.map_err(|rejection| bad_request(rejection.body_text()))?;

    let answer = state.service.ask(&tenant, &request.question).await?;
    Ok(Json(QueryResponse {
        answer: answer.text,
        sources: answer.sources,
    }))
}

// ============ GET / DELETE /tenants/{tenant} ============

async fn handle_status(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<TenantStatus>, AppError> {
    let tenant = tenant_from_path(&tenant)?;
    Ok(Json(state.service.status(&tenant).await?))
}

async fn handle_remove(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<StatusCode, AppError> {
    let tenant = tenant_from_path(&tenant)?;
    state.service.remove_tenant(&tenant).await?;
    Ok(StatusCode::NO_CONTENT)
}
