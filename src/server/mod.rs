//! HTTP/REST surface.
//!
//! The router exposes the submission, inspection, search, quality-gate,
//! and CI endpoints. Errors use a JSON envelope:
//! `{"error": {"code": "...", "message": "..."}}` with codes
//! `bad_request`, `conflict`, `not_found`, and `internal`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::KvasirConfig;
use crate::core::errors::KvasirError;
use crate::core::models::{QualityGateConfig, RepoSource, RepositorySpec};
use crate::gate::{webhook, CheckRequest, QualityGateEngine};
use crate::scheduler::JobScheduler;
use crate::search::EmbeddingIndex;
use crate::storage::{EmbeddingFilter, SqliteStore, SymbolFilter};

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SqliteStore,
    pub scheduler: Arc<JobScheduler>,
    pub gate: Arc<QualityGateEngine>,
    pub index: Option<Arc<EmbeddingIndex>>,
    pub config: Arc<KvasirConfig>,
}

/// Build the router over the application state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/repos/submit", post(submit_repo))
        .route("/repos/:id", get(get_repo).delete(delete_repo))
        .route("/repos/:id/cancel", post(cancel_repo))
        .route("/repos/:id/files", get(list_files))
        .route("/repos/:id/files/*rest", get(file_content))
        .route("/repos/:id/symbols", get(list_symbols))
        .route("/repos/:id/call-graph", get(call_graph))
        .route("/repos/:id/dependencies", get(dependencies))
        .route("/repos/:id/dead-code", get(dead_code))
        .route("/repos/:id/circular-deps", get(circular_deps))
        .route("/search/semantic", post(semantic_search))
        .route("/quality-gate/:repo", get(get_gate).put(put_gate))
        .route("/quality-gate/:repo/check", post(run_gate_check))
        .route("/webhook/ci", post(ci_webhook))
        .route("/runs/:repo", get(run_history))
        .route("/report/:run", get(run_report))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the process terminates.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_addr.clone();
    let app = router(state);
    info!("kvasir API listening on http://{bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error envelope ============

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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<KvasirError> for AppError {
    fn from(err: KvasirError) -> Self {
        match &err {
            KvasirError::Validation { message, .. } if message.contains("already imported") => {
                conflict(message.clone())
            }
            KvasirError::Validation { .. } | KvasirError::Unsupported { .. } => {
                bad_request(err.to_string())
            }
            _ => internal(err.to_string()),
        }
    }
}

fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid id: {raw}")))
}

// ============ Repositories ============

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(default)]
    name: Option<String>,
    /// "upload" or "remote"
    source: String,
    #[serde(default)]
    origin_url: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    archive_path: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: Uuid,
    status: String,
}

async fn submit_repo(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    let source: RepoSource = request
        .source
        .parse()
        .map_err(|_| bad_request(format!("unknown source: {}", request.source)))?;

    match source {
        RepoSource::Remote => {
            if request.origin_url.as_deref().unwrap_or("").is_empty() {
                return Err(bad_request("remote submission requires origin_url"));
            }
        }
        RepoSource::Upload => {
            if request.archive_path.as_deref().unwrap_or("").is_empty() {
                return Err(bad_request("upload submission requires archive_path"));
            }
        }
    }

    let name = request.name.unwrap_or_else(|| {
        request
            .origin_url
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
            .map(|tail| tail.trim_end_matches(".git").to_string())
            .unwrap_or_else(|| "unnamed".to_string())
    });

    let spec = RepositorySpec {
        name,
        source,
        origin_url: request.origin_url,
        branch: request.branch,
        archive_path: request.archive_path,
    };
    let repo = state.store.create_repository(&spec).await?;
    state.scheduler.enqueue_ingest(repo.id).await?;

    Ok(Json(SubmitResponse {
        id: repo.id,
        status: repo.status.user_visible().to_string(),
    }))
}

async fn get_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let repo = state
        .store
        .get_repository(id)
        .await?
        .ok_or_else(|| not_found(format!("repository {id} not found")))?;

    let mut body = serde_json::to_value(&repo).map_err(|e| internal(e.to_string()))?;
    body["user_status"] = serde_json::Value::String(repo.status.user_visible().to_string());
    Ok(Json(body))
}

async fn delete_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.scheduler.cancel(id);
    state.store.delete_repository(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_repo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.scheduler.cancel(id);
    Ok(StatusCode::ACCEPTED)
}

async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let files = state.store.list_files(id).await?;
    Ok(Json(serde_json::json!({ "files": files })))
}

async fn file_content(
    State(state): State<AppState>,
    Path((id, rest)): Path<(String, String)>,
) -> Result<String, AppError> {
    let id = parse_id(&id)?;
    let Some(path) = rest.strip_suffix("/content") else {
        return Err(bad_request("file paths end with /content"));
    };

    state
        .store
        .get_file_content(id, path)
        .await?
        .ok_or_else(|| not_found(format!("file {path} not found")))
}

// ============ Symbols and graphs ============

#[derive(Deserialize)]
struct SymbolQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

async fn list_symbols(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let kind = query
        .kind
        .map(|raw| raw.parse())
        .transpose()
        .map_err(|e: KvasirError| bad_request(e.to_string()))?;

    let symbols = state
        .store
        .list_symbols(&SymbolFilter {
            repo_id: Some(id),
            file_path: query.path,
            kind,
            limit: query.limit.unwrap_or(100),
            offset: query.offset.unwrap_or(0),
        })
        .await?;
    Ok(Json(serde_json::json!({ "symbols": symbols })))
}

async fn call_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let nodes = state
        .store
        .list_symbols(&SymbolFilter {
            repo_id: Some(id),
            limit: i64::MAX,
            ..Default::default()
        })
        .await?;
    let edges = state.store.call_edges(id).await?;
    let total_functions = nodes.len();
    let total_calls = edges.len();
    Ok(Json(serde_json::json!({
        "nodes": nodes,
        "edges": edges,
        "total_functions": total_functions,
        "total_calls": total_calls,
    })))
}

async fn dependencies(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let files = state.store.list_files(id).await?;
    let edges = state.store.import_edges(id).await?;
    Ok(Json(serde_json::json!({ "files": files, "edges": edges })))
}

async fn dead_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let dead = state.store.dead_code(id).await?;
    Ok(Json(serde_json::json!({ "dead_code": dead })))
}

async fn circular_deps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let cycles = state.store.cycles(id).await?;
    Ok(Json(serde_json::json!({ "cycles": cycles })))
}

// ============ Semantic search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    repo: Option<Uuid>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn semantic_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let Some(index) = &state.index else {
        return Err(bad_request("embeddings are not configured"));
    };

    let threshold = request.threshold.unwrap_or(0.7);
    let limit = request.limit.unwrap_or(20).min(100);
    let filter = EmbeddingFilter {
        repo_id: request.repo,
        language: request.language,
    };

    let hits = index
        .search_text(&request.query, threshold, &filter, limit)
        .await?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(card) = state.store.symbol_card(hit.symbol_id).await? {
            let mut entry = serde_json::to_value(&card).map_err(|e| internal(e.to_string()))?;
            entry["similarity"] = serde_json::json!(hit.similarity);
            results.push(entry);
        }
    }

    Ok(Json(serde_json::json!({
        "query": request.query,
        "threshold": threshold,
        "total_results": results.len(),
        "results": results,
    })))
}

// ============ Quality gates and CI ============

async fn get_gate(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<QualityGateConfig>, AppError> {
    let repo_id = parse_id(&repo)?;
    Ok(Json(state.store.gate_config(repo_id).await?))
}

async fn put_gate(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Json(config): Json<QualityGateConfig>,
) -> Result<Json<QualityGateConfig>, AppError> {
    let repo_id = parse_id(&repo)?;
    state.store.put_gate_config(repo_id, &config).await?;
    Ok(Json(config))
}

async fn run_gate_check(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo_id = parse_id(&repo)?;
    let result = tokio::time::timeout(
        state.config.gate_timeout,
        state.gate.check(&CheckRequest::manual(repo_id)),
    )
    .await
    .map_err(|_| internal("gate check timed out"))??;
    Ok(Json(serde_json::to_value(&result).map_err(|e| internal(e.to_string()))?))
}

async fn ci_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(secret) = &state.config.webhook_signing_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !webhook::verify_signature(secret, &body, signature) {
            return Err(AppError {
                status: StatusCode::UNAUTHORIZED,
                code: "bad_signature",
                message: "webhook signature verification failed".to_string(),
            });
        }
    }

    let payload: webhook::WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("bad payload: {e}")))?;

    if !payload.is_handled() {
        return Ok(Json(serde_json::json!({
            "status": "ignored",
            "event": payload.event_type,
        })));
    }

    // The webhook names the repository by clone URL.
    let clone_url = payload
        .repository
        .as_ref()
        .map(|r| r.clone_url.clone())
        .unwrap_or_default();
    let repo = state
        .store
        .list_repositories()
        .await?
        .into_iter()
        .find(|r| r.origin_url.as_deref() == Some(clone_url.as_str()));
    let Some(repo) = repo else {
        return Ok(Json(serde_json::json!({
            "status": "skipped",
            "reason": "repository not tracked",
        })));
    };

    let request = payload
        .to_check_request(repo.id)
        .ok_or_else(|| bad_request("payload has no pull_request"))?;
    let result = state.gate.check(&request).await?;

    Ok(Json(serde_json::json!({
        "status": "completed",
        "run_id": result.run_id,
        "passed": result.passed,
        "block_merge": result.block_merge,
        "summary": result.summary,
    })))
}

async fn run_history(
    State(state): State<AppState>,
    Path(repo): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let repo_id = parse_id(&repo)?;
    let runs = state.store.list_runs(repo_id).await?;
    Ok(Json(serde_json::json!({ "runs": runs })))
}

async fn run_report(
    State(state): State<AppState>,
    Path(run): Path<String>,
) -> Result<Html<String>, AppError> {
    let run_id = parse_id(&run)?;
    let run = state
        .store
        .get_run(run_id)
        .await?
        .ok_or_else(|| not_found(format!("run {run_id} not found")))?;

    match run.report_html {
        Some(html) => Ok(Html(html)),
        None => {
            warn!(run_id = %run_id, "run has no stored report");
            Err(not_found("run has no report"))
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
