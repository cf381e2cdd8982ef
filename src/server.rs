//! HTTP API over an assembled knowledge pack.
//!
//! The orchestrator is built once by the caller and shared behind a mutex;
//! handlers read partitions and switch the active context.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::markdown::KnowledgeDocument;
use crate::orchestrator::{ContextStatus, KnowledgeOrchestrator};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Mutex<KnowledgeOrchestrator>>,
}

impl AppState {
    pub fn new(orchestrator: KnowledgeOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, KnowledgeOrchestrator>, ApiError> {
        self.orchestrator.lock().map_err(|_| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "state_poisoned",
            message: "orchestrator lock poisoned".into(),
        })
    }
}

// --- Request/Response types ---

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ContextSummary {
    pub name: String,
    pub path: String,
    #[serde(flatten)]
    pub status: ContextStatus,
}

#[derive(Serialize)]
pub struct ContextsResponse {
    pub contexts: Vec<ContextSummary>,
    pub active: Option<String>,
}

#[derive(Serialize)]
pub struct ActiveContextResponse {
    pub active: Option<String>,
    /// `false` when the active name is not one of the pack's contexts.
    pub declared: bool,
}

#[derive(Deserialize)]
pub struct SelectContextRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct DocumentsResponse {
    pub partition: String,
    pub documents: Vec<KnowledgeDocument>,
    pub total: usize,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorResponse {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        });
        (self.status, body).into_response()
    }
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn list_contexts(State(state): State<AppState>) -> Result<Json<ContextsResponse>, ApiError> {
    let orchestrator = state.lock()?;
    let contexts = orchestrator
        .descriptor()
        .contexts()
        .iter()
        .filter_map(|ctx| {
            orchestrator
                .context_status(&ctx.name)
                .map(|status| ContextSummary {
                    name: ctx.name.clone(),
                    path: ctx.relative_path.display().to_string(),
                    status,
                })
        })
        .collect();

    Ok(Json(ContextsResponse {
        contexts,
        active: orchestrator.active_context().map(str::to_owned),
    }))
}

fn active_response(orchestrator: &KnowledgeOrchestrator) -> ActiveContextResponse {
    let active = orchestrator.active_context().map(str::to_owned);
    let declared = active
        .as_deref()
        .is_some_and(|name| orchestrator.descriptor().is_declared(name));
    ActiveContextResponse { active, declared }
}

async fn get_active_context(
    State(state): State<AppState>,
) -> Result<Json<ActiveContextResponse>, ApiError> {
    let orchestrator = state.lock()?;
    Ok(Json(active_response(&orchestrator)))
}

async fn select_context(
    State(state): State<AppState>,
    Json(req): Json<SelectContextRequest>,
) -> Result<Json<ActiveContextResponse>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request",
            message: "context name must not be empty".into(),
        });
    }

    let mut orchestrator = state.lock()?;
    let selected = orchestrator.select_active_context(req.name).to_owned();
    tracing::info!(context = %selected, "active context selected");
    Ok(Json(active_response(&orchestrator)))
}

async fn clear_context(
    State(state): State<AppState>,
) -> Result<Json<ActiveContextResponse>, ApiError> {
    let mut orchestrator = state.lock()?;
    orchestrator.clear_active_context();
    Ok(Json(active_response(&orchestrator)))
}

async fn partition_documents(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DocumentsResponse>, ApiError> {
    let orchestrator = state.lock()?;
    let partition = orchestrator.markdown().partition(&key).ok_or_else(|| ApiError {
        status: StatusCode::NOT_FOUND,
        code: "partition_not_found",
        message: format!("no markdown partition {key:?} is loaded"),
    })?;

    let documents = partition.documents.clone();
    Ok(Json(DocumentsResponse {
        total: documents.len(),
        partition: key,
        documents,
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/contexts", get(list_contexts))
        .route(
            "/contexts/active",
            get(get_active_context)
                .put(select_context)
                .delete(clear_context),
        )
        .route("/partitions/{key}/documents", get(partition_documents))
        .with_state(state)
}

/// Serve the API until ctrl-c.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "knowledge pack API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down API server");
        })
        .await?;

    Ok(())
}
