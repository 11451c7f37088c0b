//! HTTP 薄层（axum）
//!
//! 只负责构造请求 DTO、原样转发编排器输出：未知会话 404，持久化错误 500。
//! 不承载任何业务逻辑。

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::core::Orchestrator;
use crate::schemas::{
    IngestEventRequest, Session, SessionCreateRequest, SessionState, TutorTurnResponse,
};
use crate::storage::StorageError;

type ApiError = (StatusCode, String);

fn internal(error: StorageError) -> ApiError {
    tracing::error!(%error, "persistence failure, aborting request");
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

fn ensure_session(orchestrator: &Orchestrator, session_id: &str) -> Result<(), ApiError> {
    match orchestrator.storage().get_session(session_id) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            format!("session_not_found:{session_id}"),
        )),
        Err(error) => Err(internal(error)),
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "friday-orchestrator" }))
}

async fn create_session(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<SessionCreateRequest>,
) -> Result<Json<Session>, ApiError> {
    orchestrator
        .create_session(&req)
        .map(Json)
        .map_err(internal)
}

async fn ingest(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(session_id): Path<String>,
    Json(req): Json<IngestEventRequest>,
) -> Result<Json<TutorTurnResponse>, ApiError> {
    ensure_session(&orchestrator, &session_id)?;
    orchestrator
        .ingest(&session_id, &req)
        .await
        .map(Json)
        .map_err(internal)
}

async fn state(
    State(orchestrator): State<Arc<Orchestrator>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionState>, ApiError> {
    ensure_session(&orchestrator, &session_id)?;
    orchestrator
        .get_state(&session_id)
        .map(Json)
        .map_err(internal)
}

#[derive(Debug, Deserialize)]
struct RetentionQuery {
    days: Option<u32>,
}

async fn retention(
    State(orchestrator): State<Arc<Orchestrator>>,
    Query(query): Query<RetentionQuery>,
) -> Result<Json<crate::storage::RetentionReport>, ApiError> {
    orchestrator
        .run_retention(query.days.unwrap_or(30))
        .map(Json)
        .map_err(internal)
}

/// 组装路由
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:session_id/ingest", post(ingest))
        .route("/v1/sessions/:session_id/state", get(state))
        .route("/v1/admin/retention", post(retention))
        .with_state(orchestrator)
}
