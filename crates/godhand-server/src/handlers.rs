//! HTTP endpoints: fallback execution, compile preview, health, history
//! export and stats.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;

use godhand_core::protocol::{
    ErrorBody, ExportReceipt, FallbackRequest, FallbackResponse, HealthStatus, ParseResponse,
};
use godhand_core::{ExecutionMode, SessionId, SessionSnapshot};
use godhand_engine::SessionError;
use godhand_telemetry::MetricsSnapshot;

use crate::server::AppState;

/// Error response: status plus `{code, message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::SessionBusy(_) | SessionError::NothingToConfirm(_) => StatusCode::CONFLICT,
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Compile(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.error_kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".into(),
        ready: true,
        sessions: state.manager.session_count(),
        timestamp: Utc::now(),
    })
}

/// Request/response execution for clients without a stream.
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<FallbackRequest>,
) -> Result<Json<FallbackResponse>, ApiError> {
    if req.mode != ExecutionMode::Auto {
        tracing::debug!(mode = %req.mode, "fallback submissions run as auto");
    }

    let outcome = state
        .manager
        .execute_sync(req.session_id.as_ref(), &req.command, state.config.fallback_timeout)
        .await
        .map_err(|e| {
            tracing::info!(kind = e.error_kind(), error = %e, "fallback execution rejected");
            ApiError::from(e)
        })?;

    Ok(Json(FallbackResponse {
        session_id: outcome.session_id,
        actions: outcome.actions,
        results: outcome.results,
        timed_out: outcome.timed_out,
    }))
}

/// Compile without executing.
pub async fn parse(
    State(state): State<AppState>,
    Json(req): Json<FallbackRequest>,
) -> Result<Json<ParseResponse>, ApiError> {
    let actions = state
        .manager
        .compiler()
        .compile(&req.command)
        .await
        .map_err(SessionError::from)?;
    Ok(Json(ParseResponse { actions }))
}

pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state.manager.export(&SessionId::from_raw(session_id))?;
    Ok(Json(snapshot))
}

pub async fn export(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ExportReceipt>, ApiError> {
    let id = SessionId::from_raw(session_id);
    let receipt = state.manager.persist(&id).map_err(|e| {
        tracing::warn!(session_id = %id, error = %e, "history export failed");
        ApiError::from(e)
    })?;
    tracing::info!(session_id = %id, events = receipt.event_count, "history exported");
    Ok(Json(receipt))
}

pub async fn stats(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.manager.metrics().snapshot())
}
