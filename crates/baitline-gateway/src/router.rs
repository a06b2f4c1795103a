use crate::middleware::detail;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use baitline_core::Session;
use baitline_engine::{TurnOutcome, TurnRequest};
use baitline_session::SessionFilter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Page size when the caller does not give one.
pub const DEFAULT_PAGE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Query / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub scam_only: bool,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionPage {
    pub total: usize,
    pub limit: usize,
    pub skip: usize,
    pub sessions: Vec<Session>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/honeypot
pub async fn honeypot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> Json<TurnOutcome> {
    info!(session_id = %request.session_id, "Turn received");
    Json(state.manager.handle_turn(request).await)
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Response {
    match state.manager.load(&session_id).await {
        Some(session) => Json(session).into_response(),
        None => detail(
            StatusCode::NOT_FOUND,
            format!("Session {session_id} not found"),
        ),
    }
}

/// GET /api/v1/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = SessionFilter {
        skip: query.skip,
        limit: Some(query.limit),
        scam_only: query.scam_only,
    };
    let store = state.manager.store();

    let listed = match store.list(&filter).await {
        Ok(sessions) => sessions,
        Err(e) => {
            error!(error = %e, "Failed to list sessions");
            return detail(StatusCode::SERVICE_UNAVAILABLE, "Session store unavailable");
        }
    };
    let total = match store.count(&filter).await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Failed to count sessions");
            return detail(StatusCode::SERVICE_UNAVAILABLE, "Session store unavailable");
        }
    };

    Json(SessionPage {
        total,
        limit: query.limit,
        skip: query.skip,
        sessions: listed,
    })
    .into_response()
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let store_status = match state.manager.store().ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            error!(error = %e, "Store health check failed");
            "unhealthy"
        }
    };
    let cache = match state.manager.cache() {
        Some(cache) => serde_json::to_value(cache.stats()).unwrap_or_default(),
        None => serde_json::json!({ "status": "disabled" }),
    };
    let healthy = store_status == "healthy";

    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "baitline",
        "store": store_status,
        "cache": cache,
        "pendingDispatches": state.manager.pending().len(),
    });
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}
