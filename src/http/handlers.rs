use super::state::AppState;
use crate::clock::Lifecycle;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use tracing::debug;

// ============================================================================
// Response Types
// ============================================================================

/// One entry in the active meetings listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSummary {
    pub session_id: String,
    pub meeting_code: String,
    pub lifecycle: Lifecycle,
    pub current_section_id: String,
    pub leader_id: Option<String>,
    pub participant_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn not_found(session: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Meeting {} not found", session),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /meetings
/// List synchronized sessions the relay is observing
pub async fn list_meetings(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    let mut meetings: Vec<MeetingSummary> = sessions
        .values()
        .map(|observed| &observed.machine)
        .filter(|m| m.is_synchronized())
        .map(|m| MeetingSummary {
            session_id: m.session_id().to_string(),
            meeting_code: m.meeting_key().code(),
            lifecycle: m.lifecycle(),
            current_section_id: m.current_section_id().to_string(),
            leader_id: m.leader_id().map(str::to_string),
            participant_count: m.participants().len(),
        })
        .collect();
    meetings.sort_by(|a, b| a.session_id.cmp(&b.session_id));

    (StatusCode::OK, Json(meetings)).into_response()
}

/// GET /meetings/:session_id/status
/// Get live status of an observed session
pub async fn get_meeting_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id).map(|observed| &observed.machine) {
        Some(machine) => (StatusCode::OK, Json(machine.status(state.now_ms()))).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /meetings/:session_id/snapshot
/// Full replicated state, once the relay has synchronized
pub async fn get_meeting_snapshot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id).map(|observed| &observed.machine) {
        Some(machine) if machine.is_synchronized() => {
            (StatusCode::OK, Json(machine.snapshot(state.now_ms()))).into_response()
        }
        Some(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: format!("Meeting {} has not synchronized yet", session_id),
            }),
        )
            .into_response(),
        None => not_found(&session_id),
    }
}

/// GET /meetings/by-code/:code
/// Find the running session for a meeting code
pub async fn get_meeting_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;
    debug!("Looking up active meeting {}", code);

    let found = sessions.values().map(|observed| &observed.machine).find(|m| {
        m.is_synchronized()
            && m.lifecycle() != Lifecycle::Concluded
            && m.meeting_key().code() == code
    });

    match found {
        Some(machine) => (StatusCode::OK, Json(machine.status(state.now_ms()))).into_response(),
        None => not_found(&code),
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
