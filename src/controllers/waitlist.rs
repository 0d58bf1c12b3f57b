use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/waitlist/join", post(join_waitlist))
        .route("/waitlist/position", get(get_position))
        .route("/waitlist/leave", delete(leave_waitlist))
        .route("/waitlist/size", get(get_size))
}

// POST /api/waitlist/join
#[derive(Debug, Deserialize)]
struct JoinWaitlistRequest {
    pub event_id: i64,
}

async fn join_waitlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<JoinWaitlistRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.event_id <= 0 {
        return Err(AppError::BadRequest("event_id должен быть > 0".to_string()));
    }

    let entry = state.waitlist.join(user.user_id, req.event_id).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

// GET /api/waitlist/position?event_id=
#[derive(Debug, Deserialize)]
struct WaitlistQuery {
    event_id: i64,
}

async fn get_position(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<WaitlistQuery>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state.waitlist.position(user.user_id, params.event_id).await?;
    Ok(Json(entry))
}

// DELETE /api/waitlist/leave
#[derive(Debug, Deserialize)]
struct LeaveWaitlistRequest {
    pub event_id: i64,
}

async fn leave_waitlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<LeaveWaitlistRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.waitlist.leave(user.user_id, req.event_id).await?;
    Ok(Json(serde_json::json!({ "message": "Вы вышли из очереди" })))
}

// GET /api/waitlist/size?event_id=
async fn get_size(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WaitlistQuery>,
) -> Result<impl IntoResponse, AppError> {
    let size = state.waitlist.size(params.event_id).await?;
    Ok(Json(serde_json::json!({
        "event_id": params.event_id,
        "size": size
    })))
}
