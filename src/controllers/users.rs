use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::AppError;
use crate::models::User;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/register", post(register))
}

// POST /api/register
#[derive(Debug, Deserialize)]
struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.email.is_empty() || !req.email.contains('@') {
        return Err(AppError::BadRequest("некорректный email".to_string()));
    }
    if req.password.len() < 4 {
        return Err(AppError::BadRequest(
            "пароль должен быть не короче 4 символов".to_string(),
        ));
    }

    let existing = User::find_by_email(&req.email, &state.db).await?;
    if existing.is_some() {
        return Err(AppError::Conflict(
            "пользователь с таким email уже существует".to_string(),
        ));
    }

    let user: User = sqlx::query_as(
        "INSERT INTO users (email, password_plain, first_name, last_name)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(&req.email)
    .bind(&req.password)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}
