use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/booking-intents", post(create_intent))
        .route("/booking-intents/cancel", patch(cancel_intent))
        .route("/booking-intents/extend", patch(extend_intent))
        .route("/bookings/confirm", post(confirm_booking))
        .route("/bookings/cancel", patch(cancel_booking))
        .route("/bookings", get(get_user_bookings))
        .route("/bookings/{id}", get(get_booking))
        .route("/seats/lock", get(get_seat_lock))
}

/* ---------- BOOKING INTENTS ---------- */

// POST /api/booking-intents
#[derive(Debug, Deserialize)]
struct CreateIntentRequest {
    pub seat_id: i64,
}

async fn create_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.seat_id <= 0 {
        return Err(AppError::BadRequest("seat_id должен быть > 0".to_string()));
    }

    let intent = state.bookings.create_intent(user.user_id, req.seat_id).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

// PATCH /api/booking-intents/cancel
#[derive(Debug, Deserialize)]
struct CancelIntentRequest {
    pub intent_id: i64,
}

async fn cancel_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CancelIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.bookings.cancel_intent(req.intent_id, user.user_id).await?;
    Ok(Json(serde_json::json!({ "message": "Бронь отменена" })))
}

// PATCH /api/booking-intents/extend - продлить удержание места
#[derive(Debug, Deserialize)]
struct ExtendIntentRequest {
    pub intent_id: i64,
    pub seat_id: i64,
}

async fn extend_intent(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<ExtendIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .locks
        .extend(req.seat_id, user.user_id, req.intent_id)
        .await?;
    Ok(Json(serde_json::json!({ "message": "Удержание места продлено" })))
}

/* ---------- BOOKINGS ---------- */

// POST /api/bookings/confirm
#[derive(Debug, Deserialize)]
struct ConfirmBookingRequest {
    pub intent_id: i64,
    // непрозрачный токен платежа от вышестоящего сервиса
    pub payment_token: String,
}

async fn confirm_booking(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Json(req): Json<ConfirmBookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.payment_token.is_empty() {
        return Err(AppError::BadRequest(
            "payment_token не должен быть пустым".to_string(),
        ));
    }

    let booking = state
        .bookings
        .confirm_booking(req.intent_id, &req.payment_token)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

// PATCH /api/bookings/cancel
#[derive(Debug, Deserialize)]
struct CancelBookingRequest {
    pub booking_id: i64,
}

async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CancelBookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.bookings.cancel_booking(req.booking_id, user.user_id).await?;
    Ok(Json(serde_json::json!({ "message": "Бронь успешно отменена" })))
}

// GET /api/bookings
#[derive(Debug, Deserialize)]
struct BookingsQuery {
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<BookingsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 50);
    let offset = (page - 1) * page_size;

    let bookings = state
        .bookings
        .get_user_bookings(user.user_id, page_size as i64, offset as i64)
        .await?;
    Ok(Json(bookings))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state.bookings.get_booking(booking_id, user.user_id).await?;
    Ok(Json(booking))
}

/* ---------- SEAT LOCK STATUS ---------- */

// GET /api/seats/lock?seat_id= - быстрая проверка для UI без похода в БД
#[derive(Debug, Deserialize)]
struct SeatLockQuery {
    seat_id: i64,
}

#[derive(Debug, Serialize)]
struct SeatLockResponse {
    seat_id: i64,
    is_locked: bool,
    ttl_seconds: i64,
}

async fn get_seat_lock(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeatLockQuery>,
) -> Result<impl IntoResponse, AppError> {
    if params.seat_id <= 0 {
        return Err(AppError::BadRequest("seat_id должен быть > 0".to_string()));
    }

    let owner = state.locks.is_locked(params.seat_id).await?;
    let ttl = state.locks.ttl(params.seat_id).await?;

    Ok(Json(SeatLockResponse {
        seat_id: params.seat_id,
        is_locked: owner.is_some(),
        ttl_seconds: ttl.max(0),
    }))
}
