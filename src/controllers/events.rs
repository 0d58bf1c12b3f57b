use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::errors::AppError;
use crate::middleware::AuthUser;
use crate::models::{Event, Seat, Venue};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", get(get_events))
        .route("/events", post(create_event))
        .route("/events/seats", get(get_available_seats))
        .route("/events/{id}", get(get_event))
        .route("/venues", post(create_venue))
}

/* ---------- EVENTS ---------- */

// GET /api/events
#[derive(Debug, Deserialize)]
struct EventsQuery {
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 50);
    let offset = (page - 1) * page_size;

    let events = sqlx::query_as::<_, Event>(
        "SELECT * FROM events
         WHERE status = 'active' AND start_time > NOW()
         ORDER BY start_time
         LIMIT $1 OFFSET $2",
    )
    .bind(page_size as i64)
    .bind(offset as i64)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(events))
}

// GET /api/events/{id}
async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let event: Option<Event> = sqlx::query_as("SELECT * FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_optional(&state.db.pool)
        .await?;

    let event = event.ok_or_else(|| AppError::NotFound("событие не найдено".to_string()))?;
    Ok(Json(event))
}

// GET /api/events/seats?event_id=
#[derive(Debug, Deserialize)]
struct SeatsQuery {
    event_id: i64,
    page: Option<u32>,
    #[serde(rename = "pageSize")]
    page_size: Option<u32>,
}

async fn get_available_seats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SeatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    if params.event_id <= 0 {
        return Err(AppError::BadRequest("event_id должен быть > 0".to_string()));
    }

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(50).clamp(1, 100);
    let offset = (page - 1) * page_size;

    let seats = sqlx::query_as::<_, Seat>(
        "SELECT * FROM seats
         WHERE event_id = $1 AND is_available = TRUE AND is_locked = FALSE
         ORDER BY seat_row, seat_column
         LIMIT $2 OFFSET $3",
    )
    .bind(params.event_id)
    .bind(page_size as i64)
    .bind(offset as i64)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(seats))
}

// POST /api/events (админ): создает событие и сетку мест площадки
#[derive(Debug, Deserialize)]
struct CreateEventRequest {
    pub venue_id: i64,
    pub name: String,
    #[serde(rename = "type", default = "default_event_type")]
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: f64,
    #[serde(default)]
    pub is_high_demand: bool,
}

fn default_event_type() -> String {
    "other".to_string()
}

async fn create_event(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !user.is_admin {
        return Err(AppError::Unauthorized(
            "создавать события может только администратор".to_string(),
        ));
    }
    if req.start_time <= Utc::now() {
        return Err(AppError::BadRequest(
            "событие должно начинаться в будущем".to_string(),
        ));
    }
    if req.end_time <= req.start_time {
        return Err(AppError::BadRequest(
            "событие должно заканчиваться после начала".to_string(),
        ));
    }

    let mut tx = state.db.pool.begin().await?;

    let venue: Option<Venue> = sqlx::query_as("SELECT * FROM venues WHERE id = $1")
        .bind(req.venue_id)
        .fetch_optional(&mut *tx)
        .await?;
    let venue = venue.ok_or_else(|| AppError::NotFound("площадка не найдена".to_string()))?;

    let event: Event = sqlx::query_as(
        "INSERT INTO events
             (venue_id, name, event_type, start_time, end_time, price, status,
              is_high_demand, available_seats)
         VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8)
         RETURNING *",
    )
    .bind(venue.id)
    .bind(&req.name)
    .bind(&req.event_type)
    .bind(req.start_time)
    .bind(req.end_time)
    .bind(req.price)
    .bind(req.is_high_demand)
    .bind(venue.capacity())
    .fetch_one(&mut *tx)
    .await?;

    // одно место на каждую клетку сетки ряд x колонка
    sqlx::query(
        "INSERT INTO seats (event_id, seat_row, seat_column, seat_type, price)
         SELECT $1, r, c, 'standard', $2
         FROM generate_series(1, $3) AS r, generate_series(1, $4) AS c",
    )
    .bind(event.id)
    .bind(req.price)
    .bind(venue.seat_rows)
    .bind(venue.seat_columns)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(event)))
}

/* ---------- VENUES ---------- */

// POST /api/venues (админ)
#[derive(Debug, Deserialize)]
struct CreateVenueRequest {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    pub seat_rows: i32,
    pub seat_columns: i32,
}

async fn create_venue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateVenueRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !user.is_admin {
        return Err(AppError::Unauthorized(
            "создавать площадки может только администратор".to_string(),
        ));
    }
    if req.seat_rows <= 0 || req.seat_columns <= 0 {
        return Err(AppError::BadRequest(
            "сетка мест должна быть не меньше 1x1".to_string(),
        ));
    }

    let venue: Venue = sqlx::query_as(
        "INSERT INTO venues (name, address, city, seat_rows, seat_columns)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(&req.name)
    .bind(&req.address)
    .bind(&req.city)
    .bind(req.seat_rows)
    .bind(req.seat_columns)
    .fetch_one(&state.db.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(venue)))
}
