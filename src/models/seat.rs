use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Seat {
    pub id: i64,
    pub event_id: i64,
    pub seat_row: i32,
    pub seat_column: i32,
    pub seat_type: String,
    pub price: f64,
    pub is_available: bool,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<i64>,
}
