use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: i64,
    pub venue_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub price: f64,
    pub status: String,
    pub is_high_demand: bool,
    pub available_seats: i32,
    pub created_at: DateTime<Utc>,
}
