use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Venue {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub city: String,
    pub seat_rows: i32,
    pub seat_columns: i32,
    pub created_at: DateTime<Utc>,
}

impl Venue {
    // Вместимость площадки задается сеткой рядов и колонок
    pub fn capacity(&self) -> i32 {
        self.seat_rows * self.seat_columns
    }
}
