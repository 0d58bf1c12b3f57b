use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

// Намерение брони: место удерживается за пользователем до оплаты
// или до истечения lock_expires_at
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BookingIntent {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub seat_id: i64,
    pub status: String,
    pub payment_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lock_expires_at: DateTime<Utc>,
}
