use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_plain: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    // Найти активного пользователя по email
    pub async fn find_by_email(
        email: &str,
        db: &crate::database::Database,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1 AND is_active = TRUE")
            .bind(email)
            .fetch_optional(&db.pool)
            .await
    }

    // Проверить пароль (для хакатона пароль хранится открытым текстом)
    pub fn verify_password(&self, password: &str) -> bool {
        match self.password_plain {
            Some(ref plain) => plain == password,
            // В продакшене здесь был бы bcrypt
            None => false,
        }
    }
}
