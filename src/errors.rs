use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Ошибки уровня сервисов. Каждая ошибка несет вид (HTTP-статус) и
/// сообщение для клиента; причина, если есть, остается внутри.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("бронь истекла, подтвердить её уже нельзя")]
    BookingExpired,
    #[error("билеты на событие распроданы")]
    EventSoldOut,
    #[error("ошибка базы данных")]
    Database(#[from] sqlx::Error),
    #[error("ошибка Redis")]
    Redis(#[from] redis::RedisError),
    #[error("ошибка сериализации")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::EventSoldOut => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::BookingExpired => StatusCode::GONE,
            AppError::Database(_) | AppError::Redis(_) | AppError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("internal error: {:?}", self);
            // Внутренние детали клиенту не отдаем
            return (status, Json(json!({ "error": "внутренняя ошибка сервера" }))).into_response();
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_expected_statuses() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AppError::BookingExpired.status_code(), StatusCode::GONE);
        assert_eq!(AppError::EventSoldOut.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn message_is_preserved_for_client_errors() {
        let err = AppError::Conflict("место уже заблокировано".into());
        assert_eq!(err.to_string(), "место уже заблокировано");
    }
}
