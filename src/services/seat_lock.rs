//! seat_lock.rs
//!
//! Эфемерные блокировки мест в Redis с TTL.
//!
//! Ключевые моменты:
//! 1.  **Захват**: `SET NX EX` - атомарная операция, ключ создается только
//!     если его еще нет. Значение ключа `"<user_id>:<intent_id>"` фиксирует
//!     владельца.
//! 2.  **Освобождение и продление**: Lua-скрипты сравнивают текущее значение
//!     с ожидаемым и только при совпадении делают `DEL`/`EXPIRE`. Обычное
//!     чтение-потом-удаление из приложения здесь недопустимо: устаревший
//!     владелец мог бы снять блокировку, которую уже держит его преемник.
//! 3.  **База данных остается источником истины**: блокировка в Redis - это
//!     быстрая проверка для UI и страховка на случай редкого запуска
//!     фоновой очистки. Недоступность Redis не валит бронирование.

use redis::Script;
use tracing::debug;

use crate::errors::AppError;
use crate::redis_client::RedisClient;

pub const SEAT_LOCK_PREFIX: &str = "seat_lock:";

// GET + DEL только при совпадении владельца
const UNLOCK_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if current == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    else
        return 0
    end
"#;

// GET + EXPIRE только при совпадении владельца
const EXTEND_SCRIPT: &str = r#"
    local current = redis.call('GET', KEYS[1])
    if current == ARGV[1] then
        return redis.call('EXPIRE', KEYS[1], ARGV[2])
    else
        return 0
    end
"#;

fn lock_key(seat_id: i64) -> String {
    format!("{}{}", SEAT_LOCK_PREFIX, seat_id)
}

fn owner_value(user_id: i64, intent_id: i64) -> String {
    format!("{}:{}", user_id, intent_id)
}

/// Менеджер блокировок мест.
#[derive(Clone)]
pub struct SeatLockService {
    redis: RedisClient,
    /// TTL блокировки в секундах (равен времени жизни pending-брони).
    lock_ttl_secs: i64,
}

impl SeatLockService {
    pub fn new(redis: RedisClient, lock_ttl_secs: i64) -> Self {
        Self {
            redis,
            lock_ttl_secs,
        }
    }

    /// Захватывает блокировку места за парой (пользователь, бронь).
    pub async fn lock(&self, seat_id: i64, user_id: i64, intent_id: i64) -> Result<(), AppError> {
        let mut conn = self.redis.conn.clone();

        // SET NX EX - ключ появится только если места никто не держит
        let created: Option<String> = redis::cmd("SET")
            .arg(lock_key(seat_id))
            .arg(owner_value(user_id, intent_id))
            .arg("NX")
            .arg("EX")
            .arg(self.lock_ttl_secs)
            .query_async(&mut conn)
            .await?;

        if created.is_none() {
            return Err(AppError::Conflict(
                "место уже заблокировано другим пользователем".to_string(),
            ));
        }

        debug!("seat {} locked by {}:{}", seat_id, user_id, intent_id);
        Ok(())
    }

    /// Снимает блокировку, если она принадлежит этой паре (пользователь, бронь).
    pub async fn unlock(&self, seat_id: i64, user_id: i64, intent_id: i64) -> Result<(), AppError> {
        let mut conn = self.redis.conn.clone();

        let deleted: i64 = Script::new(UNLOCK_SCRIPT)
            .key(lock_key(seat_id))
            .arg(owner_value(user_id, intent_id))
            .invoke_async(&mut conn)
            .await?;

        if deleted == 0 {
            return Err(AppError::Unauthorized(
                "блокировка принадлежит другому пользователю".to_string(),
            ));
        }

        Ok(())
    }

    /// Продлевает TTL блокировки владельцу еще на полный интервал.
    pub async fn extend(&self, seat_id: i64, user_id: i64, intent_id: i64) -> Result<(), AppError> {
        let mut conn = self.redis.conn.clone();

        let extended: i64 = Script::new(EXTEND_SCRIPT)
            .key(lock_key(seat_id))
            .arg(owner_value(user_id, intent_id))
            .arg(self.lock_ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        if extended == 0 {
            return Err(AppError::Unauthorized(
                "блокировка не найдена или принадлежит другому пользователю".to_string(),
            ));
        }

        Ok(())
    }

    /// Неавторитетная проверка для UI: кто сейчас держит место.
    pub async fn is_locked(&self, seat_id: i64) -> Result<Option<String>, AppError> {
        let mut conn = self.redis.conn.clone();
        let owner: Option<String> = redis::cmd("GET")
            .arg(lock_key(seat_id))
            .query_async(&mut conn)
            .await?;
        Ok(owner)
    }

    /// Остаток TTL в секундах (семантика Redis: -2 нет ключа, -1 нет TTL).
    pub async fn ttl(&self, seat_id: i64) -> Result<i64, AppError> {
        let mut conn = self.redis.conn.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(lock_key(seat_id))
            .query_async(&mut conn)
            .await?;
        Ok(ttl)
    }

    /// Подчищает ключи блокировок, у которых сбился TTL.
    pub async fn cleanup_orphans(&self) -> Result<u64, AppError> {
        let mut conn = self.redis.conn.clone();

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", SEAT_LOCK_PREFIX))
            .query_async(&mut conn)
            .await?;

        let mut removed = 0u64;
        for key in keys {
            let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await?;
            // TTL < 0: ключ без срока жизни или уже исчез
            if ttl < 0 {
                let _: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_uses_seat_prefix() {
        assert_eq!(lock_key(42), "seat_lock:42");
    }

    #[test]
    fn owner_value_is_user_colon_intent() {
        assert_eq!(owner_value(7, 1001), "7:1001");
    }

    #[test]
    fn scripts_compare_before_mutating() {
        // скрипты не должны трогать ключ без сравнения владельца
        assert!(UNLOCK_SCRIPT.contains("GET"));
        assert!(UNLOCK_SCRIPT.contains("DEL"));
        assert!(EXTEND_SCRIPT.contains("GET"));
        assert!(EXTEND_SCRIPT.contains("EXPIRE"));
    }
}
