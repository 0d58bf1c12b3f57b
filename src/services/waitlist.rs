//! Лист ожидания: FIFO-очередь на событие в Redis с зеркалом в базе.
//!
//! Очередь живет в списке `waitlist:event:<E>`, рядом лежит ключ
//! `waitlist:user:<U>:event:<E>` для быстрой проверки членства. Позиция в
//! сохраненной записи только информационная - авторитетная позиция всегда
//! пересчитывается по индексу в списке. Зеркало в таблице `event_queue`
//! хранит историю статусов для аудита.

use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::WaitlistConfig;
use crate::database::Database;
use crate::errors::AppError;
use crate::redis_client::RedisClient;

// пользовательский ключ живет сутки
const USER_KEY_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitlistEntry {
    pub user_id: i64,
    pub event_id: i64,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notified_at: Option<DateTime<Utc>>,
}

fn queue_key(event_id: i64) -> String {
    format!("waitlist:event:{}", event_id)
}

fn user_key(user_id: i64, event_id: i64) -> String {
    format!("waitlist:user:{}:event:{}", user_id, event_id)
}

// 1-based позиция пользователя в сериализованном списке
fn position_in(items: &[String], user_id: i64) -> Option<i64> {
    items.iter().enumerate().find_map(|(i, raw)| {
        let entry: WaitlistEntry = serde_json::from_str(raw).ok()?;
        (entry.user_id == user_id).then_some((i + 1) as i64)
    })
}

// запись была уведомлена и окно уведомления уже вышло
fn notification_stale(entry: &WaitlistEntry, cutoff: DateTime<Utc>) -> bool {
    entry.notified_at.is_some_and(|t| t < cutoff)
}

#[derive(Clone)]
pub struct WaitlistService {
    redis: RedisClient,
    db: Database,
    active_window_minutes: i64,
    notification_ttl_secs: i64,
}

impl WaitlistService {
    pub fn new(redis: RedisClient, db: Database, config: &WaitlistConfig) -> Self {
        Self {
            redis,
            db,
            active_window_minutes: config.active_window_minutes,
            notification_ttl_secs: config.notification_ttl_secs,
        }
    }

    /// Встать в очередь на событие. Повторный вызов идемпотентен.
    pub async fn join(&self, user_id: i64, event_id: i64) -> Result<WaitlistEntry, AppError> {
        // в очередь пускаем только когда билетов действительно нет
        let event: Option<(String, i32)> =
            sqlx::query_as("SELECT status, available_seats FROM events WHERE id = $1")
                .bind(event_id)
                .fetch_optional(&self.db.pool)
                .await?;

        let (status, available_seats) =
            event.ok_or_else(|| AppError::NotFound("событие не найдено".to_string()))?;

        if status != "active" {
            return Err(AppError::BadRequest("событие неактивно".to_string()));
        }
        if available_seats > 0 {
            return Err(AppError::BadRequest(
                "на событие есть свободные места - бронируйте напрямую".to_string(),
            ));
        }

        let qkey = queue_key(event_id);
        let ukey = user_key(user_id, event_id);
        let mut conn = self.redis.conn.clone();

        let exists: bool = conn.exists(&ukey).await?;
        if exists {
            // уже в очереди - возвращаем текущую запись
            return self.position(user_id, event_id).await;
        }

        let mut entry = WaitlistEntry {
            user_id,
            event_id,
            joined_at: Utc::now(),
            position: 0,
            notified_at: None,
        };
        let list_payload = serde_json::to_string(&entry)?;

        // добавляем в хвост, ставим пользовательский ключ, читаем длину
        let (_, _, length): ((), (), i64) = redis::pipe()
            .rpush(&qkey, &list_payload)
            .set_ex(&ukey, &list_payload, USER_KEY_TTL_SECS)
            .llen(&qkey)
            .query_async(&mut conn)
            .await?;

        entry.position = length;
        let _: () = conn
            .set_ex(&ukey, serde_json::to_string(&entry)?, USER_KEY_TTL_SECS)
            .await?;

        // зеркало в базе; при неудаче откатываем Redis, чтобы не разъехаться
        let mirror = sqlx::query(
            "INSERT INTO event_queue (event_id, user_id, queue_position, status, joined_at)
             VALUES ($1, $2, $3, 'waiting', $4)",
        )
        .bind(event_id)
        .bind(user_id)
        .bind(entry.position as i32)
        .bind(entry.joined_at)
        .execute(&self.db.pool)
        .await;

        if let Err(e) = mirror {
            let _: Result<(i64, i64), _> = redis::pipe()
                .lrem(&qkey, 1, &list_payload)
                .del(&ukey)
                .query_async(&mut conn)
                .await;
            return Err(e.into());
        }

        Ok(entry)
    }

    /// Текущая запись пользователя с пересчитанной позицией.
    pub async fn position(&self, user_id: i64, event_id: i64) -> Result<WaitlistEntry, AppError> {
        let mut conn = self.redis.conn.clone();

        let raw: Option<String> = conn.get(user_key(user_id, event_id)).await?;
        let raw = raw.ok_or_else(|| AppError::NotFound("вы не стоите в очереди".to_string()))?;
        let mut entry: WaitlistEntry = serde_json::from_str(&raw)?;

        // позицию пересчитываем по списку: записи впереди могли уйти
        let items: Vec<String> = conn.lrange(queue_key(event_id), 0, -1).await?;
        if let Some(position) = position_in(&items, user_id) {
            entry.position = position;
        }

        Ok(entry)
    }

    /// Выйти из очереди.
    pub async fn leave(&self, user_id: i64, event_id: i64) -> Result<(), AppError> {
        let mut conn = self.redis.conn.clone();

        let exists: bool = conn.exists(user_key(user_id, event_id)).await?;
        if !exists {
            return Err(AppError::NotFound("вы не стоите в очереди".to_string()));
        }

        self.remove_from_queue(user_id, event_id).await?;

        sqlx::query(
            "UPDATE event_queue SET status = 'cancelled'
             WHERE event_id = $1 AND user_id = $2 AND status = 'waiting'",
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.db.pool)
        .await?;

        Ok(())
    }

    /// Длина очереди на событие.
    pub async fn size(&self, event_id: i64) -> Result<i64, AppError> {
        let mut conn = self.redis.conn.clone();
        let length: i64 = conn.llen(queue_key(event_id)).await?;
        Ok(length)
    }

    /// Освободилось `count` мест: активируем головных пользователей очереди.
    ///
    /// Запись из очереди не извлекается - пользователь сохраняет слот, пока
    /// не выкупит место или не истечет окно. Повторно уведомленные головы
    /// пропускаются, место уходит следующему неуведомленному.
    pub async fn process_availability(
        &self,
        event_id: i64,
        count: i64,
    ) -> Result<Vec<WaitlistEntry>, AppError> {
        if count <= 0 {
            return Ok(Vec::new());
        }

        let qkey = queue_key(event_id);
        let mut conn = self.redis.conn.clone();
        let items: Vec<String> = conn.lrange(&qkey, 0, -1).await?;

        let now = Utc::now();
        let expires_at = now + Duration::minutes(self.active_window_minutes);
        let mut activated = Vec::new();

        for (index, raw) in items.iter().enumerate() {
            if activated.len() as i64 == count {
                break;
            }
            let Ok(mut entry) = serde_json::from_str::<WaitlistEntry>(raw) else {
                continue;
            };
            if entry.notified_at.is_some() {
                // окно этого пользователя уже идет
                continue;
            }

            entry.notified_at = Some(now);
            entry.position = (index + 1) as i64;
            let updated = serde_json::to_string(&entry)?;

            // отметка и в слоте списка, и в пользовательском ключе
            let _: ((), ()) = redis::pipe()
                .lset(&qkey, index as isize, &updated)
                .set_ex(
                    user_key(entry.user_id, event_id),
                    &updated,
                    USER_KEY_TTL_SECS,
                )
                .query_async(&mut conn)
                .await?;

            let mirror = sqlx::query(
                "UPDATE event_queue
                 SET status = 'active', active_at = $1, expires_at = $2
                 WHERE event_id = $3 AND user_id = $4 AND status = 'waiting'",
            )
            .bind(now)
            .bind(expires_at)
            .bind(event_id)
            .bind(entry.user_id)
            .execute(&self.db.pool)
            .await;

            if let Err(e) = mirror {
                warn!(
                    "failed to mark queue entry active for user {} event {}: {:?}",
                    entry.user_id, event_id, e
                );
                continue;
            }

            info!(
                "waitlist user {} activated for event {} until {}",
                entry.user_id, event_id, expires_at
            );
            activated.push(entry);
        }

        Ok(activated)
    }

    /// Убрать пользователя из очереди после успешной брони.
    /// Ошибки здесь логируются и не валят бронирование.
    pub async fn remove_after_booking(&self, user_id: i64, event_id: i64) -> Result<(), AppError> {
        if let Err(e) = self.remove_from_queue(user_id, event_id).await {
            warn!(
                "failed to remove user {} from waitlist for event {}: {:?}",
                user_id, event_id, e
            );
        }

        let mirror = sqlx::query(
            "UPDATE event_queue SET status = 'completed'
             WHERE event_id = $1 AND user_id = $2 AND status IN ('waiting', 'active')",
        )
        .bind(event_id)
        .bind(user_id)
        .execute(&self.db.pool)
        .await;

        if let Err(e) = mirror {
            warn!(
                "failed to complete queue entry for user {} event {}: {:?}",
                user_id, event_id, e
            );
        }

        Ok(())
    }

    /// Плановая очистка: выкидывает уведомленных, но не выкупивших, и
    /// помечает истекшие активные окна в зеркале.
    pub async fn cleanup(&self) -> Result<u64, AppError> {
        let event_ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM events WHERE status = 'active'")
            .fetch_all(&self.db.pool)
            .await?;

        let cutoff = Utc::now() - Duration::seconds(self.notification_ttl_secs);
        let mut conn = self.redis.conn.clone();
        let mut removed = 0u64;

        for event_id in event_ids {
            let qkey = queue_key(event_id);
            let items: Vec<String> = conn.lrange(&qkey, 0, -1).await?;

            for raw in items {
                let Ok(entry) = serde_json::from_str::<WaitlistEntry>(&raw) else {
                    // битую запись просто выкидываем
                    let _: i64 = conn.lrem(&qkey, 1, &raw).await.unwrap_or(0);
                    continue;
                };
                if notification_stale(&entry, cutoff) {
                    let _: (i64, i64) = redis::pipe()
                        .lrem(&qkey, 1, &raw)
                        .del(user_key(entry.user_id, event_id))
                        .query_async(&mut conn)
                        .await?;
                    removed += 1;
                }
            }
        }

        // зеркало: активные окна, которые вышли, переводим в expired
        sqlx::query(
            "UPDATE event_queue SET status = 'expired'
             WHERE status = 'active' AND expires_at < NOW()",
        )
        .execute(&self.db.pool)
        .await?;

        Ok(removed)
    }

    // Удаляет из списка ровно ту строку, в которой лежит этот пользователь.
    // LREM сверяет значение побайтно, а запись в списке могла быть
    // переписана при активации, поэтому ищем ее сканом.
    async fn remove_from_queue(&self, user_id: i64, event_id: i64) -> Result<(), AppError> {
        let qkey = queue_key(event_id);
        let mut conn = self.redis.conn.clone();

        let items: Vec<String> = conn.lrange(&qkey, 0, -1).await?;
        let raw = items.into_iter().find(|raw| {
            serde_json::from_str::<WaitlistEntry>(raw)
                .map(|e| e.user_id == user_id)
                .unwrap_or(false)
        });

        match raw {
            Some(raw) => {
                let _: (i64, i64) = redis::pipe()
                    .lrem(&qkey, 1, &raw)
                    .del(user_key(user_id, event_id))
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                // в списке нет - подчищаем хотя бы пользовательский ключ
                let _: i64 = conn.del(user_key(user_id, event_id)).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user_id: i64, notified_at: Option<DateTime<Utc>>) -> WaitlistEntry {
        WaitlistEntry {
            user_id,
            event_id: 1,
            joined_at: Utc::now(),
            position: 0,
            notified_at,
        }
    }

    #[test]
    fn keys_follow_expected_layout() {
        assert_eq!(queue_key(5), "waitlist:event:5");
        assert_eq!(user_key(2, 5), "waitlist:user:2:event:5");
    }

    #[test]
    fn position_is_one_based_and_skips_others() {
        let items: Vec<String> = [entry(10, None), entry(20, None), entry(30, None)]
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();

        assert_eq!(position_in(&items, 10), Some(1));
        assert_eq!(position_in(&items, 30), Some(3));
        assert_eq!(position_in(&items, 99), None);
    }

    #[test]
    fn entry_roundtrips_through_json() {
        let original = entry(7, Some(Utc::now()));
        let raw = serde_json::to_string(&original).unwrap();
        let parsed: WaitlistEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn notified_at_is_omitted_until_set() {
        let raw = serde_json::to_string(&entry(7, None)).unwrap();
        assert!(!raw.contains("notified_at"));
    }

    #[test]
    fn stale_check_requires_notification() {
        let cutoff = Utc::now();
        // никого не уведомляли - запись живет
        assert!(!notification_stale(&entry(1, None), cutoff));
        // уведомление свежее порога
        assert!(!notification_stale(
            &entry(1, Some(cutoff + Duration::seconds(30))),
            cutoff
        ));
        // уведомление старше порога
        assert!(notification_stale(
            &entry(1, Some(cutoff - Duration::seconds(30))),
            cutoff
        ));
    }
}
