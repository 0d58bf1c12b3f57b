//! Машина состояний бронирования.
//!
//! Жизненный цикл: pending -> confirmed | cancelled | expired. Все переходы
//! идут одной транзакцией в Postgres; строчная блокировка места (FOR UPDATE)
//! сериализует конкурентов, частичный уникальный индекс по confirmed-броням
//! остается последним рубежом. Redis-блокировка ставится уже после коммита
//! и только best-effort.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{info, warn};

use crate::database::Database;
use crate::errors::AppError;
use crate::models::{Booking, BookingIntent};
use crate::services::seat_lock::SeatLockService;
use crate::services::waitlist::WaitlistService;

#[derive(FromRow)]
struct SeatForIntent {
    event_id: i64,
    is_available: bool,
    is_locked: bool,
}

#[derive(FromRow)]
struct EventForIntent {
    status: String,
    start_time: DateTime<Utc>,
    available_seats: i32,
}

#[derive(FromRow)]
struct IntentForConfirm {
    id: i64,
    user_id: i64,
    event_id: i64,
    seat_id: i64,
    lock_expires_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct BookingForCancel {
    user_id: i64,
    event_id: i64,
    seat_id: i64,
    start_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BookingService {
    db: Database,
    locks: SeatLockService,
    waitlist: WaitlistService,
    seat_lock_minutes: i64,
}

impl BookingService {
    pub fn new(
        db: Database,
        locks: SeatLockService,
        waitlist: WaitlistService,
        seat_lock_minutes: i64,
    ) -> Self {
        Self {
            db,
            locks,
            waitlist,
            seat_lock_minutes,
        }
    }

    /// Создает pending-бронь и удерживает место на seat_lock_minutes.
    ///
    /// Конкуренты за одно место сериализуются строчной блокировкой:
    /// победитель получает бронь, остальные видят is_locked и Conflict.
    pub async fn create_intent(
        &self,
        user_id: i64,
        seat_id: i64,
    ) -> Result<BookingIntent, AppError> {
        let mut tx = self.db.pool.begin().await?;

        // строка места заблокирована до конца транзакции
        let seat: Option<SeatForIntent> = sqlx::query_as(
            "SELECT event_id, is_available, is_locked FROM seats WHERE id = $1 FOR UPDATE",
        )
        .bind(seat_id)
        .fetch_optional(&mut *tx)
        .await?;

        let seat = seat.ok_or_else(|| AppError::NotFound("место не найдено".to_string()))?;

        if !seat.is_available {
            return Err(AppError::Conflict("место уже продано".to_string()));
        }
        if seat.is_locked {
            return Err(AppError::Conflict(
                "место уже заблокировано другим пользователем".to_string(),
            ));
        }

        let event: EventForIntent = sqlx::query_as(
            "SELECT status, start_time, available_seats FROM events WHERE id = $1",
        )
        .bind(seat.event_id)
        .fetch_one(&mut *tx)
        .await?;

        if event.status != "active" {
            return Err(AppError::BadRequest("событие неактивно".to_string()));
        }
        if event.start_time <= Utc::now() {
            return Err(AppError::BadRequest("событие уже началось".to_string()));
        }
        if event.available_seats <= 0 {
            return Err(AppError::EventSoldOut);
        }

        let intent: BookingIntent = sqlx::query_as(
            "INSERT INTO booking_intents (user_id, event_id, seat_id, status, lock_expires_at)
             VALUES ($1, $2, $3, 'pending', NOW() + make_interval(mins => $4))
             RETURNING *",
        )
        .bind(user_id)
        .bind(seat.event_id)
        .bind(seat_id)
        .bind(self.seat_lock_minutes as i32)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats SET is_locked = TRUE, locked_at = NOW(), locked_by = $1 WHERE id = $2",
        )
        .bind(user_id)
        .bind(seat_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // после коммита - best-effort блокировка в Redis; без нее
        // работаем в режиме database-only locking
        if let Err(e) = self.locks.lock(seat_id, user_id, intent.id).await {
            warn!(
                "Redis lock failed, falling back to database-only locking: {:?}",
                e
            );
        }

        Ok(intent)
    }

    /// Подтверждает pending-бронь после оплаты. Платежный токен приходит
    /// сверху и хранится как есть - ядро платежи не проверяет.
    pub async fn confirm_booking(
        &self,
        intent_id: i64,
        payment_token: &str,
    ) -> Result<Booking, AppError> {
        let mut tx = self.db.pool.begin().await?;

        let intent: Option<IntentForConfirm> = sqlx::query_as(
            "SELECT id, user_id, event_id, seat_id, lock_expires_at
             FROM booking_intents
             WHERE id = $1 AND status = 'pending'
             FOR UPDATE",
        )
        .bind(intent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let intent = intent.ok_or_else(|| {
            AppError::NotFound("бронь не найдена или уже обработана".to_string())
        })?;

        if intent.lock_expires_at < Utc::now() {
            return Err(AppError::BookingExpired);
        }

        let seat_price: f64 = sqlx::query_scalar("SELECT price FROM seats WHERE id = $1")
            .bind(intent.seat_id)
            .fetch_one(&mut *tx)
            .await?;

        let booking: Booking = sqlx::query_as(
            "INSERT INTO bookings
                 (user_id, event_id, seat_id, booking_intent_id, status, payment_status,
                  payment_id, total_amount, booked_at)
             VALUES ($1, $2, $3, $4, 'confirmed', 'paid', $5, $6, NOW())
             RETURNING *",
        )
        .bind(intent.user_id)
        .bind(intent.event_id)
        .bind(intent.seat_id)
        .bind(intent.id)
        .bind(payment_token)
        .bind(seat_price)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE booking_intents
             SET status = 'confirmed', payment_token = $1, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(payment_token)
        .bind(intent.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats
             SET is_available = FALSE, is_locked = FALSE, locked_at = NULL, locked_by = NULL
             WHERE id = $1",
        )
        .bind(intent.seat_id)
        .execute(&mut *tx)
        .await?;

        // условный атомарный декремент: счетчик не может уйти в минус
        let capacity = sqlx::query(
            "UPDATE events SET available_seats = available_seats - 1
             WHERE id = $1 AND available_seats > 0",
        )
        .bind(intent.event_id)
        .execute(&mut *tx)
        .await?;

        if capacity.rows_affected() == 0 {
            // транзакция откатится на drop
            return Err(AppError::EventSoldOut);
        }

        tx.commit().await?;

        // Redis и лист ожидания - уже best-effort, база зафиксирована
        if let Err(e) = self.locks.unlock(intent.seat_id, intent.user_id, intent.id).await {
            warn!("failed to unlock seat {} in Redis: {:?}", intent.seat_id, e);
        }
        if let Err(e) = self
            .waitlist
            .remove_after_booking(intent.user_id, intent.event_id)
            .await
        {
            warn!(
                "failed to remove user {} from waitlist: {:?}",
                intent.user_id, e
            );
        }

        info!(
            "booking {} confirmed for user {} seat {}",
            booking.id, intent.user_id, intent.seat_id
        );
        Ok(booking)
    }

    /// Отмена pending-брони владельцем. Счетчик мест не трогаем:
    /// pending-брони проданными не считались.
    pub async fn cancel_intent(&self, intent_id: i64, user_id: i64) -> Result<(), AppError> {
        let mut tx = self.db.pool.begin().await?;

        let intent: Option<(i64, i64)> = sqlx::query_as(
            "SELECT user_id, seat_id FROM booking_intents
             WHERE id = $1 AND status = 'pending'
             FOR UPDATE",
        )
        .bind(intent_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (owner_id, seat_id) =
            intent.ok_or_else(|| AppError::NotFound("бронь не найдена".to_string()))?;

        if owner_id != user_id {
            return Err(AppError::Unauthorized(
                "бронь принадлежит другому пользователю".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE booking_intents SET status = 'cancelled', updated_at = NOW() WHERE id = $1",
        )
        .bind(intent_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats SET is_locked = FALSE, locked_at = NULL, locked_by = NULL WHERE id = $1",
        )
        .bind(seat_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if let Err(e) = self.locks.unlock(seat_id, user_id, intent_id).await {
            warn!("failed to unlock seat {} in Redis: {:?}", seat_id, e);
        }

        Ok(())
    }

    /// Отмена подтвержденной брони до начала события. Место возвращается в
    /// продажу, счетчик инкрементируется, очередь получает освободившееся место.
    pub async fn cancel_booking(&self, booking_id: i64, user_id: i64) -> Result<(), AppError> {
        let mut tx = self.db.pool.begin().await?;

        let booking: Option<BookingForCancel> = sqlx::query_as(
            "SELECT b.user_id, b.event_id, b.seat_id, e.start_time
             FROM bookings b
             JOIN events e ON e.id = b.event_id
             WHERE b.id = $1 AND b.status = 'confirmed' AND b.deleted_at IS NULL
             FOR UPDATE OF b",
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let booking =
            booking.ok_or_else(|| AppError::NotFound("бронь не найдена".to_string()))?;

        if booking.user_id != user_id {
            return Err(AppError::Unauthorized(
                "бронь принадлежит другому пользователю".to_string(),
            ));
        }
        if booking.start_time <= Utc::now() {
            return Err(AppError::BadRequest(
                "нельзя отменить бронь после начала события".to_string(),
            ));
        }

        sqlx::query(
            "UPDATE bookings SET status = 'cancelled', cancelled_at = NOW() WHERE id = $1",
        )
        .bind(booking_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE seats SET is_available = TRUE WHERE id = $1")
            .bind(booking.seat_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE events SET available_seats = available_seats + 1 WHERE id = $1")
            .bind(booking.event_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        // освободившееся место отдаем голове очереди
        match self.waitlist.size(booking.event_id).await {
            Ok(size) if size > 0 => {
                if let Err(e) = self
                    .waitlist
                    .process_availability(booking.event_id, 1)
                    .await
                {
                    warn!(
                        "failed to process waitlist for event {}: {:?}",
                        booking.event_id, e
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!(
                "failed to check waitlist size for event {}: {:?}",
                booking.event_id, e
            ),
        }

        Ok(())
    }

    /// Reaper: переводит протухшие pending-брони в expired и освобождает
    /// их места. Безопасен рядом с пользовательскими операциями - строки
    /// блокируются на время обновления.
    pub async fn cleanup_expired_intents(&self) -> Result<u64, AppError> {
        let mut tx = self.db.pool.begin().await?;

        let expired: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT id, user_id, seat_id FROM booking_intents
             WHERE status = 'pending' AND lock_expires_at < NOW()
             FOR UPDATE",
        )
        .fetch_all(&mut *tx)
        .await?;

        if expired.is_empty() {
            return Ok(0);
        }

        let intent_ids: Vec<i64> = expired.iter().map(|(id, _, _)| *id).collect();
        let seat_ids: Vec<i64> = expired.iter().map(|(_, _, seat_id)| *seat_id).collect();

        sqlx::query(
            "UPDATE booking_intents SET status = 'expired', updated_at = NOW()
             WHERE id = ANY($1)",
        )
        .bind(&intent_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE seats SET is_locked = FALSE, locked_at = NULL, locked_by = NULL
             WHERE id = ANY($1)",
        )
        .bind(&seat_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // ключи в Redis снимаем best-effort: TTL их и так добьет
        for (intent_id, user_id, seat_id) in &expired {
            if let Err(e) = self.locks.unlock(*seat_id, *user_id, *intent_id).await {
                warn!("failed to unlock expired seat {} in Redis: {:?}", seat_id, e);
            }
        }

        Ok(expired.len() as u64)
    }

    /// История броней пользователя.
    pub async fn get_user_bookings(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Booking>, AppError> {
        let bookings = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings
             WHERE user_id = $1 AND deleted_at IS NULL
             ORDER BY booked_at DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(bookings)
    }

    /// Одна бронь пользователя.
    pub async fn get_booking(&self, booking_id: i64, user_id: i64) -> Result<Booking, AppError> {
        let booking = sqlx::query_as::<_, Booking>(
            "SELECT * FROM bookings
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
        )
        .bind(booking_id)
        .bind(user_id)
        .fetch_optional(&self.db.pool)
        .await?;

        booking.ok_or_else(|| AppError::NotFound("бронь не найдена".to_string()))
    }
}
