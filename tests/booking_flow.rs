//! Сценарные тесты бронирования против живых Postgres и Redis.
//!
//! Запуск: поднять стораджи из .env и выполнить
//! `cargo test -- --ignored --test-threads=1`

use chrono::{Duration, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

use evently::errors::AppError;
use evently::{config::Config, AppState};

async fn setup() -> AppState {
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let state = AppState::new(config)
        .await
        .expect("postgres and redis must be running");
    state
        .db
        .run_migrations()
        .await
        .expect("failed to run migrations");
    state
}

fn unique_tag() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

async fn create_user(state: &AppState, name: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO users (email, password_plain) VALUES ($1, 'secret') RETURNING id",
    )
    .bind(format!("{}-{}@test.local", name, unique_tag()))
    .fetch_one(&state.db.pool)
    .await
    .expect("failed to create user")
}

// событие с одним рядом из `seats` мест, начинается через час
async fn create_event(state: &AppState, seats: i32) -> (i64, Vec<i64>) {
    let venue_id: i64 = sqlx::query_scalar(
        "INSERT INTO venues (name, seat_rows, seat_columns) VALUES ($1, 1, $2) RETURNING id",
    )
    .bind(format!("venue-{}", unique_tag()))
    .bind(seats)
    .fetch_one(&state.db.pool)
    .await
    .expect("failed to create venue");

    let start = Utc::now() + Duration::hours(1);
    let event_id: i64 = sqlx::query_scalar(
        "INSERT INTO events (venue_id, name, start_time, end_time, price, status, available_seats)
         VALUES ($1, $2, $3, $4, 100.0, 'active', $5)
         RETURNING id",
    )
    .bind(venue_id)
    .bind(format!("event-{}", unique_tag()))
    .bind(start)
    .bind(start + Duration::hours(2))
    .bind(seats)
    .fetch_one(&state.db.pool)
    .await
    .expect("failed to create event");

    let seat_ids: Vec<i64> = sqlx::query_scalar(
        "INSERT INTO seats (event_id, seat_row, seat_column, seat_type, price)
         SELECT $1, 1, c, 'standard', 100.0 FROM generate_series(1, $2) AS c
         RETURNING id",
    )
    .bind(event_id)
    .bind(seats)
    .fetch_all(&state.db.pool)
    .await
    .expect("failed to create seats");

    (event_id, seat_ids)
}

async fn force_expire_intent(state: &AppState, intent_id: i64) {
    sqlx::query(
        "UPDATE booking_intents SET lock_expires_at = NOW() - interval '1 minute' WHERE id = $1",
    )
    .bind(intent_id)
    .execute(&state.db.pool)
    .await
    .expect("failed to expire intent");
}

// S1: гонка за место - побеждает ровно один
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn race_to_lock_single_winner() {
    let state = setup().await;
    let u1 = create_user(&state, "race1").await;
    let u2 = create_user(&state, "race2").await;
    let (_event_id, seats) = create_event(&state, 2).await;
    let seat = seats[0];

    let (first, second) = tokio::join!(
        state.bookings.create_intent(u1, seat),
        state.bookings.create_intent(u2, seat),
    );

    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "ровно один клиент должен получить бронь");

    let loser = if first.is_err() { first } else { second };
    assert!(matches!(loser, Err(AppError::Conflict(_))));

    // после истечения брони победителя место снова доступно
    let winner_intent_id: i64 =
        sqlx::query_scalar("SELECT id FROM booking_intents WHERE seat_id = $1 AND status = 'pending'")
            .bind(seat)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
    force_expire_intent(&state, winner_intent_id).await;
    state.bookings.cleanup_expired_intents().await.unwrap();

    assert!(state.bookings.create_intent(u2, seat).await.is_ok());
}

// S2: reaper освобождает место протухшей брони
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn reaper_recycles_expired_intent() {
    let state = setup().await;
    let u1 = create_user(&state, "expiry1").await;
    let u2 = create_user(&state, "expiry2").await;
    let (_event_id, seats) = create_event(&state, 1).await;
    let seat = seats[0];

    let intent = state.bookings.create_intent(u1, seat).await.unwrap();
    force_expire_intent(&state, intent.id).await;

    let reaped = state.bookings.cleanup_expired_intents().await.unwrap();
    assert!(reaped >= 1);

    let (status, is_locked): (String, bool) = sqlx::query_as(
        "SELECT i.status, s.is_locked FROM booking_intents i
         JOIN seats s ON s.id = i.seat_id WHERE i.id = $1",
    )
    .bind(intent.id)
    .fetch_one(&state.db.pool)
    .await
    .unwrap();
    assert_eq!(status, "expired");
    assert!(!is_locked);

    assert!(state.bookings.create_intent(u2, seat).await.is_ok());
}

// S3: подтверждение после истечения отклоняется без следов в bookings
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn confirm_after_expiry_is_rejected() {
    let state = setup().await;
    let u1 = create_user(&state, "late").await;
    let (_event_id, seats) = create_event(&state, 1).await;

    let intent = state.bookings.create_intent(u1, seats[0]).await.unwrap();
    force_expire_intent(&state, intent.id).await;

    let result = state.bookings.confirm_booking(intent.id, "pay_X").await;
    assert!(matches!(result, Err(AppError::BookingExpired)));

    let bookings: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM bookings WHERE booking_intent_id = $1")
            .bind(intent.id)
            .fetch_one(&state.db.pool)
            .await
            .unwrap();
    assert_eq!(bookings, 0);

    // место остается заблокированным, пока не пройдет reaper
    let is_locked: bool = sqlx::query_scalar("SELECT is_locked FROM seats WHERE id = $1")
        .bind(seats[0])
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert!(is_locked);
}

// S4: на последнее место претендуют двое - продается одно
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn capacity_decrement_is_sold_out_safe() {
    let state = setup().await;
    let u1 = create_user(&state, "cap1").await;
    let u2 = create_user(&state, "cap2").await;
    let (event_id, seats) = create_event(&state, 2).await;

    let i1 = state.bookings.create_intent(u1, seats[0]).await.unwrap();
    let i2 = state.bookings.create_intent(u2, seats[1]).await.unwrap();

    // осталось одно «продаваемое» место
    sqlx::query("UPDATE events SET available_seats = 1 WHERE id = $1")
        .bind(event_id)
        .execute(&state.db.pool)
        .await
        .unwrap();

    let (c1, c2) = tokio::join!(
        state.bookings.confirm_booking(i1.id, "pay_1"),
        state.bookings.confirm_booking(i2.id, "pay_2"),
    );

    let confirmed = [&c1, &c2].iter().filter(|r| r.is_ok()).count();
    assert_eq!(confirmed, 1, "продаться должно ровно одно место");
    let loser = if c1.is_err() { c1 } else { c2 };
    assert!(matches!(loser, Err(AppError::EventSoldOut)));

    let available: i32 = sqlx::query_scalar("SELECT available_seats FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert_eq!(available, 0);

    let bookings: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE event_id = $1 AND status = 'confirmed'",
    )
    .bind(event_id)
    .fetch_one(&state.db.pool)
    .await
    .unwrap();
    assert_eq!(bookings, 1);
}

// S5: отмена возвращает место и активирует голову очереди
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn cancel_promotes_waitlist_head() {
    let state = setup().await;
    let u1 = create_user(&state, "wl1").await;
    let u2 = create_user(&state, "wl2").await;
    let u3 = create_user(&state, "wl3").await;
    let (event_id, seats) = create_event(&state, 1).await;

    let intent = state.bookings.create_intent(u1, seats[0]).await.unwrap();
    let booking = state.bookings.confirm_booking(intent.id, "pay_wl").await.unwrap();

    // мест нет - очередь открыта
    let e2 = state.waitlist.join(u2, event_id).await.unwrap();
    let e3 = state.waitlist.join(u3, event_id).await.unwrap();
    assert_eq!(e2.position, 1);
    assert_eq!(e3.position, 2);

    // повторный join идемпотентен
    let again = state.waitlist.join(u2, event_id).await.unwrap();
    assert_eq!(again.position, 1);
    assert_eq!(state.waitlist.size(event_id).await.unwrap(), 2);

    state.bookings.cancel_booking(booking.id, u1).await.unwrap();

    let available: i32 = sqlx::query_scalar("SELECT available_seats FROM events WHERE id = $1")
        .bind(event_id)
        .fetch_one(&state.db.pool)
        .await
        .unwrap();
    assert_eq!(available, 1);

    // голова очереди активирована с окном на выкуп
    let (status, has_expiry): (String, bool) = sqlx::query_as(
        "SELECT status, expires_at IS NOT NULL FROM event_queue
         WHERE event_id = $1 AND user_id = $2",
    )
    .bind(event_id)
    .bind(u2)
    .fetch_one(&state.db.pool)
    .await
    .unwrap();
    assert_eq!(status, "active");
    assert!(has_expiry);

    // позиции не сдвинулись
    assert_eq!(state.waitlist.position(u2, event_id).await.unwrap().position, 1);
    assert_eq!(state.waitlist.position(u3, event_id).await.unwrap().position, 2);
}

// S6: чужую блокировку снять нельзя
#[tokio::test]
#[ignore = "requires running Postgres and Redis"]
async fn non_owner_unlock_is_rejected() {
    let state = setup().await;
    let (_event_id, seats) = create_event(&state, 1).await;
    let seat = seats[0];

    state.locks.lock(seat, 1, 100).await.unwrap();

    let result = state.locks.unlock(seat, 2, 100).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));

    // блокировка уцелела и принадлежит первому владельцу
    assert_eq!(
        state.locks.is_locked(seat).await.unwrap(),
        Some("1:100".to_string())
    );

    state.locks.unlock(seat, 1, 100).await.unwrap();
    assert_eq!(state.locks.is_locked(seat).await.unwrap(), None);
}
