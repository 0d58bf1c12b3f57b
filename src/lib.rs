pub mod config;
pub mod database;
pub mod redis_client;
pub mod errors;
pub mod models;
pub mod middleware;
pub mod controllers;
pub mod services;

use errors::AppError;
use services::booking::BookingService;
use services::seat_lock::SeatLockService;
use services::waitlist::WaitlistService;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub config: config::Config,
    pub locks: SeatLockService,
    pub bookings: BookingService,
    pub waitlist: WaitlistService,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Self, AppError> {
        let db = database::Database::new(&config.database).await?;
        let redis = redis_client::RedisClient::new(&config.redis).await?;

        let locks = SeatLockService::new(redis.clone(), config.seat_lock_ttl_secs());
        let waitlist = WaitlistService::new(redis.clone(), db.clone(), &config.waitlist);
        let bookings = BookingService::new(
            db.clone(),
            locks.clone(),
            waitlist.clone(),
            config.booking.seat_lock_minutes,
        );

        Ok(AppState {
            db,
            redis,
            config,
            locks,
            bookings,
            waitlist,
        })
    }
}
