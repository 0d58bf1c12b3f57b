use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::AppState;

// Фоновый reaper: протухшие pending-брони, зависшие записи очереди,
// осиротевшие ключи блокировок
pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Запускает полный цикл очистки: брони + очередь + Redis-ключи
    pub async fn run_full_cleanup(&self) {
        info!("🧹 Starting full cleanup process");

        match self.state.bookings.cleanup_expired_intents().await {
            Ok(0) => {}
            Ok(count) => info!("🎫 Expired {} stale booking intents", count),
            Err(e) => error!("failed to cleanup expired intents: {:?}", e),
        }

        match self.state.waitlist.cleanup().await {
            Ok(0) => {}
            Ok(count) => info!("📋 Removed {} stale waitlist entries", count),
            Err(e) => error!("failed to cleanup waitlist: {:?}", e),
        }

        match self.state.locks.cleanup_orphans().await {
            Ok(0) => {}
            Ok(count) => info!("🔑 Removed {} orphaned seat locks", count),
            Err(e) => error!("failed to cleanup orphaned locks: {:?}", e),
        }

        info!("✅ Full cleanup process completed");
    }

    /// Бесконечный цикл по расписанию; интервал должен быть коротким,
    /// чтобы протухшие брони не морозили места
    pub async fn run_periodic(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.run_full_cleanup().await;
        }
    }
}
