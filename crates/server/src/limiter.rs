// Per-connection sliding-window rate limiting for chat messages.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

/// Sliding-window message counter keyed by connection id.
///
/// Each admission purges timestamps older than the window before checking
/// the cap, so a window never retains more than `max_messages` entries.
/// State for a connection must be released via [`RateLimiter::forget`] at
/// disconnect.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    windows: Arc<RwLock<HashMap<Uuid, Vec<Instant>>>>,
    window: Duration,
    max_messages: usize,
}

impl RateLimiter {
    pub fn new(window_ms: u64, max_messages: usize) -> Self {
        Self {
            windows: Arc::new(RwLock::new(HashMap::new())),
            window: Duration::from_millis(window_ms),
            max_messages,
        }
    }

    /// Admit or reject one message for this connection.
    pub async fn admit(&self, connection_id: Uuid) -> bool {
        let now = Instant::now();
        let mut guard = self.windows.write().await;
        let timestamps = guard.entry(connection_id).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_messages {
            return false;
        }

        timestamps.push(now);
        true
    }

    /// Drop all state for a disconnected connection.
    pub async fn forget(&self, connection_id: Uuid) {
        self.windows.write().await.remove(&connection_id);
    }

    #[cfg(test)]
    async fn tracked_connections(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_the_cap_and_rejects_the_next() {
        let limiter = RateLimiter::new(60_000, 30);
        let connection = Uuid::new_v4();

        for _ in 0..30 {
            assert!(limiter.admit(connection).await);
            advance(Duration::from_millis(100)).await;
        }
        assert!(!limiter.admit(connection).await, "31st message within the window must be rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn admission_recovers_after_the_window_elapses() {
        let limiter = RateLimiter::new(60_000, 30);
        let connection = Uuid::new_v4();

        for _ in 0..30 {
            assert!(limiter.admit(connection).await);
        }
        assert!(!limiter.admit(connection).await);

        // All 30 timestamps were recorded at t=0; once the window passes
        // they purge and admission succeeds again.
        advance(Duration::from_millis(60_001)).await;
        assert!(limiter.admit(connection).await);
    }

    #[tokio::test(start_paused = true)]
    async fn connections_are_limited_independently() {
        let limiter = RateLimiter::new(60_000, 1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(limiter.admit(first).await);
        assert!(!limiter.admit(first).await);
        assert!(limiter.admit(second).await);
    }

    #[tokio::test(start_paused = true)]
    async fn forget_releases_per_connection_state() {
        let limiter = RateLimiter::new(60_000, 5);
        let connection = Uuid::new_v4();

        assert!(limiter.admit(connection).await);
        assert_eq!(limiter.tracked_connections().await, 1);

        limiter.forget(connection).await;
        assert_eq!(limiter.tracked_connections().await, 0);
    }
}
