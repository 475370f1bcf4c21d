use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window attempt counter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one attempt for `client`.
    pub async fn check(&self, client: &str) -> Result<()> {
        self.check_at(client, Instant::now()).await
    }

    pub async fn check_at(&self, client: &str, now: Instant) -> Result<()> {
        let mut clients = self.clients.lock().await;
        clients.retain(|_, w| now.saturating_duration_since(w.started) < self.window);

        let entry = clients.entry(client.to_string()).or_insert(Window { started: now, count: 0 });
        if entry.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            log::warn!(
                "🚦 Rate limit hit for {} ({} attempts, retry in {}s)",
                client,
                entry.count,
                retry_after
            );
            return Err(AppError::rate_limit(retry_after));
        }

        entry.count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_third_attempt_is_rejected() {
        let limiter = RateLimiter::new(2, Duration::from_secs(86400));
        let now = Instant::now();

        assert!(limiter.check_at("10.0.0.1", now).await.is_ok());
        assert!(limiter.check_at("10.0.0.1", now).await.is_ok());

        let err = limiter.check_at("10.0.0.1", now).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
        assert!(err.is_rate_limited());
        assert_eq!(err.details.unwrap()["retry_after_secs"], 86400);

        // other clients are unaffected
        assert!(limiter.check_at("10.0.0.2", now).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();

        assert!(limiter.check_at("c", start).await.is_ok());
        assert!(limiter.check_at("c", start + Duration::from_secs(30)).await.is_err());
        assert!(limiter.check_at("c", start + Duration::from_secs(61)).await.is_ok());
    }
}
