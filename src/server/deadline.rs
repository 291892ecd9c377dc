//! Authentication deadline
//!
//! One timer per handshake, armed at accept. The timer lives in its own task
//! so it fires even while the connection is parked in a read that never
//! completes.

use std::future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// A cancellable "fire at `deadline`" timer
#[derive(Debug)]
pub struct AuthDeadline {
    expired: CancellationToken,
    timer: JoinHandle<()>,
}

impl AuthDeadline {
    /// Start the timer; it expires `timeout` from now
    pub fn arm(timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let expired = CancellationToken::new();

        let signal = expired.clone();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            signal.cancel();
        });

        Self { expired, timer }
    }

    /// Resolves once the deadline passes
    pub async fn expired(&self) {
        self.expired.cancelled().await
    }

    /// Stop the timer. A disarmed deadline never expires.
    pub fn disarm(self) {
        self.timer.abort();
    }
}

impl Drop for AuthDeadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Wait on an optional deadline; without one this never resolves
pub async fn expiry(deadline: Option<&AuthDeadline>) {
    match deadline {
        Some(d) => d.expired().await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_deadline_not_before() {
        let deadline = AuthDeadline::arm(Duration::from_millis(500));

        advance(Duration::from_millis(499)).await;
        tokio::task::yield_now().await;
        assert!(!deadline.expired.is_cancelled());

        advance(Duration::from_millis(1)).await;
        deadline.expired().await;
        assert!(deadline.expired.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_never_fires() {
        let deadline = AuthDeadline::arm(Duration::from_millis(100));
        let token = deadline.expired.clone();
        deadline.disarm();

        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_never_fires() {
        let token = {
            let deadline = AuthDeadline::arm(Duration::from_millis(100));
            deadline.expired.clone()
        };

        advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_deadline_never_resolves() {
        let result = timeout(Duration::from_secs(3600), expiry(None)).await;
        assert!(result.is_err());
    }
}
