//! Token-bucket rate limiter with capacity 1

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::BenchError;

/// Paces a single caller to at most `rate` permits per second
///
/// The bucket never holds more than one token, so permits are spaced at least
/// `1 / rate` apart and there is no burst after an idle period. A rate of zero
/// or less never blocks.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    next_permit: Option<Instant>,
}

impl RateLimiter {
    pub fn new(rate_per_second: i64) -> Self {
        let interval = (rate_per_second > 0)
            .then(|| Duration::from_secs_f64(1.0 / rate_per_second as f64));
        Self {
            interval,
            next_permit: None,
        }
    }

    /// Limiter that never blocks
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.interval.is_none()
    }

    /// Wait for the next permit
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Cancelled`] if `cancel` fires before a permit is
    /// available. The permit is not consumed in that case.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<(), BenchError> {
        let Some(interval) = self.interval else {
            return Ok(());
        };

        let now = Instant::now();
        let permit_at = match self.next_permit {
            Some(at) if at > now => at,
            _ => now,
        };

        if permit_at > now {
            tokio::select! {
                _ = tokio::time::sleep_until(permit_at) => {}
                _ = cancel.cancelled() => return Err(BenchError::Cancelled),
            }
        }

        self.next_permit = Some(permit_at + interval);
        Ok(())
    }
}
