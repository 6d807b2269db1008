use std::time::Duration;
use tokio::time::sleep;

/// Doubling delay between retries of a retryable indexer failure
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("Maximum retry attempts exceeded")]
pub struct MaxRetriesExceeded;

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    pub fn next_delay(&self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }
        let factor = 2_u32.saturating_pow(self.current_attempt);
        Some(std::cmp::min(
            self.initial_delay.saturating_mul(factor),
            self.max_delay,
        ))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_delay().ok_or(MaxRetriesExceeded)?;

        log::warn!(
            "⏳ Retry attempt {} of {} in {:?}",
            self.current_attempt + 1,
            self.max_retries,
            delay
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }
}
