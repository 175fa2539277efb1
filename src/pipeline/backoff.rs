use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            max_retries: 5,
        }
    }
}

#[derive(Debug)]
pub struct ExponentialBackoff {
    settings: BackoffSettings,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            current_attempt: 0,
        }
    }

    /// Delay for the current attempt: doubling from the initial delay, capped,
    /// with up to 25% random jitter added
    pub fn next_delay(&self) -> Duration {
        let base = self
            .settings
            .initial_delay_ms
            .saturating_mul(2_u64.saturating_pow(self.current_attempt))
            .min(self.settings.max_delay_ms);
        let jitter = if base >= 4 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base.saturating_add(jitter).min(self.settings.max_delay_ms))
    }

    /// Consume one retry and return how long to wait before it
    pub fn next_retry(&mut self) -> Result<Duration, MaxRetriesExceeded> {
        if self.current_attempt >= self.settings.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.settings.max_retries,
            delay.as_millis()
        );

        self.current_attempt += 1;
        Ok(delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_retry()?;
        sleep(delay).await;
        Ok(())
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
