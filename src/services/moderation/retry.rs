// Retry Policy
// Bounded retries with exponential backoff for rate-limited classifier calls.
// Only `ClassifierError::RateLimited` is retried; everything else aborts at once.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::services::classifier::ClassifierError;

use super::ModerationError;

/// Largest accepted backoff unit.
pub const MAX_BACKOFF_UNIT: Duration = Duration::from_secs(60);

/// Upper bound on `base^attempt`.
const MAX_BACKOFF_FACTOR: f64 = 3600.0;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: f64,
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: 2.0,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: f64, backoff_unit: Duration) -> Result<Self, ModerationError> {
        if max_attempts == 0 {
            return Err(ModerationError::Configuration(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if !backoff_base.is_finite() || backoff_base < 1.0 {
            return Err(ModerationError::Configuration(format!(
                "backoff_base must be a finite number >= 1 (got {})",
                backoff_base
            )));
        }
        if backoff_unit > MAX_BACKOFF_UNIT {
            return Err(ModerationError::Configuration(format!(
                "backoff unit must be at most {} ms (got {} ms)",
                MAX_BACKOFF_UNIT.as_millis(),
                backoff_unit.as_millis()
            )));
        }
        Ok(Self {
            max_attempts,
            backoff_base,
            backoff_unit,
        })
    }

    /// Delay after the failed attempt `attempt` (counted from 0): `base^attempt` units.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.powi(attempt as i32);
        self.backoff_unit.mul_f64(factor.min(MAX_BACKOFF_FACTOR))
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// Backoff is an async sleep, so other in-flight operations keep running.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ModerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifierError>>,
    {
        let mut last_err: Option<ClassifierError> = None;

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("[RETRY] {} succeeded attempt={}", label, attempt + 1);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        let wait = self.backoff(attempt);
                        warn!(
                            "[RETRY] {} rate limited attempt={} wait_ms={}",
                            label,
                            attempt + 1,
                            wait.as_millis()
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => return Err(ModerationError::Classifier(e)),
            }
        }

        Err(ModerationError::RetryExhausted {
            attempts: self.max_attempts,
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}
