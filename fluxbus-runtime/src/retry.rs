//! Count-based retry with exponential backoff.

use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Retry template: a maximum attempt count with exponential backoff
/// between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTemplate {
    max_attempts: u32,
    back_off_initial: Duration,
    back_off_multiplier: f64,
    back_off_max: Duration,
}

impl RetryTemplate {
    /// Create a template delivering at most `max_attempts` times.
    pub fn new(
        max_attempts: u32,
        back_off_initial: Duration,
        back_off_multiplier: f64,
        back_off_max: Duration,
    ) -> Self {
        Self { max_attempts, back_off_initial, back_off_multiplier, back_off_max }
    }

    /// Maximum number of delivery attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff applied after the given 1-based attempt.
    pub fn back_off_for(&self, attempt: u32) -> Duration {
        let factor = self.back_off_multiplier.powi(attempt.saturating_sub(1) as i32);
        let backed_off = self.back_off_initial.mul_f64(factor.max(0.0));
        backed_off.min(self.back_off_max)
    }

    /// Run the operation, retrying on failure with backoff sleeps, until it
    /// succeeds or the attempt budget is exhausted.
    ///
    /// # Errors
    /// Returns the last attempt's error when all attempts fail.
    pub fn execute<T, F>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts => return Err(error),
                Err(error) => {
                    let back_off = self.back_off_for(attempt);
                    debug!(attempt, back_off_ms = back_off.as_millis() as u64, error = %error,
                        "delivery attempt failed; backing off");
                    thread::sleep(back_off);
                    attempt += 1;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn template(max_attempts: u32) -> RetryTemplate {
        RetryTemplate::new(max_attempts, Duration::from_millis(1), 2.0, Duration::from_millis(4))
    }

    #[test]
    fn test_back_off_growth_is_capped() {
        let template = template(5);
        assert_eq!(template.back_off_for(1), Duration::from_millis(1));
        assert_eq!(template.back_off_for(2), Duration::from_millis(2));
        assert_eq!(template.back_off_for(3), Duration::from_millis(4));
        assert_eq!(template.back_off_for(4), Duration::from_millis(4));
    }

    #[test]
    fn test_execute_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = template(3).execute(|| {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Internal { message: "transient".to_string() })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_execute_surfaces_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = template(2).execute(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal { message: "persistent".to_string() })
        });
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
