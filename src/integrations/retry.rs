//! Retry with exponential backoff for tracker API calls
//!
//! Wraps a single remote call with bounded retry. The error decides whether
//! another attempt is worthwhile (see [`RetryableError`]); terminal errors
//! short-circuit immediately and exhausted attempts surface the last error
//! unchanged.

use crate::config::RetrySettings;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Upper bound for any single delay, `Retry-After` included
    pub max_backoff: Duration,

    /// Backoff multiplier (2.0 for doubling)
    pub multiplier: f64,

    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(4000),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_delay_ms),
            max_backoff: Duration::from_millis(settings.max_delay_ms.max(settings.initial_delay_ms)),
            multiplier: 2.0,
            jitter: settings.jitter,
        }
    }
}

impl RetryConfig {
    /// Create a config for quick retries (short backoff), used in tests
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Backoff to sleep after the given failed attempt (0-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let final_duration = if self.jitter {
            let jitter_factor = 1.0 + (rand_jitter() * 0.25);
            (capped * jitter_factor).min(self.max_backoff.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(final_duration)
    }

    /// Delay for a tracker-requested `Retry-After`, bounded like any other backoff
    pub fn retry_after_duration(&self, requested: Duration) -> Duration {
        requested.min(self.max_backoff)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependency
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Retry after a specific duration (e.g., from Retry-After header)
    RetryAfter(Duration),
    /// Don't retry, the error is permanent
    NoRetry,
}

/// Trait for errors that can indicate whether to retry
pub trait RetryableError {
    /// Determine if this error should be retried
    fn retry_decision(&self) -> RetryDecision;
}

/// A failed attempt that is about to be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub operation: String,
    /// 1-based number of the attempt that just failed
    pub attempt: u32,
    pub retries_left: u32,
    pub backoff: Duration,
    pub error: String,
}

/// Telemetry hook invoked before every backoff sleep
pub type RetryObserver = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Executes remote calls with the configured retry policy
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    observer: Option<RetryObserver>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Attach a telemetry observer
    pub fn with_observer(mut self, observer: RetryObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails terminally, or attempts run out
    pub async fn execute<F, Fut, T, E>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + fmt::Display,
    {
        with_retry(
            &self.config,
            operation_name,
            self.observer.as_ref(),
            operation,
        )
        .await
    }
}

/// Execute an async operation with retry logic
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `observer` - Optional callback told about every retry
/// * `operation` - The async operation to execute
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    observer: Option<&RetryObserver>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let decision = e.retry_decision();
                attempt += 1;

                if decision == RetryDecision::NoRetry {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation failed with non-retryable error: {}",
                        e
                    );
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Operation failed after {} attempts: {}",
                        attempt,
                        e
                    );
                    return Err(e);
                }

                let backoff = match decision {
                    RetryDecision::RetryAfter(d) => config.retry_after_duration(d),
                    _ => config.backoff_duration(attempt - 1),
                };
                let retries_left = max_attempts - attempt;

                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retries_left = retries_left,
                    backoff_ms = backoff.as_millis() as u64,
                    "Attempt {} failed. {} retries left: {}",
                    attempt,
                    retries_left,
                    e
                );

                if let Some(observer) = observer {
                    observer(&RetryAttempt {
                        operation: operation_name.to_string(),
                        attempt,
                        retries_left,
                        backoff,
                        error: e.to_string(),
                    });
                }

                sleep(backoff).await;
            }
        }
    }
}
