//! # Retry with Exponential Backoff
//!
//! Drives the optimistic-retry discipline of the sync cycle: a cycle that
//! lost a race against another writer is restarted from a fresh ledger
//! read after a backoff delay.
//!
//! ## Design
//!
//! - Exponential backoff: `delay = initial_delay_ms * multiplier^(attempt-1)`
//! - Clamped to `max_delay_ms`
//! - Deterministic jitter: `+ (attempt * 7919 + 104729) % (base/4 + 1)`
//! - The caller classifies errors; non-retryable errors stop immediately
//!
//! ## Invariants
//!
//! 1. `attempts <= max_attempts` (at least one attempt is always made)
//! 2. `delay <= max_delay_ms`
//! 3. Deterministic in all modes (no SystemTime, no rand)

use std::future::Future;
use std::time::Duration;

use tracing::warn;

// ════════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt (milliseconds).
    pub initial_delay_ms: u64,
    /// Upper bound for computed delay (milliseconds).
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no sleeping.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

/// Outcome of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryResult<T, E> {
    Success { value: T, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { last_error: E, attempts: u32 },
    /// An attempt failed with an error the classifier refused to retry.
    Aborted { error: E, attempts: u32 },
}

// ════════════════════════════════════════════════════════════════════════════════
// DELAY COMPUTATION
// ════════════════════════════════════════════════════════════════════════════════

/// Delay in milliseconds after the given (1-indexed) failed attempt.
///
/// `min(initial_delay_ms * multiplier^(attempt-1), max_delay_ms)`, plus the
/// deterministic jitter when enabled, re-clamped to `max_delay_ms`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let multiplier_power = config.backoff_multiplier.powi(exponent.min(i32::MAX as u32) as i32);
    let base_f64 = (config.initial_delay_ms as f64) * multiplier_power;

    // NaN, Inf and negatives all land inside [0, max]
    let max = config.max_delay_ms as f64;
    let clamped = if base_f64.is_nan() || base_f64 < 0.0 {
        0.0
    } else if base_f64 > max {
        max
    } else {
        base_f64
    };

    let mut delay = (clamped as u64).min(config.max_delay_ms);

    if config.jitter && delay > 0 {
        let quarter = delay / 4;
        if quarter > 0 {
            let jitter_val =
                (u64::from(attempt).wrapping_mul(7919).wrapping_add(104729)) % (quarter + 1);
            delay = delay.saturating_add(jitter_val).min(config.max_delay_ms);
        }
    }

    delay
}

// ════════════════════════════════════════════════════════════════════════════════
// MAIN RETRY FUNCTION
// ════════════════════════════════════════════════════════════════════════════════

/// Runs `operation` until it succeeds, `is_retryable` rejects an error, or
/// `max_attempts` is reached, sleeping [`compute_delay`] between attempts.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    is_retryable: R,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempts: u32 = 0;

    loop {
        attempts = attempts.saturating_add(1);

        let error = match operation().await {
            Ok(value) => return RetryResult::Success { value, attempts },
            Err(e) => e,
        };

        if !is_retryable(&error) {
            return RetryResult::Aborted { error, attempts };
        }
        if attempts >= max_attempts {
            return RetryResult::Exhausted { last_error: error, attempts };
        }

        let delay_ms = compute_delay(config, attempts);
        warn!(
            "attempt {}/{} failed, retrying in {}ms: {}",
            attempts, max_attempts, delay_ms, error
        );
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn delay_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn transient(e: &String) -> bool {
        e.contains("stale")
    }

    // ── 1. success_without_retry ─────────────────────────────────────────

    #[tokio::test]
    async fn success_without_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = retry_with_backoff(&fast_config(3), transient, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i32, String>(42) }
        })
        .await;

        assert_eq!(result, RetryResult::Success { value: 42, attempts: 1 });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // ── 2. retry_until_success ───────────────────────────────────────────

    #[tokio::test]
    async fn retry_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = retry_with_backoff(&fast_config(5), transient, || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("stale commitment".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, RetryResult::Success { value: 3, attempts: 3 });
    }

    // ── 3. retry_exhausted ───────────────────────────────────────────────

    #[tokio::test]
    async fn retry_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = retry_with_backoff(&fast_config(3), transient, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), String>("stale commitment".to_string()) }
        })
        .await;

        match result {
            RetryResult::Exhausted { last_error, attempts } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("stale"));
            }
            other => panic!("should have exhausted, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    // ── 4. no_retry_on_non_retryable ─────────────────────────────────────

    #[tokio::test]
    async fn no_retry_on_non_retryable() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = retry_with_backoff(&fast_config(5), transient, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), String>("height mismatch".to_string()) }
        })
        .await;

        assert_eq!(
            result,
            RetryResult::Aborted { error: "height mismatch".to_string(), attempts: 1 }
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // ── 5. zero_attempts_still_runs_once ─────────────────────────────────

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let result = retry_with_backoff(&fast_config(0), transient, || async {
            Err::<(), String>("stale".to_string())
        })
        .await;
        assert!(matches!(result, RetryResult::Exhausted { attempts: 1, .. }));
    }

    // ── 6. delay_calculation ─────────────────────────────────────────────

    #[test]
    fn delay_calculation_correct() {
        let config = delay_config();
        assert_eq!(compute_delay(&config, 1), 1000);
        assert_eq!(compute_delay(&config, 2), 2000);
        assert_eq!(compute_delay(&config, 3), 4000);
        assert_eq!(compute_delay(&config, 5), 16000);
    }

    #[test]
    fn delay_clamped_to_max() {
        let config = RetryConfig { max_delay_ms: 5000, ..delay_config() };
        assert_eq!(compute_delay(&config, 3), 4000);
        assert_eq!(compute_delay(&config, 4), 5000);
        assert_eq!(compute_delay(&config, 60), 5000);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let config = RetryConfig { jitter: true, ..delay_config() };
        for attempt in 1..=8 {
            let a = compute_delay(&config, attempt);
            assert_eq!(a, compute_delay(&config, attempt));
            assert!(a <= config.max_delay_ms);
            assert!(a >= compute_delay(&delay_config(), attempt));
        }
    }

    #[test]
    fn hostile_multiplier_is_clamped() {
        let config = RetryConfig {
            backoff_multiplier: f64::NAN,
            ..delay_config()
        };
        assert_eq!(compute_delay(&config, 3), 0);
        let config = RetryConfig {
            backoff_multiplier: f64::INFINITY,
            ..delay_config()
        };
        assert_eq!(compute_delay(&config, 3), 30_000);
    }
}
