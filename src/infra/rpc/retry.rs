//! Retry with classified exponential backoff.
//!
//! Delay for retry `k` (0-indexed):
//! - rate limit: `rate_limit_base * 2^k + jitter`, capped at 30s
//! - transient:  `transient_base * 1.5^k + jitter`, capped at 10s
//!
//! Jitter is drawn from `[0, base / 2]`. The gap between consecutive
//! un-jittered delays is never smaller than `base / 2`, so any jitter draw
//! keeps the schedule non-decreasing.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::{ErrorClass, RpcError};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const RATE_LIMIT_CAP: Duration = Duration::from_secs(30);
pub const TRANSIENT_CAP: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub rate_limit_base: Duration,
    pub transient_base: Duration,
    pub rate_limit_cap: Duration,
    pub transient_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            rate_limit_base: Duration::from_millis(1000),
            transient_base: Duration::from_millis(500),
            rate_limit_cap: RATE_LIMIT_CAP,
            transient_cap: TRANSIENT_CAP,
        }
    }
}

/// What happened during one `execute` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Backoff slept before each retry, in order
    pub delays: Vec<Duration>,
    /// Class of the last failure, `None` if the first attempt succeeded
    pub final_class: Option<ErrorClass>,
    /// Class of every failed attempt, in order
    pub failures: Vec<ErrorClass>,
    /// Gave up because retries ran out
    pub exhausted: bool,
}

impl RetryReport {
    #[must_use]
    pub fn retried(&self) -> bool {
        self.attempts > 1
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// Whether any attempt failed with `class`
    #[must_use]
    pub fn saw(&self, class: ErrorClass) -> bool {
        self.failures.contains(&class)
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RpcError>,
    pub report: RetryReport,
}

impl<T> RetryOutcome<T> {
    pub fn into_result(self) -> Result<T, RpcError> {
        self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryEventKind {
    Retrying { class: ErrorClass, delay: Duration },
    Succeeded,
    GaveUp { class: ErrorClass, exhausted: bool },
}

/// Published on the policy's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryEvent {
    pub label: String,
    /// 0-indexed attempt the event refers to
    pub attempt: u32,
    pub kind: RetryEventKind,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    events: broadcast::Sender<RetryEvent>,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { config, events }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Receive events for every subsequent attempt
    pub fn subscribe(&self) -> broadcast::Receiver<RetryEvent> {
        self.events.subscribe()
    }

    /// Un-jittered delay before retry `attempt`
    pub fn backoff_delay(&self, class: ErrorClass, attempt: u32) -> Duration {
        self.backoff_delay_with_jitter(class, attempt, 0.0)
    }

    /// Delay with `jitter_fraction` (clamped to `[0, 1]`) of the maximum jitter
    pub fn backoff_delay_with_jitter(&self, class: ErrorClass, attempt: u32, jitter_fraction: f64) -> Duration {
        let (base, factor, cap) = match class {
            ErrorClass::RateLimit => (self.config.rate_limit_base, 2.0_f64, self.config.rate_limit_cap),
            ErrorClass::Transient | ErrorClass::Fatal => {
                (self.config.transient_base, 1.5_f64, self.config.transient_cap)
            }
        };
        let base_ms = base.as_secs_f64() * 1000.0;
        let exponent = i32::try_from(attempt.min(64)).unwrap_or(64);
        let jitter_ms = base_ms / 2.0 * jitter_fraction.clamp(0.0, 1.0);
        let delay_ms = (base_ms * factor.powi(exponent) + jitter_ms).min(cap.as_secs_f64() * 1000.0);
        Duration::from_secs_f64(delay_ms / 1000.0)
    }

    fn jittered_delay(&self, class: ErrorClass, attempt: u32) -> Duration {
        let fraction = rand::thread_rng().gen_range(0.0..=1.0);
        self.backoff_delay_with_jitter(class, attempt, fraction)
    }

    /// Run `operation` until it succeeds, fails fatally, or retries run out.
    ///
    /// The closure receives the 0-indexed attempt number. Backoff sleeps happen
    /// between attempts, outside whatever the closure holds.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut operation: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut report = RetryReport::default();
        let mut attempt = 0u32;
        loop {
            report.attempts += 1;
            let err = match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(label, attempts = report.attempts, "Succeeded after retry");
                    }
                    self.publish(label, attempt, RetryEventKind::Succeeded);
                    return RetryOutcome {
                        result: Ok(value),
                        report,
                    };
                }
                Err(err) => err,
            };

            let class = err.class();
            report.final_class = Some(class);
            report.failures.push(class);

            if !class.is_retryable() {
                debug!(label, attempt, error = %err, "Not retrying fatal error");
                self.publish(label, attempt, RetryEventKind::GaveUp { class, exhausted: false });
                return RetryOutcome {
                    result: Err(err),
                    report,
                };
            }

            if attempt >= self.config.max_retries {
                warn!(label, attempts = report.attempts, error = %err, "Retries exhausted");
                report.exhausted = true;
                self.publish(label, attempt, RetryEventKind::GaveUp { class, exhausted: true });
                return RetryOutcome {
                    result: Err(RpcError::Exhausted {
                        attempts: report.attempts,
                        last: Box::new(err),
                    }),
                    report,
                };
            }

            let delay = self.jittered_delay(class, attempt);
            warn!(
                label,
                attempt,
                class = %class,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            report.delays.push(delay);
            self.publish(label, attempt, RetryEventKind::Retrying { class, delay });
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn publish(&self, label: &str, attempt: u32, kind: RetryEventKind) {
        // no subscribers is fine
        let _ = self.events.send(RetryEvent {
            label: label.to_string(),
            attempt,
            kind,
        });
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> RpcError {
        RpcError::RateLimited {
            endpoint: "e".to_string(),
            message: "429".to_string(),
        }
    }

    fn transient() -> RpcError {
        RpcError::TransientNetwork {
            endpoint: "e".to_string(),
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        let rate: Vec<u128> = (0..6)
            .map(|k| policy.backoff_delay(ErrorClass::RateLimit, k).as_millis())
            .collect();
        assert_eq!(rate, vec![1000, 2000, 4000, 8000, 16000, 30000]);

        let transient: Vec<u128> = (0..7)
            .map(|k| policy.backoff_delay(ErrorClass::Transient, k).as_millis())
            .collect();
        assert_eq!(transient, vec![500, 750, 1125, 1687, 2531, 3796, 5695]);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        for k in 0..100 {
            assert!(policy.backoff_delay_with_jitter(ErrorClass::RateLimit, k, 1.0) <= RATE_LIMIT_CAP);
            assert!(policy.backoff_delay_with_jitter(ErrorClass::Transient, k, 1.0) <= TRANSIENT_CAP);
        }
        assert_eq!(policy.backoff_delay(ErrorClass::RateLimit, u32::MAX), RATE_LIMIT_CAP);
    }

    #[test]
    fn test_backoff_non_decreasing_under_worst_case_jitter() {
        let policy = RetryPolicy::default();
        for class in [ErrorClass::RateLimit, ErrorClass::Transient] {
            for k in 0..20 {
                // max jitter now, none on the next attempt
                let now = policy.backoff_delay_with_jitter(class, k, 1.0);
                let next = policy.backoff_delay_with_jitter(class, k + 1, 0.0);
                assert!(next >= now, "{class} attempt {k}: {next:?} < {now:?}");
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_rate_limits() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let outcome = policy
            .execute("test", |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(rate_limited())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(outcome.result, Ok(42));
        assert_eq!(outcome.report.attempts, 3);
        assert_eq!(outcome.report.delays.len(), 2);
        assert!(outcome.report.delays[0] >= Duration::from_millis(1000));
        assert!(outcome.report.delays[1] > outcome.report.delays[0]);
        assert_eq!(outcome.report.final_class, Some(ErrorClass::RateLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_is_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = policy
            .execute("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RpcError::fatal("invalid params")) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.report.delays.is_empty());
        assert!(!outcome.report.exhausted);
        assert!(matches!(outcome.result, Err(RpcError::Fatal { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        });
        let outcome: RetryOutcome<()> = policy.execute("test", |_| async { Err(transient()) }).await;
        assert_eq!(outcome.report.attempts, 3);
        assert!(outcome.report.exhausted);
        match outcome.result {
            Err(RpcError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(*last, transient());
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_records_every_failed_attempt() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = policy
            .execute("test", |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match call {
                        0 => Err(transient()),
                        1 => Err(rate_limited()),
                        _ => Err(RpcError::fatal("already processed")),
                    }
                }
            })
            .await;

        assert_eq!(
            outcome.report.failures,
            vec![ErrorClass::Transient, ErrorClass::RateLimit, ErrorClass::Fatal]
        );
        assert!(outcome.report.saw(ErrorClass::Transient));
        assert_eq!(outcome.report.final_class, Some(ErrorClass::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_published() {
        let policy = RetryPolicy::default();
        let mut events = policy.subscribe();
        let calls = AtomicU32::new(0);
        let _ = policy
            .execute("getSlot", |_| {
                let failing = calls.fetch_add(1, Ordering::SeqCst) == 0;
                async move { if failing { Err(transient()) } else { Ok(()) } }
            })
            .await;

        let first = events.recv().await.unwrap();
        assert_eq!(first.label, "getSlot");
        assert_eq!(first.attempt, 0);
        assert!(matches!(
            first.kind,
            RetryEventKind::Retrying {
                class: ErrorClass::Transient,
                ..
            }
        ));
        let second = events.recv().await.unwrap();
        assert_eq!(second.attempt, 1);
        assert_eq!(second.kind, RetryEventKind::Succeeded);
    }
}
