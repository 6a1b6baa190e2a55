//! Global admission control for outbound RPC calls.
//!
//! Two limits hold at once: at most `max_concurrent` admitted calls are
//! outstanding, and consecutive admissions are at least `min_interval` apart
//! (measured between admissions, not releases).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};
use tracing::trace;

use crate::domain::RpcError;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

pub struct ThrottleGate {
    config: ThrottleConfig,
    permits: Arc<Semaphore>,
    /// Slot handed to the most recent admission
    last_slot: Mutex<Option<Instant>>,
    in_flight: Arc<AtomicUsize>,
    admitted: AtomicU64,
}

impl ThrottleGate {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        let max_concurrent = config.max_concurrent.max(1);
        Self {
            config: ThrottleConfig {
                max_concurrent,
                ..config
            },
            permits: Arc::new(Semaphore::new(max_concurrent)),
            last_slot: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
            admitted: AtomicU64::new(0),
        }
    }

    /// Wait for capacity, then for the next spacing slot.
    ///
    /// The returned token holds the capacity until it is dropped.
    pub async fn admit(&self) -> Result<AdmissionToken, RpcError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RpcError::fatal("throttle gate closed"))?;

        let slot = self.reserve_slot();
        sleep_until(slot).await;

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.admitted.fetch_add(1, Ordering::Relaxed);
        trace!(in_flight, "Admitted RPC call");

        Ok(AdmissionToken {
            _permit: permit,
            in_flight: Arc::clone(&self.in_flight),
            admitted_at: slot,
        })
    }

    fn reserve_slot(&self) -> Instant {
        let mut last = self.last_slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let slot = match *last {
            Some(previous) => now.max(previous + self.config.min_interval),
            None => now,
        };
        *last = Some(slot);
        slot
    }

    /// Admitted calls not yet released
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Admissions since creation
    pub fn total_admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    pub fn min_interval(&self) -> Duration {
        self.config.min_interval
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}

/// Capacity held by one admitted call; released on drop
#[must_use = "dropping the token releases the admission immediately"]
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    admitted_at: Instant,
}

impl AdmissionToken {
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(max_concurrent: usize, min_interval_ms: u64) -> Arc<ThrottleGate> {
        Arc::new(ThrottleGate::new(ThrottleConfig {
            max_concurrent,
            min_interval: Duration::from_millis(min_interval_ms),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_admission_is_immediate() {
        let gate = gate(2, 100);
        let start = Instant::now();
        let token = gate.admit().await.unwrap();
        assert_eq!(token.admitted_at(), start);
        assert_eq!(gate.in_flight(), 1);
        token.release();
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.available_permits(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_are_spaced() {
        let gate = gate(10, 100);
        let mut slots = Vec::new();
        for _ in 0..5 {
            let token = gate.admit().await.unwrap();
            slots.push(token.admitted_at());
        }
        for pair in slots.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert_eq!(gate.total_admitted(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_counts_from_admission_not_release() {
        let gate = gate(10, 100);
        let first = gate.admit().await.unwrap();
        let first_at = first.admitted_at();
        // hold the first call open well past the interval
        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = gate.admit().await.unwrap();
        // no extra wait: 250ms already passed since the first admission
        assert_eq!(second.admitted_at() - first_at, Duration::from_millis(250));
        drop(first);
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let gate = gate(3, 0);
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let gate = Arc::clone(&gate);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let token = gate.admit().await.unwrap();
                peak.fetch_max(gate.in_flight(), Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.release();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.available_permits(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_leak_capacity() {
        let gate = gate(1, 0);
        let held = gate.admit().await.unwrap();
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.admit().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;
        drop(held);
        assert_eq!(gate.available_permits(), 1);
        assert!(gate.admit().await.is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let gate = ThrottleGate::new(ThrottleConfig {
            max_concurrent: 0,
            min_interval: Duration::ZERO,
        });
        assert_eq!(gate.max_concurrent(), 1);
    }
}
