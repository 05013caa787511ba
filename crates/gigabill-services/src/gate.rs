//! Admission gate for the rate-limited upstream
//!
//! The upstream provider tolerates very little concurrency, so every
//! fulfilment call must first take a slot here. The default configuration
//! allows a single call at a time; waiters queue in arrival order and give
//! up after the configured timeout. A slot is freed when its permit drops,
//! including when the holding task fails or is cancelled.

use gigabill_core::{config::GateConfig, AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Bounded-concurrency gate in front of the upstream provider
pub struct AdmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

/// Permit held while a fulfilment call runs. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// Create a gate from configuration. Capacity is at least one slot.
    pub fn new(config: &GateConfig) -> Self {
        let capacity = config.upstream_slots.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout: config.acquire_timeout(),
        }
    }

    /// Acquire a slot, waiting up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AdmissionTimeout` when no slot frees up in time.
    /// Callers are expected to fail the whole operation in that case; the
    /// upstream must not be called without a permit.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> AppResult<AdmissionPermit> {
        debug!(
            "Waiting for upstream slot ({}/{} free)",
            self.available(),
            self.capacity
        );

        match timeout(self.acquire_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                debug!("Upstream slot acquired");
                Ok(AdmissionPermit { _permit: permit })
            }
            Ok(Err(_)) => Err(AppError::Internal("Admission gate closed".to_string())),
            Err(_) => {
                warn!(
                    "No upstream slot freed within {}s",
                    self.acquire_timeout.as_secs()
                );
                Err(AppError::AdmissionTimeout)
            }
        }
    }

    /// Number of slots currently free
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Total slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gate(slots: usize, timeout_secs: u64) -> AdmissionGate {
        AdmissionGate::new(&GateConfig {
            upstream_slots: slots,
            acquire_timeout_secs: timeout_secs,
        })
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let gate = gate(1, 5);
        assert_eq!(gate.available(), 1);

        let permit = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        drop(permit);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_zero_slot_config_still_admits() {
        let gate = gate(0, 5);
        assert_eq!(gate.capacity(), 1);
        let _permit = gate.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_slot_held() {
        let gate = gate(1, 0);
        let _held = gate.acquire().await.unwrap();

        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::AdmissionTimeout));

        // The held slot is unaffected by the failed waiter.
        assert_eq!(gate.available(), 0);
    }

    #[tokio::test]
    async fn test_single_slot_never_overlaps() {
        let gate = Arc::new(gate(1, 30));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);

            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_leak_slot() {
        let gate = Arc::new(gate(1, 30));
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.acquire().await.unwrap();
            })
        };

        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(gate.available(), 1);
        let _permit = gate.acquire().await.unwrap();
    }
}
