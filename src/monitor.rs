//! Process-local failure monitor.
//!
//! The monitor is the controller's availability view of every peer address:
//! a map from address to reachable/failed, fed by the failure detection
//! server and read by the worker registry and recruitment engine. It is
//! injected everywhere rather than being a process-wide static so that
//! simulation can run several logical clusters in one address space.

use crate::types::Address;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

/// Reachability of a single address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureStatus {
    pub failed: bool,
}

impl FailureStatus {
    pub fn available() -> Self {
        Self { failed: false }
    }

    pub fn failed() -> Self {
        Self { failed: true }
    }

    pub fn is_available(&self) -> bool {
        !self.failed
    }
}

#[derive(Debug, Clone, Copy)]
struct AddrState {
    status: FailureStatus,
    since: Instant,
}

/// Availability map with change signals and sustained-failure waits.
#[derive(Debug)]
pub struct FailureMonitor {
    states: RwLock<HashMap<Address, AddrState>>,
    epoch: watch::Sender<u64>,
}

impl FailureMonitor {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            states: RwLock::new(HashMap::new()),
            epoch,
        }
    }

    /// Current status of an address. Addresses the monitor has never heard
    /// about are considered available: a process that just reached us over
    /// the network is evidently alive.
    pub fn state(&self, address: &str) -> FailureStatus {
        self.states
            .read()
            .get(address)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// Record the status of an address. No-op when nothing changed.
    pub fn set_state(&self, address: &str, status: FailureStatus) {
        {
            let mut states = self.states.write();
            match states.get_mut(address) {
                Some(existing) if existing.status == status => return,
                Some(existing) => {
                    existing.status = status;
                    existing.since = Instant::now();
                }
                None => {
                    states.insert(
                        address.to_string(),
                        AddrState {
                            status,
                            since: Instant::now(),
                        },
                    );
                }
            }
        }
        self.epoch.send_modify(|v| *v += 1);
    }

    fn snapshot(&self, address: &str) -> AddrState {
        self.states
            .read()
            .get(address)
            .copied()
            .unwrap_or(AddrState {
                status: FailureStatus::default(),
                since: Instant::now(),
            })
    }

    /// Resolve once the status of `address` differs from its status at the
    /// time of the call.
    pub async fn on_state_change(&self, address: &str) {
        let baseline = self.state(address);
        let mut rx = self.epoch.subscribe();
        loop {
            rx.borrow_and_update();
            if self.state(address) != baseline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Resolve once `address` has been continuously failed for longer than
    /// `max(0, base + slope * watch_age)` seconds.
    ///
    /// A zero slope gives a plain sustained-failure wait; a negative slope
    /// shrinks the tolerance the longer the watch has been running, and a
    /// positive slope grows it.
    pub async fn wait_failure(&self, address: &str, base: Duration, slope: f64) {
        let start = Instant::now();
        let mut rx = self.epoch.subscribe();
        loop {
            rx.borrow_and_update();
            let state = self.snapshot(address);
            if state.status.failed {
                let age = start.elapsed().as_secs_f64();
                let threshold = (base.as_secs_f64() + slope * age).max(0.0);
                let failed_for = state.since.elapsed().as_secs_f64();
                if failed_for >= threshold {
                    return;
                }
                // Solve for the crossing of failed_for (growing at 1/s) with
                // the moving threshold, capped at the point the threshold
                // clamps to zero.
                let mut wait = if slope < 1.0 {
                    (threshold - failed_for) / (1.0 - slope)
                } else {
                    threshold - failed_for
                };
                if slope < 0.0 {
                    let until_clamp = (-base.as_secs_f64() / slope) - age;
                    if until_clamp >= 0.0 {
                        wait = wait.min(until_clamp);
                    }
                }
                let remaining = Duration::from_secs_f64(wait.max(0.001));
                tokio::select! {
                    _ = sleep(remaining) => {}
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            } else if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for FailureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_address_is_available() {
        let monitor = FailureMonitor::new();
        assert!(monitor.state("10.0.0.1:4500").is_available());
    }

    #[tokio::test]
    async fn test_set_state() {
        let monitor = FailureMonitor::new();
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());
        assert!(!monitor.state("10.0.0.1:4500").is_available());

        monitor.set_state("10.0.0.1:4500", FailureStatus::available());
        assert!(monitor.state("10.0.0.1:4500").is_available());
    }

    #[tokio::test]
    async fn test_on_state_change_wakes() {
        let monitor = Arc::new(FailureMonitor::new());
        let waiter = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move { monitor.on_state_change("10.0.0.1:4500").await })
        };
        tokio::task::yield_now().await;
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());
        waiter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_failure_sustained(){
        let monitor = Arc::new(FailureMonitor::new());
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());

        let started = Instant::now();
        monitor
            .wait_failure("10.0.0.1:4500", Duration::from_secs(2), 0.0)
            .await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_failure_reset_by_recovery() {
        let monitor = Arc::new(FailureMonitor::new());
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());

        let waiter = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                monitor
                    .wait_failure("10.0.0.1:4500", Duration::from_secs(5), 0.0)
                    .await;
                Instant::now()
            })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        monitor.set_state("10.0.0.1:4500", FailureStatus::available());
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());

        // The sustained-failure clock restarted at second 3.
        let done = waiter.await.unwrap();
        assert!(done.duration_since(monitor.snapshot("10.0.0.1:4500").since) >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_failure_negative_slope_shrinks_tolerance() {
        let monitor = Arc::new(FailureMonitor::new());

        let waiter = {
            let monitor = Arc::clone(&monitor);
            tokio::spawn(async move {
                // Tolerance starts at 10s and decays by 1s per watched second.
                monitor
                    .wait_failure("10.0.0.1:4500", Duration::from_secs(10), -1.0)
                    .await;
                Instant::now()
            })
        };

        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs(4)).await;
        monitor.set_state("10.0.0.1:4500", FailureStatus::failed());

        let done = waiter.await.unwrap();
        // At failure onset (t=4) tolerance was 6s; it meets failed_for at t≈7.
        let elapsed = done.duration_since(started);
        assert!(elapsed >= Duration::from_secs(6));
        assert!(elapsed <= Duration::from_secs(8));
    }
}
