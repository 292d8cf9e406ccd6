//! Failure detection server: versioned, delta-compressed liveness.
//!
//! Clients check in periodically; each check-in refreshes their entry in a
//! versioned status map. Replies carry only the changes since the client's
//! last known version (or the full map for newcomers and stragglers). A
//! periodic pass evicts clients that have gone quiet, with a threshold
//! adapted to the second-slowest client so a cluster-wide stall does not
//! declare every peer failed.

use crate::config::ControllerTunables;
use crate::error::TesseraError;
use crate::monitor::{FailureMonitor, FailureStatus};
use crate::rpc::{FailureMonitoringReply, FailureMonitoringRequest, SystemFailureStatus};
use crate::types::Address;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Per-client bookkeeping: status plus the last two check-in times.
#[derive(Debug, Clone, Copy, Default)]
struct FailureStatusInfo {
    status: FailureStatus,
    last_request_time: f64,
    penultimate_request_time: f64,
}

impl FailureStatusInfo {
    fn insert_request(&mut self, now: f64) {
        self.penultimate_request_time = self.last_request_time;
        self.last_request_time = now;
    }

    /// Observed check-in latency: the larger of time-since-last and the
    /// last inter-arrival gap.
    fn latency(&self, now: f64) -> f64 {
        (now - self.last_request_time).max(self.last_request_time - self.penultimate_request_time)
    }
}

/// The failure detection server state machine.
pub(crate) struct FailureDetectionServer {
    local_address: Address,
    client_request_interval: Duration,
    failure_min_delay: Duration,
    failure_max_delay: Duration,
    failure_timeout_delay: Duration,
    monitor: Arc<FailureMonitor>,
    version: u64,
    current: BTreeMap<Address, FailureStatusInfo>,
    history: VecDeque<SystemFailureStatus>,
    epoch: Instant,
    last_poll: f64,
}

impl FailureDetectionServer {
    pub fn new(
        local_address: Address,
        tunables: &ControllerTunables,
        monitor: Arc<FailureMonitor>,
    ) -> Self {
        Self {
            local_address,
            client_request_interval: tunables.client_request_interval,
            failure_min_delay: tunables.failure_min_delay,
            failure_max_delay: tunables.failure_max_delay,
            failure_timeout_delay: tunables.failure_timeout_delay,
            monitor,
            version: 0,
            current: BTreeMap::new(),
            history: VecDeque::new(),
            epoch: Instant::now(),
            last_poll: 0.0,
        }
    }

    fn now_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.current.len() {
            self.history.pop_front();
        }
    }

    fn record_change(&mut self, address: &str, status: FailureStatus) {
        self.history.push_back(SystemFailureStatus {
            address: address.to_string(),
            status,
        });
        self.version += 1;
        self.trim_history();
        self.monitor.set_state(address, status);
    }

    /// Handle one check-in: refresh the sender's entry, then reply with the
    /// delta since the requested version.
    pub fn handle_request(&mut self, req: FailureMonitoringRequest, now: f64) {
        if let Some(sender_status) = req.sender_status {
            let entry = self
                .current
                .entry(req.sender_address.clone())
                .or_default();
            entry.insert_request(now);
            let changed = sender_status != entry.status;
            if changed {
                debug!(
                    client = %req.sender_address,
                    failed = sender_status.failed,
                    why = "request",
                    "Failure detection status change"
                );
                if sender_status.failed {
                    // A client cannot report itself failed; by construction
                    // this cannot happen.
                    debug_assert!(false, "client reported itself failed");
                    self.current.remove(&req.sender_address);
                } else {
                    entry.status = sender_status;
                }
                self.record_change(&req.sender_address, sender_status);
            }
        }

        debug_assert!(self.version >= self.history.len() as u64);

        if req.version > self.version {
            debug_assert!(false, "client requested a future failure-information version");
            req.reply.send_error(TesseraError::FutureVersion {
                requested: req.version,
                current: self.version,
            });
            return;
        }

        let history_len = self.history.len() as u64;
        let mut reply = FailureMonitoringReply {
            version: self.version,
            client_request_interval_ms: self.client_request_interval.as_millis() as u64,
            consider_server_failed_timeout_ms: self.failure_timeout_delay.as_millis() as u64,
            all_others_failed: false,
            changes: Vec::new(),
        };

        if req.version == 0 || req.version < self.version - history_len {
            // The client is new or fell behind the retained history.
            reply.all_others_failed = true;
            reply.changes = self
                .current
                .iter()
                .map(|(address, info)| SystemFailureStatus {
                    address: address.clone(),
                    status: info.status,
                })
                .collect();
        } else {
            let start = (req.version - (self.version - history_len)) as usize;
            reply.changes = self.history.iter().skip(start).cloned().collect();
        }

        req.reply.send(reply);
    }

    /// Periodic eviction pass with the adaptive threshold.
    pub fn periodic(&mut self, now: f64) {
        if self.last_poll != 0.0 && now - self.last_poll > 1.0 {
            warn!(
                duration = now - self.last_poll,
                "Long delay between failure detection polls"
            );
        }
        self.last_poll = now;

        let interval = self.client_request_interval.as_secs_f64();
        let mut delays: Vec<f64> = self
            .current
            .values()
            .filter(|info| info.penultimate_request_time > 0.0)
            .map(|info| info.latency(now))
            .collect();

        // The second-slowest client sets the pace: a single straggler does
        // not raise the bar, a common stall raises it for everyone.
        let pivot = delays.len().saturating_sub(2);
        let mut pivot_delay = 0.0;
        if !delays.is_empty() {
            delays.select_nth_unstable_by(pivot, |a, b| {
                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            });
            pivot_delay = delays[pivot];
        }
        pivot_delay = (pivot_delay - interval).max(0.0);

        debug!(
            pivot_delay = pivot_delay,
            clients = self.current.len(),
            "Failure detection poll"
        );

        let threshold =
            pivot_delay * 2.0 + interval + self.failure_min_delay.as_secs_f64();
        let max_delay = self.failure_max_delay.as_secs_f64();

        let evicted: Vec<Address> = self
            .current
            .iter()
            .filter(|(address, info)| {
                let delay = now - info.last_request_time;
                **address != self.local_address && (delay > threshold || delay > max_delay)
            })
            .map(|(address, _)| address.clone())
            .collect();

        for address in evicted {
            warn!(
                client = %address,
                why = "timeout",
                pivot_delay = pivot_delay,
                "Failure detection declared client failed"
            );
            self.current.remove(&address);
            self.record_change(&address, FailureStatus::failed());
        }
    }

    /// Serve check-ins and run the periodic pass until the request stream
    /// closes.
    pub async fn run(mut self, mut requests: mpsc::Receiver<FailureMonitoringRequest>) {
        let mut ticker = tokio::time::interval(self.client_request_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(req) => {
                        let now = self.now_secs();
                        self.handle_request(req, now);
                    }
                    None => return,
                },
                _ = ticker.tick() => {
                    let now = self.now_secs();
                    self.periodic(now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ReplyPromise;
    use std::collections::HashMap;

    fn server() -> FailureDetectionServer {
        FailureDetectionServer::new(
            "10.0.0.1:4500".to_string(),
            &ControllerTunables::default(),
            Arc::new(FailureMonitor::new()),
        )
    }

    fn ping(
        server: &mut FailureDetectionServer,
        address: &str,
        version: u64,
        now: f64,
    ) -> FailureMonitoringReply {
        let (reply, mut rx) = ReplyPromise::pair();
        server.handle_request(
            FailureMonitoringRequest {
                version,
                sender_status: Some(FailureStatus::available()),
                sender_address: address.to_string(),
                reply,
            },
            now,
        );
        rx.try_recv().unwrap().unwrap()
    }

    fn addr(i: usize) -> String {
        format!("10.3.0.{}:4500", i)
    }

    #[tokio::test]
    async fn test_first_contact_gets_full_state() {
        let mut s = server();
        ping(&mut s, &addr(0), 0, 0.0);
        ping(&mut s, &addr(1), 0, 0.1);

        let reply = ping(&mut s, &addr(2), 0, 0.2);
        assert!(reply.all_others_failed);
        assert_eq!(reply.changes.len(), 3);
        assert_eq!(reply.version, 3);
    }

    #[tokio::test]
    async fn test_delta_reply_for_current_client() {
        let mut s = server();
        let reply = ping(&mut s, &addr(0), 0, 0.0);
        let known = reply.version;

        ping(&mut s, &addr(1), 0, 0.1);
        let reply = ping(&mut s, &addr(0), known, 0.2);
        assert!(!reply.all_others_failed);
        assert_eq!(reply.changes.len(), 1);
        assert_eq!(reply.changes[0].address, addr(1));
    }

    #[tokio::test]
    async fn test_history_bounded_by_population() {
        let mut s = server();
        for round in 0..5 {
            for i in 0..4 {
                ping(&mut s, &addr(i), 0, round as f64 + 0.1 * i as f64);
            }
            assert!(s.history.len() <= s.current.len());
        }
        assert!(s.version >= s.history.len() as u64);
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "future failure-information version")]
    async fn test_future_version_asserts() {
        let mut s = server();
        ping(&mut s, &addr(0), 0, 0.0);

        let (reply, _rx) = ReplyPromise::pair();
        s.handle_request(
            FailureMonitoringRequest {
                version: 99,
                sender_status: None,
                sender_address: addr(0),
                reply,
            },
            1.0,
        );
    }

    /// Apply a reply to a client-side snapshot the way a monitor client
    /// would, and check it against the server's live map.
    #[tokio::test]
    async fn test_delta_correctness() {
        let mut s = server();
        let mut client: HashMap<Address, FailureStatus> = HashMap::new();
        let mut known = 0u64;

        let mut apply = |client: &mut HashMap<Address, FailureStatus>,
                         reply: &FailureMonitoringReply| {
            if reply.all_others_failed {
                client.clear();
            }
            for change in &reply.changes {
                client.insert(change.address.clone(), change.status);
            }
        };

        // Clients 0..3 ping every round; client 4 stalls after round 2 and
        // is evicted by the round-4 pass.
        for round in 0..6 {
            for i in 0..5 {
                let now = round as f64 + 0.01 * i as f64;
                if i == 0 {
                    let reply = ping(&mut s, &addr(0), known, now);
                    apply(&mut client, &reply);
                    known = reply.version;
                } else if i < 4 || round < 3 {
                    ping(&mut s, &addr(i), 0, now);
                }
            }
            if round == 4 {
                s.periodic(4.5);
            }
        }
        let reply = ping(&mut s, &addr(0), known, 7.0);
        apply(&mut client, &reply);

        assert!(!s.current.contains_key(&addr(4)));
        for (address, info) in &s.current {
            assert_eq!(client.get(address), Some(&info.status), "{}", address);
        }
        for (address, status) in &client {
            if !s.current.contains_key(address) {
                assert!(status.failed, "{} should only linger as failed", address);
            }
        }
    }

    #[tokio::test]
    async fn test_single_stalled_client_evicted() {
        let mut s = server();
        // Ten clients ping every second; client 9 stalls after t=3.
        for round in 0..8 {
            let t = round as f64;
            for i in 0..10 {
                if i < 9 || round <= 3 {
                    ping(&mut s, &addr(i), 0, t + 0.01 * i as f64);
                }
            }
            s.periodic(t + 0.5);
        }

        // Stalled for ~4s against a ~2s adaptive threshold.
        assert_eq!(s.current.len(), 9);
        assert!(!s.current.contains_key(&addr(9)));
        assert!(!s.monitor.state(&addr(9)).is_available());
        for i in 0..9 {
            assert!(s.monitor.state(&addr(i)).is_available());
        }
    }

    #[tokio::test]
    async fn test_cluster_wide_stall_absorbed() {
        let mut s = server();
        // Everyone pings until t=3, then the whole cluster stalls.
        for round in 0..4 {
            for i in 0..10 {
                ping(&mut s, &addr(i), 0, round as f64 + 0.01 * i as f64);
            }
        }

        // 8.5 seconds of common stall: pivot absorbs it, nobody fails.
        s.periodic(11.5);
        assert_eq!(s.current.len(), 10);

        // Past the hard ceiling every client is gone.
        s.periodic(13.5);
        assert_eq!(s.current.len(), 0);
    }

    #[tokio::test]
    async fn test_self_never_evicted() {
        let mut s = server();
        let local = s.local_address.clone();
        ping(&mut s, &local, 0, 0.0);
        ping(&mut s, &local, 0, 1.0);
        ping(&mut s, &addr(1), 0, 1.0);

        s.periodic(50.0);
        assert!(s.current.contains_key(&local));
        assert!(!s.current.contains_key(&addr(1)));
    }
}
