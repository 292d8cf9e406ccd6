//! Worker registry: registration, class overrides, and availability
//! watchers.
//!
//! Each registered worker is owned by the registry arena. A long-lived
//! watcher task per worker announces it to the worker-list journal, reports
//! availability flips to the dispatcher, and removes the worker once its
//! endpoint has been unreachable for the configured failure time.

use super::worker_list::WorkerListJournal;
use super::{ClusterController, InternalEvent, TaskHandle, WorkerInfo};
use crate::monitor::{FailureMonitor, FailureStatus};
use crate::rpc::{RegisterWorkerRequest, WorkerHandle};
use crate::types::{ClassSource, ClassType, ProcessClass, ProcessData, ProcessId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

impl ClusterController {
    /// Handle a worker (re-)registration.
    pub(crate) fn register_worker(
        &mut self,
        req: RegisterWorkerRequest,
        aux: &mut JoinSet<()>,
    ) {
        let Some(pid) = req.handle.process_id().cloned() else {
            warn!(address = %req.handle.address, "Worker registered without a process id, ignoring");
            return;
        };

        info!(
            process = %pid,
            address = %req.handle.address,
            class = %req.process_class,
            generation = req.generation,
            known = self.workers.contains_key(&pid),
            "Worker registration"
        );

        if let Some(existing) = self.workers.get_mut(&pid) {
            let interface_changed = existing.handle.id != req.handle.id;
            if !interface_changed && req.generation <= existing.generation {
                debug!(process = %pid, "Stale worker registration ignored");
                return;
            }

            // Source priority: a command-line class always tracks the
            // report; an auto-assigned class yields to any explicit report.
            if existing.process_class.source == ClassSource::CommandLine
                || (existing.process_class.source == ClassSource::Auto
                    && req.process_class.class_type != ClassType::Unset)
            {
                existing.process_class = req.process_class;
            }
            existing.initial_class = req.process_class;
            if let Some(old_reply) = existing.reply.take() {
                old_reply.send_never();
            }
            existing.reply = Some(req.reply);
            existing.generation = req.generation;

            if interface_changed {
                self.monitor
                    .set_state(&req.handle.address, FailureStatus::available());
                existing.handle = req.handle.clone();
                existing.watcher = spawn_availability_watch(
                    req.handle,
                    req.process_class,
                    Arc::clone(&self.monitor),
                    self.tunables.worker_failure_time,
                    self.events.clone(),
                    self.worker_list.clone(),
                );
            }
            return;
        }

        let mut process_class = req.process_class;
        if let Some(override_class) = self.class_overrides.get(&pid) {
            if override_class.source == ClassSource::Database
                || req.process_class.class_type == ClassType::Unset
            {
                process_class = *override_class;
            }
        }

        // The registration itself is evidence the process is reachable.
        self.monitor
            .set_state(&req.handle.address, FailureStatus::available());

        let watcher = spawn_availability_watch(
            req.handle.clone(),
            req.process_class,
            Arc::clone(&self.monitor),
            self.tunables.worker_failure_time,
            self.events.clone(),
            self.worker_list.clone(),
        );
        self.workers.insert(
            pid,
            WorkerInfo {
                handle: req.handle,
                generation: req.generation,
                reboots: 0,
                initial_class: req.process_class,
                process_class,
                reply: Some(req.reply),
                watcher,
            },
        );

        self.check_outstanding_requests(aux);
    }

    /// A worker's endpoint became reachable: start its stability grace and
    /// retry anything that was waiting for capacity.
    pub(crate) fn handle_worker_available(&mut self, pid: ProcessId, aux: &mut JoinSet<()>) {
        let grace = self.tunables.reboot_grace(self.simulation);
        if let Some(worker) = self.workers.get_mut(&pid) {
            worker.reboots += 1;
            let events = self.events.clone();
            aux.spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = events.send(InternalEvent::RebootGraceElapsed(pid)).await;
            });
        }
        self.check_outstanding_requests(aux);
    }

    /// The stability grace elapsed; the worker may have been replaced or
    /// removed while we slept, so look it up again.
    pub(crate) fn handle_reboot_grace(&mut self, pid: ProcessId, aux: &mut JoinSet<()>) {
        if let Some(worker) = self.workers.get_mut(&pid) {
            worker.reboots = worker.reboots.saturating_sub(1);
            if worker.reboots < 2 {
                self.schedule_better_master_check(aux);
            }
        }
    }

    /// A worker failed definitively: drop its entry (cancelling the
    /// watcher), tell the worker to rejoin, and journal the departure.
    pub(crate) fn handle_worker_failed(&mut self, pid: ProcessId) {
        if let Some(mut worker) = self.workers.remove(&pid) {
            warn!(process = %pid, address = %worker.handle.address, "Worker failed, removing");
            if let Some(reply) = worker.reply.take() {
                reply.send(());
            }
            self.worker_list.set(pid, None);
        }
    }

    /// Apply a freshly loaded process-class override map (from the KV) to
    /// every known worker, honoring the source-priority rule.
    pub(crate) fn apply_process_classes(
        &mut self,
        overrides: std::collections::HashMap<ProcessId, ProcessClass>,
        aux: &mut JoinSet<()>,
    ) {
        self.class_overrides = overrides;
        for (pid, worker) in &mut self.workers {
            match self.class_overrides.get(pid) {
                Some(class)
                    if class.source == ClassSource::Database
                        || worker.initial_class.class_type == ClassType::Unset =>
                {
                    worker.process_class = *class;
                }
                _ => worker.process_class = worker.initial_class,
            }
        }
        self.got_process_classes = true;
        self.check_outstanding_requests(aux);
    }
}

fn spawn_availability_watch(
    handle: WorkerHandle,
    starting_class: ProcessClass,
    monitor: Arc<FailureMonitor>,
    worker_failure_time: Duration,
    events: mpsc::Sender<InternalEvent>,
    journal: WorkerListJournal,
) -> TaskHandle {
    TaskHandle::spawn(worker_availability_watch(
        handle,
        starting_class,
        monitor,
        worker_failure_time,
        events,
        journal,
    ))
}

async fn worker_availability_watch(
    handle: WorkerHandle,
    starting_class: ProcessClass,
    monitor: Arc<FailureMonitor>,
    worker_failure_time: Duration,
    events: mpsc::Sender<InternalEvent>,
    journal: WorkerListJournal,
) {
    let Some(pid) = handle.process_id().cloned() else {
        return;
    };
    journal.set(
        pid.clone(),
        Some(ProcessData {
            locality: handle.locality.clone(),
            process_class: starting_class,
            address: handle.address.clone(),
        }),
    );

    let failed = monitor.wait_failure(&handle.address, worker_failure_time, 0.0);
    tokio::pin!(failed);
    loop {
        tokio::select! {
            _ = monitor.on_state_change(&handle.address) => {
                if monitor.state(&handle.address).is_available()
                    && events
                        .send(InternalEvent::WorkerAvailable(pid.clone()))
                        .await
                        .is_err()
                {
                    return;
                }
            }
            _ = &mut failed => {
                let _ = events.send(InternalEvent::WorkerFailed(pid)).await;
                return;
            }
        }
    }
}
