//! Cluster controller: the elected coordinator of a Tessera cluster.
//!
//! The controller observes the worker population, assigns workers to
//! database roles, detects worker and master failures, publishes the
//! authoritative cluster-topology view, and drives recovery when the master
//! dies or a materially better placement becomes available.
//!
//! All mutable controller state is owned by the dispatcher task; watchers,
//! long-polls, and the master watchdog run as child tasks that talk to the
//! dispatcher over an internal event channel. Cancelling the dispatcher
//! cancels every child.

mod broadcast;
mod config_watcher;
mod dispatcher;
mod failure_detector;
mod fitness;
mod registry;
mod recruitment;
mod status;
mod watchdog;
mod worker_list;

pub use broadcast::AsyncVar;
pub use dispatcher::{run_cluster_controller, ControllerContext};
pub use fitness::{AcrossDatacenterFitness, InDatacenterFitness};
pub use status::{StatusFetcher, StatusInputs};

use crate::config::ControllerTunables;
use crate::error::Result;
use crate::monitor::FailureMonitor;
use crate::rpc::{
    ClientDBInfo, ClientWorkerHandle, DatabaseConfiguration, RecruitFromConfigurationRequest,
    RecruitStorageRequest, ReplyPromise, RoleEndpoint, ServerDBInfo, WorkerHandle,
};
use crate::types::{Address, Generation, ProcessClass, ProcessId};
use broadcast::IssueMaps;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;
use worker_list::WorkerListJournal;

/// Child task aborted when its owner drops.
#[derive(Debug)]
pub(crate) struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Registered worker. Exclusively owned by the controller's registry;
/// dropping the entry cancels its availability watcher.
#[derive(Debug)]
pub(crate) struct WorkerInfo {
    pub handle: WorkerHandle,
    pub generation: Generation,
    pub reboots: u32,
    pub initial_class: ProcessClass,
    pub process_class: ProcessClass,
    pub reply: Option<ReplyPromise<()>>,
    pub watcher: TaskHandle,
}

/// Idempotent preemption signal for the master watchdog.
#[derive(Debug, Clone)]
pub(crate) struct ForceMasterFailure {
    tx: Arc<watch::Sender<u64>>,
}

impl ForceMasterFailure {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) {
        self.tx.send_modify(|v| *v += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// The controller's mutable view of the database it coordinates.
pub(crate) struct DbState {
    pub server_info: AsyncVar<ServerDBInfo>,
    pub client_info: AsyncVar<ClientDBInfo>,
    pub issues: Arc<Mutex<IssueMaps>>,
    pub incompatible_connections: Arc<Mutex<HashMap<Address, Instant>>>,
    pub client_versions: Arc<Mutex<HashMap<Address, Vec<String>>>>,
    pub force_master_failure: ForceMasterFailure,
    /// Highest master registration epoch accepted so far; shared with the
    /// watchdog, which picks failure thresholds by whether it is non-zero.
    pub master_registration_count: Arc<AtomicI64>,
    pub config: DatabaseConfiguration,
}

impl DbState {
    pub fn new(controller_id: Uuid) -> Self {
        Self {
            server_info: AsyncVar::new(ServerDBInfo::initial(controller_id)),
            client_info: AsyncVar::new(ClientDBInfo::default()),
            issues: Arc::new(Mutex::new(IssueMaps::default())),
            incompatible_connections: Arc::new(Mutex::new(HashMap::new())),
            client_versions: Arc::new(Mutex::new(HashMap::new())),
            force_master_failure: ForceMasterFailure::new(),
            master_registration_count: Arc::new(AtomicI64::new(0)),
            config: DatabaseConfiguration::default(),
        }
    }
}

/// Messages from child tasks back into the dispatcher.
#[derive(Debug)]
pub(crate) enum InternalEvent {
    /// A registered worker's endpoint became reachable again.
    WorkerAvailable(ProcessId),
    /// A registered worker failed definitively and must be removed.
    WorkerFailed(ProcessId),
    /// The post-reboot stability grace for this worker elapsed.
    RebootGraceElapsed(ProcessId),
    /// The config watcher loaded a new process-class override map.
    ProcessClassesChanged(HashMap<ProcessId, ProcessClass>),
    /// The watchdog asks for the best master candidate.
    MasterCandidate {
        check_stable: bool,
        reply: oneshot::Sender<Result<(WorkerHandle, ProcessClass)>>,
    },
    /// The watchdog recruited a master; publish it.
    InstallMaster { master: RoleEndpoint },
    /// The throttled better-master timer fired.
    BetterMasterCheck,
    /// The status batcher asks for the aggregator's inputs.
    StatusInputs {
        reply: oneshot::Sender<StatusInputs>,
    },
}

/// Dispatcher-owned controller state.
pub(crate) struct ClusterController {
    pub id: Uuid,
    pub local_address: Address,
    pub tunables: ControllerTunables,
    pub simulation: bool,
    pub monitor: Arc<FailureMonitor>,
    /// Registered workers, ordered by process id so placement is
    /// reproducible under a seeded random source.
    pub workers: BTreeMap<ProcessId, WorkerInfo>,
    pub class_overrides: HashMap<ProcessId, ProcessClass>,
    pub got_process_classes: bool,
    pub master_process_id: Option<ProcessId>,
    pub outstanding_recruitment: Vec<RecruitFromConfigurationRequest>,
    pub outstanding_storage: Vec<(RecruitStorageRequest, Instant)>,
    pub db: DbState,
    pub worker_list: WorkerListJournal,
    pub events: mpsc::Sender<InternalEvent>,
    pub rng: StdRng,
    pub start_time: Instant,
    pub better_master_check_pending: bool,
}

impl ClusterController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        local_address: Address,
        tunables: ControllerTunables,
        simulation: bool,
        monitor: Arc<FailureMonitor>,
        worker_list: WorkerListJournal,
        events: mpsc::Sender<InternalEvent>,
        rng: StdRng,
    ) -> Self {
        Self {
            id,
            local_address,
            tunables,
            simulation,
            monitor,
            workers: BTreeMap::new(),
            class_overrides: HashMap::new(),
            got_process_classes: false,
            master_process_id: None,
            outstanding_recruitment: Vec::new(),
            outstanding_storage: Vec::new(),
            db: DbState::new(id),
            worker_list,
            events,
            rng,
            start_time: Instant::now(),
            better_master_check_pending: false,
        }
    }

    /// Whether a worker can be recruited right now. "Stable" additionally
    /// requires it not to be inside its post-reboot grace.
    pub fn worker_available(&self, worker: &WorkerInfo, check_stable: bool) -> bool {
        self.monitor.state(&worker.handle.address).is_available()
            && (!check_stable || worker.reboots < 2)
    }

    /// All registered workers with their effective classes.
    pub fn workers_snapshot(&self) -> Vec<(WorkerHandle, ProcessClass)> {
        self.workers
            .values()
            .map(|w| (w.handle.clone(), w.process_class))
            .collect()
    }

    /// Client interfaces of all non-tester workers.
    pub fn client_workers(&self) -> Vec<ClientWorkerHandle> {
        self.workers
            .values()
            .filter(|w| w.process_class.class_type != crate::types::ClassType::Tester)
            .map(|w| w.handle.client.clone())
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::monitor::FailureStatus;
    use crate::types::{ClassSource, ClassType, Locality};
    use rand::SeedableRng;

    /// Controller with a detached event channel, for exercising the
    /// synchronous placement and registry logic directly.
    pub fn make_controller(seed: u64) -> (ClusterController, mpsc::Receiver<InternalEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let controller = ClusterController::new(
            Uuid::new_v4(),
            "10.0.0.1:4500".to_string(),
            ControllerTunables::default(),
            true,
            Arc::new(FailureMonitor::new()),
            WorkerListJournal::new(),
            events_tx,
            StdRng::seed_from_u64(seed),
        );
        (controller, events_rx)
    }

    /// Insert an available worker directly into the registry.
    pub fn add_worker(
        controller: &mut ClusterController,
        pid: &str,
        zone: &str,
        dc: &str,
        class_type: ClassType,
        source: ClassSource,
    ) -> WorkerHandle {
        let locality = Locality::new(pid, zone, format!("hall-{}", zone), dc);
        let address = format!("10.1.{}.{}:4500", zone.len(), controller.workers.len() + 1);
        let (handle, _endpoints) = WorkerHandle::create(address.clone(), locality);
        // The endpoints are dropped: these workers never answer recruit
        // requests, which the placement tests do not need.
        controller.monitor.set_state(&address, FailureStatus::available());
        let class = ProcessClass::new(class_type, source);
        controller.workers.insert(
            ProcessId::from(pid),
            WorkerInfo {
                handle: handle.clone(),
                generation: 1,
                reboots: 0,
                initial_class: class,
                process_class: class,
                reply: None,
                watcher: TaskHandle::spawn(async {}),
            },
        );
        handle
    }
}
