//! RPC surface of the cluster controller.
//!
//! Requests arrive as typed messages over channels; each carries a
//! [`ReplyPromise`] that is resolved exactly once or dropped. A drop is the
//! "never" outcome, used when a worker registration is superseded or the
//! controller loses its role.

use crate::error::{Result, TesseraError};
use crate::monitor::FailureStatus;
use crate::policy::ReplicationPolicy;
use crate::types::{
    Address, DcId, Generation, Locality, MasterLifetime, ProcessClass, ProcessId,
    RecoveryState, ZoneId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// One-shot reply channel resolved exactly once.
///
/// Dropping the promise without sending is the "never" outcome: the caller's
/// future simply never produces a value (it observes a closed channel and is
/// expected to treat that as silence, not as an error to act on).
#[derive(Debug)]
pub struct ReplyPromise<T> {
    tx: Option<oneshot::Sender<Result<T>>>,
}

impl<T> ReplyPromise<T> {
    pub fn pair() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn send(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(value));
        }
    }

    pub fn send_error(mut self, error: TesseraError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(error));
        }
    }

    /// Resolve the caller's future never: drop without sending.
    pub fn send_never(self) {}
}

/// Network identity of a recruited role instance (master, transaction log,
/// proxy, or resolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEndpoint {
    pub id: Uuid,
    pub address: Address,
    pub locality: Locality,
}

/// Client-facing half of a worker's interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientWorkerHandle {
    pub id: Uuid,
    pub address: Address,
}

/// Interface handle of a registered worker process.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Interface instance id; changes when the process restarts.
    pub id: Uuid,
    pub address: Address,
    pub locality: Locality,
    pub recruit_master: mpsc::Sender<RecruitMasterRequest>,
    pub coordination_ping: mpsc::Sender<CoordinationPing>,
    pub client: ClientWorkerHandle,
}

/// Receiving ends of a worker interface, held by the worker process.
#[derive(Debug)]
pub struct WorkerEndpoints {
    pub recruit_master: mpsc::Receiver<RecruitMasterRequest>,
    pub coordination_ping: mpsc::Receiver<CoordinationPing>,
}

impl WorkerHandle {
    /// Build a fresh worker interface for `address`/`locality`; the returned
    /// endpoints stay with the worker process.
    pub fn create(address: impl Into<Address>, locality: Locality) -> (Self, WorkerEndpoints) {
        let address = address.into();
        let (recruit_tx, recruit_rx) = mpsc::channel(4);
        let (ping_tx, ping_rx) = mpsc::channel(16);
        let id = Uuid::new_v4();
        (
            Self {
                id,
                address: address.clone(),
                locality,
                recruit_master: recruit_tx,
                coordination_ping: ping_tx,
                client: ClientWorkerHandle { id, address },
            },
            WorkerEndpoints {
                recruit_master: recruit_rx,
                coordination_ping: ping_rx,
            },
        )
    }

    pub fn process_id(&self) -> Option<&ProcessId> {
        self.locality.process_id.as_ref()
    }
}

/// Outbound request asking a worker to become master.
#[derive(Debug)]
pub struct RecruitMasterRequest {
    pub lifetime: MasterLifetime,
    pub reply: ReplyPromise<RoleEndpoint>,
}

/// Periodic broadcast letting workers confirm which controller they follow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinationPing {
    pub controller_id: Uuid,
    pub time_step: u64,
}

/// Transaction-log layout of the running database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSystemConfig {
    pub tlogs: Vec<RoleEndpoint>,
}

/// Client-visible view of the database, republished on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientDBInfo {
    pub id: Uuid,
    pub proxies: Vec<RoleEndpoint>,
    pub client_txn_info_sample_rate: f64,
    pub client_txn_info_size_limit: i64,
}

impl Default for ClientDBInfo {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            proxies: Vec::new(),
            client_txn_info_sample_rate: 0.0,
            client_txn_info_size_limit: 0,
        }
    }
}

/// Server-visible view of the database, republished on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDBInfo {
    pub id: Uuid,
    pub cluster_controller_id: Uuid,
    pub master: Option<RoleEndpoint>,
    pub master_lifetime: MasterLifetime,
    pub recovery_state: RecoveryState,
    pub recovery_count: u64,
    pub log_system: LogSystemConfig,
    pub resolvers: Vec<RoleEndpoint>,
    pub prior_committed_log_servers: Vec<Address>,
    pub client: ClientDBInfo,
}

impl ServerDBInfo {
    /// Initial view published when a controller takes over.
    pub fn initial(controller_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster_controller_id: controller_id,
            master: None,
            master_lifetime: MasterLifetime {
                controller_id,
                lifetime: 0,
            },
            recovery_state: RecoveryState::Uninitialized,
            recovery_count: 0,
            log_system: LogSystemConfig::default(),
            resolvers: Vec::new(),
            prior_committed_log_servers: Vec::new(),
            client: ClientDBInfo::default(),
        }
    }
}

/// Shape of the database the master asks the controller to recruit for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfiguration {
    pub tlog_replication_factor: usize,
    pub desired_logs: usize,
    pub desired_proxies: usize,
    pub desired_resolvers: usize,
    pub tlog_policy: ReplicationPolicy,
    pub excluded_addresses: HashSet<Address>,
}

impl DatabaseConfiguration {
    pub fn desired_log_count(&self) -> usize {
        self.desired_logs.max(self.tlog_replication_factor)
    }

    pub fn desired_proxy_count(&self) -> usize {
        self.desired_proxies.max(1)
    }

    pub fn desired_resolver_count(&self) -> usize {
        self.desired_resolvers.max(1)
    }

    pub fn is_excluded(&self, address: &str) -> bool {
        self.excluded_addresses.contains(address)
    }
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            tlog_replication_factor: 1,
            desired_logs: 1,
            desired_proxies: 1,
            desired_resolvers: 1,
            tlog_policy: ReplicationPolicy::One,
            excluded_addresses: HashSet::new(),
        }
    }
}

/// Worker announcing itself (or re-announcing after restart).
#[derive(Debug)]
pub struct RegisterWorkerRequest {
    pub handle: WorkerHandle,
    pub process_class: ProcessClass,
    pub generation: Generation,
    pub reply: ReplyPromise<()>,
}

/// Master asking for a full role placement.
#[derive(Debug)]
pub struct RecruitFromConfigurationRequest {
    pub configuration: DatabaseConfiguration,
    pub reply: ReplyPromise<RecruitFromConfigurationReply>,
}

#[derive(Debug, Clone)]
pub struct RecruitFromConfigurationReply {
    pub tlogs: Vec<WorkerHandle>,
    pub proxies: Vec<WorkerHandle>,
    pub resolvers: Vec<WorkerHandle>,
}

/// Request for one storage-capable worker.
#[derive(Debug)]
pub struct RecruitStorageRequest {
    pub exclude_machines: Vec<ZoneId>,
    pub exclude_dcs: Vec<DcId>,
    pub exclude_addresses: Vec<Address>,
    pub critical_recruitment: bool,
    pub reply: ReplyPromise<RecruitStorageReply>,
}

#[derive(Debug, Clone)]
pub struct RecruitStorageReply {
    pub worker: WorkerHandle,
    pub process_class: ProcessClass,
}

/// Master reporting its recovery progress and recruited roles.
#[derive(Debug)]
pub struct RegisterMasterRequest {
    pub id: Uuid,
    pub db_name: String,
    pub master: RoleEndpoint,
    pub log_system: LogSystemConfig,
    pub resolvers: Vec<RoleEndpoint>,
    pub proxies: Vec<RoleEndpoint>,
    pub recovery_state: RecoveryState,
    pub recovery_count: u64,
    pub registration_count: i64,
    pub configuration: DatabaseConfiguration,
    pub prior_committed_log_servers: Vec<Address>,
    pub reply: ReplyPromise<()>,
}

#[derive(Debug)]
pub struct GetWorkersRequest {
    pub flags: u32,
    pub reply: ReplyPromise<Vec<(WorkerHandle, ProcessClass)>>,
}

impl GetWorkersRequest {
    pub const FLAG_TESTER_CLASS: u32 = 1;
}

#[derive(Debug)]
pub struct GetClientWorkersRequest {
    pub reply: ReplyPromise<Vec<ClientWorkerHandle>>,
}

/// Client long-polling the client DB view.
#[derive(Debug)]
pub struct OpenDatabaseRequest {
    pub db_name: String,
    pub known_client_info_id: Uuid,
    pub issues: String,
    pub supported_versions: Vec<String>,
    pub client_address: Address,
    pub reply: ReplyPromise<ClientDBInfo>,
}

/// Server long-polling the server DB view.
#[derive(Debug)]
pub struct GetServerDbInfoRequest {
    pub known_server_info_id: Uuid,
    pub issues: String,
    pub incompatible_peers: Vec<Address>,
    pub worker_address: Address,
    pub reply: ReplyPromise<ServerDBInfo>,
}

/// One status change in the failure-monitoring stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFailureStatus {
    pub address: Address,
    pub status: FailureStatus,
}

/// Failure-monitoring client checking in (and optionally reporting what it
/// believes about its own peers' view of it).
#[derive(Debug)]
pub struct FailureMonitoringRequest {
    pub version: u64,
    pub sender_status: Option<FailureStatus>,
    pub sender_address: Address,
    pub reply: ReplyPromise<FailureMonitoringReply>,
}

#[derive(Debug, Clone)]
pub struct FailureMonitoringReply {
    pub version: u64,
    pub client_request_interval_ms: u64,
    pub consider_server_failed_timeout_ms: u64,
    pub all_others_failed: bool,
    pub changes: Vec<SystemFailureStatus>,
}

#[derive(Debug)]
pub struct StatusRequest {
    pub reply: ReplyPromise<StatusReply>,
}

/// Aggregated cluster status document, produced by the external aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: serde_json::Value,
}

/// The full inbound RPC surface of the controller.
#[derive(Debug)]
pub enum ControllerRequest {
    OpenDatabase(OpenDatabaseRequest),
    RecruitFromConfiguration(RecruitFromConfigurationRequest),
    RecruitStorage(RecruitStorageRequest),
    RegisterWorker(RegisterWorkerRequest),
    GetWorkers(GetWorkersRequest),
    GetClientWorkers(GetClientWorkersRequest),
    RegisterMaster(RegisterMasterRequest),
    GetServerDbInfo(GetServerDbInfoRequest),
    FailureMonitoring(FailureMonitoringRequest),
    Status(StatusRequest),
    Ping(ReplyPromise<()>),
}
