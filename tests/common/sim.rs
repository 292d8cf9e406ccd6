// Simulated cluster for controller integration tests
//
// Spins up a real controller task against an in-memory store and failure
// monitor, plus lightweight worker tasks that answer master recruitment and
// drain coordination pings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tessera::config::ControllerConfig;
use tessera::controller::{
    run_cluster_controller, ControllerContext, StatusFetcher, StatusInputs,
};
use tessera::kv::MemoryConfigStore;
use tessera::monitor::{FailureMonitor, FailureStatus};
use tessera::rpc::{
    ControllerRequest, GetServerDbInfoRequest, OpenDatabaseRequest, RegisterWorkerRequest,
    ReplyPromise, RoleEndpoint, ServerDBInfo, StatusReply, WorkerHandle,
};
use tessera::types::{ClassSource, ClassType, Locality, ProcessClass};
use tessera::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

static NEXT_WORKER: AtomicUsize = AtomicUsize::new(1);

pub struct EchoStatus;

#[async_trait::async_trait]
impl StatusFetcher for EchoStatus {
    async fn cluster_status(&self, inputs: StatusInputs) -> Result<StatusReply> {
        Ok(StatusReply {
            status: serde_json::json!({
                "workers": inputs.workers.len(),
                "incompatible": inputs.incompatible_peers.len(),
            }),
        })
    }
}

/// One controller plus its injected collaborators.
pub struct SimCluster {
    pub requests: mpsc::Sender<ControllerRequest>,
    pub monitor: Arc<FailureMonitor>,
    pub store: Arc<MemoryConfigStore>,
    pub controller: JoinHandle<Result<()>>,
    leader_fail: Option<oneshot::Sender<()>>,
}

impl SimCluster {
    pub fn start(config: ControllerConfig) -> Self {
        let (requests_tx, requests_rx) = mpsc::channel(256);
        let (leader_tx, leader_rx) = oneshot::channel();
        let monitor = Arc::new(FailureMonitor::new());
        let store = Arc::new(MemoryConfigStore::new());

        let ctx = ControllerContext {
            id: Uuid::new_v4(),
            local_address: "10.0.0.1:4500".to_string(),
            config,
            monitor: Arc::clone(&monitor),
            store: store.clone(),
            status: Arc::new(EchoStatus),
            seed: Some(42),
        };
        let controller = tokio::spawn(run_cluster_controller(
            ctx,
            requests_tx.clone(),
            requests_rx,
            leader_rx,
        ));

        Self {
            requests: requests_tx,
            monitor,
            store,
            controller,
            leader_fail: Some(leader_tx),
        }
    }

    pub fn lose_leadership(&mut self) {
        if let Some(tx) = self.leader_fail.take() {
            let _ = tx.send(());
        }
    }

    /// Register a simulated worker and leave a task running to answer its
    /// recruitment endpoints.
    pub async fn spawn_worker(
        &self,
        pid: &str,
        zone: &str,
        dc: &str,
        class_type: ClassType,
        source: ClassSource,
    ) -> SimWorker {
        let n = NEXT_WORKER.fetch_add(1, Ordering::SeqCst);
        let address = format!("10.7.0.{}:4500", n);
        let locality = Locality::new(pid, zone, format!("hall-{}", zone), dc);
        let (handle, mut endpoints) = WorkerHandle::create(address.clone(), locality.clone());

        let master_endpoint = RoleEndpoint {
            id: Uuid::new_v4(),
            address: address.clone(),
            locality,
        };

        let worker_task = {
            let master_endpoint = master_endpoint.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        recruit = endpoints.recruit_master.recv() => {
                            let Some(recruit) = recruit else { return; };
                            recruit.reply.send(master_endpoint.clone());
                        }
                        ping = endpoints.coordination_ping.recv() => {
                            if ping.is_none() {
                                return;
                            }
                        }
                    }
                }
            })
        };

        self.monitor.set_state(&address, FailureStatus::available());

        let (reply, rejoin) = ReplyPromise::pair();
        self.requests
            .send(ControllerRequest::RegisterWorker(RegisterWorkerRequest {
                handle: handle.clone(),
                process_class: ProcessClass::new(class_type, source),
                generation: 1,
                reply,
            }))
            .await
            .expect("controller accepts registrations");

        SimWorker {
            handle,
            master_endpoint,
            rejoin,
            _task: worker_task,
        }
    }

    /// One-shot server-info fetch; replies immediately when `known` is
    /// stale, long-polls otherwise.
    pub async fn server_info(&self, known: Uuid) -> ServerDBInfo {
        let (reply, rx) = ReplyPromise::pair();
        self.requests
            .send(ControllerRequest::GetServerDbInfo(GetServerDbInfoRequest {
                known_server_info_id: known,
                issues: String::new(),
                incompatible_peers: vec![],
                worker_address: "10.0.0.99:4500".to_string(),
                reply,
            }))
            .await
            .expect("controller accepts info requests");
        rx.await.expect("reply").expect("server info")
    }

    /// Poll the server view until `pred` holds.
    pub async fn wait_for_server_info(
        &self,
        mut pred: impl FnMut(&ServerDBInfo) -> bool,
    ) -> ServerDBInfo {
        let mut known = Uuid::nil();
        loop {
            let info = self.server_info(known).await;
            if pred(&info) {
                return info;
            }
            known = info.id;
        }
    }

    pub fn open_database_request(
        &self,
        known: Uuid,
        client_address: &str,
    ) -> (
        OpenDatabaseRequest,
        oneshot::Receiver<Result<tessera::rpc::ClientDBInfo>>,
    ) {
        let (reply, rx) = ReplyPromise::pair();
        (
            OpenDatabaseRequest {
                db_name: "DB".to_string(),
                known_client_info_id: known,
                issues: String::new(),
                supported_versions: vec![],
                client_address: client_address.to_string(),
                reply,
            },
            rx,
        )
    }
}

/// A simulated worker process.
pub struct SimWorker {
    pub handle: WorkerHandle,
    /// The master interface this worker responds to recruitment with.
    pub master_endpoint: RoleEndpoint,
    /// Resolves when the controller tells this registration to rejoin.
    pub rejoin: oneshot::Receiver<Result<()>>,
    _task: JoinHandle<()>,
}
