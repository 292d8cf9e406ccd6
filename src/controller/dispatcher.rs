//! Top-level request dispatcher and controller entry point.
//!
//! One select loop owns the controller state and multiplexes the external
//! RPC surface, internal events from child tasks, the coordination-ping
//! timer, and child-task failures. Requests that cannot be satisfied now
//! are parked in outstanding queues and retried whenever the population
//! changes.

use super::failure_detector::FailureDetectionServer;
use super::status::{status_server, StatusFetcher};
use super::watchdog::{cluster_watch_database, WatchdogContext};
use super::worker_list::WorkerListJournal;
use super::{broadcast, ClusterController, InternalEvent};
use crate::config::ControllerConfig;
use crate::error::{Result, TesseraError};
use crate::kv::ConfigStore;
use crate::monitor::FailureMonitor;
use crate::rpc::{
    ClientDBInfo, ControllerRequest, CoordinationPing, DatabaseConfiguration,
    GetWorkersRequest, RecruitFromConfigurationRequest, RecruitStorageReply,
    RecruitStorageRequest, RegisterMasterRequest, RoleEndpoint, ServerDBInfo,
};
use crate::types::Address;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Dependencies injected into a controller instance. Nothing here is a
/// process-wide singleton: simulation builds several controllers side by
/// side.
pub struct ControllerContext {
    pub id: Uuid,
    pub local_address: Address,
    pub config: ControllerConfig,
    pub monitor: Arc<FailureMonitor>,
    pub store: Arc<dyn ConfigStore>,
    pub status: Arc<dyn StatusFetcher>,
    /// Seed for the placement random source; `None` draws from entropy.
    pub seed: Option<u64>,
}

fn jittered(base: Duration, rng: &mut StdRng) -> Duration {
    base.mul_f64(0.9 + 0.2 * rng.gen::<f64>())
}

/// Run the cluster controller until leadership is lost, the request stream
/// closes, or a fatal error ends the role.
///
/// `requests_tx` must be a sender for the same channel as `requests`; the
/// dispatcher uses it to re-enqueue recruitments that deserve a local
/// retry.
pub async fn run_cluster_controller(
    ctx: ControllerContext,
    requests_tx: mpsc::Sender<ControllerRequest>,
    mut requests: mpsc::Receiver<ControllerRequest>,
    mut leader_fail: oneshot::Receiver<()>,
) -> Result<()> {
    ctx.config.validate()?;
    let tunables = ctx.config.tunables.clone();

    let (events_tx, mut events_rx) = mpsc::channel::<InternalEvent>(256);
    let (detector_tx, detector_rx) = mpsc::channel(256);
    let (status_tx, status_rx) = mpsc::unbounded_channel();

    let journal = WorkerListJournal::new();
    let rng = match ctx.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut cc = ClusterController::new(
        ctx.id,
        ctx.local_address.clone(),
        tunables.clone(),
        ctx.config.simulation,
        Arc::clone(&ctx.monitor),
        journal.clone(),
        events_tx.clone(),
        rng,
    );

    info!(id = %ctx.id, address = %ctx.local_address, "Starting cluster controller");

    let mut children: JoinSet<Result<()>> = JoinSet::new();
    let detector = FailureDetectionServer::new(
        ctx.local_address.clone(),
        &tunables,
        Arc::clone(&ctx.monitor),
    );
    children.spawn(async move {
        detector.run(detector_rx).await;
        Ok(())
    });
    children.spawn(cluster_watch_database(WatchdogContext {
        tunables: tunables.clone(),
        monitor: Arc::clone(&ctx.monitor),
        events: events_tx.clone(),
        server_info: cc.db.server_info.clone(),
        force: cc.db.force_master_failure.clone(),
        registration_count: Arc::clone(&cc.db.master_registration_count),
        start_time: cc.start_time,
    }));
    children.spawn(journal.run(Arc::clone(&ctx.store)));
    {
        let events = events_tx.clone();
        let status = Arc::clone(&ctx.status);
        let min_interval = tunables.status_min_time_between_requests;
        children.spawn(async move {
            status_server(status_rx, events, status, min_interval).await;
            Ok(())
        });
    }
    children.spawn(super::config_watcher::monitor_process_classes(
        Arc::clone(&ctx.store),
        events_tx.clone(),
    ));
    children.spawn(super::config_watcher::monitor_client_txn_info(
        Arc::clone(&ctx.store),
        cc.db.client_info.clone(),
    ));

    // Short-lived helpers: long-polls, retry sleeps, grace timers. Dropping
    // the set on exit cancels them all.
    let mut aux: JoinSet<()> = JoinSet::new();

    let mut ping_timer = tokio::time::interval(tunables.worker_coordination_ping_delay);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping_timer.reset();
    let mut ping_step = 0u64;

    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some(req) = req else {
                    info!("Request stream closed, stopping cluster controller");
                    return Ok(());
                };
                handle_request(&mut cc, req, &mut aux, &requests_tx, &detector_tx, &status_tx)
                    .await?;
            }
            event = events_rx.recv() => {
                // The dispatcher holds a sender; the stream cannot end.
                if let Some(event) = event {
                    handle_event(&mut cc, event, &mut aux);
                }
            }
            _ = ping_timer.tick() => {
                let message = CoordinationPing { controller_id: cc.id, time_step: ping_step };
                ping_step += 1;
                for worker in cc.workers.values() {
                    let _ = worker.handle.coordination_ping.try_send(message);
                }
                debug!(time_step = message.time_step, workers = cc.workers.len(), "Coordination ping sent");
            }
            child = children.join_next(), if !children.is_empty() => {
                match child {
                    Some(Ok(Ok(()))) => debug!("Controller child task finished"),
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Controller child task failed");
                        return Err(e);
                    }
                    Some(Err(e)) if e.is_panic() => {
                        return Err(TesseraError::Internal(format!("child task panicked: {}", e)));
                    }
                    _ => {}
                }
            }
            helper = aux.join_next(), if !aux.is_empty() => {
                if let Some(Err(e)) = helper {
                    if e.is_panic() {
                        return Err(TesseraError::Internal(format!("helper task panicked: {}", e)));
                    }
                }
            }
            _ = &mut leader_fail => {
                info!("Leadership lost, stopping cluster controller");
                return Ok(());
            }
        }
    }
}

async fn handle_request(
    cc: &mut ClusterController,
    req: ControllerRequest,
    aux: &mut JoinSet<()>,
    requests_tx: &mpsc::Sender<ControllerRequest>,
    detector_tx: &mpsc::Sender<crate::rpc::FailureMonitoringRequest>,
    status_tx: &mpsc::UnboundedSender<crate::rpc::StatusRequest>,
) -> Result<()> {
    match req {
        ControllerRequest::OpenDatabase(req) => {
            let poll_timeout = jittered(cc.tunables.db_info_poll_timeout, &mut cc.rng);
            aux.spawn(broadcast::cluster_open_database(
                cc.db.client_info.clone(),
                Arc::clone(&cc.db.issues),
                Arc::clone(&cc.db.client_versions),
                req,
                poll_timeout,
            ));
        }
        ControllerRequest::GetServerDbInfo(req) => {
            let poll_timeout = jittered(cc.tunables.db_info_poll_timeout, &mut cc.rng);
            aux.spawn(broadcast::cluster_get_server_info(
                cc.db.server_info.clone(),
                Arc::clone(&cc.db.issues),
                Arc::clone(&cc.db.incompatible_connections),
                req,
                poll_timeout,
                cc.tunables.incompatible_peers_logging_interval,
            ));
        }
        ControllerRequest::RecruitFromConfiguration(req) => {
            recruit_from_configuration(cc, req, aux, requests_tx);
        }
        ControllerRequest::RecruitStorage(req) => {
            recruit_storage(cc, req);
        }
        ControllerRequest::RegisterWorker(req) => {
            cc.register_worker(req, aux);
        }
        ControllerRequest::GetWorkers(req) => {
            let workers = if req.flags & GetWorkersRequest::FLAG_TESTER_CLASS != 0 {
                cc.workers
                    .values()
                    .filter(|w| {
                        w.process_class.class_type == crate::types::ClassType::Tester
                    })
                    .map(|w| (w.handle.clone(), w.process_class))
                    .collect()
            } else {
                cc.workers_snapshot()
            };
            req.reply.send(workers);
        }
        ControllerRequest::GetClientWorkers(req) => {
            req.reply.send(cc.client_workers());
        }
        ControllerRequest::RegisterMaster(req) => {
            register_master(cc, req, aux);
        }
        ControllerRequest::FailureMonitoring(req) => {
            if detector_tx.send(req).await.is_err() {
                return Err(TesseraError::ChannelClosed("failure detection server"));
            }
        }
        ControllerRequest::Status(req) => {
            if status_tx.send(req).is_err() {
                return Err(TesseraError::ChannelClosed("status server"));
            }
        }
        ControllerRequest::Ping(reply) => reply.send(()),
    }
    Ok(())
}

fn handle_event(cc: &mut ClusterController, event: InternalEvent, aux: &mut JoinSet<()>) {
    match event {
        InternalEvent::WorkerAvailable(pid) => cc.handle_worker_available(pid, aux),
        InternalEvent::WorkerFailed(pid) => cc.handle_worker_failed(pid),
        InternalEvent::RebootGraceElapsed(pid) => cc.handle_reboot_grace(pid, aux),
        InternalEvent::ProcessClassesChanged(overrides) => {
            cc.apply_process_classes(overrides, aux)
        }
        InternalEvent::MasterCandidate {
            check_stable,
            reply,
        } => {
            let result = cc.get_master_worker(check_stable);
            if let Ok((worker, _)) = &result {
                cc.master_process_id = worker.process_id().cloned();
            }
            let _ = reply.send(result);
        }
        InternalEvent::InstallMaster { master } => install_master(cc, master),
        InternalEvent::BetterMasterCheck => {
            cc.better_master_check_pending = false;
            if cc.better_master_exists() {
                let master_id = cc.db.server_info.get().master.map(|m| m.id);
                info!(master = ?master_id, "Preempting master for a better placement");
                cc.db.force_master_failure.signal();
            }
        }
        InternalEvent::StatusInputs { reply } => {
            let _ = reply.send(cc.status_inputs());
        }
    }
}

fn recruit_from_configuration(
    cc: &mut ClusterController,
    req: RecruitFromConfigurationRequest,
    aux: &mut JoinSet<()>,
    requests_tx: &mpsc::Sender<ControllerRequest>,
) {
    match cc.find_workers_for_configuration(&req) {
        Ok(reply) => req.reply.send(reply),
        Err(TesseraError::NoMoreServers)
            if cc.start_time.elapsed() >= cc.tunables.wait_for_good_recruitment_delay =>
        {
            warn!("Recruitment from configuration not possible now, queueing");
            cc.outstanding_recruitment.push(req);
        }
        Err(e) if e.is_recruitment_retry() => {
            // Not-good-enough (or short-handed inside the startup window):
            // retry locally after a short delay.
            debug!(error = %e, "Recruitment below expectations, retrying");
            let tx = requests_tx.clone();
            let delay = cc.tunables.attempt_recruitment_delay;
            aux.spawn(async move {
                sleep(delay).await;
                let _ = tx
                    .send(ControllerRequest::RecruitFromConfiguration(req))
                    .await;
            });
        }
        Err(e) => {
            error!(error = %e, "Recruitment from configuration failed");
            req.reply.send_error(e);
        }
    }
}

fn recruit_storage(cc: &mut ClusterController, req: RecruitStorageRequest) {
    let result = if !cc.got_process_classes && !req.critical_recruitment {
        // Effective classes are unknown until the overrides load; only
        // critical recruitment may proceed on reported classes alone.
        Err(TesseraError::NoMoreServers)
    } else {
        cc.get_storage_worker(&req)
    };
    match result {
        Ok((worker, process_class)) => req.reply.send(RecruitStorageReply {
            worker,
            process_class,
        }),
        Err(_) => {
            warn!("No storage workers available, queueing recruitment");
            let deadline = Instant::now() + cc.tunables.recruitment_timeout;
            cc.outstanding_storage.push((req, deadline));
        }
    }
}

fn register_master(cc: &mut ClusterController, req: RegisterMasterRequest, aux: &mut JoinSet<()>) {
    let RegisterMasterRequest {
        id,
        db_name,
        master,
        log_system,
        resolvers,
        proxies,
        recovery_state,
        recovery_count,
        registration_count,
        configuration,
        prior_committed_log_servers,
        reply,
    } = req;
    reply.send(());

    info!(
        db = %db_name,
        master = %id,
        registration_count = registration_count,
        recovery_state = ?recovery_state,
        tlogs = log_system.tlogs.len(),
        proxies = proxies.len(),
        resolvers = resolvers.len(),
        "Master registration received"
    );

    let mut dbi = cc.db.server_info.get();
    let active = dbi.master.as_ref().map(|m| m.id) == Some(id)
        && registration_count > cc.db.master_registration_count.load(Ordering::Relaxed);
    if !active {
        debug!(
            master = %id,
            registration_count = registration_count,
            known_count = cc.db.master_registration_count.load(Ordering::Relaxed),
            "Registration from an inactive master, ignoring"
        );
        return;
    }

    cc.db
        .master_registration_count
        .store(registration_count, Ordering::Relaxed);
    cc.db.config = configuration;

    let mut changed = false;

    if dbi.recovery_state != recovery_state {
        dbi.recovery_state = recovery_state;
        changed = true;
    }
    if dbi.prior_committed_log_servers != prior_committed_log_servers {
        dbi.prior_committed_log_servers = prior_committed_log_servers;
        changed = true;
    }
    if cc.db.client_info.get().proxies != proxies {
        changed = true;
        let previous = cc.db.client_info.get();
        let client = ClientDBInfo {
            id: Uuid::new_v4(),
            proxies,
            client_txn_info_sample_rate: previous.client_txn_info_sample_rate,
            client_txn_info_size_limit: previous.client_txn_info_size_limit,
        };
        cc.db.client_info.set(client.clone());
        dbi.client = client;
    }
    if dbi.log_system != log_system {
        dbi.log_system = log_system;
        changed = true;
    }
    if dbi.resolvers != resolvers {
        dbi.resolvers = resolvers;
        changed = true;
    }
    if dbi.recovery_count != recovery_count {
        dbi.recovery_count = recovery_count;
        changed = true;
    }
    if dbi.master.as_ref() != Some(&master) {
        dbi.master = Some(master);
        changed = true;
    }

    if changed {
        dbi.id = Uuid::new_v4();
        cc.db.server_info.set(dbi);
    }

    cc.schedule_better_master_check(aux);
}

fn install_master(cc: &mut ClusterController, master: RoleEndpoint) {
    cc.db.master_registration_count.store(0, Ordering::Relaxed);
    cc.db.config = DatabaseConfiguration::default();
    cc.master_process_id = master.locality.process_id.clone();

    let previous = cc.db.server_info.get();
    let mut lifetime = previous.master_lifetime;
    lifetime.increment();

    let mut dbi = ServerDBInfo::initial(cc.id);
    dbi.master = Some(master);
    dbi.master_lifetime = lifetime;
    info!(lifetime = %lifetime, change = %dbi.id, "Publishing new master");
    cc.db.server_info.set(dbi);
}

impl ClusterController {
    /// Retry everything parked for a population change: queued
    /// recruitments, queued storage requests, and the throttled
    /// better-master check.
    pub(crate) fn check_outstanding_requests(&mut self, aux: &mut JoinSet<()>) {
        self.check_outstanding_recruitment_requests();
        self.check_outstanding_storage_requests();
        self.schedule_better_master_check(aux);
    }

    fn check_outstanding_recruitment_requests(&mut self) {
        let pending = std::mem::take(&mut self.outstanding_recruitment);
        for req in pending {
            match self.find_workers_for_configuration(&req) {
                Ok(reply) => req.reply.send(reply),
                Err(e) if e.is_recruitment_retry() => {
                    debug!(error = %e, "Queued recruitment still not satisfiable");
                    self.outstanding_recruitment.push(req);
                }
                Err(e) => {
                    error!(error = %e, "Queued recruitment failed");
                    req.reply.send_error(e);
                }
            }
        }
    }

    fn check_outstanding_storage_requests(&mut self) {
        let now = Instant::now();
        let pending = std::mem::take(&mut self.outstanding_storage);
        for (req, deadline) in pending {
            if deadline < now {
                req.reply.send_error(TesseraError::TimedOut(
                    self.tunables.recruitment_timeout.as_millis() as u64,
                ));
                continue;
            }
            if !self.got_process_classes && !req.critical_recruitment {
                self.outstanding_storage.push((req, deadline));
                continue;
            }
            match self.get_storage_worker(&req) {
                Ok((worker, process_class)) => req.reply.send(RecruitStorageReply {
                    worker,
                    process_class,
                }),
                Err(_) => self.outstanding_storage.push((req, deadline)),
            }
        }
    }

    /// Arm the throttled better-master check if it is not already pending.
    pub(crate) fn schedule_better_master_check(&mut self, aux: &mut JoinSet<()>) {
        if self.better_master_check_pending {
            return;
        }
        self.better_master_check_pending = true;
        let events = self.events.clone();
        let delay = self.tunables.check_better_master_interval;
        aux.spawn(async move {
            sleep(delay).await;
            let _ = events.send(InternalEvent::BetterMasterCheck).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{add_worker, make_controller};
    use crate::policy::ReplicationPolicy;
    use crate::rpc::ReplyPromise;
    use crate::types::{ClassSource, ClassType};

    fn storage_request(critical: bool) -> (
        RecruitStorageRequest,
        tokio::sync::oneshot::Receiver<Result<RecruitStorageReply>>,
    ) {
        let (reply, rx) = ReplyPromise::pair();
        (
            RecruitStorageRequest {
                exclude_machines: vec![],
                exclude_dcs: vec![],
                exclude_addresses: vec![],
                critical_recruitment: critical,
                reply,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_storage_request_queued_until_classes_known() {
        let (mut cc, _events) = make_controller(3);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Storage, ClassSource::CommandLine);

        let (req, mut rx) = storage_request(false);
        recruit_storage(&mut cc, req);
        assert_eq!(cc.outstanding_storage.len(), 1);
        assert!(rx.try_recv().is_err());

        // Once classes are known, the drain satisfies the queued request.
        let mut aux = JoinSet::new();
        cc.apply_process_classes(Default::default(), &mut aux);
        assert!(cc.outstanding_storage.is_empty());
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.worker.process_id().unwrap().as_str(), "p1");
    }

    #[tokio::test]
    async fn test_storage_request_critical_bypasses_class_gate() {
        let (mut cc, _events) = make_controller(3);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Storage, ClassSource::CommandLine);

        let (req, mut rx) = storage_request(true);
        recruit_storage(&mut cc, req);
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_storage_request_times_out() {
        let (mut cc, _events) = make_controller(3);
        cc.got_process_classes = true;

        let (req, mut rx) = storage_request(false);
        recruit_storage(&mut cc, req);
        assert_eq!(cc.outstanding_storage.len(), 1);

        tokio::time::advance(cc.tunables.recruitment_timeout * 2).await;
        let mut aux = JoinSet::new();
        cc.check_outstanding_requests(&mut aux);

        assert!(cc.outstanding_storage.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap().unwrap_err(),
            TesseraError::TimedOut(_)
        ));
    }

    #[tokio::test]
    async fn test_outstanding_recruitment_drains_on_population_change() {
        let (mut cc, _events) = make_controller(3);
        cc.got_process_classes = true;

        let (reply, mut rx) = ReplyPromise::pair();
        cc.outstanding_recruitment.push(RecruitFromConfigurationRequest {
            configuration: crate::rpc::DatabaseConfiguration {
                tlog_replication_factor: 1,
                desired_logs: 1,
                desired_proxies: 1,
                desired_resolvers: 1,
                tlog_policy: ReplicationPolicy::One,
                excluded_addresses: Default::default(),
            },
            reply,
        });

        let mut aux = JoinSet::new();
        cc.check_outstanding_requests(&mut aux);
        assert_eq!(cc.outstanding_recruitment.len(), 1);

        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Unset, ClassSource::Unset);
        // Inside the grace window an Unset-fit placement meets expectations.
        cc.check_outstanding_requests(&mut aux);
        assert!(cc.outstanding_recruitment.is_empty());
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.tlogs.len(), 1);
    }

    #[tokio::test]
    async fn test_register_master_requires_active_master() {
        let (mut cc, _events) = make_controller(3);
        let mut aux = JoinSet::new();

        let endpoint = RoleEndpoint {
            id: Uuid::new_v4(),
            address: "10.5.0.1:4500".into(),
            locality: crate::types::Locality::new("m1", "z1", "h1", "dc1"),
        };
        install_master(&mut cc, endpoint.clone());
        let installed = cc.db.server_info.get();
        assert_eq!(installed.master_lifetime.lifetime, 1);

        let make_req = |master_id, registration_count| {
            let (reply, rx) = ReplyPromise::pair();
            (
                RegisterMasterRequest {
                    id: master_id,
                    db_name: "DB".into(),
                    master: endpoint.clone(),
                    log_system: Default::default(),
                    resolvers: vec![],
                    proxies: vec![],
                    recovery_state: crate::types::RecoveryState::FullyRecovered,
                    recovery_count: 1,
                    registration_count,
                    configuration: DatabaseConfiguration::default(),
                    prior_committed_log_servers: vec![],
                    reply,
                },
                rx,
            )
        };

        // Wrong master id: acked but ignored.
        let (req, mut rx) = make_req(Uuid::new_v4(), 1);
        register_master(&mut cc, req, &mut aux);
        assert!(rx.try_recv().unwrap().is_ok());
        assert_eq!(
            cc.db.server_info.get().recovery_state,
            crate::types::RecoveryState::Uninitialized
        );

        // Matching id with a fresh registration count: accepted, and the
        // published id changes.
        let before = cc.db.server_info.get().id;
        let (req, _rx) = make_req(endpoint.id, 1);
        register_master(&mut cc, req, &mut aux);
        let after = cc.db.server_info.get();
        assert_ne!(after.id, before);
        assert_eq!(after.recovery_state, crate::types::RecoveryState::FullyRecovered);

        // Stale registration count: ignored.
        let (req, _rx) = make_req(endpoint.id, 1);
        let before = cc.db.server_info.get().id;
        register_master(&mut cc, req, &mut aux);
        assert_eq!(cc.db.server_info.get().id, before);
    }

    #[tokio::test]
    async fn test_register_master_republishes_client_info_on_proxy_change() {
        let (mut cc, _events) = make_controller(3);
        let mut aux = JoinSet::new();

        let endpoint = RoleEndpoint {
            id: Uuid::new_v4(),
            address: "10.5.0.1:4500".into(),
            locality: crate::types::Locality::new("m1", "z1", "h1", "dc1"),
        };
        install_master(&mut cc, endpoint.clone());

        let proxy = RoleEndpoint {
            id: Uuid::new_v4(),
            address: "10.5.0.2:4500".into(),
            locality: crate::types::Locality::new("x1", "z2", "h1", "dc1"),
        };
        let client_before = cc.db.client_info.get();

        let (reply, _rx) = ReplyPromise::pair();
        register_master(
            &mut cc,
            RegisterMasterRequest {
                id: endpoint.id,
                db_name: "DB".into(),
                master: endpoint.clone(),
                log_system: Default::default(),
                resolvers: vec![],
                proxies: vec![proxy.clone()],
                recovery_state: crate::types::RecoveryState::Recruiting,
                recovery_count: 1,
                registration_count: 1,
                configuration: DatabaseConfiguration::default(),
                prior_committed_log_servers: vec![],
                reply,
            },
            &mut aux,
        );

        let client_after = cc.db.client_info.get();
        assert_ne!(client_after.id, client_before.id);
        assert_eq!(client_after.proxies, vec![proxy]);
        // The fresh client view is embedded in the server view as well.
        assert_eq!(cc.db.server_info.get().client.id, client_after.id);
    }
}
