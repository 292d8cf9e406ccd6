//! Master watchdog: recruit, monitor, and preempt the master.
//!
//! The watchdog loops between recruiting a master candidate and watching
//! the recruited master with adaptive failure thresholds. Preemption comes
//! through the force-master-failure signal, raised when a materially better
//! placement exists.

use super::broadcast::AsyncVar;
use super::fitness::{AcrossDatacenterFitness, InDatacenterFitness};
use super::recruitment::UsedCounts;
use super::{ClusterController, ForceMasterFailure, InternalEvent};
use crate::config::ControllerTunables;
use crate::error::{Result, TesseraError};
use crate::monitor::FailureMonitor;
use crate::rpc::{RecruitMasterRequest, ReplyPromise, ServerDBInfo};
use crate::types::{ProcessClass, RecoveryState, Role};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Everything the watchdog task needs from the controller.
pub(crate) struct WatchdogContext {
    pub tunables: ControllerTunables,
    pub monitor: Arc<FailureMonitor>,
    pub events: mpsc::Sender<InternalEvent>,
    pub server_info: AsyncVar<ServerDBInfo>,
    pub force: ForceMasterFailure,
    pub registration_count: Arc<AtomicI64>,
    pub start_time: Instant,
}

async fn force_signalled(rx: &mut watch::Receiver<u64>) -> bool {
    rx.changed().await.is_ok()
}

/// The recruit/watch loop. Returns `Ok` when the controller shuts down and
/// `Err` only on fatal errors that should end the controller role.
pub(crate) async fn cluster_watch_database(ctx: WatchdogContext) -> Result<()> {
    loop {
        let recovery_start = Instant::now();
        debug!("Recruiting master");

        let (candidate_tx, candidate_rx) = oneshot::channel();
        if ctx
            .events
            .send(InternalEvent::MasterCandidate {
                check_stable: false,
                reply: candidate_tx,
            })
            .await
            .is_err()
        {
            return Ok(());
        }
        let (worker, class) = match candidate_rx.await {
            Err(_) => return Ok(()),
            Ok(Err(TesseraError::NoMoreServers)) => {
                warn!("No master candidates available, retrying");
                sleep(ctx.tunables.attempt_recruitment_delay).await;
                continue;
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(candidate)) => candidate,
        };

        let fitness = class.fitness(Role::Master);
        if fitness > ctx.tunables.expected_master_fitness
            && ctx.start_time.elapsed() < ctx.tunables.wait_for_good_recruitment_delay
        {
            // Better to briefly have no master than to commit to a bad one
            // while good workers may still be registering.
            debug!(fitness = ?fitness, "Holding out for a better master candidate");
            sleep(ctx.tunables.attempt_recruitment_delay).await;
            continue;
        }

        let lifetime = ctx.server_info.get().master_lifetime;
        let (reply, reply_rx) = ReplyPromise::pair();
        if worker
            .recruit_master
            .send(RecruitMasterRequest { lifetime, reply })
            .await
            .is_err()
        {
            sleep(ctx.tunables.master_spin_delay).await;
            continue;
        }
        let master = match reply_rx.await {
            Ok(Ok(master)) => master,
            _ => {
                sleep(ctx.tunables.master_spin_delay).await;
                continue;
            }
        };
        info!(master = %master.id, address = %master.address, "Recruited master");

        // Arm the preemption signal before publishing so nothing raised
        // against the new master is missed.
        let mut force_rx = ctx.force.subscribe();
        force_rx.borrow_and_update();

        if ctx
            .events
            .send(InternalEvent::InstallMaster {
                master: master.clone(),
            })
            .await
            .is_err()
        {
            return Ok(());
        }

        sleep(ctx.tunables.master_spin_delay).await;
        debug!(master = %master.id, "Watching master");

        let mut info_rx = ctx.server_info.subscribe();
        info_rx.borrow_and_update();
        loop {
            // Threshold parameters depend on whether the master has managed
            // to register; re-evaluated whenever the server view changes.
            let registered = ctx.registration_count.load(Ordering::Relaxed) > 0;
            let (base, slope) = if registered {
                (
                    ctx.tunables.master_failure_reaction_time,
                    ctx.tunables.master_failure_slope(),
                )
            } else {
                (
                    recovery_start
                        .elapsed()
                        .mul_f64(ctx.tunables.master_failure_slope_during_recovery),
                    ctx.tunables.master_failure_slope_during_recovery,
                )
            };

            tokio::select! {
                _ = ctx.monitor.wait_failure(&master.address, base, slope) => break,
                signalled = force_signalled(&mut force_rx) => {
                    if signalled {
                        break;
                    }
                    return Ok(());
                }
                changed = info_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }

        warn!(master = %master.id, "Master failed or was preempted, re-recruiting");
    }
}

impl ClusterController {
    /// Whether a strictly better master placement exists right now.
    ///
    /// Before full recovery only the master's own fitness counts: any
    /// improvement is worth abandoning recovery progress for. Afterwards the
    /// whole placement is compared, and the current master wins whenever the
    /// comparison is impossible (a role's worker vanished from the
    /// registry).
    pub(crate) fn better_master_exists(&mut self) -> bool {
        let dbi = self.db.server_info.get();
        let Some(master) = &dbi.master else {
            return false;
        };
        let Some(master_pid) = &master.locality.process_id else {
            return false;
        };
        let Some(master_worker) = self.workers.get(master_pid) else {
            return false;
        };
        let old_master_fit = master_worker.process_class.fitness(Role::Master);

        let mut id_used = UsedCounts::new();
        if let Some(pid) = self.master_process_id.clone() {
            *id_used.entry(pid).or_default() += 1;
        }

        let Ok((_, new_master_class)) = self.get_master_worker(true) else {
            return false;
        };
        let new_master_fit = new_master_class.fitness(Role::Master);

        if dbi.recovery_state < RecoveryState::FullyRecovered {
            if old_master_fit > new_master_fit {
                info!(
                    old_fitness = ?old_master_fit,
                    new_fitness = ?new_master_fit,
                    "Better master exists before full recovery"
                );
                return true;
            }
            return false;
        }

        if old_master_fit < new_master_fit {
            return false;
        }

        let mut tlog_classes: Vec<ProcessClass> = Vec::new();
        for tlog in &dbi.log_system.tlogs {
            let Some(class) = self.class_of(&tlog.locality) else {
                return false;
            };
            tlog_classes.push(class);
        }
        let old_across = AcrossDatacenterFitness::of(&tlog_classes);

        let conf = self.db.config.clone();
        let Ok(new_tlogs) = self.get_workers_for_tlogs(&conf, &mut id_used, true) else {
            return false;
        };
        let new_tlog_classes: Vec<ProcessClass> = new_tlogs.iter().map(|c| c.1).collect();
        let new_across = AcrossDatacenterFitness::of(&new_tlog_classes);

        if old_across.cmp_placement(&new_across).is_lt() {
            return false;
        }

        let mut proxy_classes: Vec<ProcessClass> = Vec::new();
        for proxy in &dbi.client.proxies {
            let Some(class) = self.class_of(&proxy.locality) else {
                return false;
            };
            proxy_classes.push(class);
        }
        let mut resolver_classes: Vec<ProcessClass> = Vec::new();
        for resolver in &dbi.resolvers {
            let Some(class) = self.class_of(&resolver.locality) else {
                return false;
            };
            resolver_classes.push(class);
        }
        let old_in = InDatacenterFitness::of(&proxy_classes, &resolver_classes);

        let datacenters = self.get_datacenters(&conf, true);
        let mut new_in = InDatacenterFitness::default();
        for dc in &datacenters {
            let mut used = id_used.clone();
            let Ok(first_resolver) = self.get_worker_for_role_in_datacenter(
                dc,
                Role::Resolver,
                &conf,
                &mut used,
                true,
            ) else {
                continue;
            };
            let Ok(first_proxy) =
                self.get_worker_for_role_in_datacenter(dc, Role::Proxy, &conf, &mut used, true)
            else {
                continue;
            };

            let mut proxies = self.get_workers_for_role_in_datacenter(
                dc,
                Role::Proxy,
                conf.desired_proxy_count() - 1,
                &conf,
                &mut used,
                &first_proxy,
                true,
            );
            let mut resolvers = self.get_workers_for_role_in_datacenter(
                dc,
                Role::Resolver,
                conf.desired_resolver_count() - 1,
                &conf,
                &mut used,
                &first_resolver,
                true,
            );
            proxies.push(first_proxy.worker);
            resolvers.push(first_resolver.worker);

            let proxies: Vec<ProcessClass> = proxies.iter().map(|c| c.1).collect();
            let resolvers: Vec<ProcessClass> = resolvers.iter().map(|c| c.1).collect();
            let fitness = InDatacenterFitness::of(&proxies, &resolvers);
            if fitness.cmp_placement(&new_in).is_lt() {
                new_in = fitness;
            }
        }

        if old_in.cmp_placement(&new_in).is_lt() {
            return false;
        }

        if old_master_fit > new_master_fit
            || old_across.cmp_placement(&new_across).is_gt()
            || old_in.cmp_placement(&new_in).is_gt()
        {
            info!(
                old_master = ?old_master_fit,
                new_master = ?new_master_fit,
                old_tlogs = ?old_across,
                new_tlogs = ?new_across,
                old_in_dc = ?old_in,
                new_in_dc = ?new_in,
                "A better master placement exists"
            );
            return true;
        }
        false
    }

    fn class_of(&self, locality: &crate::types::Locality) -> Option<ProcessClass> {
        let pid = locality.process_id.as_ref()?;
        self.workers.get(pid).map(|w| w.process_class)
    }
}
