//! Recruitment engine: selecting workers to fill database roles.
//!
//! Selection is fitness-first. Transaction logs are chosen across
//! datacenters from the best fitness tier that can satisfy the replication
//! policy; proxies and resolvers are chosen within the datacenter that
//! yields the best placement. Ties break uniformly by reservoir sampling,
//! and per-process used-counts spread roles over the population.

use super::fitness::{AcrossDatacenterFitness, InDatacenterFitness};
use super::{ClusterController, WorkerInfo};
use crate::error::{Result, TesseraError};
use crate::monitor::FailureMonitor;
use crate::policy::find_best_policy_set;
use crate::rpc::{
    DatabaseConfiguration, RecruitFromConfigurationReply, RecruitFromConfigurationRequest,
    RecruitStorageRequest, WorkerHandle,
};
use crate::types::{DcId, Fitness, Locality, ProcessClass, ProcessId, Role};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

type Candidate = (WorkerHandle, ProcessClass);

/// Per-process selection counters, used to spread roles over workers.
pub(crate) type UsedCounts = HashMap<ProcessId, usize>;

/// A selected worker along with the keys it was selected under.
#[derive(Debug, Clone)]
pub(crate) struct WorkerFitnessInfo {
    pub worker: Candidate,
    pub fitness: Fitness,
    pub used: usize,
}

fn available(monitor: &FailureMonitor, worker: &WorkerInfo, check_stable: bool) -> bool {
    monitor.state(&worker.handle.address).is_available()
        && (!check_stable || worker.reboots < 2)
}

fn bump(used: &mut UsedCounts, handle: &WorkerHandle) {
    if let Some(pid) = handle.process_id() {
        *used.entry(pid.clone()).or_default() += 1;
    }
}

impl ClusterController {
    /// Pick a worker for storage recruitment: anything fitting storage at
    /// `Unset` or better, escalating to the best non-disqualified worker
    /// only for critical recruitment.
    pub(crate) fn get_storage_worker(&self, req: &RecruitStorageRequest) -> Result<Candidate> {
        let excluded_machines: HashSet<&str> =
            req.exclude_machines.iter().map(String::as_str).collect();
        let excluded_dcs: HashSet<&str> = req.exclude_dcs.iter().map(String::as_str).collect();
        let excluded_addresses: HashSet<&str> =
            req.exclude_addresses.iter().map(String::as_str).collect();

        let excluded = |worker: &WorkerInfo| {
            let locality = &worker.handle.locality;
            locality
                .zone_id
                .as_deref()
                .is_some_and(|z| excluded_machines.contains(z))
                || locality
                    .dc_id
                    .as_deref()
                    .is_some_and(|dc| excluded_dcs.contains(dc))
                || excluded_addresses.contains(worker.handle.address.as_str())
        };

        for worker in self.workers.values() {
            if available(&self.monitor, worker, false)
                && !excluded(worker)
                && worker.process_class.fitness(Role::Storage) <= Fitness::Unset
            {
                return Ok((worker.handle.clone(), worker.process_class));
            }
        }

        if req.critical_recruitment {
            let mut best_fit = Fitness::NeverAssign;
            let mut best: Option<Candidate> = None;
            for worker in self.workers.values() {
                let fit = worker.process_class.fitness(Role::Storage);
                if available(&self.monitor, worker, false) && !excluded(worker) && fit < best_fit
                {
                    best_fit = fit;
                    best = Some((worker.handle.clone(), worker.process_class));
                }
            }
            if let Some(best) = best {
                return Ok(best);
            }
        }

        Err(TesseraError::NoMoreServers)
    }

    /// Pick the best-fit master candidate; ties break uniformly.
    pub(crate) fn get_master_worker(&mut self, check_stable: bool) -> Result<Candidate> {
        let monitor = &self.monitor;
        let rng = &mut self.rng;
        let mut best_fit = Fitness::NeverAssign;
        let mut best: Option<Candidate> = None;
        let mut num_equivalent = 1usize;

        for worker in self.workers.values() {
            if !available(monitor, worker, check_stable) {
                continue;
            }
            let fit = worker.process_class.fitness(Role::Master);
            if fit < best_fit {
                best = Some((worker.handle.clone(), worker.process_class));
                best_fit = fit;
                num_equivalent = 1;
            } else if fit != Fitness::NeverAssign && fit == best_fit {
                num_equivalent += 1;
                if rng.gen::<f64>() < 1.0 / num_equivalent as f64 {
                    best = Some((worker.handle.clone(), worker.process_class));
                }
            }
        }

        best.ok_or(TesseraError::NoMoreServers)
    }

    /// Select the smallest policy-satisfying transaction-log set, preferring
    /// better fitness tiers.
    pub(crate) fn get_workers_for_tlogs(
        &mut self,
        conf: &DatabaseConfiguration,
        id_used: &mut UsedCounts,
        check_stable: bool,
    ) -> Result<Vec<Candidate>> {
        let mut fitness_workers: BTreeMap<Fitness, Vec<Candidate>> = BTreeMap::new();
        for worker in self.workers.values() {
            let fitness = worker.process_class.fitness(Role::Tlog);
            if available(&self.monitor, worker, check_stable)
                && !conf.is_excluded(&worker.handle.address)
                && fitness != Fitness::NeverAssign
            {
                fitness_workers
                    .entry(fitness)
                    .or_default()
                    .push((worker.handle.clone(), worker.process_class));
            }
        }

        let desired = conf.desired_log_count();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut results: Option<Vec<Candidate>> = None;

        for fitness in [Fitness::Best, Fitness::Good, Fitness::Unset, Fitness::Worst] {
            if let Some(tier) = fitness_workers.remove(&fitness) {
                candidates.extend(tier);
            }
            if candidates.len() < conf.tlog_replication_factor {
                debug!(
                    fitness = ?fitness,
                    processes = candidates.len(),
                    replication = conf.tlog_replication_factor,
                    "Too few log candidates at this fitness tier"
                );
                continue;
            }

            let localities: Vec<Locality> = candidates
                .iter()
                .map(|(handle, _)| handle.locality.clone())
                .collect();

            if candidates.len() <= desired {
                let refs: Vec<&Locality> = localities.iter().collect();
                if conf.tlog_policy.validate(&refs) {
                    results = Some(candidates.clone());
                    break;
                }
                debug!(
                    fitness = ?fitness,
                    processes = candidates.len(),
                    policy = %conf.tlog_policy.info(),
                    "Log candidates do not satisfy the replication policy"
                );
            } else if let Some(chosen) = find_best_policy_set(
                &localities,
                &conf.tlog_policy,
                desired,
                self.tunables.policy_rating_tests,
                self.tunables.policy_generations,
                &mut self.rng,
            ) {
                results = Some(chosen.into_iter().map(|i| candidates[i].clone()).collect());
                break;
            } else {
                debug!(
                    fitness = ?fitness,
                    processes = candidates.len(),
                    policy = %conf.tlog_policy.info(),
                    "No policy-satisfying subset at this fitness tier"
                );
            }
        }

        let Some(results) = results else {
            warn!(
                policy = %conf.tlog_policy.info(),
                processes = candidates.len(),
                workers = self.workers.len(),
                replication = conf.tlog_replication_factor,
                desired = desired,
                "Could not recruit a transaction-log team"
            );
            return Err(TesseraError::NoMoreServers);
        };

        for (handle, _) in &results {
            bump(id_used, handle);
        }
        debug!(
            results = results.len(),
            desired = desired,
            policy = %conf.tlog_policy.info(),
            "Recruited transaction-log team"
        );
        Ok(results)
    }

    /// Pick one worker for `role`, preferring `dc`; candidates group by
    /// `(fitness, used)` and the best group is sampled uniformly.
    pub(crate) fn get_worker_for_role_in_datacenter(
        &mut self,
        dc: &Option<DcId>,
        role: Role,
        conf: &DatabaseConfiguration,
        id_used: &mut UsedCounts,
        check_stable: bool,
    ) -> Result<WorkerFitnessInfo> {
        // Preferred datacenter first, then everywhere else.
        for in_preferred_dc in [true, false] {
            let mut groups: BTreeMap<(Fitness, usize), Vec<Candidate>> = BTreeMap::new();
            for (pid, worker) in &self.workers {
                let fitness = worker.process_class.fitness(role);
                if available(&self.monitor, worker, check_stable)
                    && !conf.is_excluded(&worker.handle.address)
                    && fitness != Fitness::NeverAssign
                    && (worker.handle.locality.dc_id == *dc) == in_preferred_dc
                {
                    let used = id_used.get(pid).copied().unwrap_or(0);
                    groups
                        .entry((fitness, used))
                        .or_default()
                        .push((worker.handle.clone(), worker.process_class));
                }
            }

            if let Some(((fitness, used), mut group)) = groups.into_iter().next() {
                group.shuffle(&mut self.rng);
                let worker = group.swap_remove(0);
                bump(id_used, &worker.0);
                return Ok(WorkerFitnessInfo {
                    worker,
                    fitness,
                    used,
                });
            }
        }

        Err(TesseraError::NoMoreServers)
    }

    /// Pick up to `amount` further workers for `role` in `dc`, all strictly
    /// better than or tied with `min_worker` under `(fitness, used)`.
    pub(crate) fn get_workers_for_role_in_datacenter(
        &mut self,
        dc: &Option<DcId>,
        role: Role,
        amount: usize,
        conf: &DatabaseConfiguration,
        id_used: &mut UsedCounts,
        min_worker: &WorkerFitnessInfo,
        check_stable: bool,
    ) -> Vec<Candidate> {
        let mut results = Vec::new();
        if amount == 0 {
            return results;
        }

        let mut groups: BTreeMap<(Fitness, usize), Vec<Candidate>> = BTreeMap::new();
        for (pid, worker) in &self.workers {
            let fitness = worker.process_class.fitness(role);
            let used = id_used.get(pid).copied().unwrap_or(0);
            if available(&self.monitor, worker, check_stable)
                && !conf.is_excluded(&worker.handle.address)
                && worker.handle.id != min_worker.worker.0.id
                && (fitness < min_worker.fitness
                    || (fitness == min_worker.fitness && used <= min_worker.used))
                && worker.handle.locality.dc_id == *dc
            {
                groups
                    .entry((fitness, used))
                    .or_default()
                    .push((worker.handle.clone(), worker.process_class));
            }
        }

        for (_, mut group) in groups {
            group.shuffle(&mut self.rng);
            for candidate in group {
                bump(id_used, &candidate.0);
                results.push(candidate);
                if results.len() == amount {
                    return results;
                }
            }
        }

        results
    }

    /// Datacenters currently holding at least one recruitable worker.
    pub(crate) fn get_datacenters(
        &self,
        conf: &DatabaseConfiguration,
        check_stable: bool,
    ) -> BTreeSet<Option<DcId>> {
        self.workers
            .values()
            .filter(|w| {
                available(&self.monitor, w, check_stable) && !conf.is_excluded(&w.handle.address)
            })
            .map(|w| w.handle.locality.dc_id.clone())
            .collect()
    }

    /// Full placement for a database configuration: a transaction-log team
    /// across datacenters plus proxies and resolvers in the best
    /// datacenter. Inside the startup grace window, placements below the
    /// expected fitness are rejected so latecomers get a chance to register.
    pub(crate) fn find_workers_for_configuration(
        &mut self,
        req: &RecruitFromConfigurationRequest,
    ) -> Result<RecruitFromConfigurationReply> {
        let conf = &req.configuration;
        let mut id_used: UsedCounts = UsedCounts::new();
        if let Some(pid) = self.master_process_id.clone() {
            *id_used.entry(pid).or_default() += 1;
        }

        let tlogs = self.get_workers_for_tlogs(conf, &mut id_used, false)?;

        let datacenters = self.get_datacenters(conf, false);
        let mut best_fitness = InDatacenterFitness::default();
        let mut num_equivalent = 1usize;
        let mut best_proxies: Vec<Candidate> = Vec::new();
        let mut best_resolvers: Vec<Candidate> = Vec::new();

        for dc in &datacenters {
            let mut used = id_used.clone();
            let first_resolver =
                self.get_worker_for_role_in_datacenter(dc, Role::Resolver, conf, &mut used, false)?;
            let first_proxy =
                self.get_worker_for_role_in_datacenter(dc, Role::Proxy, conf, &mut used, false)?;

            let mut proxies = self.get_workers_for_role_in_datacenter(
                dc,
                Role::Proxy,
                conf.desired_proxy_count() - 1,
                conf,
                &mut used,
                &first_proxy,
                false,
            );
            let mut resolvers = self.get_workers_for_role_in_datacenter(
                dc,
                Role::Resolver,
                conf.desired_resolver_count() - 1,
                conf,
                &mut used,
                &first_resolver,
                false,
            );
            proxies.push(first_proxy.worker);
            resolvers.push(first_resolver.worker);

            let proxy_classes: Vec<ProcessClass> = proxies.iter().map(|c| c.1).collect();
            let resolver_classes: Vec<ProcessClass> = resolvers.iter().map(|c| c.1).collect();
            let fitness = InDatacenterFitness::of(&proxy_classes, &resolver_classes);

            if fitness.cmp_placement(&best_fitness).is_lt() {
                best_fitness = fitness;
                num_equivalent = 1;
                best_proxies = proxies;
                best_resolvers = resolvers;
            } else if fitness == best_fitness {
                num_equivalent += 1;
                if self.rng.gen::<f64>() < 1.0 / num_equivalent as f64 {
                    best_proxies = proxies;
                    best_resolvers = resolvers;
                }
            }
        }

        if best_proxies.is_empty() || best_resolvers.is_empty() {
            return Err(TesseraError::NoMoreServers);
        }

        debug!(
            replication = conf.tlog_replication_factor,
            desired_logs = conf.desired_log_count(),
            actual_logs = tlogs.len(),
            desired_proxies = conf.desired_proxy_count(),
            actual_proxies = best_proxies.len(),
            desired_resolvers = conf.desired_resolver_count(),
            actual_resolvers = best_resolvers.len(),
            "Placement selected"
        );

        if self.start_time.elapsed() < self.tunables.wait_for_good_recruitment_delay {
            let tlog_classes: Vec<ProcessClass> = tlogs.iter().map(|c| c.1).collect();
            let actual_across = AcrossDatacenterFitness::of(&tlog_classes);
            let expected_across = AcrossDatacenterFitness::new(
                self.tunables.expected_tlog_fitness,
                conf.desired_log_count(),
            );
            let expected_in = InDatacenterFitness::new(
                self.tunables.expected_proxy_fitness,
                self.tunables.expected_resolver_fitness,
                conf.desired_proxy_count(),
                conf.desired_resolver_count(),
            );
            if actual_across.cmp_placement(&expected_across).is_gt()
                || best_fitness.cmp_placement(&expected_in).is_gt()
            {
                return Err(TesseraError::OperationFailed);
            }
        }

        Ok(RecruitFromConfigurationReply {
            tlogs: tlogs.into_iter().map(|(handle, _)| handle).collect(),
            proxies: best_proxies.into_iter().map(|(handle, _)| handle).collect(),
            resolvers: best_resolvers
                .into_iter()
                .map(|(handle, _)| handle)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{add_worker, make_controller};
    use crate::monitor::FailureStatus;
    use crate::policy::ReplicationPolicy;
    use crate::rpc::ReplyPromise;
    use crate::types::{ClassSource, ClassType};

    fn config(
        replication: usize,
        logs: usize,
        proxies: usize,
        resolvers: usize,
        policy: ReplicationPolicy,
    ) -> DatabaseConfiguration {
        DatabaseConfiguration {
            tlog_replication_factor: replication,
            desired_logs: logs,
            desired_proxies: proxies,
            desired_resolvers: resolvers,
            tlog_policy: policy,
            excluded_addresses: Default::default(),
        }
    }

    fn recruit_request(conf: DatabaseConfiguration) -> RecruitFromConfigurationRequest {
        let (reply, _rx) = ReplyPromise::pair();
        RecruitFromConfigurationRequest {
            configuration: conf,
            reply,
        }
    }

    fn storage_request(critical: bool) -> RecruitStorageRequest {
        let (reply, _rx) = ReplyPromise::pair();
        RecruitStorageRequest {
            exclude_machines: vec![],
            exclude_dcs: vec![],
            exclude_addresses: vec![],
            critical_recruitment: critical,
            reply,
        }
    }

    fn zone_of(handle: &WorkerHandle) -> String {
        handle.locality.zone_id.clone().unwrap()
    }

    #[tokio::test]
    async fn test_trivial_recruit() {
        let (mut cc, _events) = make_controller(42);
        for i in 0..5 {
            add_worker(
                &mut cc,
                &format!("p{}", i),
                &format!("z{}", i),
                "dc1",
                ClassType::Unset,
                ClassSource::Unset,
            );
        }

        let req = recruit_request(config(3, 3, 1, 1, ReplicationPolicy::across_zones(3)));
        let reply = cc.find_workers_for_configuration(&req).unwrap();

        assert_eq!(reply.tlogs.len(), 3);
        let zones: HashSet<String> = reply.tlogs.iter().map(zone_of).collect();
        assert_eq!(zones.len(), 3);
        assert_eq!(reply.proxies.len(), 1);
        assert_eq!(reply.resolvers.len(), 1);
        // Used-counts spread the singleton roles over distinct processes.
        assert_ne!(reply.proxies[0].id, reply.resolvers[0].id);
    }

    #[tokio::test]
    async fn test_fitness_trumps_count() {
        let (mut cc, _events) = make_controller(42);
        for i in 0..10 {
            // Storage class: Good fitness for transaction logs.
            add_worker(
                &mut cc,
                &format!("a{}", i),
                &format!("za{}", i),
                "dc-a",
                ClassType::Storage,
                ClassSource::CommandLine,
            );
        }
        for i in 0..10 {
            // Tlog class: Best fitness.
            add_worker(
                &mut cc,
                &format!("b{}", i),
                &format!("zb{}", i),
                "dc-b",
                ClassType::Tlog,
                ClassSource::CommandLine,
            );
        }

        let mut used = UsedCounts::new();
        let conf = config(3, 5, 1, 1, ReplicationPolicy::across_zones(3));
        let tlogs = cc.get_workers_for_tlogs(&conf, &mut used, false).unwrap();

        assert_eq!(tlogs.len(), 5);
        for (handle, class) in &tlogs {
            assert_eq!(class.class_type, ClassType::Tlog);
            assert_eq!(handle.locality.dc_id.as_deref(), Some("dc-b"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window_rejects_bad_placement() {
        let (mut cc, _events) = make_controller(42);
        for i in 0..3 {
            // Storage class: Worst fitness for proxies and resolvers.
            add_worker(
                &mut cc,
                &format!("p{}", i),
                &format!("z{}", i),
                "dc1",
                ClassType::Storage,
                ClassSource::CommandLine,
            );
        }

        let req = recruit_request(config(1, 1, 1, 1, ReplicationPolicy::One));
        let err = cc.find_workers_for_configuration(&req).unwrap_err();
        assert!(matches!(err, TesseraError::OperationFailed));

        // Same population after the window: accepted.
        tokio::time::advance(cc.tunables.wait_for_good_recruitment_delay * 2).await;
        let reply = cc.find_workers_for_configuration(&req).unwrap();
        assert_eq!(reply.proxies.len(), 1);
    }

    #[tokio::test]
    async fn test_tlog_policy_not_satisfiable() {
        let (mut cc, _events) = make_controller(42);
        for i in 0..4 {
            // All in one zone: across-3-zones can never hold.
            add_worker(
                &mut cc,
                &format!("p{}", i),
                "z0",
                "dc1",
                ClassType::Unset,
                ClassSource::Unset,
            );
        }

        let mut used = UsedCounts::new();
        let conf = config(3, 3, 1, 1, ReplicationPolicy::across_zones(3));
        let err = cc.get_workers_for_tlogs(&conf, &mut used, false).unwrap_err();
        assert!(matches!(err, TesseraError::NoMoreServers));
    }

    #[tokio::test]
    async fn test_placement_deterministic_with_seed() {
        let build = |seed| {
            let (mut cc, events) = make_controller(seed);
            for i in 0..8 {
                add_worker(
                    &mut cc,
                    &format!("p{}", i),
                    &format!("z{}", i % 4),
                    "dc1",
                    ClassType::Unset,
                    ClassSource::Unset,
                );
            }
            (cc, events)
        };

        let (mut a, _ea) = build(7);
        let (mut b, _eb) = build(7);
        let conf = config(3, 4, 2, 2, ReplicationPolicy::across_zones(3));

        let ra = a.find_workers_for_configuration(&recruit_request(conf.clone())).unwrap();
        let rb = b.find_workers_for_configuration(&recruit_request(conf)).unwrap();

        let pids = |handles: &[WorkerHandle]| -> Vec<String> {
            handles
                .iter()
                .map(|h| h.process_id().unwrap().to_string())
                .collect()
        };
        assert_eq!(pids(&ra.tlogs), pids(&rb.tlogs));
        assert_eq!(pids(&ra.proxies), pids(&rb.proxies));
        assert_eq!(pids(&ra.resolvers), pids(&rb.resolvers));
    }

    #[tokio::test]
    async fn test_storage_recruit_prefers_storage_class() {
        let (mut cc, _events) = make_controller(42);
        add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Proxy, ClassSource::CommandLine);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Storage, ClassSource::CommandLine);

        let (worker, class) = cc.get_storage_worker(&storage_request(false)).unwrap();
        assert_eq!(class.class_type, ClassType::Storage);
        assert_eq!(worker.process_id().unwrap().as_str(), "p1");
    }

    #[tokio::test]
    async fn test_storage_recruit_critical_escalation() {
        let (mut cc, _events) = make_controller(42);
        // Proxy class fits storage at Worst: above the Unset cut.
        add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Proxy, ClassSource::CommandLine);

        let err = cc.get_storage_worker(&storage_request(false)).unwrap_err();
        assert!(matches!(err, TesseraError::NoMoreServers));

        let (worker, _) = cc.get_storage_worker(&storage_request(true)).unwrap();
        assert_eq!(worker.process_id().unwrap().as_str(), "p0");
    }

    #[tokio::test]
    async fn test_storage_recruit_exclusions() {
        let (mut cc, _events) = make_controller(42);
        let handle = add_worker(
            &mut cc,
            "p0",
            "z0",
            "dc1",
            ClassType::Storage,
            ClassSource::CommandLine,
        );

        let mut req = storage_request(false);
        req.exclude_machines = vec!["z0".into()];
        assert!(cc.get_storage_worker(&req).is_err());

        let mut req = storage_request(false);
        req.exclude_dcs = vec!["dc1".into()];
        assert!(cc.get_storage_worker(&req).is_err());

        let mut req = storage_request(false);
        req.exclude_addresses = vec![handle.address.clone()];
        assert!(cc.get_storage_worker(&req).is_err());
    }

    #[tokio::test]
    async fn test_master_recruit_prefers_best_fit() {
        let (mut cc, _events) = make_controller(42);
        add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Unset, ClassSource::Unset);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Master, ClassSource::CommandLine);

        let (worker, class) = cc.get_master_worker(false).unwrap();
        assert_eq!(worker.process_id().unwrap().as_str(), "p1");
        assert_eq!(class.fitness(Role::Master), Fitness::Best);
    }

    #[tokio::test]
    async fn test_master_recruit_skips_unavailable() {
        let (mut cc, _events) = make_controller(42);
        let best = add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Master, ClassSource::CommandLine);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Unset, ClassSource::Unset);
        cc.monitor.set_state(&best.address, FailureStatus::failed());

        let (worker, _) = cc.get_master_worker(false).unwrap();
        assert_eq!(worker.process_id().unwrap().as_str(), "p1");
    }

    #[tokio::test]
    async fn test_master_recruit_stability_check() {
        let (mut cc, _events) = make_controller(42);
        add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Master, ClassSource::CommandLine);
        cc.workers.get_mut(&ProcessId::from("p0")).unwrap().reboots = 2;

        assert!(cc.get_master_worker(true).is_err());
        assert!(cc.get_master_worker(false).is_ok());
    }

    #[tokio::test]
    async fn test_role_in_datacenter_falls_back_to_other_dcs() {
        let (mut cc, _events) = make_controller(42);
        add_worker(&mut cc, "p0", "z0", "dc-b", ClassType::Proxy, ClassSource::CommandLine);

        let conf = config(1, 1, 1, 1, ReplicationPolicy::One);
        let mut used = UsedCounts::new();
        let info = cc
            .get_worker_for_role_in_datacenter(
                &Some("dc-a".to_string()),
                Role::Proxy,
                &conf,
                &mut used,
                false,
            )
            .unwrap();
        assert_eq!(info.worker.0.locality.dc_id.as_deref(), Some("dc-b"));
    }

    #[tokio::test]
    async fn test_used_counts_spread_selection() {
        let (mut cc, _events) = make_controller(42);
        add_worker(&mut cc, "p0", "z0", "dc1", ClassType::Proxy, ClassSource::CommandLine);
        add_worker(&mut cc, "p1", "z1", "dc1", ClassType::Proxy, ClassSource::CommandLine);

        let conf = config(1, 1, 1, 1, ReplicationPolicy::One);
        let mut used = UsedCounts::new();
        used.insert(ProcessId::from("p0"), 3);

        let info = cc
            .get_worker_for_role_in_datacenter(
                &Some("dc1".to_string()),
                Role::Proxy,
                &conf,
                &mut used,
                false,
            )
            .unwrap();
        assert_eq!(info.worker.0.process_id().unwrap().as_str(), "p1");
    }
}
