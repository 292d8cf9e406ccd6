//! Configuration module for the Tessera cluster controller.

use crate::error::{Result, TesseraError};
use crate::types::Fitness;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a cluster controller instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Timing and fitness tunables.
    pub tunables: ControllerTunables,
    /// Whether the controller runs under deterministic simulation. Selects
    /// the shorter reboot-grace timeout.
    #[serde(default)]
    pub simulation: bool,
}

impl ControllerConfig {
    /// Load configuration from a JSON string.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| TesseraError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let t = &self.tunables;
        if t.client_request_interval.is_zero() {
            return Err(TesseraError::InvalidConfig {
                field: "tunables.client_request_interval".to_string(),
                reason: "Interval must be non-zero".to_string(),
            });
        }
        if t.failure_max_delay < t.failure_min_delay {
            return Err(TesseraError::InvalidConfig {
                field: "tunables.failure_max_delay".to_string(),
                reason: "Must be at least failure_min_delay".to_string(),
            });
        }
        if t.policy_generations == 0 {
            return Err(TesseraError::InvalidConfig {
                field: "tunables.policy_generations".to_string(),
                reason: "Policy search needs at least one generation".to_string(),
            });
        }
        if t.seconds_before_no_failure_delay.is_zero() {
            return Err(TesseraError::InvalidConfig {
                field: "tunables.seconds_before_no_failure_delay".to_string(),
                reason: "Must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration for deterministic simulation tests: short grace windows
    /// so failures and retries resolve quickly.
    pub fn simulation() -> Self {
        Self {
            tunables: ControllerTunables {
                worker_failure_time: Duration::from_millis(500),
                master_spin_delay: Duration::from_millis(100),
                attempt_recruitment_delay: Duration::from_millis(50),
                check_better_master_interval: Duration::from_millis(200),
                status_min_time_between_requests: Duration::from_millis(100),
                ..ControllerTunables::default()
            },
            simulation: true,
        }
    }
}

/// Externally configurable timing and fitness knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerTunables {
    /// Sustained unavailability after which a registered worker is removed.
    #[serde(with = "humantime_serde")]
    pub worker_failure_time: Duration,
    /// Interval between coordination-ping broadcasts to all workers.
    #[serde(with = "humantime_serde")]
    pub worker_coordination_ping_delay: Duration,
    /// Reboot grace: how long a freshly available process stays "unstable".
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Reboot grace under simulation.
    #[serde(with = "humantime_serde")]
    pub sim_shutdown_timeout: Duration,
    /// Minimum delay between master recruitment attempts (throttles flapping).
    #[serde(with = "humantime_serde")]
    pub master_spin_delay: Duration,
    /// Base failure-reaction threshold for a master that has registered.
    #[serde(with = "humantime_serde")]
    pub master_failure_reaction_time: Duration,
    /// Threshold growth rate while a recruited master is still recovering.
    pub master_failure_slope_during_recovery: f64,
    /// Time over which the registered-master reaction threshold decays to
    /// zero.
    #[serde(with = "humantime_serde")]
    pub seconds_before_no_failure_delay: Duration,
    /// Delay before retrying a recruitment that found no (good enough)
    /// servers.
    #[serde(with = "humantime_serde")]
    pub attempt_recruitment_delay: Duration,
    /// Startup window during which below-expected placements are rejected.
    #[serde(with = "humantime_serde")]
    pub wait_for_good_recruitment_delay: Duration,
    /// Worst master fitness accepted inside the good-recruitment window.
    pub expected_master_fitness: Fitness,
    /// Worst transaction-log fitness accepted inside the window.
    pub expected_tlog_fitness: Fitness,
    /// Worst proxy fitness accepted inside the window.
    pub expected_proxy_fitness: Fitness,
    /// Worst resolver fitness accepted inside the window.
    pub expected_resolver_fitness: Fitness,
    /// Diversity probes per candidate in the policy-set search.
    pub policy_rating_tests: usize,
    /// Candidate sets examined by the policy-set search.
    pub policy_generations: usize,
    /// Deadline for queued storage-recruitment requests.
    #[serde(with = "humantime_serde")]
    pub recruitment_timeout: Duration,
    /// Minimum interval between status aggregations.
    #[serde(with = "humantime_serde")]
    pub status_min_time_between_requests: Duration,
    /// Delay before re-evaluating whether a better master placement exists.
    #[serde(with = "humantime_serde")]
    pub check_better_master_interval: Duration,
    /// How long reported incompatible peers are remembered.
    #[serde(with = "humantime_serde")]
    pub incompatible_peers_logging_interval: Duration,
    /// Expected interval between failure-monitoring requests from a client.
    #[serde(with = "humantime_serde")]
    pub client_request_interval: Duration,
    /// Floor added to the adaptive failure threshold.
    #[serde(with = "humantime_serde")]
    pub failure_min_delay: Duration,
    /// Hard ceiling: silence beyond this always fails a client.
    #[serde(with = "humantime_serde")]
    pub failure_max_delay: Duration,
    /// Timeout advertised to failure-monitoring clients.
    #[serde(with = "humantime_serde")]
    pub failure_timeout_delay: Duration,
    /// Upper bound on DB-info long-polls, jittered per request.
    #[serde(with = "humantime_serde")]
    pub db_info_poll_timeout: Duration,
}

impl ControllerTunables {
    /// Reboot grace for the current environment.
    pub fn reboot_grace(&self, simulation: bool) -> Duration {
        if simulation {
            self.sim_shutdown_timeout
        } else {
            self.shutdown_timeout
        }
    }

    /// Decay rate of the registered-master failure threshold, per second.
    pub fn master_failure_slope(&self) -> f64 {
        -self.master_failure_reaction_time.as_secs_f64()
            / self.seconds_before_no_failure_delay.as_secs_f64()
    }
}

impl Default for ControllerTunables {
    fn default() -> Self {
        Self {
            worker_failure_time: Duration::from_secs(1),
            worker_coordination_ping_delay: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(600),
            sim_shutdown_timeout: Duration::from_secs(10),
            master_spin_delay: Duration::from_secs(1),
            master_failure_reaction_time: Duration::from_millis(400),
            master_failure_slope_during_recovery: 0.1,
            seconds_before_no_failure_delay: Duration::from_secs(8 * 3600),
            attempt_recruitment_delay: Duration::from_millis(50),
            wait_for_good_recruitment_delay: Duration::from_secs(1),
            expected_master_fitness: Fitness::Unset,
            expected_tlog_fitness: Fitness::Unset,
            expected_proxy_fitness: Fitness::Unset,
            expected_resolver_fitness: Fitness::Unset,
            policy_rating_tests: 200,
            policy_generations: 100,
            recruitment_timeout: Duration::from_secs(600),
            status_min_time_between_requests: Duration::from_millis(500),
            check_better_master_interval: Duration::from_secs(1),
            incompatible_peers_logging_interval: Duration::from_secs(600),
            client_request_interval: Duration::from_secs(1),
            failure_min_delay: Duration::from_secs(1),
            failure_max_delay: Duration::from_secs(10),
            failure_timeout_delay: Duration::from_secs(60),
            db_info_poll_timeout: Duration::from_secs(300),
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
