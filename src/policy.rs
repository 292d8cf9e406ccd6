//! Replication policies over sets of localities.
//!
//! A policy decides whether a candidate set of transaction-log servers is
//! spread widely enough across failure domains. The controller consumes
//! policies purely as predicates; their structure is only used for display.

use crate::types::Locality;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Locality field a policy spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalityField {
    ZoneId,
    DataHallId,
    DcId,
}

impl LocalityField {
    fn get<'a>(&self, locality: &'a Locality) -> Option<&'a str> {
        match self {
            LocalityField::ZoneId => locality.zone_id.as_deref(),
            LocalityField::DataHallId => locality.data_hall_id.as_deref(),
            LocalityField::DcId => locality.dc_id.as_deref(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LocalityField::ZoneId => "zoneid",
            LocalityField::DataHallId => "data_hall",
            LocalityField::DcId => "dcid",
        }
    }
}

/// A predicate on sets of localities deciding whether a candidate set is
/// fault-tolerant enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationPolicy {
    /// Satisfied by any non-empty set.
    One,
    /// Requires `count` distinct values of `field`, each of whose groups
    /// satisfies the inner policy. Entries missing the field do not count.
    Across {
        count: usize,
        field: LocalityField,
        inner: Box<ReplicationPolicy>,
    },
    /// Satisfied only when every sub-policy is satisfied.
    And(Vec<ReplicationPolicy>),
}

impl ReplicationPolicy {
    /// Policy requiring `count` distinct zones.
    pub fn across_zones(count: usize) -> Self {
        ReplicationPolicy::Across {
            count,
            field: LocalityField::ZoneId,
            inner: Box::new(ReplicationPolicy::One),
        }
    }

    /// Policy requiring `count` distinct data halls.
    pub fn across_data_halls(count: usize) -> Self {
        ReplicationPolicy::Across {
            count,
            field: LocalityField::DataHallId,
            inner: Box::new(ReplicationPolicy::One),
        }
    }

    /// Whether `localities` satisfies this policy.
    pub fn validate(&self, localities: &[&Locality]) -> bool {
        match self {
            ReplicationPolicy::One => !localities.is_empty(),
            ReplicationPolicy::Across {
                count,
                field,
                inner,
            } => {
                let mut groups: HashMap<&str, Vec<&Locality>> = HashMap::new();
                for locality in localities {
                    if let Some(value) = field.get(locality) {
                        groups.entry(value).or_default().push(locality);
                    }
                }
                let satisfied = groups
                    .values()
                    .filter(|group| inner.validate(group))
                    .count();
                satisfied >= *count
            }
            ReplicationPolicy::And(policies) => {
                policies.iter().all(|p| p.validate(localities))
            }
        }
    }

    /// Human-readable description, for diagnostics.
    pub fn info(&self) -> String {
        match self {
            ReplicationPolicy::One => "one".to_string(),
            ReplicationPolicy::Across {
                count,
                field,
                inner,
            } => format!("{}^{} x {}", field.name(), count, inner.info()),
            ReplicationPolicy::And(policies) => {
                let parts: Vec<_> = policies.iter().map(|p| p.info()).collect();
                format!("({})", parts.join(" & "))
            }
        }
    }
}

impl Default for ReplicationPolicy {
    fn default() -> Self {
        ReplicationPolicy::across_zones(3)
    }
}

/// Bounded stochastic search for a policy-satisfying subset of size
/// `desired`.
///
/// Examines up to `generations` candidate subsets of the fitness-ordered
/// `localities`. Valid candidates are rated by `rating_tests` random
/// pair probes counting distinct-zone spread, and the best-rated valid
/// candidate's indices are returned. The first candidate is always the
/// leading `desired` entries, so the common already-diverse case costs one
/// validation.
pub fn find_best_policy_set<R: Rng>(
    localities: &[Locality],
    policy: &ReplicationPolicy,
    desired: usize,
    rating_tests: usize,
    generations: usize,
    rng: &mut R,
) -> Option<Vec<usize>> {
    if desired == 0 || localities.len() < desired {
        return None;
    }

    let mut best: Option<(usize, Vec<usize>)> = None;
    let mut indices: Vec<usize> = (0..localities.len()).collect();

    for generation in 0..generations {
        if generation > 0 {
            indices.shuffle(rng);
        }
        let candidate: Vec<usize> = indices[..desired].to_vec();
        let selected: Vec<&Locality> = candidate.iter().map(|&i| &localities[i]).collect();
        if !policy.validate(&selected) {
            continue;
        }

        let rating = rate_spread(&selected, rating_tests, rng);
        match &best {
            Some((best_rating, _)) if *best_rating >= rating => {}
            _ => best = Some((rating, candidate)),
        }
    }

    best.map(|(_, indices)| indices)
}

/// Count probes in which two randomly chosen members occupy distinct zones
/// (falling back to data halls where zones are absent). Higher means the set
/// survives more random single-domain failures.
fn rate_spread<R: Rng>(selected: &[&Locality], rating_tests: usize, rng: &mut R) -> usize {
    if selected.len() < 2 {
        return 0;
    }
    let mut rating = 0;
    for _ in 0..rating_tests {
        let a = rng.gen_range(0..selected.len());
        let b = rng.gen_range(0..selected.len());
        if a == b {
            continue;
        }
        let distinct = match (&selected[a].zone_id, &selected[b].zone_id) {
            (Some(za), Some(zb)) => za != zb,
            _ => selected[a].data_hall_id != selected[b].data_hall_id,
        };
        if distinct {
            rating += 1;
        }
    }
    rating
}
