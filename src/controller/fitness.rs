//! Placement comparators used to rank candidate role assignments.
//!
//! Both comparators are "less is better" orders. The worst-fit role in a
//! placement dominates the comparison so no role becomes a weak link; among
//! placements with equal fitness, denser ones (more instances of a role)
//! win.

use crate::types::{Fitness, ProcessClass, Role};
use std::cmp::Ordering;

/// Quality of a proxy/resolver placement inside one datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InDatacenterFitness {
    pub proxy_fit: Fitness,
    pub resolver_fit: Fitness,
    pub proxy_count: usize,
    pub resolver_count: usize,
}

impl InDatacenterFitness {
    pub fn new(
        proxy_fit: Fitness,
        resolver_fit: Fitness,
        proxy_count: usize,
        resolver_count: usize,
    ) -> Self {
        Self {
            proxy_fit,
            resolver_fit,
            proxy_count,
            resolver_count,
        }
    }

    /// Score an actual placement: each role's fitness is its worst member's.
    pub fn of(proxies: &[ProcessClass], resolvers: &[ProcessClass]) -> Self {
        let proxy_fit = proxies
            .iter()
            .map(|c| c.fitness(Role::Proxy))
            .max()
            .unwrap_or(Fitness::NeverAssign);
        let resolver_fit = resolvers
            .iter()
            .map(|c| c.fitness(Role::Resolver))
            .max()
            .unwrap_or(Fitness::NeverAssign);
        Self {
            proxy_fit,
            resolver_fit,
            proxy_count: proxies.len(),
            resolver_count: resolvers.len(),
        }
    }

    /// Placement order: worst role first, then the better role, then counts
    /// descending. Not an `Ord` impl: two placements can be order-equal
    /// without being field-equal.
    pub fn cmp_placement(&self, other: &Self) -> Ordering {
        let lmax = self.proxy_fit.max(self.resolver_fit);
        let lmin = self.proxy_fit.min(self.resolver_fit);
        let rmax = other.proxy_fit.max(other.resolver_fit);
        let rmin = other.proxy_fit.min(other.resolver_fit);

        lmax.cmp(&rmax)
            .then(lmin.cmp(&rmin))
            .then(other.proxy_count.cmp(&self.proxy_count))
            .then(other.resolver_count.cmp(&self.resolver_count))
    }
}

impl Default for InDatacenterFitness {
    fn default() -> Self {
        Self {
            proxy_fit: Fitness::NeverAssign,
            resolver_fit: Fitness::NeverAssign,
            proxy_count: 0,
            resolver_count: 0,
        }
    }
}

/// Quality of a transaction-log placement spanning datacenters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcrossDatacenterFitness {
    pub tlog_fit: Fitness,
    pub tlog_count: usize,
}

impl AcrossDatacenterFitness {
    pub fn new(tlog_fit: Fitness, tlog_count: usize) -> Self {
        Self {
            tlog_fit,
            tlog_count,
        }
    }

    pub fn of(tlogs: &[ProcessClass]) -> Self {
        let tlog_fit = tlogs
            .iter()
            .map(|c| c.fitness(Role::Tlog))
            .max()
            .unwrap_or(Fitness::NeverAssign);
        Self {
            tlog_fit,
            tlog_count: tlogs.len(),
        }
    }

    /// Placement order: fitness ascending, then count descending.
    pub fn cmp_placement(&self, other: &Self) -> Ordering {
        self.tlog_fit
            .cmp(&other.tlog_fit)
            .then(other.tlog_count.cmp(&self.tlog_count))
    }
}

impl Default for AcrossDatacenterFitness {
    fn default() -> Self {
        Self {
            tlog_fit: Fitness::NeverAssign,
            tlog_count: 0,
        }
    }
}
