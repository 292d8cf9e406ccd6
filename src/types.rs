//! Core type definitions for the Tessera cluster controller.
//!
//! This module contains the fundamental data types used throughout the
//! controller: process identity and locality, process classes and their
//! fitness for database roles, and the small identifiers shared across
//! components.
//!
//! # Key Types
//!
//! - [`ProcessId`]: Stable, opaque identifier of a worker process
//! - [`Locality`]: Failure-domain coordinates of a process
//! - [`ProcessClass`]: `(type, source)` pair naming a worker's role family
//! - [`Fitness`]: How well a process class fits a cluster role
//!
//! # Examples
//!
//! ```rust
//! use tessera::types::{ClassSource, ClassType, Fitness, ProcessClass, Role};
//!
//! let class = ProcessClass::new(ClassType::Storage, ClassSource::CommandLine);
//! assert_eq!(class.fitness(Role::Storage), Fitness::Best);
//! assert_eq!(class.fitness(Role::Tlog), Fitness::Good);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a process, as reported at registration.
pub type Address = String;

/// Monotone counter on a worker's re-registrations; higher wins.
pub type Generation = i64;

/// Stable identifier for a worker process, drawn from its locality.
///
/// The controller treats this as an opaque byte string; it never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a failure zone (machine or rack).
pub type ZoneId = String;

/// Identifier of a data hall within a datacenter.
pub type DataHallId = String;

/// Identifier of a datacenter.
pub type DcId = String;

/// Failure-domain coordinates of a process. Every component is optional;
/// replication policies only count entries that carry the field they span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locality {
    pub process_id: Option<ProcessId>,
    pub zone_id: Option<ZoneId>,
    pub data_hall_id: Option<DataHallId>,
    pub dc_id: Option<DcId>,
}

impl Locality {
    /// Locality with all four fields present, for the common fully-specified
    /// deployment.
    pub fn new(
        process_id: impl Into<String>,
        zone_id: impl Into<String>,
        data_hall_id: impl Into<String>,
        dc_id: impl Into<String>,
    ) -> Self {
        Self {
            process_id: Some(ProcessId::new(process_id)),
            zone_id: Some(zone_id.into()),
            data_hall_id: Some(data_hall_id.into()),
            dc_id: Some(dc_id.into()),
        }
    }
}

/// Role family a process was configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassType {
    Unset,
    Master,
    Tlog,
    Proxy,
    Resolver,
    Storage,
    Tester,
}

/// Authority that assigned a process class. Priority for determining the
/// effective class: `CommandLine > Database > Auto > Unset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassSource {
    CommandLine,
    Database,
    Auto,
    Unset,
}

/// A process class: the role family and the authority that set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessClass {
    pub class_type: ClassType,
    pub source: ClassSource,
}

impl ProcessClass {
    pub fn new(class_type: ClassType, source: ClassSource) -> Self {
        Self { class_type, source }
    }

    pub fn unset() -> Self {
        Self::new(ClassType::Unset, ClassSource::Unset)
    }

    /// Fitness of this class for a cluster role. `NeverAssign` disqualifies
    /// the worker for that role entirely.
    pub fn fitness(&self, role: Role) -> Fitness {
        use ClassType::*;
        if self.class_type == Tester {
            return Fitness::NeverAssign;
        }
        match role {
            Role::Storage => match self.class_type {
                Storage => Fitness::Best,
                Unset => Fitness::Unset,
                _ => Fitness::Worst,
            },
            Role::Tlog => match self.class_type {
                Tlog => Fitness::Best,
                Storage => Fitness::Good,
                Unset => Fitness::Unset,
                _ => Fitness::Worst,
            },
            Role::Proxy => match self.class_type {
                Proxy => Fitness::Best,
                Master | Resolver => Fitness::Good,
                Unset => Fitness::Unset,
                _ => Fitness::Worst,
            },
            Role::Resolver => match self.class_type {
                Resolver => Fitness::Best,
                Master | Proxy => Fitness::Good,
                Unset => Fitness::Unset,
                _ => Fitness::Worst,
            },
            Role::Master => match self.class_type {
                Master => Fitness::Best,
                Tlog | Proxy | Resolver => Fitness::Good,
                Unset => Fitness::Unset,
                Storage => Fitness::Worst,
                Tester => Fitness::NeverAssign,
            },
        }
    }
}

impl Default for ProcessClass {
    fn default() -> Self {
        Self::unset()
    }
}

impl fmt::Display for ProcessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.class_type, self.source)
    }
}

/// Database roles the controller recruits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Tlog,
    Proxy,
    Resolver,
    Storage,
}

/// Ordinal fitness of a process class for a role; lower is better.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Fitness {
    Best,
    Good,
    Unset,
    Worst,
    NeverAssign,
}

/// A master incarnation identifier: increments on every successful recruit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterLifetime {
    /// Controller that performed the recruit.
    pub controller_id: uuid::Uuid,
    /// Monotone incarnation counter under that controller.
    pub lifetime: u64,
}

impl MasterLifetime {
    pub fn increment(&mut self) {
        self.lifetime += 1;
    }
}

impl fmt::Display for MasterLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.controller_id, self.lifetime)
    }
}

/// Progress of the current master through recovery, as last registered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Uninitialized,
    ReadingCoordinatedState,
    LockingCoordinatedState,
    Recruiting,
    RecoveryTransaction,
    WritingCoordinatedState,
    FullyRecovered,
}

/// Presence record for a known process, journaled to the KV worker list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessData {
    pub locality: Locality,
    pub process_class: ProcessClass,
    pub address: Address,
}
