//! Tessera cluster controller - the coordination brain of a distributed
//! transactional database.
//!
//! The controller is the single elected coordinator of a cluster. It
//! observes the population of worker processes, assigns them to database
//! roles (master, transaction logs, proxies, resolvers, storage), detects
//! worker and master failures, publishes the authoritative cluster-topology
//! view to clients and servers, and drives recovery when the master dies or
//! a materially better placement becomes available.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Cluster Controller                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Dispatcher: one event loop over the whole RPC surface       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Registry | Recruitment | Master Watchdog | Failure Detector │
//! ├──────────────────────────────────────────────────────────────┤
//! │  DB-Info Broadcast | Config Watcher | Journal | Status       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Boundaries: watchable KV store | status aggregator          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Leader election among controller candidates, the master process itself,
//! and the coordination quorum store are external collaborators; this crate
//! consumes them through the boundary traits in [`kv`] and
//! [`controller::StatusFetcher`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::config::ControllerConfig;
//! use tessera::controller::{run_cluster_controller, ControllerContext};
//! use tessera::kv::MemoryConfigStore;
//! use tessera::monitor::FailureMonitor;
//! # use tessera::controller::{StatusFetcher, StatusInputs};
//! # use tessera::rpc::StatusReply;
//! # struct NoStatus;
//! # #[async_trait::async_trait]
//! # impl StatusFetcher for NoStatus {
//! #     async fn cluster_status(&self, _i: StatusInputs) -> tessera::Result<StatusReply> {
//! #         Ok(StatusReply { status: serde_json::json!({}) })
//! #     }
//! # }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> tessera::Result<()> {
//!     let (requests_tx, requests_rx) = tokio::sync::mpsc::channel(256);
//!     let (_leader_tx, leader_fail) = tokio::sync::oneshot::channel();
//!
//!     let ctx = ControllerContext {
//!         id: uuid::Uuid::new_v4(),
//!         local_address: "10.0.0.1:4500".into(),
//!         config: ControllerConfig::default(),
//!         monitor: Arc::new(FailureMonitor::new()),
//!         store: Arc::new(MemoryConfigStore::new()),
//!         status: Arc::new(NoStatus),
//!         seed: None,
//!     };
//!     run_cluster_controller(ctx, requests_tx, requests_rx, leader_fail).await
//! }
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod kv;
pub mod monitor;
pub mod policy;
pub mod rpc;
pub mod types;

// Re-exports
pub use error::{Result, TesseraError};
pub use types::*;
