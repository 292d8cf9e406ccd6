//! Status request batching.
//!
//! Status aggregation is expensive; the batcher coalesces every request that
//! arrives within the minimum interval into a single aggregator call and
//! fans the one result (or error) back out, so status storms cannot amplify
//! load.

use super::{ClusterController, InternalEvent};
use crate::error::{Result, TesseraError};
use crate::rpc::{StatusReply, StatusRequest, WorkerHandle};
use crate::types::{Address, ProcessClass};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::warn;

/// Everything the external status aggregator needs from the controller.
#[derive(Debug, Clone)]
pub struct StatusInputs {
    pub workers: Vec<(WorkerHandle, ProcessClass)>,
    pub client_issues: Vec<(Address, String)>,
    pub worker_issues: Vec<(Address, String)>,
    pub client_versions: HashMap<Address, Vec<String>>,
    pub incompatible_peers: Vec<Address>,
}

/// External status aggregator capability.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn cluster_status(&self, inputs: StatusInputs) -> Result<StatusReply>;
}

impl ClusterController {
    /// Assemble the aggregator's inputs, sweeping expired incompatible
    /// peers along the way.
    pub(crate) fn status_inputs(&mut self) -> StatusInputs {
        let incompatible_peers = {
            let now = Instant::now();
            let mut incompatible = self.db.incompatible_connections.lock();
            incompatible.retain(|_, expires| *expires >= now);
            incompatible.keys().cloned().collect()
        };
        let issues = self.db.issues.lock();
        StatusInputs {
            workers: self.workers_snapshot(),
            client_issues: issues
                .clients
                .iter()
                .map(|(addr, (issue, _))| (addr.clone(), issue.clone()))
                .collect(),
            worker_issues: issues
                .workers
                .iter()
                .map(|(addr, (issue, _))| (addr.clone(), issue.clone()))
                .collect(),
            client_versions: self.db.client_versions.lock().clone(),
            incompatible_peers,
        }
    }
}

/// Batcher loop: collect requests under the minimum interval, aggregate
/// once, reply to everyone.
///
/// The request stream is unbounded: the dispatcher must never block
/// handing a request over, because this task in turn waits on the
/// dispatcher for the aggregator's inputs.
pub(crate) async fn status_server(
    mut requests: mpsc::UnboundedReceiver<StatusRequest>,
    events: mpsc::Sender<InternalEvent>,
    fetcher: Arc<dyn StatusFetcher>,
    min_interval: Duration,
) {
    let mut last_request_time: Option<Instant> = None;

    loop {
        let Some(first) = requests.recv().await else {
            return;
        };
        let mut batch = vec![first];

        if let Some(last) = last_request_time {
            tokio::time::sleep_until(last + min_interval).await;
        }
        while let Ok(req) = requests.try_recv() {
            batch.push(req);
        }

        let (inputs_tx, inputs_rx) = oneshot::channel();
        if events
            .send(InternalEvent::StatusInputs { reply: inputs_tx })
            .await
            .is_err()
        {
            return;
        }
        let Ok(inputs) = inputs_rx.await else {
            return;
        };

        let result = fetcher.cluster_status(inputs).await;
        last_request_time = Some(Instant::now());

        match result {
            Ok(reply) => {
                for req in batch {
                    req.reply.send(reply.clone());
                }
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "Status aggregation failed");
                let message = e.to_string();
                for req in batch {
                    req.reply.send_error(TesseraError::Internal(message.clone()));
                }
            }
        }
    }
}
