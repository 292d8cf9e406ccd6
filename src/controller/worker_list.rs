//! Journal of worker presence into the KV worker-list keyspace.
//!
//! Registration and removal produce deltas; a single long-running task
//! batches them into the store so the published worker list eventually
//! reflects the live set, with at most one batch in flight.

use crate::controller::broadcast::AsyncVar;
use crate::error::Result;
use crate::kv::{worker_list_key_for, ConfigStore, WriteOp, WORKER_LIST_PREFIX};
use crate::types::{ProcessData, ProcessId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const COMMIT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Handle for enqueueing worker-presence deltas.
#[derive(Clone)]
pub struct WorkerListJournal {
    delta: Arc<Mutex<HashMap<ProcessId, Option<ProcessData>>>>,
    any_delta: AsyncVar<bool>,
}

impl WorkerListJournal {
    pub fn new() -> Self {
        Self {
            delta: Arc::new(Mutex::new(HashMap::new())),
            any_delta: AsyncVar::new(false),
        }
    }

    /// Record that `id` is present (`Some`) or gone (`None`). Later deltas
    /// for the same process overwrite earlier unjournaled ones.
    pub fn set(&self, id: ProcessId, data: Option<ProcessData>) {
        self.delta.lock().insert(id, data);
        self.any_delta.set(true);
    }

    /// Journal loop: clear the keyspace once, then batch pending deltas
    /// into the store whenever any accumulate.
    pub async fn run(self, store: Arc<dyn ConfigStore>) -> Result<()> {
        loop {
            match store
                .commit(vec![WriteOp::ClearRange(WORKER_LIST_PREFIX.to_string())])
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to clear worker list, retrying");
                    sleep(COMMIT_RETRY_DELAY).await;
                }
            }
        }

        loop {
            let mut rx = self.any_delta.subscribe();
            loop {
                if *rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    return Ok(());
                }
            }
            self.any_delta.set(false);

            let delta = std::mem::take(&mut *self.delta.lock());
            debug!(count = delta.len(), "Journaling worker list delta");

            let mut ops = Vec::with_capacity(delta.len());
            for (id, data) in &delta {
                match data {
                    Some(data) => ops.push(WriteOp::Set(
                        worker_list_key_for(id),
                        crate::kv::encode_process_data(data)?,
                    )),
                    None => ops.push(WriteOp::Clear(worker_list_key_for(id))),
                }
            }

            loop {
                match store.commit(ops.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!(error = %e, "Worker list commit failed, retrying");
                        sleep(COMMIT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

impl Default for WorkerListJournal {
    fn default() -> Self {
        Self::new()
    }
}
