//! Boundary contract for the transactional, watchable configuration store.
//!
//! The controller never owns persistent state; cluster shape is derivable
//! from coordinators plus worker registrations. What it does read and write
//! is a small system keyspace: process-class overrides, the worker-presence
//! list, and the client transaction-info knobs. This module defines the
//! store capability, the keyspace layout, and an in-memory implementation
//! used by tests and simulation.

use crate::error::{Result, TesseraError};
use crate::types::{ProcessClass, ProcessData, ProcessId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::watch;

pub type Key = String;
pub type Value = Vec<u8>;

/// Range of keys holding one process-class override per process id.
pub const PROCESS_CLASS_PREFIX: &str = "conf/process_class/";
/// Legacy location of process-class rows, migrated on first start.
pub const PROCESS_CLASS_V0_PREFIX: &str = "conf/process_class_v0/";
/// Schema version marker for the process-class range.
pub const PROCESS_CLASS_VERSION_KEY: &str = "conf/process_class_version";
/// Bumped by operators to trigger a re-read of the process-class range.
pub const PROCESS_CLASS_CHANGE_KEY: &str = "conf/process_class_change";
/// Current schema version written to the version marker.
pub const PROCESS_CLASS_VERSION: &[u8] = b"1";
/// Range of keys holding one presence entry per known process.
pub const WORKER_LIST_PREFIX: &str = "workers/";
/// Client transaction sampling rate, little-endian f64.
pub const CLIENT_TXN_SAMPLE_RATE_KEY: &str = "client_info/client_txn_sample_rate";
/// Client transaction size limit, little-endian i64.
pub const CLIENT_TXN_SIZE_LIMIT_KEY: &str = "client_info/client_txn_size_limit";

pub fn process_class_key_for(id: &ProcessId) -> Key {
    format!("{}{}", PROCESS_CLASS_PREFIX, id)
}

pub fn decode_process_class_key(key: &str) -> Option<ProcessId> {
    key.strip_prefix(PROCESS_CLASS_PREFIX)
        .map(ProcessId::from)
}

pub fn encode_process_class(class: &ProcessClass) -> Result<Value> {
    Ok(serde_json::to_vec(class)?)
}

pub fn decode_process_class(value: &[u8]) -> Result<ProcessClass> {
    Ok(serde_json::from_slice(value)?)
}

pub fn worker_list_key_for(id: &ProcessId) -> Key {
    format!("{}{}", WORKER_LIST_PREFIX, id)
}

pub fn encode_process_data(data: &ProcessData) -> Result<Value> {
    Ok(serde_json::to_vec(data)?)
}

pub fn decode_process_data(value: &[u8]) -> Result<ProcessData> {
    Ok(serde_json::from_slice(value)?)
}

pub fn decode_sample_rate(value: &[u8]) -> Result<f64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| TesseraError::Serialization("sample rate is not 8 bytes".into()))?;
    Ok(f64::from_le_bytes(bytes))
}

pub fn decode_size_limit(value: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| TesseraError::Serialization("size limit is not 8 bytes".into()))?;
    Ok(i64::from_le_bytes(bytes))
}

/// A single mutation within an atomic commit.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set(Key, Value),
    Clear(Key),
    ClearRange(Key),
}

/// Installed watch on a single key. Resolves on the first change committed
/// after the watch was taken.
pub struct KeyWatch {
    rx: watch::Receiver<u64>,
    baseline: u64,
}

impl KeyWatch {
    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow_and_update() != self.baseline {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Transactional, watchable KV store capability.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn get_range(&self, prefix: &str) -> Result<Vec<(Key, Value)>>;

    /// Apply all operations atomically.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()>;

    /// Install a watch on `key` against its current state.
    fn watch(&self, key: &str) -> KeyWatch;
}

/// In-memory store with per-key change notification.
#[derive(Default)]
pub struct MemoryConfigStore {
    data: RwLock<BTreeMap<Key, Value>>,
    watchers: RwLock<HashMap<Key, watch::Sender<u64>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, touched: &[Key]) {
        let watchers = self.watchers.read();
        for key in touched {
            if let Some(tx) = watchers.get(key) {
                tx.send_modify(|v| *v += 1);
            }
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn get_range(&self, prefix: &str) -> Result<Vec<(Key, Value)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut touched = Vec::new();
        {
            let mut data = self.data.write();
            for op in ops {
                match op {
                    WriteOp::Set(key, value) => {
                        data.insert(key.clone(), value);
                        touched.push(key);
                    }
                    WriteOp::Clear(key) => {
                        data.remove(&key);
                        touched.push(key);
                    }
                    WriteOp::ClearRange(prefix) => {
                        let keys: Vec<Key> = data
                            .range(prefix.clone()..)
                            .take_while(|(k, _)| k.starts_with(&prefix))
                            .map(|(k, _)| k.clone())
                            .collect();
                        for key in keys {
                            data.remove(&key);
                            touched.push(key);
                        }
                    }
                }
            }
        }
        self.notify(&touched);
        Ok(())
    }

    fn watch(&self, key: &str) -> KeyWatch {
        let mut watchers = self.watchers.write();
        let tx = watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(0).0);
        let baseline = *tx.borrow();
        KeyWatch {
            baseline,
            rx: tx.subscribe(),
        }
    }
}
