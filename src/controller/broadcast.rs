//! Versioned broadcast of the authoritative DB views.
//!
//! `ServerDBInfo` and `ClientDBInfo` live in [`AsyncVar`] cells. Writers
//! mint a fresh id before `set` whenever anything observable changed;
//! readers long-poll with their last known id and get exactly one reply,
//! either on change or after a jittered timeout so abandoned clients do not
//! pin resources.

use crate::rpc::{ClientDBInfo, GetServerDbInfoRequest, OpenDatabaseRequest, ServerDBInfo};
use crate::types::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

/// A versioned async cell: current value plus at-most-once change
/// notification per subscriber wait.
#[derive(Debug)]
pub struct AsyncVar<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T: Clone> AsyncVar<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T> Clone for AsyncVar<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

/// Issues reported by clients and workers, keyed by address. Each entry
/// remembers which report installed it so overlapping long-polls from the
/// same address do not clobber each other.
#[derive(Debug, Default)]
pub struct IssueMaps {
    pub clients: HashMap<Address, (String, Uuid)>,
    pub workers: HashMap<Address, (String, Uuid)>,
}

/// Install (or clear, for an empty issue string) an issue for `address`.
/// Returns the id of this installation.
pub fn add_issue(
    map: &mut HashMap<Address, (String, Uuid)>,
    address: &str,
    issue: &str,
) -> Uuid {
    let issue_id = Uuid::new_v4();
    if issue.is_empty() {
        map.remove(address);
    } else {
        map.insert(address.to_string(), (issue.to_string(), issue_id));
    }
    issue_id
}

/// Remove the issue only if this installation still owns the entry.
pub fn remove_issue(
    map: &mut HashMap<Address, (String, Uuid)>,
    address: &str,
    issue: &str,
    issue_id: Uuid,
) {
    if issue.is_empty() {
        return;
    }
    if map.get(address).is_some_and(|(_, id)| *id == issue_id) {
        map.remove(address);
    }
}

async fn wait_for_newer<T: Clone>(var: &AsyncVar<T>, known: Uuid, id_of: fn(&T) -> Uuid, poll_timeout: Duration) -> T {
    let mut rx = var.subscribe();
    loop {
        let current = rx.borrow_and_update().clone();
        if id_of(&current) != known {
            return current;
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return var.get();
                }
            }
            _ = sleep(poll_timeout) => return var.get(),
        }
    }
}

/// Long-poll handler for `OpenDatabase`: reply with the client DB view once
/// it is newer than the caller's, or after the jittered timeout.
pub(crate) async fn cluster_open_database(
    client_info: AsyncVar<ClientDBInfo>,
    issues: Arc<Mutex<IssueMaps>>,
    client_versions: Arc<Mutex<HashMap<Address, Vec<String>>>>,
    req: OpenDatabaseRequest,
    poll_timeout: Duration,
) {
    let issue_id = add_issue(
        &mut issues.lock().clients,
        &req.client_address,
        &req.issues,
    );
    if !req.supported_versions.is_empty() {
        client_versions
            .lock()
            .insert(req.client_address.clone(), req.supported_versions.clone());
    }

    let value = wait_for_newer(&client_info, req.known_client_info_id, |v| v.id, poll_timeout).await;

    remove_issue(
        &mut issues.lock().clients,
        &req.client_address,
        &req.issues,
        issue_id,
    );
    client_versions.lock().remove(&req.client_address);

    debug!(client = %req.client_address, id = %value.id, "Sending client DB info");
    req.reply.send(value);
}

/// Long-poll handler for `GetServerDBInfo`, also recording the caller's
/// incompatible peers until their logging interval expires.
pub(crate) async fn cluster_get_server_info(
    server_info: AsyncVar<ServerDBInfo>,
    issues: Arc<Mutex<IssueMaps>>,
    incompatible: Arc<Mutex<HashMap<Address, Instant>>>,
    req: GetServerDbInfoRequest,
    poll_timeout: Duration,
    incompatible_expiry: Duration,
) {
    let issue_id = add_issue(
        &mut issues.lock().workers,
        &req.worker_address,
        &req.issues,
    );
    {
        let mut incompatible = incompatible.lock();
        let expires = Instant::now() + incompatible_expiry;
        for peer in &req.incompatible_peers {
            incompatible.insert(peer.clone(), expires);
        }
    }

    let value = wait_for_newer(&server_info, req.known_server_info_id, |v| v.id, poll_timeout).await;

    remove_issue(
        &mut issues.lock().workers,
        &req.worker_address,
        &req.issues,
        issue_id,
    );

    debug!(worker = %req.worker_address, id = %value.id, "Sending server DB info");
    req.reply.send(value);
}
