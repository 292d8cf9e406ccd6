//! Reconciliation of KV-held configuration: process-class overrides and the
//! client transaction-info knobs.
//!
//! One task keeps the process-class override map in sync with the store
//! (migrating the legacy row format on first start); a sibling task watches
//! the client-txn keys and republishes `ClientDBInfo` when they move.

use super::broadcast::AsyncVar;
use super::InternalEvent;
use crate::error::Result;
use crate::kv::{
    decode_process_class, decode_process_class_key, decode_sample_rate, decode_size_limit,
    process_class_key_for, ConfigStore, WriteOp, CLIENT_TXN_SAMPLE_RATE_KEY,
    CLIENT_TXN_SIZE_LIMIT_KEY, PROCESS_CLASS_CHANGE_KEY, PROCESS_CLASS_PREFIX,
    PROCESS_CLASS_V0_PREFIX, PROCESS_CLASS_VERSION, PROCESS_CLASS_VERSION_KEY,
};
use crate::rpc::ClientDBInfo;
use crate::types::{ClassSource, ProcessClass, ProcessId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

const STORE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Move legacy process-class rows to the keyed format, writing the schema
/// version marker in the same commit. Idempotent: a present marker means
/// nothing to do.
pub(crate) async fn migrate_process_classes(store: &dyn ConfigStore) -> Result<()> {
    if store.get(PROCESS_CLASS_VERSION_KEY).await?.is_some() {
        return Ok(());
    }

    let old_rows = store.get_range(PROCESS_CLASS_V0_PREFIX).await?;
    let mut ops = vec![
        WriteOp::ClearRange(PROCESS_CLASS_V0_PREFIX.to_string()),
        WriteOp::Set(
            PROCESS_CLASS_VERSION_KEY.to_string(),
            PROCESS_CLASS_VERSION.to_vec(),
        ),
    ];
    let mut migrated = 0usize;
    for (key, value) in old_rows {
        let Some(raw_id) = key.strip_prefix(PROCESS_CLASS_V0_PREFIX) else {
            continue;
        };
        ops.push(WriteOp::Set(
            process_class_key_for(&ProcessId::from(raw_id)),
            value,
        ));
        migrated += 1;
    }
    store.commit(ops).await?;
    info!(rows = migrated, "Migrated process class rows to keyed format");
    Ok(())
}

/// Keep the controller's process-class override map in sync with the store.
pub(crate) async fn monitor_process_classes(
    store: Arc<dyn ConfigStore>,
    events: mpsc::Sender<InternalEvent>,
) -> Result<()> {
    loop {
        match migrate_process_classes(store.as_ref()).await {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, "Process class migration failed, retrying");
                sleep(STORE_RETRY_DELAY).await;
            }
        }
    }

    let mut last_rows: Option<Vec<(String, Vec<u8>)>> = None;
    loop {
        let rows = match store.get_range(PROCESS_CLASS_PREFIX).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to read process classes, retrying");
                sleep(STORE_RETRY_DELAY).await;
                continue;
            }
        };

        if last_rows.as_ref() != Some(&rows) {
            let mut overrides: HashMap<ProcessId, ProcessClass> = HashMap::new();
            for (key, value) in &rows {
                let Some(pid) = decode_process_class_key(key) else {
                    warn!(key = %key, "Malformed process class key");
                    continue;
                };
                match decode_process_class(value) {
                    Ok(class) if class.source == ClassSource::CommandLine => {
                        // Command-line classes never come from the store.
                        warn!(process = %pid, "Ignoring command-line-source class row");
                    }
                    Ok(class) => {
                        overrides.insert(pid, class);
                    }
                    Err(e) => warn!(process = %pid, error = %e, "Malformed process class row"),
                }
            }
            info!(count = overrides.len(), "Loaded process class overrides");
            if events
                .send(InternalEvent::ProcessClassesChanged(overrides))
                .await
                .is_err()
            {
                return Ok(());
            }
            last_rows = Some(rows);
        }

        store.watch(PROCESS_CLASS_CHANGE_KEY).wait().await;
    }
}

/// Watch the client-txn-info keys and republish `ClientDBInfo` whenever
/// either moves.
pub(crate) async fn monitor_client_txn_info(
    store: Arc<dyn ConfigStore>,
    client_info: AsyncVar<ClientDBInfo>,
) -> Result<()> {
    loop {
        let (rate, limit) = loop {
            let rate = store.get(CLIENT_TXN_SAMPLE_RATE_KEY).await;
            let limit = store.get(CLIENT_TXN_SIZE_LIMIT_KEY).await;
            match (rate, limit) {
                (Ok(rate), Ok(limit)) => break (rate, limit),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to read client txn knobs, retrying");
                    sleep(STORE_RETRY_DELAY).await;
                }
            }
        };

        let mut info = client_info.get();
        let mut present = false;
        if let Some(value) = rate {
            match decode_sample_rate(&value) {
                Ok(rate) => {
                    info.client_txn_info_sample_rate = rate;
                    present = true;
                }
                Err(e) => warn!(error = %e, "Malformed client txn sample rate"),
            }
        }
        if let Some(value) = limit {
            match decode_size_limit(&value) {
                Ok(limit) => {
                    info.client_txn_info_size_limit = limit;
                    present = true;
                }
                Err(e) => warn!(error = %e, "Malformed client txn size limit"),
            }
        }
        if present {
            info.id = Uuid::new_v4();
            client_info.set(info);
        }

        let rate_watch = store.watch(CLIENT_TXN_SAMPLE_RATE_KEY);
        let limit_watch = store.watch(CLIENT_TXN_SIZE_LIMIT_KEY);
        tokio::select! {
            _ = rate_watch.wait() => {}
            _ = limit_watch.wait() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{encode_process_class, MemoryConfigStore};
    use crate::types::ClassType;

    fn class_row(class_type: ClassType) -> Vec<u8> {
        encode_process_class(&ProcessClass::new(class_type, ClassSource::Database)).unwrap()
    }

    #[tokio::test]
    async fn test_migration_moves_legacy_rows() {
        let store = MemoryConfigStore::new();
        store
            .commit(vec![WriteOp::Set(
                format!("{}p1", PROCESS_CLASS_V0_PREFIX),
                class_row(ClassType::Storage),
            )])
            .await
            .unwrap();

        migrate_process_classes(&store).await.unwrap();

        assert!(store
            .get(PROCESS_CLASS_VERSION_KEY)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .get_range(PROCESS_CLASS_V0_PREFIX)
            .await
            .unwrap()
            .is_empty());
        let migrated = store
            .get(&process_class_key_for(&ProcessId::from("p1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            decode_process_class(&migrated).unwrap().class_type,
            ClassType::Storage
        );
    }

    #[tokio::test]
    async fn test_migration_skipped_when_versioned() {
        let store = MemoryConfigStore::new();
        store
            .commit(vec![
                WriteOp::Set(
                    PROCESS_CLASS_VERSION_KEY.to_string(),
                    PROCESS_CLASS_VERSION.to_vec(),
                ),
                WriteOp::Set(
                    format!("{}p1", PROCESS_CLASS_V0_PREFIX),
                    class_row(ClassType::Storage),
                ),
            ])
            .await
            .unwrap();

        migrate_process_classes(&store).await.unwrap();

        // Already at the current schema: legacy rows are left alone.
        assert_eq!(store.get_range(PROCESS_CLASS_V0_PREFIX).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_monitor_emits_overrides_and_rereads_on_change() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .commit(vec![WriteOp::Set(
                process_class_key_for(&ProcessId::from("p1")),
                class_row(ClassType::Storage),
            )])
            .await
            .unwrap();

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let _task = tokio::spawn(monitor_process_classes(
            store.clone() as Arc<dyn ConfigStore>,
            events_tx,
        ));

        let InternalEvent::ProcessClassesChanged(map) = events_rx.recv().await.unwrap() else {
            panic!("expected a process-classes event");
        };
        assert_eq!(map[&ProcessId::from("p1")].class_type, ClassType::Storage);

        // Add a row and bump the change key: a fresh map is emitted.
        store
            .commit(vec![
                WriteOp::Set(
                    process_class_key_for(&ProcessId::from("p2")),
                    class_row(ClassType::Tlog),
                ),
                WriteOp::Set(PROCESS_CLASS_CHANGE_KEY.to_string(), b"1".to_vec()),
            ])
            .await
            .unwrap();

        let InternalEvent::ProcessClassesChanged(map) = events_rx.recv().await.unwrap() else {
            panic!("expected a process-classes event");
        };
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_txn_knobs_republish_client_info() {
        let store = Arc::new(MemoryConfigStore::new());
        let client_info = AsyncVar::new(ClientDBInfo::default());
        let initial_id = client_info.get().id;

        let _task = tokio::spawn(monitor_client_txn_info(
            store.clone() as Arc<dyn ConfigStore>,
            client_info.clone(),
        ));
        tokio::task::yield_now().await;

        store
            .commit(vec![WriteOp::Set(
                CLIENT_TXN_SAMPLE_RATE_KEY.to_string(),
                0.25f64.to_le_bytes().to_vec(),
            )])
            .await
            .unwrap();

        // Wait for the republish.
        let mut rx = client_info.subscribe();
        loop {
            let info = rx.borrow_and_update().clone();
            if info.client_txn_info_sample_rate == 0.25 {
                assert_ne!(info.id, initial_id);
                break;
            }
            rx.changed().await.unwrap();
        }

        store
            .commit(vec![WriteOp::Set(
                CLIENT_TXN_SIZE_LIMIT_KEY.to_string(),
                9000i64.to_le_bytes().to_vec(),
            )])
            .await
            .unwrap();

        let mut rx = client_info.subscribe();
        loop {
            let info = rx.borrow_and_update().clone();
            if info.client_txn_info_size_limit == 9000 {
                assert_eq!(info.client_txn_info_sample_rate, 0.25);
                break;
            }
            rx.changed().await.unwrap();
        }
    }
}
