//! StateStore — redb-backed persistence for demand counts.
//!
//! Provides the write side of the metrics pipeline (`put_counts`), the
//! read side the aggregator polls (`get_count`), and bookkeeping for app
//! instances created by auto-provisioning. All values are JSON-serialized
//! into redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use autoprov_core::{AppInst, AppKey, AutoProvCounts, ZoneKey};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(kind: &'static str, value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Encode {
        kind,
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(kind: &'static str, key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        kind,
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Thread-safe count store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(COUNTS).map_err(map_err!(Table))?;
        txn.open_table(APP_INSTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Counts ─────────────────────────────────────────────────────

    /// Apply a batch of cumulative counts from one node.
    ///
    /// The whole batch is applied in one write transaction. Returns the
    /// number of entries applied; stale out-of-order entries are skipped.
    pub fn put_counts(&self, batch: &AutoProvCounts) -> StateResult<usize> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut applied = 0;
        {
            let mut table = txn.open_table(COUNTS).map_err(map_err!(Table))?;
            for entry in &batch.counts {
                let key = node_count_key(&entry.app_key, &entry.zone_key, &batch.node_name);
                let existing: Option<NodeCount> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        Some(decode("count", &key, guard.value())?)
                    }
                    None => None,
                };
                let mut record = existing.unwrap_or_else(|| {
                    NodeCount::new(entry.app_key.clone(), entry.zone_key.clone(), &batch.node_name)
                });
                if !record.observe(entry.count, batch.timestamp) {
                    trace!(%key, count = entry.count, "stale count report skipped");
                    continue;
                }
                let value = encode("count", &record)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                applied += 1;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(node = %batch.node_name, applied, "counts stored");
        Ok(applied)
    }

    /// Cumulative count for an (app, zone), summed over all nodes.
    ///
    /// Returns 0 if no node has reported demand yet.
    pub fn get_count(&self, app_key: &AppKey, zone_key: &ZoneKey) -> StateResult<u64> {
        let prefix = app_zone_prefix(app_key, zone_key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COUNTS).map_err(map_err!(Table))?;
        let mut total = 0u64;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: NodeCount = decode("count", key.value(), value.value())?;
                total += record.total();
            }
        }
        Ok(total)
    }

    /// List every per-node count record.
    pub fn list_node_counts(&self) -> StateResult<Vec<NodeCount>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COUNTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let record: NodeCount = decode("count", key.value(), value.value())?;
            results.push(record);
        }
        Ok(results)
    }

    /// Summed counts for every (app, zone) that has reported demand.
    pub fn list_count_totals(&self) -> StateResult<Vec<CountTotal>> {
        let mut totals: BTreeMap<(AppKey, ZoneKey), u64> = BTreeMap::new();
        for record in self.list_node_counts()? {
            *totals
                .entry((record.app_key.clone(), record.zone_key.clone()))
                .or_default() += record.total();
        }
        Ok(totals
            .into_iter()
            .map(|((app_key, zone_key), count)| CountTotal {
                app_key,
                zone_key,
                count,
            })
            .collect())
    }

    /// Delete every count record for an app. Returns number deleted.
    pub fn delete_counts_for_app(&self, app_key: &AppKey) -> StateResult<u32> {
        let prefix = format!("{app_key}|");
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(COUNTS).map_err(map_err!(Table))?;
            table
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| {
                    let (key, _) = entry.ok()?;
                    let k = key.value().to_string();
                    k.starts_with(&prefix).then_some(k)
                })
                .collect()
        };
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(COUNTS).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(app = %app_key, deleted = count, "counts deleted");
        Ok(count)
    }

    // ── App instances ──────────────────────────────────────────────

    /// Insert or update an app instance record.
    pub fn put_app_inst(&self, inst: &AppInst) -> StateResult<()> {
        let key = app_inst_key(inst);
        let value = encode("app instance", inst)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(APP_INSTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "app instance stored");
        Ok(())
    }

    /// Get the app instance for an (app, zone).
    pub fn get_app_inst(&self, app_key: &AppKey, zone_key: &ZoneKey) -> StateResult<Option<AppInst>> {
        let key = format!("{app_key}|{zone_key}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APP_INSTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let inst: AppInst = decode("app instance", &key, guard.value())?;
                Ok(Some(inst))
            }
            None => Ok(None),
        }
    }

    /// List all app instance records.
    pub fn list_app_insts(&self) -> StateResult<Vec<AppInst>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(APP_INSTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let inst: AppInst = decode("app instance", key.value(), value.value())?;
            results.push(inst);
        }
        Ok(results)
    }

    /// Delete the app instance for an (app, zone). Returns true if it existed.
    pub fn delete_app_inst(&self, app_key: &AppKey, zone_key: &ZoneKey) -> StateResult<bool> {
        let key = format!("{app_key}|{zone_key}");
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(APP_INSTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "app instance deleted");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprov_core::{AppInstState, AutoProvCount};

    fn app() -> AppKey {
        AppKey::new("acme", "game", "1.0")
    }

    fn zone(name: &str) -> ZoneKey {
        ZoneKey::new("op", name)
    }

    fn batch(node: &str, timestamp: u64, counts: &[(&str, u64)]) -> AutoProvCounts {
        AutoProvCounts {
            node_name: node.to_string(),
            timestamp,
            counts: counts
                .iter()
                .map(|(z, c)| AutoProvCount {
                    app_key: app(),
                    zone_key: zone(z),
                    count: *c,
                    process_now: false,
                })
                .collect(),
        }
    }

    fn test_inst(zone_name: &str) -> AppInst {
        AppInst {
            app_key: app(),
            zone_key: zone(zone_name),
            state: AppInstState::Ready,
            auto_provisioned: true,
            created_at: 1000,
        }
    }

    // ── Counts ─────────────────────────────────────────────────────

    #[test]
    fn count_is_zero_without_reports() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 0);
    }

    #[test]
    fn count_sums_across_nodes() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 10, &[("west", 4)])).unwrap();
        store.put_counts(&batch("dme-2", 10, &[("west", 6), ("east", 1)])).unwrap();

        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 10);
        assert_eq!(store.get_count(&app(), &zone("east")).unwrap(), 1);
    }

    #[test]
    fn count_latest_report_replaces_previous() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 10, &[("west", 4)])).unwrap();
        store.put_counts(&batch("dme-1", 20, &[("west", 7)])).unwrap();
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 7);
    }

    #[test]
    fn count_survives_node_restart() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 10, &[("west", 8)])).unwrap();
        store.put_counts(&batch("dme-1", 20, &[("west", 2)])).unwrap();
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 10);
    }

    #[test]
    fn stale_report_is_not_applied() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 20, &[("west", 8)])).unwrap();
        let applied = store.put_counts(&batch("dme-1", 15, &[("west", 7)])).unwrap();
        assert_eq!(applied, 0);
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 8);
    }

    #[test]
    fn count_totals_grouped_by_app_zone() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 10, &[("west", 4), ("east", 2)])).unwrap();
        store.put_counts(&batch("dme-2", 10, &[("west", 1)])).unwrap();

        let totals = store.list_count_totals().unwrap();
        assert_eq!(totals.len(), 2);
        let west = totals.iter().find(|t| t.zone_key == zone("west")).unwrap();
        assert_eq!(west.count, 5);
        assert_eq!(store.list_node_counts().unwrap().len(), 3);
    }

    #[test]
    fn delete_counts_for_app_leaves_others() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_counts(&batch("dme-1", 10, &[("west", 4)])).unwrap();
        let other = AutoProvCounts {
            node_name: "dme-1".to_string(),
            timestamp: 10,
            counts: vec![AutoProvCount {
                app_key: AppKey::new("acme", "chat", "2.0"),
                zone_key: zone("west"),
                count: 3,
                process_now: false,
            }],
        };
        store.put_counts(&other).unwrap();

        assert_eq!(store.delete_counts_for_app(&app()).unwrap(), 1);
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 0);
        assert_eq!(
            store
                .get_count(&AppKey::new("acme", "chat", "2.0"), &zone("west"))
                .unwrap(),
            3
        );
    }

    // ── App instances ──────────────────────────────────────────────

    #[test]
    fn app_inst_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let inst = test_inst("west");
        store.put_app_inst(&inst).unwrap();

        assert_eq!(store.get_app_inst(&app(), &zone("west")).unwrap(), Some(inst));
        assert_eq!(store.list_app_insts().unwrap().len(), 1);

        assert!(store.delete_app_inst(&app(), &zone("west")).unwrap());
        assert!(store.get_app_inst(&app(), &zone("west")).unwrap().is_none());
        assert!(!store.delete_app_inst(&app(), &zone("west")).unwrap());
    }

    #[test]
    fn corrupt_record_reports_key() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(APP_INSTS).unwrap();
            table.insert("broken", b"not json".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let err = store.list_app_insts().unwrap_err();
        assert!(matches!(err, StateError::Corrupt { kind: "app instance", ref key, .. } if key == "broken"));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_counts(&batch("dme-1", 10, &[("west", 42)])).unwrap();
            store.put_app_inst(&test_inst("west")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_count(&app(), &zone("west")).unwrap(), 42);
        assert!(store.get_app_inst(&app(), &zone("west")).unwrap().is_some());
    }
}
