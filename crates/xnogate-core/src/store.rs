// ============================================================================
// LockStore — Embedded lock-state cache (redb)
// ============================================================================
// Persistent storage for the gate's cached verdict.
// Default path: ~/.xno-gate/gate.redb (override via XNO_GATE_DB_PATH env var)
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::gate::LockState;

const LOCK_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("lock_state");

const LOCK_STATE_KEY: &str = "lock_state:current";

/// On-disk record: the verdict flag plus a unix-seconds horizon.
#[derive(Debug, Serialize, Deserialize)]
struct StoredLockState {
    unlocked: bool,
    until: i64,
}

/// Embedded store for the cached unlock verdict.
pub struct LockStore {
    db: Database,
    path: PathBuf,
}

impl LockStore {
    /// Open (or create) the store at the given path.
    /// If `path` is None, uses XNO_GATE_DB_PATH env var or ~/.xno-gate/gate.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("XNO_GATE_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let gate_dir = home.join(".xno-gate");
            std::fs::create_dir_all(&gate_dir)
                .map_err(|e| anyhow!("Failed to create .xno-gate directory: {}", e))?;
            gate_dir.join("gate.redb")
        };

        debug!("Opening lock-state store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open lock-state store: {}", e))?;

        // Ensure the table exists by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(LOCK_STATE)
                .map_err(|e| anyhow!("Failed to create lock_state table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a verdict with its validity horizon.
    pub fn save(&self, unlocked: bool, until: DateTime<Utc>) -> Result<()> {
        let record = StoredLockState {
            unlocked,
            until: until.timestamp(),
        };
        let value = bincode::serialize(&record)
            .map_err(|e| anyhow!("Failed to serialize lock state: {}", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(LOCK_STATE)
                .map_err(|e| anyhow!("Failed to open lock_state table: {}", e))?;
            table
                .insert(LOCK_STATE_KEY, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert lock state: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored lock state: unlocked={} until={}", unlocked, until);
        Ok(())
    }

    /// The cached verdict, or `None` when nothing usable is stored. An
    /// unreadable record degrades to `None` rather than failing.
    pub fn load(&self) -> Option<LockState> {
        match self.try_load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Unreadable lock state cache: {} - treating as empty", e);
                None
            }
        }
    }

    fn try_load(&self) -> Result<Option<LockState>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(LOCK_STATE)
            .map_err(|e| anyhow!("Failed to open lock_state table: {}", e))?;

        match table
            .get(LOCK_STATE_KEY)
            .map_err(|e| anyhow!("Failed to get lock state: {}", e))?
        {
            Some(value) => {
                let record: StoredLockState = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize lock state: {}", e))?;
                let until = Utc
                    .timestamp_opt(record.until, 0)
                    .single()
                    .ok_or_else(|| anyhow!("Timestamp out of range: {}", record.until))?;
                Ok(Some(LockState::new(record.unlocked, until)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_store() -> LockStore {
        let path = std::env::temp_dir().join(format!("xno-gate-test-{}.redb", uuid::Uuid::new_v4()));
        LockStore::open(Some(path.to_str().unwrap())).unwrap()
    }

    #[test]
    fn test_empty_store_loads_none() {
        let store = temp_store();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = temp_store();
        // Second resolution: the store keeps unix seconds
        let until = Utc.timestamp_opt(Utc::now().timestamp() + 300, 0).unwrap();

        store.save(true, until).unwrap();
        let state = store.load().unwrap();
        assert!(state.unlocked);
        assert_eq!(state.until, until);

        store.save(false, until - Duration::seconds(600)).unwrap();
        let state = store.load().unwrap();
        assert!(!state.unlocked);
        assert_eq!(state.until, until - Duration::seconds(600));
    }

    #[test]
    fn test_corrupt_record_loads_none() {
        let store = temp_store();

        let write_txn = store.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(LOCK_STATE).unwrap();
            table.insert(LOCK_STATE_KEY, [0xffu8, 0xff, 0xff].as_slice()).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(store.load().is_none());
    }
}
