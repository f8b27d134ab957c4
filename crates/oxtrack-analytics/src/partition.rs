use crate::error::AnalyticsError;
use crate::SchemaInfo;
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing;

const EVENTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    project_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    level TEXT NOT NULL,
    platform TEXT NOT NULL,
    message TEXT NOT NULL,
    exceptions TEXT NOT NULL DEFAULT '[]',
    user_id TEXT,
    user_name TEXT,
    user_email TEXT,
    user_ip TEXT,
    tags TEXT NOT NULL DEFAULT '{}',
    tag_hashes TEXT NOT NULL DEFAULT '[]',
    release_version TEXT,
    environment TEXT,
    server_name TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    retention_days INTEGER NOT NULL DEFAULT 90
);
CREATE INDEX IF NOT EXISTS idx_events_project_time
    ON events(project_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_group_time
    ON events(group_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_time
    ON events(timestamp);
";

/// Daily SQLite partitions for the append-only event stream, one `.db` file
/// per UTC day, opened lazily and cached.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d").to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open_partition(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(EVENTS_SCHEMA)?;
        Ok(conn)
    }

    pub fn get_or_create(&self, ts: DateTime<Utc>) -> Result<String> {
        let key = Self::partition_key(ts);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let conn = self.open_partition(&self.partition_path(&key))?;
            tracing::info!(partition = %key, "Created new event partition");
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or(AnalyticsError::PartitionNotFound(key.to_string()))?;
        f(conn)
    }

    /// Keys of all partitions overlapping `[from, to]`, loading any that
    /// exist on disk but are not yet cached.
    pub fn partitions_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let from_date = from.date_naive();
        let to_date = to.date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    let conn = self.open_partition(&path)?;
                    conns.insert(key.clone(), conn);
                }
                keys.push(key);
            }
            date = date.succ_opt().unwrap_or(date);
        }
        Ok(keys)
    }

    /// Keys of every partition on disk, oldest first.
    pub fn all_partitions(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if NaiveDate::parse_from_str(date_str, "%Y-%m-%d").is_ok() {
                    keys.push(date_str.to_string());
                }
            }
        }
        keys.sort();
        // Ensure each is loaded so with_partition works.
        let mut conns = self.lock_connections();
        for key in &keys {
            if !conns.contains_key(key) {
                let conn = self.open_partition(&self.partition_path(key))?;
                conns.insert(key.clone(), conn);
            }
        }
        Ok(keys)
    }

    pub fn cleanup_older_than(&self, retention_days: u32) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let cutoff_date = cutoff.date_naive();
        let mut removed = 0u32;

        // Collect expired partition dates first
        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        // Delete expired partitions (best-effort: log errors, don't abort)
        for (date_str, db_path) in &expired {
            // Remove from connection cache (drops the Connection, triggering
            // WAL checkpoint)
            {
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "Failed to remove partition file");
                continue;
            }
            // SQLite WAL mode auxiliary files
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{date_str}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "Failed to remove WAL auxiliary file");
                    }
                }
            }

            tracing::info!(partition = %date_str, "Removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }

    /// Per-partition schema/size information for the diagnostics surface.
    pub fn list_schema_info(&self) -> Result<Vec<SchemaInfo>> {
        let mut infos = Vec::new();
        for key in self.all_partitions()? {
            let path = self.partition_path(&key);
            let size_bytes = std::fs::metadata(&path)?.len();
            let row_count = self.with_partition(&key, |conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
                Ok(n as u64)
            })?;
            infos.push(SchemaInfo {
                partition: key,
                table: "events".to_string(),
                row_count,
                size_bytes,
                path: path.to_string_lossy().to_string(),
            });
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_cleanup_removes_expired_partitions_and_wal_files() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let old_ts = Utc::now() - Duration::days(10);
        let old_key = pm.get_or_create(old_ts).unwrap();
        let old_db = tmp.path().join(format!("{old_key}.db"));

        let today_key = pm.get_or_create(Utc::now()).unwrap();
        let today_db = tmp.path().join(format!("{today_key}.db"));

        assert!(old_db.exists(), "old partition should exist");
        assert!(today_db.exists(), "today partition should exist");

        // Simulate WAL/SHM files for the old partition
        let old_wal = tmp.path().join(format!("{old_key}.db-wal"));
        let old_shm = tmp.path().join(format!("{old_key}.db-shm"));
        std::fs::write(&old_wal, b"wal data").unwrap();
        std::fs::write(&old_shm, b"shm data").unwrap();

        let removed = pm.cleanup_older_than(7).unwrap();

        assert_eq!(removed, 1);
        assert!(!old_db.exists(), "old .db should be deleted");
        assert!(!old_wal.exists(), "old .db-wal should be deleted");
        assert!(!old_shm.exists(), "old .db-shm should be deleted");
        assert!(today_db.exists(), "today partition should still exist");
    }

    #[test]
    fn test_cleanup_keeps_recent_partitions() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        for i in 0..3 {
            let ts = Utc::now() - Duration::days(i);
            pm.get_or_create(ts).unwrap();
        }

        let removed = pm.cleanup_older_than(7).unwrap();
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_unknown_partition_yields_typed_error() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let err = pm.with_partition("1970-01-01", |_| Ok(())).unwrap_err();
        match err.downcast_ref::<AnalyticsError>() {
            Some(AnalyticsError::PartitionNotFound(key)) => assert_eq!(key, "1970-01-01"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_partitions_in_range_loads_from_disk() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        {
            let pm = PartitionManager::new(tmp.path()).unwrap();
            pm.get_or_create(now).unwrap();
            pm.get_or_create(now - Duration::days(1)).unwrap();
        }
        // Fresh manager: partitions exist only on disk.
        let pm = PartitionManager::new(tmp.path()).unwrap();
        let keys = pm
            .partitions_in_range(now - Duration::days(2), now)
            .unwrap();
        assert_eq!(keys.len(), 2);
    }
}
