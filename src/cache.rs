//! Per-file metadata tables keyed by file name: resolved place names and the
//! last time a photo was shown.
//!
//! The in-memory maps are authoritative for the running process. Every
//! mutation is written through to SQLite; a failed write is logged and
//! otherwise ignored, so the entry just won't survive a restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::error::CacheIoError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photo_location (
    file_name TEXT PRIMARY KEY NOT NULL,
    location  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS photo_history (
    file_name     TEXT PRIMARY KEY NOT NULL,
    last_shown_ms INTEGER NOT NULL
);
"#;

pub struct MetadataCache {
    locations: RwLock<HashMap<String, String>>,
    history: RwLock<HashMap<String, i64>>,
    db: Option<Mutex<Connection>>,
}

impl MetadataCache {
    pub fn open(path: &Path) -> Result<Self, CacheIoError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %err, "failed to create cache directory");
            }
        }
        let conn = Connection::open(path).map_err(|source| CacheIoError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let cache = Self::with_connection(conn)?;
        info!(
            path = %path.display(),
            locations = cache.location_count(),
            history = cache.history_count(),
            "metadata cache loaded"
        );
        Ok(cache)
    }

    /// Like [`MetadataCache::open`], but degrades to a process-local cache
    /// when the database cannot be opened.
    pub fn open_or_memory(path: &Path) -> Self {
        match Self::open(path) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(error = %err, "falling back to in-memory metadata cache");
                Self::in_memory()
            }
        }
    }

    pub fn in_memory() -> Self {
        match Connection::open_in_memory()
            .map_err(CacheIoError::from)
            .and_then(Self::with_connection)
        {
            Ok(cache) => cache,
            Err(err) => {
                warn!(error = %err, "cache database unavailable; keeping maps only");
                Self {
                    locations: RwLock::new(HashMap::new()),
                    history: RwLock::new(HashMap::new()),
                    db: None,
                }
            }
        }
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheIoError> {
        conn.execute_batch(SCHEMA)?;
        let locations = {
            let mut stmt = conn.prepare("SELECT file_name, location FROM photo_location")?;
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .filter_map(|r| r.ok())
                .collect::<HashMap<_, _>>()
        };
        let history = {
            let mut stmt = conn.prepare("SELECT file_name, last_shown_ms FROM photo_history")?;
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .filter_map(|r| r.ok())
                .collect::<HashMap<_, _>>()
        };
        Ok(Self {
            locations: RwLock::new(locations),
            history: RwLock::new(history),
            db: Some(Mutex::new(conn)),
        })
    }

    // ------------------------------------------------------------------
    // Location table
    // ------------------------------------------------------------------

    pub fn location(&self, name: &str) -> Option<String> {
        read(&self.locations).get(name).cloned()
    }

    /// First write wins; returns `false` if a place was already cached.
    pub fn insert_location(&self, name: &str, place: &str) -> bool {
        let mut map = write(&self.locations);
        if map.contains_key(name) {
            return false;
        }
        map.insert(name.to_string(), place.to_string());
        self.persist(
            "INSERT OR IGNORE INTO photo_location (file_name, location) VALUES (?1, ?2)",
            params![name, place],
        );
        true
    }

    pub fn remove_location(&self, name: &str) -> bool {
        let mut map = write(&self.locations);
        let removed = map.remove(name).is_some();
        self.persist(
            "DELETE FROM photo_location WHERE file_name = ?1",
            params![name],
        );
        removed
    }

    pub fn locations(&self) -> Vec<(String, String)> {
        let mut entries: Vec<_> = read(&self.locations)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort();
        entries
    }

    pub fn location_count(&self) -> usize {
        read(&self.locations).len()
    }

    pub fn clear_locations(&self) {
        let mut map = write(&self.locations);
        map.clear();
        self.persist("DELETE FROM photo_location", params![]);
        info!("location cache cleared");
    }

    // ------------------------------------------------------------------
    // History table
    // ------------------------------------------------------------------

    pub fn last_shown(&self, name: &str) -> Option<i64> {
        read(&self.history).get(name).copied()
    }

    /// Writes only move forward; an older timestamp is ignored.
    pub fn record_shown(&self, name: &str, epoch_ms: i64) -> bool {
        let mut map = write(&self.history);
        if map.get(name).is_some_and(|prev| *prev >= epoch_ms) {
            debug!(name, epoch_ms, "history write older than stored value; ignored");
            return false;
        }
        map.insert(name.to_string(), epoch_ms);
        self.persist(
            "INSERT OR REPLACE INTO photo_history (file_name, last_shown_ms) VALUES (?1, ?2)",
            params![name, epoch_ms],
        );
        true
    }

    pub fn remove_history(&self, name: &str) -> bool {
        let mut map = write(&self.history);
        let removed = map.remove(name).is_some();
        self.persist(
            "DELETE FROM photo_history WHERE file_name = ?1",
            params![name],
        );
        removed
    }

    /// Consistent snapshot of the whole history table.
    pub fn history(&self) -> HashMap<String, i64> {
        read(&self.history).clone()
    }

    pub fn history_entries(&self) -> Vec<(String, i64)> {
        let mut entries: Vec<_> = read(&self.history)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort();
        entries
    }

    pub fn history_count(&self) -> usize {
        read(&self.history).len()
    }

    pub fn clear_history(&self) {
        let mut map = write(&self.history);
        map.clear();
        self.persist("DELETE FROM photo_history", params![]);
        info!("history cache cleared");
    }

    // ------------------------------------------------------------------
    // Cascades
    // ------------------------------------------------------------------

    /// Drop every entry for `name`; called whenever its file is deleted.
    pub fn forget(&self, name: &str) {
        let location = self.remove_location(name);
        let history = self.remove_history(name);
        debug!(name, location, history, "cache entries forgotten");
    }

    pub fn clear_all(&self) {
        self.clear_locations();
        self.clear_history();
    }

    /// Remove entries whose name fails `keep`. Returns the number of names
    /// dropped from either table.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut orphans: Vec<String> = read(&self.locations)
            .keys()
            .chain(read(&self.history).keys())
            .filter(|name| !keep(name))
            .cloned()
            .collect();
        orphans.sort();
        orphans.dedup();
        for name in &orphans {
            self.forget(name);
        }
        orphans.len()
    }

    fn persist(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) {
        let Some(db) = &self.db else { return };
        let conn = db.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = conn.execute(sql, params) {
            let err = CacheIoError::from(err);
            warn!(error = %err, "metadata cache not persisted");
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
