//! Content-hash deduplication ledger.
//!
//! Maps a content hash (hex digest) to every path the content was saved under.
//! The whole ledger lives in memory behind a read-write lock so download
//! workers can query and record concurrently; changes are queued and written
//! to SQLite in one transaction on [`DedupDatabase::flush`], or automatically
//! once enough changes are pending.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, Result as SqliteResult, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors for ledger persistence
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ledger persistence
pub type DedupResult<T> = Result<T, DedupError>;

/// Pure dedup decision for a candidate download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Hash unknown, go ahead
    Accept,
    /// Already saved at exactly the target path
    DuplicateSamePath,
    /// Saved elsewhere; the caller decides what to do
    DuplicateOtherPath,
}

impl std::fmt::Display for DedupDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupDecision::Accept => write!(f, "accept"),
            DedupDecision::DuplicateSamePath => write!(f, "duplicate_same_path"),
            DedupDecision::DuplicateOtherPath => write!(f, "duplicate_other_path"),
        }
    }
}

/// Decision plus the first known path for the hash, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: DedupDecision,
    pub conflicting_path: Option<String>,
}

/// What to do with a download whose content is already saved elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Download it again anyway
    Save,
    /// Copy the existing file to the new target
    Copy,
    /// Move the existing file to the new target
    Move,
    /// Link the new target to the existing file
    Link,
    #[default]
    Skip,
}

/// Action a downloader should take for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    Save,
    Copy,
    Move,
    Link,
    Skip,
}

impl From<DuplicatePolicy> for DownloadAction {
    fn from(policy: DuplicatePolicy) -> Self {
        match policy {
            DuplicatePolicy::Save => DownloadAction::Save,
            DuplicatePolicy::Copy => DownloadAction::Copy,
            DuplicatePolicy::Move => DownloadAction::Move,
            DuplicatePolicy::Link => DownloadAction::Link,
            DuplicatePolicy::Skip => DownloadAction::Skip,
        }
    }
}

impl std::fmt::Display for DownloadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadAction::Save => write!(f, "save"),
            DownloadAction::Copy => write!(f, "copy"),
            DownloadAction::Move => write!(f, "move"),
            DownloadAction::Link => write!(f, "link"),
            DownloadAction::Skip => write!(f, "skip"),
        }
    }
}

#[derive(Debug, Clone)]
enum PendingChange {
    Insert(String, String),
    RemovePath(String, String),
    RemoveHash(String),
}

/// Default number of queued changes that triggers an automatic flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

pub struct DedupDatabase {
    connection: Mutex<Connection>,
    entries: RwLock<HashMap<String, Vec<String>>>,
    pending: Mutex<Vec<PendingChange>>,
    flush_threshold: usize,
}

fn normalize_hash(hash: &str) -> String {
    hash.trim().to_ascii_lowercase()
}

impl DedupDatabase {
    /// Open (or create) the ledger stored at `db_path`.
    pub fn open(db_path: impl AsRef<Path>, flush_threshold: usize) -> DedupResult<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let connection = Connection::open(db_path)?;
        let database = Self::with_connection(connection, flush_threshold)?;
        info!(
            "Loaded {} hashes from dedup ledger {}",
            database.len(),
            db_path.display()
        );
        Ok(database)
    }

    /// A ledger backed by an in-memory SQLite database.
    pub fn in_memory() -> DedupResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, DEFAULT_FLUSH_THRESHOLD)
    }

    fn with_connection(connection: Connection, flush_threshold: usize) -> DedupResult<Self> {
        Self::init_schema(&connection)?;
        let entries = Self::load_entries(&connection)?;

        Ok(Self {
            connection: Mutex::new(connection),
            entries: RwLock::new(entries),
            pending: Mutex::new(Vec::new()),
            flush_threshold: flush_threshold.max(1),
        })
    }

    fn init_schema(conn: &Connection) -> SqliteResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS md5s (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                md5 TEXT NOT NULL,
                path TEXT NOT NULL,
                added_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(md5, path)
            )",
            [],
        )
        .map_err(|e| {
            error!("Failed to create md5s table: {}", e);
            e
        })?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_md5s_md5 ON md5s(md5)", [])?;
        debug!("Dedup schema ready");
        Ok(())
    }

    fn load_entries(conn: &Connection) -> SqliteResult<HashMap<String, Vec<String>>> {
        let mut stmt = conn.prepare("SELECT md5, path FROM md5s ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            let md5: String = row.get(0)?;
            let path: String = row.get(1)?;
            Ok((md5, path))
        })?;

        let mut entries: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            match row {
                Ok((md5, path)) if !md5.trim().is_empty() && !path.is_empty() => {
                    let paths = entries.entry(normalize_hash(&md5)).or_default();
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }
                Ok((md5, path)) => warn!("Skipping malformed dedup row ({:?}, {:?})", md5, path),
                Err(e) => warn!("Skipping unreadable dedup row: {}", e),
            }
        }
        Ok(entries)
    }

    /// Every path recorded for `hash`; empty when unknown.
    pub fn lookup(&self, hash: &str) -> Vec<String> {
        self.entries
            .read()
            .get(&normalize_hash(hash))
            .cloned()
            .unwrap_or_default()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.entries.read().contains_key(&normalize_hash(hash))
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Decide what a download of `hash` to `target` amounts to. Never mutates.
    pub fn resolve_action(&self, hash: &str, target: &str) -> Resolution {
        let entries = self.entries.read();
        match entries.get(&normalize_hash(hash)) {
            None => Resolution {
                decision: DedupDecision::Accept,
                conflicting_path: None,
            },
            Some(paths) => {
                let decision = if paths.iter().any(|p| p == target) {
                    DedupDecision::DuplicateSamePath
                } else {
                    DedupDecision::DuplicateOtherPath
                };
                Resolution {
                    decision,
                    conflicting_path: paths.first().cloned(),
                }
            }
        }
    }

    /// Record `path` under `hash`. Returns false when the pair already existed.
    pub fn insert(&self, hash: &str, path: &str) -> bool {
        let hash = normalize_hash(hash);
        if hash.is_empty() || path.is_empty() {
            warn!("Ignoring dedup insert with empty hash or path");
            return false;
        }

        {
            let mut entries = self.entries.write();
            let paths = entries.entry(hash.clone()).or_default();
            if paths.iter().any(|p| p == path) {
                return false;
            }
            paths.push(path.to_string());
            self.pending
                .lock()
                .push(PendingChange::Insert(hash, path.to_string()));
        }

        self.maybe_flush();
        true
    }

    /// Remove the whole hash when `path` is `None`, otherwise only that path
    /// (dropping the hash once it has no path left). Removing something that
    /// is not recorded is a no-op and returns false.
    pub fn remove(&self, hash: &str, path: Option<&str>) -> bool {
        let hash = normalize_hash(hash);

        {
            let mut entries = self.entries.write();
            match path {
                None => {
                    if entries.remove(&hash).is_none() {
                        return false;
                    }
                    self.pending.lock().push(PendingChange::RemoveHash(hash));
                }
                Some(path) => {
                    let Some(paths) = entries.get_mut(&hash) else {
                        return false;
                    };
                    let before = paths.len();
                    paths.retain(|p| p != path);
                    if paths.len() == before {
                        debug!("Path {} is not recorded under {}", path, hash);
                        return false;
                    }
                    if paths.is_empty() {
                        entries.remove(&hash);
                    }
                    self.pending
                        .lock()
                        .push(PendingChange::RemovePath(hash, path.to_string()));
                }
            }
        }

        self.maybe_flush();
        true
    }

    /// Drop every path whose file no longer exists. Returns how many paths
    /// were removed.
    pub fn prune_missing(&self) -> usize {
        let missing: Vec<(String, String)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .flat_map(|(hash, paths)| {
                    paths
                        .iter()
                        .filter(|p| !Path::new(p.as_str()).exists())
                        .map(move |p| (hash.clone(), p.clone()))
                })
                .collect()
        };

        let removed = missing
            .iter()
            .filter(|(hash, path)| self.remove(hash, Some(path.as_str())))
            .count();
        if removed > 0 {
            info!("Pruned {} missing files from dedup ledger", removed);
        }
        removed
    }

    /// Import a legacy text ledger: one entry per line, a 32 character hash
    /// immediately followed by the path. Malformed lines are skipped.
    pub fn import_legacy(&self, text_path: impl AsRef<Path>) -> DedupResult<usize> {
        let content = fs::read_to_string(text_path.as_ref())?;
        let mut imported = 0;
        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            match (line.get(..32), line.get(32..)) {
                (Some(hash), Some(path))
                    if hash.chars().all(|c| c.is_ascii_hexdigit()) && !path.is_empty() =>
                {
                    if self.insert(hash, path) {
                        imported += 1;
                    }
                }
                _ => warn!("Skipping malformed legacy ledger line {}", number + 1),
            }
        }
        info!("Imported {} legacy dedup entries", imported);
        Ok(imported)
    }

    pub fn pending_changes(&self) -> usize {
        self.pending.lock().len()
    }

    fn maybe_flush(&self) {
        if self.pending_changes() >= self.flush_threshold {
            if let Err(e) = self.flush() {
                error!("Automatic dedup flush failed: {}", e);
            }
        }
    }

    /// Write every queued change in one transaction.
    pub fn flush(&self) -> DedupResult<()> {
        let mut conn = self.connection.lock();
        let changes: Vec<PendingChange> = std::mem::take(&mut *self.pending.lock());
        if changes.is_empty() {
            return Ok(());
        }

        let result = (|| -> SqliteResult<()> {
            let tx = conn.transaction()?;
            for change in &changes {
                match change {
                    PendingChange::Insert(hash, path) => {
                        tx.execute(
                            "INSERT OR IGNORE INTO md5s (md5, path) VALUES (?1, ?2)",
                            params![hash, path],
                        )?;
                    }
                    PendingChange::RemovePath(hash, path) => {
                        tx.execute(
                            "DELETE FROM md5s WHERE md5 = ?1 AND path = ?2",
                            params![hash, path],
                        )?;
                    }
                    PendingChange::RemoveHash(hash) => {
                        tx.execute("DELETE FROM md5s WHERE md5 = ?1", params![hash])?;
                    }
                }
            }
            tx.commit()
        })();

        match result {
            Ok(()) => {
                debug!("Flushed {} dedup changes", changes.len());
                Ok(())
            }
            Err(e) => {
                error!("Rolled back {} dedup changes: {}", changes.len(), e);
                let mut pending = self.pending.lock();
                let newer = std::mem::take(&mut *pending);
                *pending = changes;
                pending.extend(newer);
                Err(DedupError::Database(e))
            }
        }
    }
}

impl std::fmt::Debug for DedupDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupDatabase")
            .field("hashes", &self.len())
            .field("pending", &self.pending_changes())
            .finish()
    }
}

impl Drop for DedupDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("Failed to flush dedup ledger on drop: {}", e);
        }
    }
}
