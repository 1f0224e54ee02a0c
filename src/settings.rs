//! Persistent key-value settings.
//!
//! Keys are `/`-separated paths (`auth/pseudo`, `login/type`) mapped onto nested
//! TOML tables. [`TomlSettings`] is a single file, [`MixedSettings`] stacks
//! several stores so a site can override the profile-wide defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use thiserror::Error;
use toml::{Table, Value};
use tracing::{debug, warn};

/// Error types for settings persistence
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type for settings operations
pub type SettingsResult<T> = Result<T, SettingsError>;

/// A key-value store that can be flushed to disk.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn remove(&self, key: &str);
    fn sync(&self) -> SettingsResult<()>;

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Boolean(b) => Some(b),
            Value::String(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Value::Integer(i) => Some(i != 0),
            _ => None,
        }
    }

    fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn set_string(&self, key: &str, value: &str) {
        self.set(key, Value::String(value.to_string()));
    }
}

/// Settings backed by a single TOML file, or held purely in memory.
#[derive(Debug)]
pub struct TomlSettings {
    path: Option<PathBuf>,
    table: RwLock<Table>,
    dirty: AtomicBool,
}

impl TomlSettings {
    /// Open the file at `path`. A missing file yields empty settings; a corrupt
    /// one is moved aside to `<name>.backup` and replaced by empty settings.
    pub fn open(path: impl AsRef<Path>) -> SettingsResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let content = fs::read_to_string(&path)?;
            match content.parse::<Table>() {
                Ok(table) => table,
                Err(e) => {
                    warn!("Failed to parse settings {}: {}", path.display(), e);
                    let backup = path.with_extension("toml.backup");
                    if let Err(backup_err) = fs::rename(&path, &backup) {
                        warn!("Failed to back up corrupt settings: {}", backup_err);
                    }
                    Table::new()
                }
            }
        } else {
            debug!("Settings file {} does not exist yet", path.display());
            Table::new()
        };

        Ok(Self {
            path: Some(path),
            table: RwLock::new(table),
            dirty: AtomicBool::new(false),
        })
    }

    /// Settings that are never written anywhere.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: RwLock::new(Table::new()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Top-level keys, mostly useful for diagnostics.
    pub fn keys(&self) -> Vec<String> {
        self.table.read().keys().cloned().collect()
    }
}

fn split_key(key: &str) -> Vec<&str> {
    key.split('/').filter(|part| !part.is_empty()).collect()
}

fn lookup<'a>(table: &'a Table, parts: &[&str]) -> Option<&'a Value> {
    let (last, sections) = parts.split_last()?;
    let mut current = table;
    for section in sections {
        current = current.get(*section)?.as_table()?;
    }
    current.get(*last)
}

impl SettingsStore for TomlSettings {
    fn get(&self, key: &str) -> Option<Value> {
        let parts = split_key(key);
        lookup(&self.table.read(), &parts).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        let parts = split_key(key);
        let Some((last, sections)) = parts.split_last() else {
            return;
        };

        let mut table = self.table.write();
        let mut current: &mut Table = &mut table;
        for section in sections {
            let entry = current
                .entry(section.to_string())
                .or_insert_with(|| Value::Table(Table::new()));
            if !entry.is_table() {
                // A scalar sitting where a section is needed gets replaced.
                *entry = Value::Table(Table::new());
            }
            current = match entry {
                Value::Table(t) => t,
                _ => return,
            };
        }

        if current.get(*last) != Some(&value) {
            current.insert(last.to_string(), value);
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn remove(&self, key: &str) {
        let parts = split_key(key);
        let Some((last, sections)) = parts.split_last() else {
            return;
        };

        let mut table = self.table.write();
        let mut current: &mut Table = &mut table;
        for section in sections {
            current = match current.get_mut(*section) {
                Some(Value::Table(t)) => t,
                _ => return,
            };
        }
        if current.remove(*last).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn sync(&self) -> SettingsResult<()> {
        let Some(path) = &self.path else {
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        };
        if !self.is_dirty() && path.exists() {
            return Ok(());
        }

        let content = toml::to_string_pretty(&*self.table.read())?;
        write_atomic(path, content.as_bytes())?;
        self.dirty.store(false, Ordering::Release);
        debug!("Synced settings to {}", path.display());
        Ok(())
    }
}

/// Layered settings: reads hit the first store that has the key, writes go to
/// the first (most specific) store.
#[derive(Clone)]
pub struct MixedSettings {
    layers: Vec<Arc<dyn SettingsStore>>,
}

impl MixedSettings {
    pub fn new(layers: Vec<Arc<dyn SettingsStore>>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[Arc<dyn SettingsStore>] {
        &self.layers
    }
}

impl std::fmt::Debug for MixedSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixedSettings")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl SettingsStore for MixedSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.layers.iter().find_map(|layer| layer.get(key))
    }

    fn set(&self, key: &str, value: Value) {
        if let Some(first) = self.layers.first() {
            first.set(key, value);
        }
    }

    fn remove(&self, key: &str) {
        if let Some(first) = self.layers.first() {
            first.remove(key);
        }
    }

    fn sync(&self) -> SettingsResult<()> {
        for layer in &self.layers {
            layer.sync()?;
        }
        Ok(())
    }
}

/// Write `contents` next to `path` and rename it into place, so readers never
/// observe a half-written file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_nested_keys() {
        let settings = TomlSettings::in_memory();
        settings.set_string("auth/pseudo", "alice");
        settings.set("auth/remember", Value::Boolean(true));

        assert_eq!(settings.get_string("auth/pseudo").as_deref(), Some("alice"));
        assert_eq!(settings.get_bool("auth/remember"), Some(true));
        assert!(settings.get("auth/password").is_none());
        assert!(settings.get("missing/section/key").is_none());

        settings.remove("auth/pseudo");
        assert!(!settings.contains("auth/pseudo"));
        assert!(settings.contains("auth/remember"));
    }

    #[test]
    fn test_string_list_accepts_arrays_and_strings() {
        let settings = TomlSettings::in_memory();
        settings.set(
            "tokens",
            Value::Array(vec![Value::String("a".into()), Value::String("b".into())]),
        );
        settings.set_string("words", "x y  z");

        assert_eq!(settings.get_string_list("tokens"), vec!["a", "b"]);
        assert_eq!(settings.get_string_list("words"), vec!["x", "y", "z"]);
        assert!(settings.get_string_list("nothing").is_empty());
    }

    #[test]
    fn test_sync_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = TomlSettings::open(&path).unwrap();
        settings.set_string("login/type", "post");
        assert!(settings.is_dirty());
        settings.sync().unwrap();
        assert!(!settings.is_dirty());

        let reloaded = TomlSettings::open(&path).unwrap();
        assert_eq!(reloaded.get_string("login/type").as_deref(), Some("post"));
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "this is = = not toml").unwrap();

        let settings = TomlSettings::open(&path).unwrap();
        assert!(settings.keys().is_empty());
        assert!(dir.path().join("settings.toml.backup").exists());
    }

    #[test]
    fn test_mixed_settings_layering() {
        let site: Arc<dyn SettingsStore> = Arc::new(TomlSettings::in_memory());
        let profile: Arc<dyn SettingsStore> = Arc::new(TomlSettings::in_memory());
        profile.set_string("auth/pseudo", "default_user");
        profile.set_string("auth/password", "default_pass");
        site.set_string("auth/pseudo", "site_user");

        let mixed = MixedSettings::new(vec![site.clone(), profile.clone()]);
        assert_eq!(mixed.get_string("auth/pseudo").as_deref(), Some("site_user"));
        assert_eq!(mixed.get_string("auth/password").as_deref(), Some("default_pass"));

        mixed.set_string("auth/password", "site_pass");
        assert_eq!(site.get_string("auth/password").as_deref(), Some("site_pass"));
        assert_eq!(profile.get_string("auth/password").as_deref(), Some("default_pass"));
    }
}
