use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task;

use crate::dedup::{DEFAULT_FLUSH_THRESHOLD, DuplicatePolicy};
use crate::profile::ProfileOptions;
use crate::settings::write_atomic;
use crate::transport::NetworkConfig;

pub const CONFIG_FILE: &str = "config.toml";

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paths {
    pub profile_directory: String,
    pub log_directory: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logging {
    pub log_level: String,
    /// "json" or "plain"
    pub log_format: String,
    pub log_to_terminal: bool,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Network {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_idle_per_host: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Dedup {
    pub duplicate_policy: DuplicatePolicy,
    pub keep_deleted: bool,
    pub flush_threshold: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Temp {
    pub max_age_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Paths,
    pub logging: Logging,
    pub network: Network,
    pub dedup: Dedup,
    pub temp: Temp,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                profile_directory: "./profile".to_string(),
                log_directory: "./logs".to_string(),
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_format: "json".to_string(),
                log_to_terminal: true,
                log_to_file: true,
            },
            network: Network {
                user_agent: format!("board_profile/{}", env!("CARGO_PKG_VERSION")),
                connect_timeout_secs: 30,
                request_timeout_secs: 60,
                max_idle_per_host: 8,
            },
            dedup: Dedup {
                duplicate_policy: DuplicatePolicy::Skip,
                keep_deleted: false,
                flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            },
            temp: Temp {
                max_age_secs: 24 * 60 * 60,
            },
        }
    }
}

impl From<&AppConfig> for ProfileOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            duplicate_policy: config.dedup.duplicate_policy,
            keep_deleted: config.dedup.keep_deleted,
            flush_threshold: config.dedup.flush_threshold,
            temp_max_age_secs: config.temp.max_age_secs,
            ..ProfileOptions::default()
        }
    }
}

impl From<&AppConfig> for NetworkConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_idle_per_host: config.network.max_idle_per_host,
            connect_timeout: Duration::from_secs(config.network.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.network.request_timeout_secs),
            user_agent: config.network.user_agent.clone(),
            ..NetworkConfig::default()
        }
    }
}

// Event type for config reloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReloadEvent {
    AppConfig,
}

// Config manager to handle the application configuration file
pub struct ConfigManager {
    app_config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
    _watcher: Option<RecommendedWatcher>,
    reload_tx: broadcast::Sender<ConfigReloadEvent>,
}

impl ConfigManager {
    // Create a new ConfigManager instance
    pub async fn new(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            log::info!("Creating config directory: {}", config_dir.display());
            fs::create_dir_all(&config_dir)?;
        }

        let app_config = Self::load_app_config(&config_dir)?;
        let (reload_tx, _) = broadcast::channel(100);

        let mut manager = Self {
            app_config: Arc::new(RwLock::new(app_config)),
            config_dir,
            _watcher: None,
            reload_tx,
        };

        manager.create_default_configs()?;
        manager.setup_watcher()?;

        Ok(manager)
    }

    // Load app config from config.toml at startup. An unreadable file is backed
    // up and replaced with defaults.
    fn load_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let config_path = config_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            log::warn!("Config file not found: {}", config_path.display());
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                log::error!("Failed to parse {}: {}", CONFIG_FILE, e);
                log::info!("Backing up old config and creating new one with default values");

                if let Err(backup_err) =
                    fs::rename(&config_path, config_path.with_extension("toml.backup"))
                {
                    log::warn!("Failed to backup old config: {}", backup_err);
                }

                let default_config = AppConfig::default();
                match toml::to_string_pretty(&default_config) {
                    Ok(toml_string) => {
                        if let Err(write_err) = write_atomic(&config_path, toml_string.as_bytes()) {
                            log::error!("Failed to write new config file: {}", write_err);
                        }
                    }
                    Err(ser_err) => log::error!("Failed to serialize default config: {}", ser_err),
                }

                Ok(default_config)
            }
        }
    }

    // Re-read config.toml after a change on disk. Unlike the startup load this
    // never touches the file; a parse failure leaves the caller's config as is.
    fn reload_app_config(config_dir: &Path) -> ConfigResult<AppConfig> {
        let content = fs::read_to_string(config_dir.join(CONFIG_FILE))?;
        Ok(toml::from_str(&content)?)
    }

    // Setup file watcher for live reloading
    fn setup_watcher(&mut self) -> ConfigResult<()> {
        let config_dir = self.config_dir.clone();
        let reload_tx = self.reload_tx.clone();
        let app_config = self.app_config.clone();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;

        // The receiver blocks, so it gets its own thread.
        task::spawn_blocking(move || {
            for res in rx {
                match res {
                    Ok(Event {
                        kind: EventKind::Modify(_) | EventKind::Create(_),
                        paths,
                        ..
                    }) => {
                        let touched = paths
                            .iter()
                            .any(|p| p.file_name().and_then(|n| n.to_str()) == Some(CONFIG_FILE));
                        if !touched {
                            continue;
                        }
                        match Self::reload_app_config(&config_dir) {
                            Ok(new_config) => {
                                let changed = {
                                    let mut config = app_config.write();
                                    let changed = *config != new_config;
                                    *config = new_config;
                                    changed
                                };
                                if changed {
                                    let _ = reload_tx.send(ConfigReloadEvent::AppConfig);
                                    log::info!("Reloaded app config");
                                }
                            }
                            Err(e) => log::error!(
                                "Failed to reload app config, keeping current values: {}",
                                e
                            ),
                        }
                    }
                    Err(e) => log::error!("Watch error: {}", e),
                    _ => {}
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }

    // Get a subscription to config reload events
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigReloadEvent> {
        self.reload_tx.subscribe()
    }

    pub fn get_app_config(&self) -> AppConfig {
        self.app_config.read().clone()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    // Save app config to file
    pub fn save_app_config(&self, config: &AppConfig) -> ConfigResult<()> {
        let config_path = self.config_dir.join(CONFIG_FILE);
        let toml_string = toml::to_string_pretty(config)?;
        write_atomic(&config_path, toml_string.as_bytes())?;

        *self.app_config.write() = config.clone();
        Ok(())
    }

    // Create the default config file if it doesn't exist
    pub fn create_default_configs(&self) -> ConfigResult<()> {
        let config_path = self.config_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            let default_config = AppConfig::default();
            write_atomic(&config_path, toml::to_string_pretty(&default_config)?.as_bytes())?;
            *self.app_config.write() = default_config;
        }
        Ok(())
    }
}

// Helper function to create a ConfigManager instance
pub async fn init_config(config_dir: impl AsRef<Path>) -> ConfigResult<ConfigManager> {
    ConfigManager::new(config_dir).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_writes_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).await.unwrap();

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(manager.get_app_config(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_corrupt_config_is_replaced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "paths = [broken").unwrap();

        let manager = init_config(dir.path()).await.unwrap();
        assert_eq!(manager.get_app_config(), AppConfig::default());
        assert!(dir.path().join("config.toml.backup").exists());
    }

    #[tokio::test]
    async fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).await.unwrap();

        let mut config = manager.get_app_config();
        config.dedup.duplicate_policy = DuplicatePolicy::Link;
        config.dedup.keep_deleted = true;
        config.temp.max_age_secs = 60;
        manager.save_app_config(&config).unwrap();

        // The file on disk is never seen half written, even by the watcher.
        for _ in 0..3 {
            let reloaded = ConfigManager::reload_app_config(dir.path()).unwrap();
            assert_eq!(reloaded.dedup.duplicate_policy, DuplicatePolicy::Link);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!dir.path().join("config.toml.backup").exists());
        assert!(!dir.path().join("config.toml.tmp").exists());
        assert_eq!(manager.get_app_config().dedup.duplicate_policy, DuplicatePolicy::Link);

        let options = ProfileOptions::from(&manager.get_app_config());
        assert!(options.keep_deleted);
        assert_eq!(options.duplicate_policy, DuplicatePolicy::Link);
        assert_eq!(options.temp_max_age_secs, 60);
    }

    #[tokio::test]
    async fn test_broken_edit_keeps_current_config() {
        let dir = tempdir().unwrap();
        let manager = init_config(dir.path()).await.unwrap();

        let mut config = manager.get_app_config();
        config.dedup.duplicate_policy = DuplicatePolicy::Link;
        manager.save_app_config(&config).unwrap();

        fs::write(dir.path().join(CONFIG_FILE), "dedup = [broken").unwrap();
        assert!(ConfigManager::reload_app_config(dir.path()).is_err());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(manager.get_app_config().dedup.duplicate_policy, DuplicatePolicy::Link);
        assert!(!dir.path().join("config.toml.backup").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap(),
            "dedup = [broken"
        );
    }

    #[test]
    fn test_network_config_from_app_config() {
        let mut config = AppConfig::default();
        config.network.request_timeout_secs = 5;
        let network = NetworkConfig::from(&config);
        assert_eq!(network.request_timeout, Duration::from_secs(5));
        assert!(network.compression);
    }
}
