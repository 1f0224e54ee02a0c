//! Per-user profile state for image-board clients: favorites, tag lists,
//! blacklists, the MD5 dedup ledger, site and source definitions, and the
//! login strategies used to authenticate against those sites.

pub mod config;
pub mod dedup;
pub mod favorite;
pub mod filtering;
pub mod logger;
pub mod login;
pub mod profile;
pub mod settings;
pub mod sites;
pub mod transport;

pub use config::{AppConfig, ConfigManager, init_config};
pub use dedup::{DedupDatabase, DownloadAction, DuplicatePolicy};
pub use favorite::Favorite;
pub use filtering::{Blacklist, SharedBlacklist, TagFilterList};
pub use logger::{Logger, init_logger};
pub use login::{HttpLogin, LoginConfig, LoginKind, LoginOutcome, create_login};
pub use profile::{Profile, ProfileError, ProfileEvent, ProfileOptions, Subsystem};
pub use settings::{MixedSettings, SettingsStore, TomlSettings};
pub use sites::{Site, SiteRegistry, Source, SourceId, SourceRegistry};
pub use transport::{NetworkConfig, ReqwestTransport, Transport};
