//! The user profile.
//!
//! A [`Profile`] owns every piece of per-user state: favorites, tag lists,
//! the blacklist, the dedup ledger and the configured sources and sites. All
//! mutations go through its methods, mark the touched collection dirty and
//! broadcast one [`ProfileEvent`]. Nothing reaches the disk before a `sync*`
//! call (or the final sync when the profile is dropped).

mod persistence;
mod temp;

pub use temp::PurgeReport;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use toml::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::dedup::{
    DedupDatabase, DedupDecision, DedupError, DownloadAction, DuplicatePolicy,
    DEFAULT_FLUSH_THRESHOLD,
};
use crate::favorite::Favorite;
use crate::filtering::{Blacklist, SharedBlacklist, TagFilterList};
use crate::login::{HttpLogin, LoginConfig, create_login};
use crate::settings::{MixedSettings, SettingsError, SettingsStore, TomlSettings, write_atomic};
use crate::sites::{Site, SiteDefinition, SiteError, SiteRegistry, Source, SourceId, SourceRegistry};
use crate::transport::Transport;

use persistence::*;

/// Error types for profile operations
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Dedup error: {0}")]
    Dedup(#[from] DedupError),

    #[error("Site error: {0}")]
    Site(#[from] SiteError),

    #[error("Unknown site: {0}")]
    UnknownSite(String),
}

/// Result type for profile operations
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Change notification, one per mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    FavoritesChanged,
    KeptForLaterChanged,
    IgnoredChanged,
    BlacklistChanged,
    RemovedTagsChanged,
    AutoCompleteChanged,
    AdditionalTokensChanged,
    SourcesChanged,
    SitesChanged,
    SiteDeleted(String),
}

/// Behaviour switches passed in by the application.
#[derive(Debug, Clone)]
pub struct ProfileOptions {
    pub duplicate_policy: DuplicatePolicy,
    /// Keep ledger entries whose file was deleted, so the content is not downloaded again
    pub keep_deleted: bool,
    pub flush_threshold: usize,
    pub event_capacity: usize,
    pub temp_max_age_secs: u64,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Skip,
            keep_deleted: false,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            event_capacity: 64,
            temp_max_age_secs: 24 * 60 * 60,
        }
    }
}

/// A long-lived component owned by the profile.
///
/// Subsystems are shut down in reverse attach order when the profile drops.
pub trait Subsystem: Send {
    fn name(&self) -> &str;
    fn shutdown(&mut self) {}
}

#[derive(Debug, Default, Clone, Copy)]
struct DirtyFlags {
    favorites: bool,
    kept_for_later: bool,
    ignored: bool,
    blacklist: bool,
    auto_complete: bool,
    sources: bool,
    sites: bool,
}

pub struct Profile {
    path: PathBuf,
    settings: Arc<dyn SettingsStore>,
    transport: Arc<dyn Transport>,
    options: ProfileOptions,
    favorites: Vec<Favorite>,
    kept_for_later: Vec<String>,
    ignored: Vec<String>,
    removed_tags: TagFilterList,
    blacklist: SharedBlacklist,
    md5s: Arc<DedupDatabase>,
    sources: SourceRegistry,
    sites: SiteRegistry,
    auto_complete: Vec<String>,
    custom_auto_complete: Vec<String>,
    dirty: DirtyFlags,
    events: broadcast::Sender<ProfileEvent>,
    subsystems: Vec<Box<dyn Subsystem>>,
}

fn push_unique_tag(list: &mut Vec<String>, tag: &str) -> bool {
    let tag = tag.trim();
    if tag.is_empty() || list.iter().any(|known| known.eq_ignore_ascii_case(tag)) {
        return false;
    }
    list.push(tag.to_string());
    true
}

fn remove_tag(list: &mut Vec<String>, tag: &str) -> bool {
    let tag = tag.trim();
    let before = list.len();
    list.retain(|known| !known.eq_ignore_ascii_case(tag));
    before != list.len()
}

/// File name used for a site's own settings.
fn site_file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    format!("{}.toml", safe)
}

impl Profile {
    /// Load the profile stored in `path`, creating the directory when needed.
    pub fn open(
        path: impl AsRef<Path>,
        transport: Arc<dyn Transport>,
        options: ProfileOptions,
    ) -> ProfileResult<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        info!("Opening profile {}", path.display());

        let settings: Arc<dyn SettingsStore> =
            Arc::new(TomlSettings::open(path.join(SETTINGS_FILE))?);
        let md5s = DedupDatabase::open(path.join(MD5_DATABASE_FILE), options.flush_threshold)?;
        Self::import_legacy_md5s(&path, &md5s);

        let mut profile = Self::empty(path, settings, transport, options, md5s);
        profile.favorites = load_favorites(&profile.path.join(FAVORITES_FILE))?;
        profile.kept_for_later = load_tag_list(&profile.path.join(KEPT_FOR_LATER_FILE))?;
        profile.ignored = load_tag_list(&profile.path.join(IGNORED_FILE))?;
        profile.blacklist = SharedBlacklist::new(load_blacklist(&profile.path.join(BLACKLIST_FILE))?);
        profile.auto_complete = load_tag_list(&profile.path.join(AUTO_COMPLETE_FILE))?;
        profile.custom_auto_complete =
            load_tag_list(&profile.path.join(CUSTOM_AUTO_COMPLETE_FILE))?;
        profile.load_sources_and_sites()?;

        info!(
            favorites = profile.favorites.len(),
            blacklist = profile.blacklist.read().len(),
            md5s = profile.md5s.len(),
            sites = profile.sites.len(),
            "Profile loaded"
        );
        Ok(profile)
    }

    /// Build a profile from explicit state instead of loading it. Nothing is
    /// read from `path`, but sync writes there. The dedup ledger lives in memory.
    pub fn with_state(
        settings: Arc<dyn SettingsStore>,
        favorites: Vec<Favorite>,
        kept_for_later: Vec<String>,
        path: impl AsRef<Path>,
        transport: Arc<dyn Transport>,
        options: ProfileOptions,
    ) -> ProfileResult<Self> {
        let md5s = DedupDatabase::in_memory()?;
        let mut profile = Self::empty(path.as_ref().to_path_buf(), settings, transport, options, md5s);
        for favorite in favorites {
            if !profile.favorites.contains(&favorite) {
                profile.favorites.push(favorite);
            }
        }
        for tag in kept_for_later {
            push_unique_tag(&mut profile.kept_for_later, &tag);
        }
        profile.dirty.favorites = true;
        profile.dirty.kept_for_later = true;
        Ok(profile)
    }

    fn empty(
        path: PathBuf,
        settings: Arc<dyn SettingsStore>,
        transport: Arc<dyn Transport>,
        options: ProfileOptions,
        md5s: DedupDatabase,
    ) -> Self {
        let removed_tags = settings
            .get_string(REMOVED_TAGS_KEY)
            .map(|raw| TagFilterList::parse(&raw))
            .unwrap_or_default();
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        Self {
            path,
            settings,
            transport,
            options,
            favorites: Vec::new(),
            kept_for_later: Vec::new(),
            ignored: Vec::new(),
            removed_tags,
            blacklist: SharedBlacklist::default(),
            md5s: Arc::new(md5s),
            sources: SourceRegistry::new(),
            sites: SiteRegistry::new(),
            auto_complete: Vec::new(),
            custom_auto_complete: Vec::new(),
            dirty: DirtyFlags::default(),
            events,
            subsystems: Vec::new(),
        }
    }

    fn import_legacy_md5s(path: &Path, md5s: &DedupDatabase) {
        let legacy = path.join(LEGACY_MD5_FILE);
        if !legacy.exists() || !md5s.is_empty() {
            return;
        }
        match md5s.import_legacy(&legacy).and_then(|_| md5s.flush()) {
            Ok(()) => {
                if let Err(e) = fs::rename(&legacy, legacy.with_extension("txt.imported")) {
                    warn!("Failed to rename imported {}: {}", legacy.display(), e);
                }
            }
            Err(e) => error!("Failed to import {}: {}", legacy.display(), e),
        }
    }

    fn load_sources_and_sites(&mut self) -> ProfileResult<()> {
        if let Some(raw) = read_optional(&self.path.join(SOURCES_FILE))? {
            match SourceRegistry::from_toml(&raw) {
                Ok(sources) => self.sources = sources,
                Err(e) => warn!("Ignoring unreadable {}: {}", SOURCES_FILE, e),
            }
        }

        let Some(raw) = read_optional(&self.path.join(SITES_FILE))? else {
            return Ok(());
        };
        let definitions = match SiteRegistry::parse_definitions(&raw) {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", SITES_FILE, e);
                return Ok(());
            }
        };

        for (id, definition) in definitions {
            let Some(source) = self.sources.get(&definition.source).cloned() else {
                warn!(
                    "Skipping site '{}': unknown source '{}'",
                    id, definition.source
                );
                continue;
            };
            let settings = self.site_settings(&id)?;
            let site = Site::from_definition(&id, definition, &source, settings);
            self.sites.insert(site, &self.sources)?;
        }
        Ok(())
    }

    fn site_settings(&self, id: &str) -> ProfileResult<Arc<dyn SettingsStore>> {
        let own: Arc<dyn SettingsStore> = Arc::new(TomlSettings::open(
            self.path.join(SITES_DIR).join(site_file_name(id)),
        )?);
        Ok(Arc::new(MixedSettings::new(vec![own, self.settings.clone()])))
    }

    fn notify(&self, event: ProfileEvent) {
        debug!("Profile event {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProfileEvent> {
        self.events.subscribe()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn options(&self) -> &ProfileOptions {
        &self.options
    }

    /// True while some collection has changes not yet synced.
    pub fn has_unsynced_changes(&self) -> bool {
        let d = self.dirty;
        d.favorites
            || d.kept_for_later
            || d.ignored
            || d.blacklist
            || d.auto_complete
            || d.sources
            || d.sites
    }

    // Favorites

    pub fn favorites(&self) -> &[Favorite] {
        &self.favorites
    }

    pub fn favorite(&self, tag: &str) -> Option<&Favorite> {
        self.favorites.iter().find(|f| f.matches(tag))
    }

    /// Add a favorite, or replace the metadata of the one with the same tag.
    pub fn add_favorite(&mut self, favorite: Favorite) {
        match self.favorites.iter_mut().find(|f| **f == favorite) {
            Some(existing) => *existing = favorite,
            None => self.favorites.push(favorite),
        }
        self.dirty.favorites = true;
        self.notify(ProfileEvent::FavoritesChanged);
    }

    pub fn remove_favorite(&mut self, tag: &str) -> bool {
        let before = self.favorites.len();
        self.favorites.retain(|f| !f.matches(tag));
        let removed = before != self.favorites.len();
        self.dirty.favorites |= removed;
        self.notify(ProfileEvent::FavoritesChanged);
        removed
    }

    /// Record that the favorite was just viewed.
    pub fn touch_favorite(&mut self, tag: &str) -> bool {
        let touched = match self.favorites.iter_mut().find(|f| f.matches(tag)) {
            Some(favorite) => {
                favorite.touch();
                true
            }
            None => false,
        };
        self.dirty.favorites |= touched;
        self.notify(ProfileEvent::FavoritesChanged);
        touched
    }

    // Kept for later

    pub fn kept_for_later(&self) -> &[String] {
        &self.kept_for_later
    }

    pub fn add_kept_for_later(&mut self, tag: &str) -> bool {
        let added = push_unique_tag(&mut self.kept_for_later, tag);
        self.dirty.kept_for_later |= added;
        self.notify(ProfileEvent::KeptForLaterChanged);
        added
    }

    pub fn remove_kept_for_later(&mut self, tag: &str) -> bool {
        let removed = remove_tag(&mut self.kept_for_later, tag);
        self.dirty.kept_for_later |= removed;
        self.notify(ProfileEvent::KeptForLaterChanged);
        removed
    }

    // Ignored

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn is_ignored(&self, tag: &str) -> bool {
        self.ignored.iter().any(|t| t.eq_ignore_ascii_case(tag.trim()))
    }

    pub fn add_ignored(&mut self, tag: &str) -> bool {
        let added = push_unique_tag(&mut self.ignored, tag);
        self.dirty.ignored |= added;
        self.notify(ProfileEvent::IgnoredChanged);
        added
    }

    pub fn remove_ignored(&mut self, tag: &str) -> bool {
        let removed = remove_tag(&mut self.ignored, tag);
        self.dirty.ignored |= removed;
        self.notify(ProfileEvent::IgnoredChanged);
        removed
    }

    /// Replace the whole ignored list. Blank and duplicate tags are dropped.
    pub fn set_ignored(&mut self, tags: &[String]) {
        let mut ignored = Vec::with_capacity(tags.len());
        for tag in tags {
            push_unique_tag(&mut ignored, tag);
        }
        self.ignored = ignored;
        self.dirty.ignored = true;
        self.notify(ProfileEvent::IgnoredChanged);
    }

    // Removed tags

    pub fn removed_tags(&self) -> &TagFilterList {
        &self.removed_tags
    }

    /// Replace the removed-tag rules with the parsed form of `raw`.
    pub fn set_removed_tags(&mut self, raw: &str) {
        self.removed_tags = TagFilterList::parse(raw);
        self.settings
            .set_string(REMOVED_TAGS_KEY, &self.removed_tags.to_raw());
        self.notify(ProfileEvent::RemovedTagsChanged);
    }

    // Blacklist

    /// Copy of the current blacklist.
    pub fn blacklist(&self) -> Blacklist {
        self.blacklist.snapshot()
    }

    /// Handle for download workers; sees every later change.
    pub fn shared_blacklist(&self) -> SharedBlacklist {
        self.blacklist.clone()
    }

    pub fn is_blacklisted<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blacklist.is_blacklisted(tags)
    }

    pub fn add_blacklist(&mut self, rule: &str) -> bool {
        let added = self.blacklist.write().add(rule);
        self.dirty.blacklist |= added;
        self.notify(ProfileEvent::BlacklistChanged);
        added
    }

    pub fn remove_blacklist(&mut self, rule: &str) -> bool {
        let removed = self.blacklist.write().remove(rule);
        self.dirty.blacklist |= removed;
        self.notify(ProfileEvent::BlacklistChanged);
        removed
    }

    pub fn set_blacklist(&mut self, blacklist: Blacklist) {
        *self.blacklist.write() = blacklist;
        self.dirty.blacklist = true;
        self.notify(ProfileEvent::BlacklistChanged);
    }

    // Auto-complete

    /// System suggestions followed by the user's own, without duplicates.
    pub fn auto_complete(&self) -> Vec<String> {
        let mut merged = self.auto_complete.clone();
        for tag in &self.custom_auto_complete {
            push_unique_tag(&mut merged, tag);
        }
        merged
    }

    pub fn add_auto_complete(&mut self, tag: &str) -> bool {
        let known = self.auto_complete.iter().any(|t| t.eq_ignore_ascii_case(tag.trim()));
        let added = !known && push_unique_tag(&mut self.custom_auto_complete, tag);
        self.dirty.auto_complete |= added;
        self.notify(ProfileEvent::AutoCompleteChanged);
        added
    }

    // Additional tokens

    pub fn additional_tokens(&self) -> Vec<String> {
        self.settings.get_string_list(ADDITIONAL_TOKENS_KEY)
    }

    pub fn set_additional_tokens(&mut self, tokens: &[String]) {
        let values = tokens
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| Value::String(t.to_string()))
            .collect();
        self.settings.set(ADDITIONAL_TOKENS_KEY, Value::Array(values));
        self.notify(ProfileEvent::AdditionalTokensChanged);
    }

    // Dedup

    /// Ledger handle for download workers.
    pub fn md5_database(&self) -> Arc<DedupDatabase> {
        self.md5s.clone()
    }

    /// First known path for `hash`.
    pub fn md5_exists(&self, hash: &str) -> Option<String> {
        self.md5s.lookup(hash).into_iter().next()
    }

    pub fn add_md5(&self, hash: &str, path: &str) -> bool {
        self.md5s.insert(hash, path)
    }

    pub fn remove_md5(&self, hash: &str, path: Option<&str>) -> bool {
        self.md5s.remove(hash, path)
    }

    /// Decide what to do with a download of `hash` to `target`, together with
    /// the already saved file it concerns.
    ///
    /// Ledger paths whose file disappeared are dropped unless
    /// `keep_deleted` is set, in which case the content is skipped.
    pub fn md5_action(&self, hash: &str, target: &str) -> (DownloadAction, Option<String>) {
        loop {
            let resolution = self.md5s.resolve_action(hash, target);
            let existing = match resolution.decision {
                DedupDecision::Accept => return (DownloadAction::Save, None),
                DedupDecision::DuplicateSamePath => target.to_string(),
                DedupDecision::DuplicateOtherPath => match resolution.conflicting_path {
                    Some(path) => path,
                    None => return (DownloadAction::Save, None),
                },
            };

            if Path::new(&existing).exists() {
                let action = match resolution.decision {
                    DedupDecision::DuplicateSamePath => DownloadAction::Skip,
                    _ => self.options.duplicate_policy.into(),
                };
                return (action, Some(existing));
            }
            if self.options.keep_deleted {
                return (DownloadAction::Skip, Some(existing));
            }

            debug!("Dropping stale ledger path {} for {}", existing, hash);
            if !self.md5s.remove(hash, Some(&existing)) {
                return (DownloadAction::Save, None);
            }
        }
    }

    // Sources and sites

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    pub fn source(&self, id: &SourceId) -> Option<&Arc<Source>> {
        self.sources.get(id)
    }

    pub fn add_source(&mut self, source: Source) {
        self.sources.insert(source);
        self.dirty.sources = true;
        self.notify(ProfileEvent::SourcesChanged);
    }

    /// Remove a source no site uses any more.
    pub fn remove_source(&mut self, id: &SourceId) -> ProfileResult<bool> {
        if let Some(site) = self.sites.using_source(id) {
            return Err(SiteError::SourceInUse(id.clone(), site.id().to_string()).into());
        }
        let removed = self.sources.remove(id).is_some();
        self.dirty.sources |= removed;
        self.notify(ProfileEvent::SourcesChanged);
        Ok(removed)
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    pub fn site(&self, id: &str) -> Option<Arc<Site>> {
        self.sites.get(id).cloned()
    }

    /// Configure a site. Without `login` the source's default login is used.
    pub fn add_site(
        &mut self,
        id: &str,
        url: &str,
        source: SourceId,
        login: Option<LoginConfig>,
    ) -> ProfileResult<Arc<Site>> {
        let Some(source_def) = self.sources.get(&source).cloned() else {
            return Err(SiteError::UnknownSource {
                site: id.to_string(),
                source_id: source,
            }
            .into());
        };

        let definition = SiteDefinition {
            source,
            url: url.to_string(),
            login,
        };
        let site = Site::from_definition(id, definition, &source_def, self.site_settings(id)?);
        let site = self.sites.insert(site, &self.sources)?;
        self.dirty.sites = true;
        self.notify(ProfileEvent::SitesChanged);
        Ok(site)
    }

    pub fn remove_site(&mut self, id: &str) -> bool {
        let removed = self.sites.remove(id).is_some();
        if removed {
            let file = self.path.join(SITES_DIR).join(site_file_name(id));
            if let Err(e) = fs::remove_file(&file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", file.display(), e);
                }
            }
            self.dirty.sites = true;
        }
        self.notify(ProfileEvent::SiteDeleted(id.to_string()));
        removed
    }

    pub fn resolve_site(&self, url: &str) -> Option<Arc<Site>> {
        self.sites.resolve(url)
    }

    /// Sites matching `urls` by longest base-URL prefix; unmatched URLs are skipped.
    pub fn filtered_sites<I, S>(&self, urls: I) -> Vec<Arc<Site>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sites.filtered(urls)
    }

    /// Login strategy of a site, `None` when the site does not log in.
    pub fn login_for(&self, site_id: &str) -> ProfileResult<Option<Box<dyn HttpLogin>>> {
        let site = self
            .site(site_id)
            .ok_or_else(|| ProfileError::UnknownSite(site_id.to_string()))?;
        let settings = site.settings().clone();
        Ok(create_login(site, self.transport.clone(), settings))
    }

    // Subsystems

    pub fn attach_subsystem(&mut self, subsystem: Box<dyn Subsystem>) {
        debug!("Attaching subsystem {}", subsystem.name());
        self.subsystems.push(subsystem);
    }

    pub fn subsystems(&self) -> &[Box<dyn Subsystem>] {
        &self.subsystems
    }

    // Temp files

    pub fn temp_path(&self) -> PathBuf {
        self.path.join(TEMP_DIR)
    }

    /// Delete temp files older than `max_age_secs` seconds.
    pub fn purge_temp(&self, max_age_secs: u64) -> PurgeReport {
        let report = temp::purge_older_than(&self.temp_path(), Duration::from_secs(max_age_secs));
        info!(
            removed = report.removed,
            failed = report.failed,
            "Purged temp directory"
        );
        report
    }

    // Persistence

    /// Flush every dirty collection, the settings and the dedup ledger.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn sync(&mut self) -> ProfileResult<()> {
        self.sync_favorites()?;
        self.sync_kept_for_later()?;
        self.sync_ignored()?;
        self.sync_blacklist()?;
        self.sync_auto_complete()?;
        self.sync_sites()?;
        self.settings.sync()?;
        self.md5s.flush()?;
        debug!("Profile synced");
        Ok(())
    }

    pub fn sync_favorites(&mut self) -> ProfileResult<()> {
        if self.dirty.favorites {
            save_favorites(&self.path.join(FAVORITES_FILE), &self.favorites)?;
            self.dirty.favorites = false;
        }
        Ok(())
    }

    pub fn sync_kept_for_later(&mut self) -> ProfileResult<()> {
        if self.dirty.kept_for_later {
            save_tag_list(&self.path.join(KEPT_FOR_LATER_FILE), &self.kept_for_later)?;
            self.dirty.kept_for_later = false;
        }
        Ok(())
    }

    pub fn sync_ignored(&mut self) -> ProfileResult<()> {
        if self.dirty.ignored {
            save_tag_list(&self.path.join(IGNORED_FILE), &self.ignored)?;
            self.dirty.ignored = false;
        }
        Ok(())
    }

    pub fn sync_blacklist(&mut self) -> ProfileResult<()> {
        if self.dirty.blacklist {
            let blacklist = self.blacklist.snapshot();
            save_blacklist(&self.path.join(BLACKLIST_FILE), &blacklist)?;
            self.dirty.blacklist = false;
        }
        Ok(())
    }

    pub fn sync_auto_complete(&mut self) -> ProfileResult<()> {
        if self.dirty.auto_complete {
            save_tag_list(
                &self.path.join(CUSTOM_AUTO_COMPLETE_FILE),
                &self.custom_auto_complete,
            )?;
            self.dirty.auto_complete = false;
        }
        Ok(())
    }

    /// Write `sources.toml`, `sites.toml` and every site's own settings.
    pub fn sync_sites(&mut self) -> ProfileResult<()> {
        if self.dirty.sources {
            write_atomic(&self.path.join(SOURCES_FILE), self.sources.to_toml()?.as_bytes())?;
            self.dirty.sources = false;
        }
        if self.dirty.sites {
            write_atomic(&self.path.join(SITES_FILE), self.sites.to_toml()?.as_bytes())?;
            self.dirty.sites = false;
        }
        for site in self.sites.iter() {
            site.settings().sync()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("path", &self.path)
            .field("favorites", &self.favorites.len())
            .field("sites", &self.sites.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl Drop for Profile {
    fn drop(&mut self) {
        while let Some(mut subsystem) = self.subsystems.pop() {
            debug!("Shutting down subsystem {}", subsystem.name());
            subsystem.shutdown();
        }
        if let Err(e) = self.sync() {
            error!("Failed to sync profile {} on drop: {}", self.path.display(), e);
        }
    }
}
