//! Sources and sites.
//!
//! A [`Source`] is a reusable definition shared by every site running the
//! same board software. A [`Site`] binds a source to a base URL, a login
//! configuration and its own credential store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use toml::Table;
use tracing::{debug, warn};

use crate::login::LoginConfig;
use crate::settings::SettingsStore;

/// Error types for the source and site registries
#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Site '{site}' references unknown source '{source_id}'")]
    UnknownSource { site: String, source_id: SourceId },

    #[error("Source '{0}' is still used by site '{1}'")]
    SourceInUse(SourceId, String),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

/// Result type for registry operations
pub type SiteResult<T> = Result<T, SiteError>;

/// Identifier of a source in the [`SourceRegistry`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reusable site definition: display name, URL templates and default login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(skip)]
    id: SourceId,
    pub name: String,
    /// Named URL templates, e.g. `search = "/posts.json?tags={tags}"`
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
    #[serde(default)]
    pub login: LoginConfig,
}

impl Source {
    pub fn new(id: impl Into<SourceId>, name: &str, login: LoginConfig) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            urls: BTreeMap::new(),
            login,
        }
    }

    pub fn with_url(mut self, name: &str, template: &str) -> Self {
        self.urls.insert(name.to_string(), template.to_string());
        self
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }
}

/// Persisted form of a site, one block per identifier in `sites.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDefinition {
    pub source: SourceId,
    pub url: String,
    /// Overrides the source's default login when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginConfig>,
}

/// A configured site.
pub struct Site {
    id: String,
    base_url: String,
    source: SourceId,
    login: LoginConfig,
    login_overridden: bool,
    settings: Arc<dyn SettingsStore>,
}

impl Site {
    pub fn new(
        id: &str,
        base_url: &str,
        source: SourceId,
        login: LoginConfig,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            id: id.to_string(),
            base_url: base_url.trim().to_string(),
            source,
            login,
            login_overridden: true,
            settings,
        }
    }

    /// Build a site from its persisted definition, falling back to the
    /// source's login when the definition has none.
    pub fn from_definition(
        id: &str,
        definition: SiteDefinition,
        source: &Source,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let login_overridden = definition.login.is_some();
        let login = definition.login.unwrap_or_else(|| source.login.clone());
        Self {
            id: id.to_string(),
            base_url: definition.url.trim().to_string(),
            source: definition.source,
            login,
            login_overridden,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source
    }

    pub fn login(&self) -> &LoginConfig {
        &self.login
    }

    /// Credential store of the site: its own settings stacked over the profile's.
    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn to_definition(&self) -> SiteDefinition {
        SiteDefinition {
            source: self.source.clone(),
            url: self.base_url.clone(),
            login: self.login_overridden.then(|| self.login.clone()),
        }
    }

    /// Base URL reduced to the form used for prefix matching.
    pub fn url_prefix(&self) -> String {
        normalize_url(&self.base_url)
    }
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("source", &self.source)
            .field("login", &self.login.kind)
            .finish()
    }
}

/// Drop the scheme, lower-case and trim trailing slashes.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let without_scheme = match url.find("://") {
        Some(index) => &url[index + 3..],
        None => url,
    };
    without_scheme.trim_end_matches('/').to_lowercase()
}

fn is_prefix_of(prefix: &str, url: &str) -> bool {
    if prefix.is_empty() || !url.starts_with(prefix) {
        return false;
    }
    matches!(url[prefix.len()..].chars().next(), None | Some('/' | '?' | '#'))
}

/// Parse a TOML document of `[identifier]` blocks, skipping malformed blocks.
fn parse_blocks<T, F>(raw: &str, what: &str, mut build: F) -> SiteResult<Vec<(String, T)>>
where
    F: FnMut(&str, toml::Value) -> Result<T, toml::de::Error>,
{
    let table: Table = raw.parse()?;
    let mut parsed = Vec::with_capacity(table.len());
    for (id, value) in table {
        match build(&id, value) {
            Ok(item) => parsed.push((id, item)),
            Err(e) => warn!("Skipping malformed {} '{}': {}", what, id, e),
        }
    }
    Ok(parsed)
}

/// All known sources, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, Arc<Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `sources.toml`. Malformed blocks are skipped with a warning.
    pub fn from_toml(raw: &str) -> SiteResult<Self> {
        let mut registry = Self::new();
        for (_, source) in parse_blocks(raw, "source", |id, value| {
            let mut source: Source = value.try_into()?;
            source.id = SourceId::from(id);
            Ok(source)
        })? {
            registry.insert(source);
        }
        Ok(registry)
    }

    pub fn to_toml(&self) -> SiteResult<String> {
        let blocks: BTreeMap<&str, &Source> = self
            .sources
            .iter()
            .map(|(id, source)| (id.as_str(), source.as_ref()))
            .collect();
        Ok(toml::to_string_pretty(&blocks)?)
    }

    /// Register a source, returning the one it replaced.
    pub fn insert(&mut self, source: Source) -> Option<Arc<Source>> {
        debug!("Registering source '{}'", source.id);
        self.sources.insert(source.id.clone(), Arc::new(source))
    }

    pub fn remove(&mut self, id: &SourceId) -> Option<Arc<Source>> {
        self.sources.remove(id)
    }

    pub fn get(&self, id: &SourceId) -> Option<&Arc<Source>> {
        self.sources.get(id)
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Source>> {
        self.sources.values()
    }
}

/// Configured sites, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<String, Arc<Site>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `sites.toml` into definitions. Malformed blocks are skipped.
    pub fn parse_definitions(raw: &str) -> SiteResult<Vec<(String, SiteDefinition)>> {
        parse_blocks(raw, "site", |_, value| value.try_into())
    }

    pub fn to_toml(&self) -> SiteResult<String> {
        let blocks: BTreeMap<&str, SiteDefinition> = self
            .sites
            .iter()
            .map(|(id, site)| (id.as_str(), site.to_definition()))
            .collect();
        Ok(toml::to_string_pretty(&blocks)?)
    }

    /// Register `site`, replacing any site with the same identifier. The site's
    /// source must be known.
    pub fn insert(&mut self, site: Site, sources: &SourceRegistry) -> SiteResult<Arc<Site>> {
        if !sources.contains(site.source_id()) {
            return Err(SiteError::UnknownSource {
                site: site.id().to_string(),
                source_id: site.source_id().clone(),
            });
        }

        let site = Arc::new(site);
        if self.sites.insert(site.id().to_string(), site.clone()).is_some() {
            debug!("Replaced site '{}'", site.id());
        }
        Ok(site)
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Site>> {
        self.sites.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Site>> {
        self.sites.get(id)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Site>> {
        self.sites.values()
    }

    /// First site using `source`, if any.
    pub fn using_source(&self, source: &SourceId) -> Option<&Arc<Site>> {
        self.sites.values().find(|site| site.source_id() == source)
    }

    /// The site whose base URL is the longest prefix of `url`.
    pub fn resolve(&self, url: &str) -> Option<Arc<Site>> {
        let url = normalize_url(url);
        self.sites
            .values()
            .map(|site| (site.url_prefix(), site))
            .filter(|(prefix, _)| is_prefix_of(prefix, &url))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, site)| site.clone())
    }

    /// Resolve each URL, skipping the ones no site matches. Each site appears once.
    pub fn filtered<I, S>(&self, urls: I) -> Vec<Arc<Site>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved: Vec<Arc<Site>> = Vec::new();
        for url in urls {
            match self.resolve(url.as_ref()) {
                Some(site) => {
                    if !resolved.iter().any(|known| Arc::ptr_eq(known, &site)) {
                        resolved.push(site);
                    }
                }
                None => debug!("No site matches '{}'", url.as_ref()),
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::login::LoginKind;
    use crate::settings::TomlSettings;

    fn settings() -> Arc<dyn SettingsStore> {
        Arc::new(TomlSettings::in_memory())
    }

    fn registries() -> (SourceRegistry, SiteRegistry) {
        let mut sources = SourceRegistry::new();
        sources.insert(Source::new("booru", "Booru", LoginConfig::default()));

        let mut sites = SiteRegistry::new();
        for (id, url) in [
            ("main", "https://example.com"),
            ("sub", "https://example.com/sub/"),
            ("other", "http://Other.org"),
        ] {
            sites
                .insert(
                    Site::new(id, url, SourceId::from("booru"), LoginConfig::default(), settings()),
                    &sources,
                )
                .unwrap();
        }
        (sources, sites)
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("HTTPS://Example.com/"), "example.com");
        assert_eq!(normalize_url("example.com/path//"), "example.com/path");
    }

    #[test]
    fn test_resolve_longest_prefix() {
        let (_, sites) = registries();
        assert_eq!(sites.resolve("https://example.com/posts/1").unwrap().id(), "main");
        assert_eq!(sites.resolve("http://example.com/sub/posts").unwrap().id(), "sub");
        assert_eq!(sites.resolve("other.org").unwrap().id(), "other");
        assert!(sites.resolve("https://example.community/").is_none());
        assert!(sites.resolve("https://unknown.net").is_none());
    }

    #[test]
    fn test_filtered_skips_unresolvable() {
        let (_, sites) = registries();
        let filtered = sites.filtered([
            "https://other.org/a",
            "https://nowhere.invalid",
            "https://example.com/x",
            "https://other.org/b",
        ]);
        let ids: Vec<&str> = filtered.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["other", "main"]);
    }

    #[test]
    fn test_insert_requires_known_source() {
        let (sources, mut sites) = registries();
        let orphan = Site::new(
            "orphan",
            "https://orphan.net",
            SourceId::from("missing"),
            LoginConfig::default(),
            settings(),
        );
        assert!(matches!(
            sites.insert(orphan, &sources),
            Err(SiteError::UnknownSource { .. })
        ));
        assert_eq!(sites.len(), 3);
    }

    #[test]
    fn test_sources_toml_round_trip() {
        let raw = r#"
            [danbooru]
            name = "Danbooru"
            urls = { search = "/posts.json?tags={tags}" }
            login = { kind = "get", url = "/session/new" }

            [broken]
            urls = "not a table"
        "#;
        let sources = SourceRegistry::from_toml(raw).unwrap();
        assert_eq!(sources.len(), 1);
        let source = sources.get(&SourceId::from("danbooru")).unwrap();
        assert_eq!(source.id().as_str(), "danbooru");
        assert_eq!(source.login.kind, LoginKind::Get);

        let again = SourceRegistry::from_toml(&sources.to_toml().unwrap()).unwrap();
        assert_eq!(
            again.get(&SourceId::from("danbooru")).map(|s| s.as_ref()),
            Some(source.as_ref())
        );
    }

    #[test]
    fn test_site_definitions() {
        let raw = r#"
            ["example.com"]
            source = "booru"
            url = "https://example.com"

            [bad]
            url = "https://bad.example"
        "#;
        let definitions = SiteRegistry::parse_definitions(raw).unwrap();
        assert_eq!(definitions.len(), 1);
        let (id, definition) = &definitions[0];
        assert_eq!(id, "example.com");
        assert!(definition.login.is_none());

        let source = Source::new(
            "booru",
            "Booru",
            LoginConfig::new(LoginKind::Post, "/login"),
        );
        let site = Site::from_definition(id, definition.clone(), &source, settings());
        assert_eq!(site.login().kind, LoginKind::Post);
        assert_eq!(site.to_definition(), *definition);
    }
}
