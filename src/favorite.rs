use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Version written into `favorites.json`
pub const FAVORITES_FORMAT_VERSION: u32 = 1;

/// A favorite tag or search query.
///
/// Two favorites are equal when their tags match ignoring case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<PathBuf>,
    pub last_viewed: DateTime<Utc>,
}

impl Favorite {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.trim().to_string(),
            thumbnail: None,
            last_viewed: Utc::now(),
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<PathBuf>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_last_viewed(mut self, last_viewed: DateTime<Utc>) -> Self {
        self.last_viewed = last_viewed;
        self
    }

    pub fn matches(&self, tag: &str) -> bool {
        self.tag.to_lowercase() == tag.trim().to_lowercase()
    }

    /// Mark the favorite as viewed now.
    pub fn touch(&mut self) {
        self.last_viewed = Utc::now();
    }
}

impl PartialEq for Favorite {
    fn eq(&self, other: &Self) -> bool {
        self.matches(&other.tag)
    }
}

impl Eq for Favorite {}

#[derive(Serialize)]
struct FavoritesFileRef<'a> {
    version: u32,
    favorites: &'a [Favorite],
}

#[derive(Deserialize)]
struct FavoritesFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    favorites: Vec<serde_json::Value>,
}

/// Serialize favorites to the `favorites.json` document.
pub fn favorites_to_json(favorites: &[Favorite]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&FavoritesFileRef {
        version: FAVORITES_FORMAT_VERSION,
        favorites,
    })
}

/// Parse a `favorites.json` document. Records that cannot be read are
/// skipped with a warning; a document that is not JSON at all is an error.
pub fn favorites_from_json(raw: &str) -> serde_json::Result<Vec<Favorite>> {
    let file: FavoritesFile = serde_json::from_str(raw)?;
    if file.version > FAVORITES_FORMAT_VERSION {
        warn!(
            "favorites.json has version {}, newer than {}",
            file.version, FAVORITES_FORMAT_VERSION
        );
    }

    let mut favorites: Vec<Favorite> = Vec::with_capacity(file.favorites.len());
    for (index, record) in file.favorites.into_iter().enumerate() {
        match serde_json::from_value::<Favorite>(record) {
            Ok(favorite) if favorite.tag.trim().is_empty() => {
                warn!("Skipping favorite #{} with an empty tag", index)
            }
            Ok(favorite) if favorites.contains(&favorite) => {
                warn!("Skipping duplicate favorite '{}'", favorite.tag)
            }
            Ok(favorite) => favorites.push(favorite),
            Err(e) => warn!("Skipping malformed favorite #{}: {}", index, e),
        }
    }
    Ok(favorites)
}
