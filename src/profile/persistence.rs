//! On-disk layout of a profile directory.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::favorite::{Favorite, favorites_from_json, favorites_to_json};
use crate::filtering::Blacklist;
use crate::settings::write_atomic;

pub const SETTINGS_FILE: &str = "settings.toml";
pub const FAVORITES_FILE: &str = "favorites.json";
pub const KEPT_FOR_LATER_FILE: &str = "viewitlater.txt";
pub const IGNORED_FILE: &str = "ignore.txt";
pub const BLACKLIST_FILE: &str = "blacklist.txt";
pub const MD5_DATABASE_FILE: &str = "md5s.sqlite";
pub const LEGACY_MD5_FILE: &str = "md5s.txt";
pub const AUTO_COMPLETE_FILE: &str = "tags.txt";
pub const CUSTOM_AUTO_COMPLETE_FILE: &str = "custom_tags.txt";
pub const SOURCES_FILE: &str = "sources.toml";
pub const SITES_FILE: &str = "sites.toml";
pub const SITES_DIR: &str = "sites";
pub const TEMP_DIR: &str = "temp";

pub const REMOVED_TAGS_KEY: &str = "removed_tags";
pub const ADDITIONAL_TOKENS_KEY: &str = "additional_tokens";

/// Contents of `path`, or `None` when it does not exist.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// One tag per line, trimmed, empty lines and case-insensitive duplicates dropped.
pub fn parse_tag_lines(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for line in content.lines() {
        let tag = line.trim();
        if tag.is_empty() {
            continue;
        }
        if tags.iter().any(|known| known.eq_ignore_ascii_case(tag)) {
            debug!("Dropping duplicate tag line '{}'", tag);
            continue;
        }
        tags.push(tag.to_string());
    }
    tags
}

pub fn load_tag_list(path: &Path) -> io::Result<Vec<String>> {
    Ok(read_optional(path)?
        .map(|content| parse_tag_lines(&content))
        .unwrap_or_default())
}

pub fn save_tag_list(path: &Path, tags: &[String]) -> io::Result<()> {
    let mut content = tags.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

/// Favorites from `favorites.json`. A corrupt document is moved aside and
/// treated as empty.
pub fn load_favorites(path: &Path) -> io::Result<Vec<Favorite>> {
    let Some(content) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    match favorites_from_json(&content) {
        Ok(favorites) => Ok(favorites),
        Err(e) => {
            warn!("Failed to parse {}: {}", path.display(), e);
            let backup = path.with_extension("json.backup");
            if let Err(backup_err) = fs::rename(path, &backup) {
                warn!("Failed to back up corrupt favorites: {}", backup_err);
            }
            Ok(Vec::new())
        }
    }
}

pub fn save_favorites(path: &Path, favorites: &[Favorite]) -> io::Result<()> {
    let content = favorites_to_json(favorites).map_err(io::Error::other)?;
    write_atomic(path, content.as_bytes())
}

pub fn load_blacklist(path: &Path) -> io::Result<Blacklist> {
    Ok(read_optional(path)?
        .map(|content| Blacklist::parse(&content))
        .unwrap_or_default())
}

pub fn save_blacklist(path: &Path, blacklist: &Blacklist) -> io::Result<()> {
    let mut content = blacklist.to_raw();
    if !content.is_empty() {
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tag_lines() {
        assert_eq!(
            parse_tag_lines("wolf\n\n  fox \nWOLF\r\nrating:s\n"),
            vec!["wolf", "fox", "rating:s"]
        );
    }

    #[test]
    fn test_tag_list_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(IGNORED_FILE);
        assert!(load_tag_list(&path).unwrap().is_empty());

        let tags = vec!["a".to_string(), "b c".to_string()];
        save_tag_list(&path, &tags).unwrap();
        assert_eq!(load_tag_list(&path).unwrap(), tags);
    }

    #[test]
    fn test_corrupt_favorites_are_backed_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(FAVORITES_FILE);
        fs::write(&path, "not json").unwrap();

        assert!(load_favorites(&path).unwrap().is_empty());
        assert!(!path.exists());
        assert!(dir.path().join("favorites.json.backup").exists());
    }
}
