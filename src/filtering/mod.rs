//! Tag filtering: removed-tag rules and the blacklist.

mod blacklist;
mod tag_filter_list;

pub use blacklist::{Blacklist, BlacklistRule, SharedBlacklist};
pub use tag_filter_list::{FilterPolarity, TagFilter, TagFilterList};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    /// Characters a tag token may not contain
    static ref INVALID_TOKEN_PATTERN: Regex = Regex::new(r"[\s,]").unwrap();
}

/// Reasons a pattern is rejected while parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("pattern '{0}' matches every tag")]
    MatchesEverything(String),

    #[error("pattern '{0}' contains invalid characters")]
    InvalidCharacters(String),

    #[error("pattern '{0}' could not be compiled: {1}")]
    Regex(String, String),
}

/// A single tag pattern: an exact tag, or a glob using `*` as wildcard.
/// Matching is case-insensitive.
#[derive(Debug, Clone)]
pub enum TagPattern {
    Exact(String),
    Prefix(String),
    Wildcard { raw: String, regex: Regex },
}

impl TagPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let pattern = raw.trim().to_lowercase();
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }
        if INVALID_TOKEN_PATTERN.is_match(&pattern) {
            return Err(PatternError::InvalidCharacters(pattern));
        }
        if pattern.chars().all(|c| c == '*') {
            return Err(PatternError::MatchesEverything(pattern));
        }

        let stars = pattern.matches('*').count();
        if stars == 0 {
            return Ok(TagPattern::Exact(pattern));
        }
        if stars == 1 && pattern.ends_with('*') {
            let prefix = pattern.trim_end_matches('*').to_string();
            return Ok(TagPattern::Prefix(prefix));
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| PatternError::Regex(pattern.clone(), e.to_string()))?;
        Ok(TagPattern::Wildcard {
            raw: pattern,
            regex,
        })
    }

    /// The normalised textual form, as persisted.
    pub fn as_str(&self) -> &str {
        match self {
            TagPattern::Exact(tag) => tag,
            TagPattern::Prefix(prefix) => prefix,
            TagPattern::Wildcard { raw, .. } => raw,
        }
    }

    pub fn to_raw(&self) -> String {
        match self {
            TagPattern::Prefix(prefix) => format!("{}*", prefix),
            other => other.as_str().to_string(),
        }
    }

    /// `tag` must already be lower-cased.
    pub fn matches(&self, tag: &str) -> bool {
        match self {
            TagPattern::Exact(exact) => exact == tag,
            TagPattern::Prefix(prefix) => tag.starts_with(prefix.as_str()),
            TagPattern::Wildcard { regex, .. } => regex.is_match(tag),
        }
    }

    pub fn matches_any<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        tags.into_iter().any(|tag| self.matches(tag))
    }
}

impl PartialEq for TagPattern {
    fn eq(&self, other: &Self) -> bool {
        self.to_raw() == other.to_raw()
    }
}

impl Eq for TagPattern {}

impl std::fmt::Display for TagPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_raw())
    }
}

/// Lower-case every tag so patterns can match them directly.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
