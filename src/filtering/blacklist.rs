//! Blacklist rule engine.
//!
//! A blacklist is a set of rule-groups, one per line. Every plain token of a
//! group is required; tokens written with a leading `-` are allow overrides.
//! An item is blacklisted when at least one group has all its required tokens
//! present and none of its allow tokens present.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{PatternError, TagPattern, normalize_tags};

/// One conjunctive rule-group with its allow overrides
#[derive(Debug, Clone)]
pub struct BlacklistRule {
    required: Vec<TagPattern>,
    allow: Vec<TagPattern>,
}

impl BlacklistRule {
    /// Parse a single line such as `"gore blood -comic"`.
    pub fn parse(line: &str) -> Result<Self, PatternError> {
        let mut required = Vec::new();
        let mut allow = Vec::new();

        for token in line.split_whitespace() {
            match token.strip_prefix('-') {
                Some(rest) => push_unique(&mut allow, TagPattern::parse(rest)?),
                None => push_unique(&mut required, TagPattern::parse(token)?),
            }
        }

        if required.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { required, allow })
    }

    pub fn required(&self) -> &[TagPattern] {
        &self.required
    }

    pub fn allow(&self) -> &[TagPattern] {
        &self.allow
    }

    /// `tags` must be lower-cased.
    pub fn matches(&self, tags: &[String]) -> bool {
        let all_required = self
            .required
            .iter()
            .all(|pattern| pattern.matches_any(tags.iter().map(String::as_str)));
        if !all_required {
            return false;
        }
        !self
            .allow
            .iter()
            .any(|pattern| pattern.matches_any(tags.iter().map(String::as_str)))
    }

    /// Canonical form used for equality: sorted tokens.
    fn key(&self) -> (Vec<String>, Vec<String>) {
        let mut required: Vec<String> = self.required.iter().map(TagPattern::to_raw).collect();
        let mut allow: Vec<String> = self.allow.iter().map(TagPattern::to_raw).collect();
        required.sort();
        allow.sort();
        (required, allow)
    }

    pub fn to_line(&self) -> String {
        let mut tokens: Vec<String> = self.required.iter().map(TagPattern::to_raw).collect();
        tokens.extend(self.allow.iter().map(|p| format!("-{}", p.to_raw())));
        tokens.join(" ")
    }
}

impl PartialEq for BlacklistRule {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BlacklistRule {}

impl std::fmt::Display for BlacklistRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_line())
    }
}

fn push_unique(patterns: &mut Vec<TagPattern>, pattern: TagPattern) {
    if !patterns.contains(&pattern) {
        patterns.push(pattern);
    }
}

/// The user's blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    rules: Vec<BlacklistRule>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one rule-group per line. Invalid lines are skipped with a warning.
    pub fn parse(raw: &str) -> Self {
        let mut blacklist = Self::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match BlacklistRule::parse(line) {
                Ok(rule) => {
                    blacklist.add_rule(rule);
                }
                Err(e) => warn!("Skipping blacklist line '{}': {}", line, e),
            }
        }
        blacklist
    }

    /// Add a rule-group from its textual form. Returns false when it was
    /// invalid or already present.
    pub fn add(&mut self, line: &str) -> bool {
        match BlacklistRule::parse(line) {
            Ok(rule) => self.add_rule(rule),
            Err(e) => {
                warn!("Refusing blacklist rule '{}': {}", line, e);
                false
            }
        }
    }

    pub fn add_rule(&mut self, rule: BlacklistRule) -> bool {
        if self.rules.contains(&rule) {
            debug!("Blacklist rule '{}' already present", rule);
            return false;
        }
        self.rules.push(rule);
        true
    }

    /// Remove the rule-group equal to `line` (token order does not matter).
    pub fn remove(&mut self, line: &str) -> bool {
        let Ok(target) = BlacklistRule::parse(line) else {
            return false;
        };
        let before = self.rules.len();
        self.rules.retain(|rule| *rule != target);
        before != self.rules.len()
    }

    pub fn rules(&self) -> &[BlacklistRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn is_blacklisted<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        self.rules.iter().any(|rule| rule.matches(&tags))
    }

    /// Every rule-group that blocks `tags`, for display purposes.
    pub fn matching_rules<I, S>(&self, tags: I) -> Vec<&BlacklistRule>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        self.rules.iter().filter(|rule| rule.matches(&tags)).collect()
    }

    pub fn to_raw(&self) -> String {
        self.rules
            .iter()
            .map(BlacklistRule::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Blacklist handle shared with download workers.
#[derive(Debug, Clone, Default)]
pub struct SharedBlacklist {
    inner: Arc<RwLock<Blacklist>>,
}

impl SharedBlacklist {
    pub fn new(blacklist: Blacklist) -> Self {
        Self {
            inner: Arc::new(RwLock::new(blacklist)),
        }
    }

    pub fn is_blacklisted<I, S>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.read().is_blacklisted(tags)
    }

    /// Copy of the current rules.
    pub fn snapshot(&self) -> Blacklist {
        self.inner.read().clone()
    }

    pub(crate) fn write(&self) -> parking_lot::RwLockWriteGuard<'_, Blacklist> {
        self.inner.write()
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, Blacklist> {
        self.inner.read()
    }
}
