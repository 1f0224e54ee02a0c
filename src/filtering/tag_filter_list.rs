use tracing::warn;

use super::{PatternError, TagPattern};

/// Whether a matching tag is stripped or explicitly kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPolarity {
    Remove,
    /// Written with a leading `-`; shields matching tags from every removal rule.
    Keep,
}

/// One removed-tag rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub pattern: TagPattern,
    pub polarity: FilterPolarity,
}

impl TagFilter {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        let (polarity, body) = match raw.strip_prefix('-') {
            Some(rest) => (FilterPolarity::Keep, rest),
            None => (FilterPolarity::Remove, raw),
        };
        Ok(Self {
            pattern: TagPattern::parse(body)?,
            polarity,
        })
    }

    pub fn to_raw(&self) -> String {
        match self.polarity {
            FilterPolarity::Remove => self.pattern.to_raw(),
            FilterPolarity::Keep => format!("-{}", self.pattern.to_raw()),
        }
    }
}

/// Ordered list of removed-tag rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilterList {
    filters: Vec<TagFilter>,
}

impl TagFilterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse rules separated by whitespace, commas or newlines. Invalid rules
    /// are skipped with a warning, duplicates are dropped.
    pub fn parse(raw: &str) -> Self {
        let mut list = Self::new();
        for token in raw.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            match TagFilter::parse(token) {
                Ok(filter) => {
                    list.push(filter);
                }
                Err(e) => warn!("Skipping removed-tag rule '{}': {}", token, e),
            }
        }
        list
    }

    /// Append a rule; returns false when an identical rule already exists.
    pub fn push(&mut self, filter: TagFilter) -> bool {
        if self.filters.contains(&filter) {
            return false;
        }
        self.filters.push(filter);
        true
    }

    pub fn remove(&mut self, filter: &TagFilter) -> bool {
        let before = self.filters.len();
        self.filters.retain(|f| f != filter);
        before != self.filters.len()
    }

    pub fn filters(&self) -> &[TagFilter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// True when `tag` (lower-cased) would be stripped.
    pub fn is_removed(&self, tag: &str) -> bool {
        let mut removed = false;
        for filter in &self.filters {
            if filter.pattern.matches(tag) {
                match filter.polarity {
                    FilterPolarity::Keep => return false,
                    FilterPolarity::Remove => removed = true,
                }
            }
        }
        removed
    }

    /// Strip every removed tag, keeping the input order.
    pub fn apply<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags.into_iter()
            .filter(|tag| !self.is_removed(&tag.as_ref().to_lowercase()))
            .map(|tag| tag.as_ref().to_string())
            .collect()
    }

    /// The persisted representation, one rule per line.
    pub fn to_raw(&self) -> String {
        self.filters
            .iter()
            .map(TagFilter::to_raw)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_invalid_and_duplicates() {
        let list = TagFilterList::parse("watermark, artist:* \n ** watermark\n-artist:me");
        let raw: Vec<String> = list.filters().iter().map(TagFilter::to_raw).collect();
        assert_eq!(raw, vec!["watermark", "artist:*", "-artist:me"]);
    }

    #[test]
    fn test_apply_removes_matching_tags() {
        let list = TagFilterList::parse("watermark artist:*");
        let tags = ["Watermark", "solo", "artist:someone", "wolf"];
        assert_eq!(list.apply(tags), vec!["solo", "wolf"]);
    }

    #[test]
    fn test_keep_rule_wins() {
        let list = TagFilterList::parse("artist:* -artist:favourite");
        assert_eq!(
            list.apply(["artist:random", "artist:favourite"]),
            vec!["artist:favourite"]
        );
    }

    #[test]
    fn test_apply_is_idempotent() {
        let list = TagFilterList::parse("*_(artist) text -keep_text rating:*");
        let tags = vec!["a_(artist)", "text", "keep_text", "rating:safe", "solo"];
        let once = list.apply(&tags);
        let twice = list.apply(&once);
        assert_eq!(once, twice);
        assert_eq!(once, vec!["keep_text", "solo"]);
    }

    #[test]
    fn test_raw_round_trip() {
        let list = TagFilterList::parse("a b* -c");
        assert_eq!(TagFilterList::parse(&list.to_raw()), list);
    }
}
