use std::collections::BTreeSet;

use regex::Regex;
use tracing::warn;

use crate::attributes::AttributeSnapshot;

/// A drop pattern compiled once, up front.
///
/// Matching is a case-sensitive regular expression search; patterns that should
/// match the whole value must be anchored (`^/health$`). A pattern that fails to
/// compile is logged here and never matches afterwards.
#[derive(Clone, Debug)]
pub struct PatternMatcher {
    pattern: String,
    regex: Option<Regex>,
}

impl PatternMatcher {
    #[must_use]
    pub fn compile(pattern: &str) -> Self {
        let regex = match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("SAMPLER | Invalid pattern '{pattern}' will never match: {e}");
                None
            }
        };
        Self {
            pattern: pattern.to_string(),
            regex,
        }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.regex.is_some()
    }

    /// An absent value never matches.
    #[must_use]
    pub fn matches(&self, value: Option<&str>) -> bool {
        match (value, &self.regex) {
            (Some(value), Some(regex)) => regex.is_match(value),
            _ => false,
        }
    }
}

/// One-shot form of [`PatternMatcher::matches`].
#[must_use]
pub fn matches(value: Option<&str>, pattern: &str) -> bool {
    PatternMatcher::compile(pattern).matches(value)
}

/// All patterns configured for one attribute key.
#[derive(Clone, Debug)]
pub struct AttributeRule {
    key: String,
    matchers: Vec<PatternMatcher>,
}

impl AttributeRule {
    #[must_use]
    pub fn new(key: &str, patterns: &BTreeSet<String>) -> Self {
        Self {
            key: key.to_string(),
            matchers: patterns
                .iter()
                .map(|pattern| PatternMatcher::compile(pattern))
                .collect(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The first pattern matching this rule's attribute, if any.
    #[must_use]
    pub fn matching_pattern(&self, attributes: &AttributeSnapshot<'_>) -> Option<&str> {
        let value = attributes.get_string(&self.key)?;
        self.matchers
            .iter()
            .find(|matcher| matcher.matches(Some(value)))
            .map(PatternMatcher::pattern)
    }
}
