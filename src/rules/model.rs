use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::SpanKind;

/// Span kinds a drop rule can be scoped to.
///
/// Mirrors [`SpanKind`] but is ordered and hashable so rule tables have a stable
/// iteration order.
///
/// Parsing accepts the five canonical names in any letter case (`SERVER`,
/// `server`, `Server`) and surrounding whitespace; anything else is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleSpanKind {
    Server,
    Client,
    Producer,
    Consumer,
    Internal,
}

impl RuleSpanKind {
    pub const ALL: [RuleSpanKind; 5] = [
        RuleSpanKind::Server,
        RuleSpanKind::Client,
        RuleSpanKind::Producer,
        RuleSpanKind::Consumer,
        RuleSpanKind::Internal,
    ];
}

impl AsRef<str> for RuleSpanKind {
    fn as_ref(&self) -> &str {
        match self {
            RuleSpanKind::Server => "SERVER",
            RuleSpanKind::Client => "CLIENT",
            RuleSpanKind::Producer => "PRODUCER",
            RuleSpanKind::Consumer => "CONSUMER",
            RuleSpanKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for RuleSpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl FromStr for RuleSpanKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SERVER" => Ok(RuleSpanKind::Server),
            "CLIENT" => Ok(RuleSpanKind::Client),
            "PRODUCER" => Ok(RuleSpanKind::Producer),
            "CONSUMER" => Ok(RuleSpanKind::Consumer),
            "INTERNAL" => Ok(RuleSpanKind::Internal),
            _ => Err(format!(
                "Invalid span kind: '{s}'. Valid kinds are: SERVER, CLIENT, PRODUCER, CONSUMER, INTERNAL"
            )),
        }
    }
}

impl From<&SpanKind> for RuleSpanKind {
    fn from(kind: &SpanKind) -> Self {
        match kind {
            SpanKind::Server => RuleSpanKind::Server,
            SpanKind::Client => RuleSpanKind::Client,
            SpanKind::Producer => RuleSpanKind::Producer,
            SpanKind::Consumer => RuleSpanKind::Consumer,
            SpanKind::Internal => RuleSpanKind::Internal,
        }
    }
}

/// Attribute key to the patterns that drop a span when the key's value matches.
pub type AttributePatterns = BTreeMap<String, BTreeSet<String>>;

/// A single validated entry of the rule file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DropRule {
    span_kind: RuleSpanKind,
    attribute_patterns: AttributePatterns,
}

impl DropRule {
    /// Builds a rule, discarding keys without patterns.
    ///
    /// Returns `None` when no key carries a pattern, since such a rule could never
    /// drop anything.
    #[must_use]
    pub fn new(span_kind: RuleSpanKind, attribute_patterns: AttributePatterns) -> Option<Self> {
        let attribute_patterns: AttributePatterns = attribute_patterns
            .into_iter()
            .filter(|(_, patterns)| !patterns.is_empty())
            .collect();
        if attribute_patterns.is_empty() {
            return None;
        }
        Some(Self {
            span_kind,
            attribute_patterns,
        })
    }

    #[must_use]
    pub fn span_kind(&self) -> RuleSpanKind {
        self.span_kind
    }

    #[must_use]
    pub fn attribute_patterns(&self) -> &AttributePatterns {
        &self.attribute_patterns
    }
}

/// Drop rules grouped by span kind.
///
/// Rules for the same kind are merged: patterns for the same attribute key are
/// unioned, never replaced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: BTreeMap<RuleSpanKind, AttributePatterns>,
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, rule: DropRule) {
        let attributes = self.rules.entry(rule.span_kind).or_default();
        for (key, patterns) in rule.attribute_patterns {
            attributes.entry(key).or_default().extend(patterns);
        }
    }

    #[must_use]
    pub fn get(&self, kind: RuleSpanKind) -> Option<&AttributePatterns> {
        self.rules.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RuleSpanKind, &AttributePatterns)> {
        self.rules.iter().map(|(kind, patterns)| (*kind, patterns))
    }

    pub fn kinds(&self) -> impl Iterator<Item = RuleSpanKind> + '_ {
        self.rules.keys().copied()
    }

    /// Number of span kinds with at least one rule.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<DropRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = DropRule>>(iter: I) -> Self {
        let mut rule_set = RuleSet::new();
        for rule in iter {
            rule_set.merge(rule);
        }
        rule_set
    }
}

impl Extend<DropRule> for RuleSet {
    fn extend<I: IntoIterator<Item = DropRule>>(&mut self, iter: I) {
        for rule in iter {
            self.merge(rule);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn patterns(entries: &[(&str, &[&str])]) -> AttributePatterns {
        entries
            .iter()
            .map(|(key, values)| {
                (
                    (*key).to_string(),
                    values.iter().map(|v| (*v).to_string()).collect(),
                )
            })
            .collect()
    }

    pub(crate) fn rule(kind: RuleSpanKind, entries: &[(&str, &[&str])]) -> DropRule {
        DropRule::new(kind, patterns(entries)).expect("rule should be valid")
    }

    #[test]
    fn test_span_kind_from_str() {
        assert_eq!(RuleSpanKind::from_str("SERVER"), Ok(RuleSpanKind::Server));
        assert_eq!(RuleSpanKind::from_str("consumer"), Ok(RuleSpanKind::Consumer));
        assert!(RuleSpanKind::from_str("BACKEND").is_err());
        assert!(RuleSpanKind::from_str("").is_err());
    }

    #[test]
    fn test_span_kind_from_str_ignores_case() {
        for name in ["server", "Server", " SERVER "] {
            assert_eq!(RuleSpanKind::from_str(name), Ok(RuleSpanKind::Server));
        }
        assert!(RuleSpanKind::from_str("SERVERS").is_err());
    }

    #[test]
    fn test_span_kind_from_otel() {
        assert_eq!(RuleSpanKind::from(&SpanKind::Producer), RuleSpanKind::Producer);
        assert_eq!(RuleSpanKind::from(&SpanKind::Internal), RuleSpanKind::Internal);
    }

    #[test]
    fn test_span_kind_display_round_trips() {
        for kind in RuleSpanKind::ALL {
            assert_eq!(RuleSpanKind::from_str(&kind.to_string()), Ok(kind));
        }
    }

    #[test]
    fn test_drop_rule_requires_patterns() {
        assert!(DropRule::new(RuleSpanKind::Server, AttributePatterns::new()).is_none());
        assert!(DropRule::new(RuleSpanKind::Server, patterns(&[("url.path", &[])])).is_none());
    }

    #[test]
    fn test_drop_rule_discards_empty_keys() {
        let rule = DropRule::new(
            RuleSpanKind::Server,
            patterns(&[("url.path", &["^/health$"]), ("http.route", &[])]),
        )
        .expect("rule should be valid");

        assert_eq!(rule.attribute_patterns().len(), 1);
        assert!(rule.attribute_patterns().contains_key("url.path"));
    }

    #[test]
    fn test_merge_unions_patterns() {
        let rule_set: RuleSet = vec![
            rule(RuleSpanKind::Server, &[("url.path", &["^/health$"])]),
            rule(
                RuleSpanKind::Server,
                &[("url.path", &["^/metrics$", "^/health$"]), ("http.route", &["^/mad$"])],
            ),
            rule(RuleSpanKind::Client, &[("db.system", &["redis"])]),
        ]
        .into_iter()
        .collect();

        assert_eq!(rule_set.len(), 2);
        let server = rule_set.get(RuleSpanKind::Server).expect("server rules");
        assert_eq!(
            server,
            &patterns(&[
                ("http.route", &["^/mad$"]),
                ("url.path", &["^/health$", "^/metrics$"]),
            ])
        );
        assert!(rule_set.get(RuleSpanKind::Producer).is_none());
    }

    #[test]
    fn test_merge_order_is_irrelevant() {
        let first = rule(RuleSpanKind::Client, &[("db.system", &["redis"])]);
        let second = rule(RuleSpanKind::Client, &[("db.statement", &["PING"])]);

        let forward: RuleSet = vec![first.clone(), second.clone()].into_iter().collect();
        let backward: RuleSet = vec![second, first].into_iter().collect();

        assert_eq!(forward, backward);
    }

    #[test]
    fn test_extend() {
        let mut rule_set = RuleSet::new();
        assert!(rule_set.is_empty());

        rule_set.extend([rule(RuleSpanKind::Internal, &[("job.name", &["^cleanup$"])])]);
        assert_eq!(rule_set.kinds().collect::<Vec<_>>(), vec![RuleSpanKind::Internal]);
    }
}
