//! Reads drop rules from a YAML file.
//!
//! ```yaml
//! rules:
//!   drop:
//!     - span_kind: SERVER
//!       attributes:
//!         - url.path: ["^/health$", "^/metrics$"]
//!         - http.route: ["^/health$"]
//! ```
//!
//! Loading never fails from the caller's point of view: a missing or malformed
//! file yields an empty [`RuleSet`] and a warning, and a malformed entry is
//! skipped in full without affecting its siblings.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::config::{Config, RULE_FILE_PROPERTY, env_var_name};
use crate::error::RuleLoadError;
use crate::rules::model::{AttributePatterns, DropRule, RuleSet, RuleSpanKind};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RuleFile {
    rules: Option<RulesSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RulesSection {
    #[serde(deserialize_with = "deserialize_drop_rules")]
    drop: Option<Vec<DropRule>>,
}

/// Rule entry as written in the file, before validation.
#[derive(Debug, Deserialize)]
struct RawDropRule {
    #[serde(alias = "spanKind")]
    span_kind: Option<String>,
    attributes: Option<RawAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAttributes {
    List(Vec<BTreeMap<String, RawPatterns>>),
    Map(BTreeMap<String, RawPatterns>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPatterns {
    One(RawPattern),
    Many(Vec<RawPattern>),
}

/// Scalar pattern; numbers and booleans are kept in their written form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl From<RawPattern> for String {
    fn from(pattern: RawPattern) -> Self {
        match pattern {
            RawPattern::Text(text) => text,
            RawPattern::Number(number) => number.to_string(),
            RawPattern::Flag(flag) => flag.to_string(),
        }
    }
}

impl RawAttributes {
    fn is_empty(&self) -> bool {
        match self {
            RawAttributes::List(list) => list.iter().all(BTreeMap::is_empty),
            RawAttributes::Map(map) => map.is_empty(),
        }
    }

    fn into_patterns(self) -> AttributePatterns {
        let maps = match self {
            RawAttributes::List(list) => list,
            RawAttributes::Map(map) => vec![map],
        };
        let mut patterns = AttributePatterns::new();
        for (key, values) in maps.into_iter().flatten() {
            let entry = patterns.entry(key).or_default();
            match values {
                RawPatterns::One(value) => {
                    entry.insert(value.into());
                }
                RawPatterns::Many(values) => entry.extend(values.into_iter().map(String::from)),
            }
        }
        patterns
    }
}

impl TryFrom<RawDropRule> for DropRule {
    type Error = String;

    fn try_from(raw: RawDropRule) -> Result<Self, Self::Error> {
        let span_kind = raw
            .span_kind
            .ok_or_else(|| "missing 'span_kind'".to_string())
            .and_then(|kind| RuleSpanKind::from_str(&kind))?;

        let attributes = raw
            .attributes
            .filter(|attributes| !attributes.is_empty())
            .ok_or_else(|| "missing or empty 'attributes'".to_string())?;

        DropRule::new(span_kind, attributes.into_patterns())
            .ok_or_else(|| "no attribute has a pattern".to_string())
    }
}

fn deserialize_drop_rules<'de, D>(deserializer: D) -> Result<Option<Vec<DropRule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: JsonValue = Deserialize::deserialize(deserializer)?;

    match value {
        JsonValue::Array(entries) => {
            let mut rules = Vec::with_capacity(entries.len());
            for (index, entry) in entries.into_iter().enumerate() {
                let parsed = serde_json::from_value::<RawDropRule>(entry)
                    .map_err(|e| e.to_string())
                    .and_then(DropRule::try_from);
                match parsed {
                    Ok(rule) => rules.push(rule),
                    Err(e) => {
                        warn!("RULES | Invalid drop rule at index {index}: {e}, ignoring");
                    }
                }
            }
            Ok(Some(rules))
        }
        JsonValue::Null => Ok(None),
        _ => {
            warn!("RULES | Expected 'rules.drop' to be a list, ignoring");
            Ok(None)
        }
    }
}

/// Parses the rule file at `path`.
///
/// Entry level problems are logged and skipped; only problems with the file as a
/// whole are returned.
pub fn try_load(path: &Path) -> Result<RuleSet, RuleLoadError> {
    if !path.is_file() {
        return Err(RuleLoadError::NotFound(path.to_path_buf()));
    }

    let file: RuleFile = Figment::from(Yaml::file(path)).extract()?;
    let drop = file
        .rules
        .ok_or(RuleLoadError::MissingSection("rules"))?
        .drop
        .ok_or(RuleLoadError::MissingSection("rules.drop"))?;

    Ok(drop.into_iter().collect())
}

/// Loads the rule file at `path`, degrading to an empty [`RuleSet`] on failure.
#[must_use]
pub fn load(path: &Path) -> RuleSet {
    match try_load(path) {
        Ok(rule_set) => {
            for (kind, attributes) in rule_set.iter() {
                info!("RULES | Drop rules for span kind {kind}: {attributes:?}");
            }
            if rule_set.is_empty() {
                warn!("RULES | No valid drop rules in {}", path.display());
            }
            rule_set
        }
        Err(e) => {
            warn!("RULES | {e}, continuing without drop rules");
            RuleSet::default()
        }
    }
}

/// Loads the rule file named by the configuration, if any.
///
/// An unset or blank location is not an error; the result is simply empty.
#[must_use]
pub fn load_from_config(config: &Config) -> RuleSet {
    match config.rule_file() {
        Some(path) => load(path),
        None => {
            warn!(
                "RULES | Neither property {RULE_FILE_PROPERTY} nor environment variable {} is set",
                env_var_name(RULE_FILE_PROPERTY)
            );
            RuleSet::default()
        }
    }
}
