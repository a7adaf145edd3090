pub mod log_level;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::log_level::LogLevel;
use crate::sampling::fallback::FallbackSamplerKind;

/// Location of the drop rule YAML file.
pub const RULE_FILE_PROPERTY: &str = "rule.sampler.drop.conf.file";
/// Attribute key prefix used by the post-formation span filter.
pub const DROP_ATTRIBUTE_PREFIX_PROPERTY: &str = "my.otel.drop.attribute.prefix";
pub const TRACES_SAMPLER_PROPERTY: &str = "otel.traces.sampler";
pub const TRACES_SAMPLER_ARG_PROPERTY: &str = "otel.traces.sampler.arg";
pub const DRAIN_TIMEOUT_PROPERTY: &str = "otel.span.filter.drain.timeout.ms";
pub const LOG_LEVEL_PROPERTY: &str = "otel.span.filter.log.level";

const PROPERTIES: [&str; 6] = [
    RULE_FILE_PROPERTY,
    DROP_ATTRIBUTE_PREFIX_PROPERTY,
    TRACES_SAMPLER_PROPERTY,
    TRACES_SAMPLER_ARG_PROPERTY,
    DRAIN_TIMEOUT_PROPERTY,
    LOG_LEVEL_PROPERTY,
];

// Must stay in sync with `env_var_name` applied to `PROPERTIES`.
const ENV_VARS: [&str; 6] = [
    "RULE_SAMPLER_DROP_CONF_FILE",
    "MY_OTEL_DROP_ATTRIBUTE_PREFIX",
    "OTEL_TRACES_SAMPLER",
    "OTEL_TRACES_SAMPLER_ARG",
    "OTEL_SPAN_FILTER_DRAIN_TIMEOUT_MS",
    "OTEL_SPAN_FILTER_LOG_LEVEL",
];

const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

#[derive(Debug, PartialEq, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    #[serde(
        rename = "rule_sampler_drop_conf_file",
        deserialize_with = "deserialize_string_or_number"
    )]
    pub rule_file: Option<String>,
    #[serde(
        rename = "my_otel_drop_attribute_prefix",
        deserialize_with = "deserialize_string_or_number"
    )]
    pub drop_attribute_prefix: Option<String>,
    #[serde(rename = "otel_traces_sampler")]
    pub traces_sampler: FallbackSamplerKind,
    #[serde(
        rename = "otel_traces_sampler_arg",
        deserialize_with = "deserialize_string_or_number"
    )]
    pub traces_sampler_arg: Option<String>,
    #[serde(
        rename = "otel_span_filter_drain_timeout_ms",
        deserialize_with = "deserialize_drain_timeout"
    )]
    pub drain_timeout_ms: u64,
    #[serde(rename = "otel_span_filter_log_level")]
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rule_file: None,
            drop_attribute_prefix: None,
            traces_sampler: FallbackSamplerKind::default(),
            traces_sampler_arg: None,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    #[must_use]
    pub fn rule_file(&self) -> Option<&Path> {
        self.rule_file.as_deref().map(Path::new)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Name of the environment variable backing a dotted property name.
///
/// `rule.sampler.drop.conf.file` becomes `RULE_SAMPLER_DROP_CONF_FILE`.
#[must_use]
pub fn env_var_name(property: &str) -> String {
    property.replace(['.', '-'], "_").to_uppercase()
}

fn field_name(property: &str) -> String {
    property.replace(['.', '-'], "_").to_lowercase()
}

/// Resolves the configuration from runtime `properties` and the environment.
///
/// Properties take priority over environment variables. Blank values are ignored
/// in both sources so a blank property falls through to its environment variable.
pub fn get_config(properties: &HashMap<String, String>) -> Result<Config, ConfigError> {
    let mut overrides = BTreeMap::new();
    for (name, value) in properties {
        if !PROPERTIES.contains(&name.as_str()) {
            debug!("CONFIG | Ignoring unknown property {name}");
            continue;
        }
        if value.trim().is_empty() {
            debug!("CONFIG | Ignoring blank property {name}");
            continue;
        }
        overrides.insert(field_name(name), value.clone());
    }

    // Environment values stay verbatim strings: `0123` must not become `123`.
    let environment: BTreeMap<String, String> = Env::raw()
        .only(&ENV_VARS)
        .iter()
        .map(|(name, value)| (field_name(name.as_str()), value))
        .collect();

    let figment = Figment::new()
        .merge(Serialized::defaults(environment))
        .merge(Serialized::defaults(overrides));

    figment.extract().map_err(|err| {
        warn!("CONFIG | Failed to parse configuration: {err}");
        ConfigError::ParseError(err.to_string())
    })
}

fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => Err(serde::de::Error::custom("expected a string or a number")),
    }
}

fn deserialize_drain_timeout<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(|| {
        warn!("CONFIG | Invalid drain timeout {value}, using {DEFAULT_DRAIN_TIMEOUT_MS}ms");
        DEFAULT_DRAIN_TIMEOUT_MS
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_env_var_names_match_properties() {
        for (property, env) in PROPERTIES.iter().zip(ENV_VARS.iter()) {
            assert_eq!(&env_var_name(property), env);
        }
    }

    #[test]
    fn test_parse_default() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config, Config::default());
            assert_eq!(config.rule_file(), None);
            assert_eq!(config.drain_timeout(), Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_parse_env() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", "/opt/rules/drop.yaml");
            jail.set_env("MY_OTEL_DROP_ATTRIBUTE_PREFIX", "debug.");
            jail.set_env("OTEL_TRACES_SAMPLER", "parentbased_traceidratio");
            jail.set_env("OTEL_TRACES_SAMPLER_ARG", "0.25");
            jail.set_env("OTEL_SPAN_FILTER_DRAIN_TIMEOUT_MS", "250");
            jail.set_env("OTEL_SPAN_FILTER_LOG_LEVEL", "debug");

            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config.rule_file(), Some(Path::new("/opt/rules/drop.yaml")));
            assert_eq!(config.drop_attribute_prefix.as_deref(), Some("debug."));
            assert_eq!(
                config.traces_sampler,
                FallbackSamplerKind::ParentBasedTraceIdRatio
            );
            assert_eq!(config.traces_sampler_arg.as_deref(), Some("0.25"));
            assert_eq!(config.drain_timeout(), Duration::from_millis(250));
            assert_eq!(config.log_level, LogLevel::Debug);
            Ok(())
        });
    }

    #[test]
    fn test_property_takes_priority_over_env() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", "/from/env.yaml");

            let config = get_config(&properties(&[(RULE_FILE_PROPERTY, "/from/property.yaml")]))
                .expect("should parse config");
            assert_eq!(config.rule_file(), Some(Path::new("/from/property.yaml")));
            Ok(())
        });
    }

    #[test]
    fn test_blank_property_falls_back_to_env() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", "/from/env.yaml");

            let config = get_config(&properties(&[(RULE_FILE_PROPERTY, "   ")]))
                .expect("should parse config");
            assert_eq!(config.rule_file(), Some(Path::new("/from/env.yaml")));
            Ok(())
        });
    }

    #[test]
    fn test_blank_env_is_unset() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", " ");
            jail.set_env("MY_OTEL_DROP_ATTRIBUTE_PREFIX", "");

            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config.rule_file, None);
            assert_eq!(config.drop_attribute_prefix, None);
            Ok(())
        });
    }

    #[test]
    fn test_properties_parse_like_env() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();

            let config = get_config(&properties(&[
                (TRACES_SAMPLER_PROPERTY, "always_off"),
                (TRACES_SAMPLER_ARG_PROPERTY, "0.5"),
                (DRAIN_TIMEOUT_PROPERTY, "1500"),
                (LOG_LEVEL_PROPERTY, "trace"),
                ("some.unrelated.property", "value"),
            ]))
            .expect("should parse config");
            assert_eq!(config.traces_sampler, FallbackSamplerKind::AlwaysOff);
            assert_eq!(config.traces_sampler_arg.as_deref(), Some("0.5"));
            assert_eq!(config.drain_timeout_ms, 1500);
            assert_eq!(config.log_level, LogLevel::Trace);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("OTEL_TRACES_SAMPLER", "jaeger_remote");
            jail.set_env("OTEL_SPAN_FILTER_DRAIN_TIMEOUT_MS", "soon");
            jail.set_env("OTEL_SPAN_FILTER_LOG_LEVEL", "loud");

            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config.traces_sampler, FallbackSamplerKind::ParentBasedAlwaysOn);
            assert_eq!(config.drain_timeout_ms, DEFAULT_DRAIN_TIMEOUT_MS);
            assert_eq!(config.log_level, LogLevel::Warn);
            Ok(())
        });
    }

    #[test]
    fn test_env_values_are_not_retyped() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", "0123");
            jail.set_env("MY_OTEL_DROP_ATTRIBUTE_PREFIX", "true");
            jail.set_env("OTEL_TRACES_SAMPLER_ARG", "0.50");

            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config.rule_file.as_deref(), Some("0123"));
            assert_eq!(config.drop_attribute_prefix.as_deref(), Some("true"));
            assert_eq!(config.traces_sampler_arg.as_deref(), Some("0.50"));
            Ok(())
        });
    }

    #[test]
    fn test_numeric_rule_file_is_kept_as_string() {
        figment::Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("RULE_SAMPLER_DROP_CONF_FILE", "42");

            let config = get_config(&HashMap::new()).expect("should parse config");
            assert_eq!(config.rule_file.as_deref(), Some("42"));
            Ok(())
        });
    }
}
