//! Selection of the fallback sampler consulted when no drop rule applies.
//!
//! Names follow the standard `OTEL_TRACES_SAMPLER` values.

use std::str::FromStr;

use opentelemetry_sdk::trace::Sampler;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

const DEFAULT_RATIO: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FallbackSamplerKind {
    AlwaysOn,
    AlwaysOff,
    TraceIdRatio,
    #[default]
    ParentBasedAlwaysOn,
    ParentBasedAlwaysOff,
    ParentBasedTraceIdRatio,
}

impl AsRef<str> for FallbackSamplerKind {
    fn as_ref(&self) -> &str {
        match self {
            FallbackSamplerKind::AlwaysOn => "always_on",
            FallbackSamplerKind::AlwaysOff => "always_off",
            FallbackSamplerKind::TraceIdRatio => "traceidratio",
            FallbackSamplerKind::ParentBasedAlwaysOn => "parentbased_always_on",
            FallbackSamplerKind::ParentBasedAlwaysOff => "parentbased_always_off",
            FallbackSamplerKind::ParentBasedTraceIdRatio => "parentbased_traceidratio",
        }
    }
}

impl FromStr for FallbackSamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always_on" => Ok(FallbackSamplerKind::AlwaysOn),
            "always_off" => Ok(FallbackSamplerKind::AlwaysOff),
            "traceidratio" => Ok(FallbackSamplerKind::TraceIdRatio),
            "parentbased_always_on" => Ok(FallbackSamplerKind::ParentBasedAlwaysOn),
            "parentbased_always_off" => Ok(FallbackSamplerKind::ParentBasedAlwaysOff),
            "parentbased_traceidratio" => Ok(FallbackSamplerKind::ParentBasedTraceIdRatio),
            _ => Err(format!("Unsupported sampler type: '{s}'")),
        }
    }
}

impl<'de> Deserialize<'de> for FallbackSamplerKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        match value {
            Value::String(s) if s.trim().is_empty() => Ok(FallbackSamplerKind::default()),
            Value::String(s) => Ok(FallbackSamplerKind::from_str(&s).unwrap_or_else(|e| {
                warn!("SAMPLER | {e}, using {}", FallbackSamplerKind::default().as_ref());
                FallbackSamplerKind::default()
            })),
            _ => {
                warn!("SAMPLER | Expected a string for the sampler type, got {value:?}");
                Ok(FallbackSamplerKind::default())
            }
        }
    }
}

/// Parses the sampler argument into a ratio in `[0.0, 1.0]`.
///
/// A missing argument means sample everything. Unparseable arguments are logged
/// and treated as missing; out of range values are clamped.
#[must_use]
pub fn sampler_ratio(arg: Option<&str>) -> f64 {
    let Some(arg) = arg else {
        return DEFAULT_RATIO;
    };
    match arg.trim().parse::<f64>() {
        Ok(ratio) if ratio.is_finite() => ratio.clamp(0.0, 1.0),
        _ => {
            warn!("SAMPLER | Invalid sampler argument '{arg}', using {DEFAULT_RATIO}");
            DEFAULT_RATIO
        }
    }
}

/// Builds the SDK sampler for `kind`. `ratio` is only used by the ratio based kinds.
#[must_use]
pub fn build_fallback_sampler(kind: FallbackSamplerKind, ratio: f64) -> Sampler {
    match kind {
        FallbackSamplerKind::AlwaysOn => Sampler::AlwaysOn,
        FallbackSamplerKind::AlwaysOff => Sampler::AlwaysOff,
        FallbackSamplerKind::TraceIdRatio => Sampler::TraceIdRatioBased(ratio),
        FallbackSamplerKind::ParentBasedAlwaysOn => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
        FallbackSamplerKind::ParentBasedAlwaysOff => {
            Sampler::ParentBased(Box::new(Sampler::AlwaysOff))
        }
        FallbackSamplerKind::ParentBasedTraceIdRatio => {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio)))
        }
    }
}
