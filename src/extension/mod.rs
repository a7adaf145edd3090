//! Wiring of the sampler and the span filter into an SDK tracer provider.
//!
//! ```ignore
//! let builder = otel_span_filter::extension::configure(
//!     SdkTracerProvider::builder(),
//!     &HashMap::new(),
//!     BatchSpanProcessor::builder(exporter).build(),
//! )?;
//! let provider = builder.build();
//! ```

use std::collections::HashMap;

use opentelemetry_sdk::trace::{SpanProcessor, TracerProviderBuilder};
use tracing::{debug, warn};

use crate::config::{self, Config, ConfigError};
use crate::processor::{DroppingSpanProcessor, validate_prefix};
use crate::rules;
use crate::sampling::{RuleBasedSampler, build_fallback_sampler, sampler_ratio};

/// Loads the configured rule file and layers it over the configured fallback
/// sampler.
#[must_use]
pub fn build_sampler(config: &Config) -> RuleBasedSampler {
    let rules = rules::load_from_config(config);
    let ratio = sampler_ratio(config.traces_sampler_arg.as_deref());
    let fallback = build_fallback_sampler(config.traces_sampler, ratio);
    let sampler = RuleBasedSampler::new(&rules, fallback);
    debug!("SAMPLER | Using {}", sampler.description());
    sampler
}

/// Installs the rule based sampler and, when a prefix is configured, the span
/// filter in front of `next`.
///
/// Without a usable prefix the filter is skipped with a warning and `next` is
/// registered as is.
pub fn install<P>(builder: TracerProviderBuilder, config: &Config, next: P) -> TracerProviderBuilder
where
    P: SpanProcessor + 'static,
{
    let builder = builder.with_sampler(build_sampler(config));

    match validate_prefix(config.drop_attribute_prefix.as_deref()) {
        Ok(prefix) => {
            debug!("FILTER | Dropping spans with attribute keys starting with '{prefix}'");
            let processor = DroppingSpanProcessor::with_valid_prefix(next, prefix.to_string())
                .with_drain_timeout(config.drain_timeout());
            builder.with_span_processor(processor)
        }
        Err(e) => {
            warn!(
                "FILTER | {} rejected ({e}), span filter disabled",
                config::DROP_ATTRIBUTE_PREFIX_PROPERTY
            );
            builder.with_span_processor(next)
        }
    }
}

/// Resolves the configuration from `properties` and the environment, then
/// [`install`]s.
pub fn configure<P>(
    builder: TracerProviderBuilder,
    properties: &HashMap<String, String>,
    next: P,
) -> Result<TracerProviderBuilder, ConfigError>
where
    P: SpanProcessor + 'static,
{
    let config = config::get_config(properties)?;
    Ok(install(builder, &config, next))
}
