//! OpenTelemetry sampler that drops spans matching configured attribute rules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::ShouldSample;
use tracing::{debug, info};

use crate::attributes::AttributeSnapshot;
use crate::rules::{AttributePatterns, RuleSet, RuleSpanKind};
use crate::sampling::matcher::AttributeRule;

/// Number of sampling requests handed to the fallback sampler since startup.
///
/// A liveness signal only; nothing in the sampling or filtering path reads it.
static FALLBACK_DECISIONS: AtomicU64 = AtomicU64::new(0);

#[must_use]
pub fn fallback_decision_count() -> u64 {
    FALLBACK_DECISIONS.load(Ordering::Relaxed)
}

/// Compiled drop rules for a single span kind, ordered by attribute key.
#[derive(Clone, Debug)]
pub struct KindSampler {
    kind: RuleSpanKind,
    rules: Vec<AttributeRule>,
}

impl KindSampler {
    #[must_use]
    pub fn compile(kind: RuleSpanKind, patterns: &AttributePatterns) -> Self {
        Self {
            kind,
            rules: patterns
                .iter()
                .map(|(key, patterns)| AttributeRule::new(key, patterns))
                .collect(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> RuleSpanKind {
        self.kind
    }

    /// Key and pattern of the first rule matching `attributes`.
    #[must_use]
    pub fn matching_rule(&self, attributes: &AttributeSnapshot<'_>) -> Option<(&str, &str)> {
        self.rules.iter().find_map(|rule| {
            rule.matching_pattern(attributes)
                .map(|pattern| (rule.key(), pattern))
        })
    }
}

/// Finds the first rule of a [`KindSampler`] matching a span's attributes.
pub(crate) type RuleLookup =
    for<'s, 'a> fn(&'s KindSampler, &AttributeSnapshot<'a>) -> Option<(&'s str, &'s str)>;

/// Drops spans whose attributes match a rule for their kind and delegates every
/// other decision to a fallback sampler.
///
/// The rule tables are built once and shared read-only between clones, so the
/// sampler can be evaluated from any number of threads.
#[derive(Clone, Debug)]
pub struct RuleBasedSampler {
    samplers: Arc<BTreeMap<RuleSpanKind, KindSampler>>,
    fallback: Box<dyn ShouldSample>,
    lookup: RuleLookup,
}

impl RuleBasedSampler {
    pub fn new<S>(rules: &RuleSet, fallback: S) -> Self
    where
        S: ShouldSample + 'static,
    {
        let samplers: BTreeMap<RuleSpanKind, KindSampler> = rules
            .iter()
            .map(|(kind, patterns)| (kind, KindSampler::compile(kind, patterns)))
            .collect();
        info!(
            "SAMPLER | Compiled drop rules for {} span kind(s)",
            samplers.len()
        );
        Self {
            samplers: Arc::new(samplers),
            fallback: Box::new(fallback),
            lookup: KindSampler::matching_rule,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_rule_lookup(mut self, lookup: RuleLookup) -> Self {
        self.lookup = lookup;
        self
    }

    #[must_use]
    pub fn kind_sampler(&self, kind: RuleSpanKind) -> Option<&KindSampler> {
        self.samplers.get(&kind)
    }

    #[must_use]
    pub fn description(&self) -> String {
        let kinds: Vec<&str> = self.samplers.keys().map(AsRef::as_ref).collect();
        format!(
            "RuleBasedSampler{{kinds=[{}], fallback={:?}}}",
            kinds.join(","),
            self.fallback
        )
    }

    fn drop_result(parent_context: Option<&Context>) -> SamplingResult {
        SamplingResult {
            decision: SamplingDecision::Drop,
            attributes: Vec::new(),
            trace_state: parent_context
                .map(|cx| cx.span().span_context().trace_state().clone())
                .unwrap_or_else(TraceState::default),
        }
    }
}

impl ShouldSample for RuleBasedSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let kind = RuleSpanKind::from(span_kind);

        if let Some(sampler) = self.samplers.get(&kind) {
            let snapshot = AttributeSnapshot::new(attributes);
            let matched = catch_panic!("SAMPLER", (self.lookup)(sampler, &snapshot), None);
            if let Some((key, pattern)) = matched {
                debug!(
                    "SAMPLER | Dropping {kind} span '{name}', attribute '{key}' matched '{pattern}'"
                );
                return Self::drop_result(parent_context);
            }
        }

        FALLBACK_DECISIONS.fetch_add(1, Ordering::Relaxed);
        self.fallback.should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}
