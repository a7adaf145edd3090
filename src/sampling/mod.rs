pub mod fallback;
pub mod matcher;
pub mod rule_sampler;

pub use fallback::{FallbackSamplerKind, build_fallback_sampler, sampler_ratio};
pub use matcher::{AttributeRule, PatternMatcher, matches};
pub use rule_sampler::{KindSampler, RuleBasedSampler, fallback_decision_count};
