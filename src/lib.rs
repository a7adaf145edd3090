//! Rule based trace sampling and post-formation span filtering for the
//! OpenTelemetry SDK.
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_copy_implementations)]
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Runs `$operation`, returning `$fallback` if it panics. The panic is logged
/// under `$subsystem`, never propagated into the caller's span path.
macro_rules! catch_panic {
    ($subsystem:literal, $operation:expr, $fallback:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $operation)) {
            Ok(result) => result,
            Err(error) => {
                let message = error
                    .downcast_ref::<&str>()
                    .map(|message| (*message).to_string())
                    .or_else(|| error.downcast_ref::<String>().cloned())
                    .unwrap_or_default();
                tracing::error!("{} | Panic caught: {message}", $subsystem);
                $fallback
            }
        }
    };
}

pub mod attributes;
pub mod config;
pub mod error;
pub mod extension;
pub mod logger;
pub mod processor;
pub mod rules;
pub mod sampling;

pub use attributes::AttributeSnapshot;
pub use config::{Config, get_config};
pub use error::{FilterError, RuleLoadError};
pub use processor::{DroppingSpanProcessor, ProcessorState};
pub use rules::{DropRule, RuleSet, RuleSpanKind};
pub use sampling::{RuleBasedSampler, fallback_decision_count};
