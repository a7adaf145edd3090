//! Drop rules: the in-memory model and the YAML loader that builds it.

pub mod loader;
pub mod model;

pub use loader::{load, load_from_config, try_load};
pub use model::{AttributePatterns, DropRule, RuleSet, RuleSpanKind};
