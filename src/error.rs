use std::path::PathBuf;

use thiserror::Error;

/// Reasons a rule file could not be turned into a [`crate::RuleSet`].
///
/// These never reach the host: [`crate::rules::load`] logs them and falls back
/// to an empty rule set.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("rule file {} does not exist or is not a file", .0.display())]
    NotFound(PathBuf),
    #[error("failed to parse rule file: {0}")]
    Parse(#[from] figment::Error),
    #[error("rule file does not contain a '{0}' section")]
    MissingSection(&'static str),
}

/// Construction errors for [`crate::DroppingSpanProcessor`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("attribute key prefix must be set and must not be empty")]
    EmptyPrefix,
}
