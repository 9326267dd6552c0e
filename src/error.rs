//! Error types for Cloudsearch.

use cloudsearch_core::AccountType;
use thiserror::Error;

/// Result type alias using [`SearchError`].
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    /// A name that is not a registered account type. Run `cloudsearch types`.
    #[error("Unsupported account type: '{0}'. Run `cloudsearch types` to see registered types.")]
    UnsupportedType(String),

    /// A lookup for a tag with no registered builder.
    #[error("No builder registered for account type '{0}'")]
    BuilderMissing(AccountType),

    /// An account or result store operation failed.
    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// A source could not be built or authenticated. Logged, never fatal
    /// to a search or refresh.
    #[error("Source '{label}' degraded: {reason}")]
    SourceDegraded { label: String, reason: String },
}

impl SearchError {
    pub fn degraded(label: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SearchError::SourceDegraded {
            label: label.into(),
            reason: format!("{:#}", reason),
        }
    }
}
