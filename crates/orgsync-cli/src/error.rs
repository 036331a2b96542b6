//! CLI error types.

use orgsync_core::OrgSyncError;
use thiserror::Error;

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error reported by the synchronization engine.
    #[error(transparent)]
    Sync(#[from] OrgSyncError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<orgsync_ldap::LdapError> for CliError {
    fn from(err: orgsync_ldap::LdapError) -> Self {
        Self::Sync(err.into())
    }
}

/// CLI result type.
pub type CliResult<T> = Result<T, CliError>;
