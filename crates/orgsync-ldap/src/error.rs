//! LDAP-specific error types.
//!
//! ## Security Note
//!
//! Error messages must not leak bind credentials. Bind failures carry the
//! server diagnostic only.

use orgsync_core::OrgSyncError;
use thiserror::Error;

/// LDAP-specific errors.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid configuration.
    #[error("LDAP configuration error: {0}")]
    Configuration(String),

    /// Connection failed.
    #[error("LDAP connection failed: {0}")]
    Connection(String),

    /// Bind (authentication) failed.
    #[error("LDAP bind failed: {0}")]
    Bind(String),

    /// The connection was released.
    #[error("LDAP connection is closed")]
    Closed,

    /// Underlying ldap3 error.
    #[error("LDAP error: {0}")]
    Ldap3(#[from] ldap3::LdapError),
}

impl LdapError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Checks if this is a connection-related error.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Bind(_) | Self::Closed => true,
            Self::Ldap3(ldap3::LdapError::LdapResult { .. }) => false,
            Self::Ldap3(_) => true,
            Self::Configuration(_) => false,
        }
    }
}

/// Result type for LDAP operations.
pub type LdapResult<T> = Result<T, LdapError>;

impl From<LdapError> for OrgSyncError {
    fn from(err: LdapError) -> Self {
        match err {
            LdapError::Configuration(msg) => OrgSyncError::Configuration(msg),
            LdapError::Connection(msg) | LdapError::Bind(msg) => OrgSyncError::Connection(msg),
            LdapError::Closed => OrgSyncError::connection("connection is closed"),
            LdapError::Ldap3(ldap3::LdapError::LdapResult { result }) => {
                OrgSyncError::search_protocol(result.rc, result.text, 0)
            }
            LdapError::Ldap3(e) => OrgSyncError::Connection(e.to_string()),
        }
    }
}
