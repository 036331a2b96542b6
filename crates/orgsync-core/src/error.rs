//! Error types for directory synchronization.
//!
//! ## Security Note
//!
//! Error messages must not carry bind credentials. Connection errors
//! describe the failure, never the password used.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while synchronizing with a directory.
///
/// The type is `Clone` so that a fatal connection error can be recorded
/// once and replayed to every later caller of the same engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrgSyncError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Bind or transport failure. Fatal to the engine that owns the connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A distinguished name could not be parsed.
    #[error("Malformed DN '{dn}': {reason}")]
    MalformedDn {
        /// The offending input.
        dn: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A search filter could not be parsed.
    #[error("Invalid filter '{filter}': {reason}")]
    InvalidFilter {
        /// The offending filter string.
        filter: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A search finished with a non-success result code.
    #[error("Search failed with result code {code}: {message} ({partial_results} entries received before failure)")]
    SearchProtocol {
        /// LDAP result code.
        code: u32,
        /// Diagnostic message from the server.
        message: String,
        /// Entries delivered before the failure was reported.
        partial_results: usize,
    },

    /// A change subscription failed. The subscription is not resumable.
    #[error("Change subscription error: {0}")]
    Subscription(String),

    /// A deferred stop gave up waiting for the server to acknowledge the
    /// subscription.
    #[error("Subscription was not acknowledged within {0:?}; stop is still pending")]
    CancellationRaceTimeout(Duration),

    /// Operation not supported for this directory.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrgSyncError {
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

    /// Creates a malformed DN error.
    #[must_use]
    pub fn malformed_dn(dn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedDn {
            dn: dn.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid filter error.
    #[must_use]
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a search protocol error.
    #[must_use]
    pub fn search_protocol(code: u32, message: impl Into<String>, partial_results: usize) -> Self {
        Self::SearchProtocol {
            code,
            message: message.into(),
            partial_results,
        }
    }

    /// Creates a subscription error.
    #[must_use]
    pub fn subscription(msg: impl Into<String>) -> Self {
        Self::Subscription(msg.into())
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Checks if this error invalidates the underlying connection.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Checks if the caller can retry or correct the input and continue
    /// using the same engine.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedDn { .. }
                | Self::InvalidFilter { .. }
                | Self::SearchProtocol { .. }
                | Self::CancellationRaceTimeout(_)
        )
    }
}

/// Result type for synchronization operations.
pub type OrgSyncResult<T> = Result<T, OrgSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_categories() {
        assert!(OrgSyncError::connection("refused").is_connection_error());
        assert!(!OrgSyncError::connection("refused").is_recoverable());
        assert!(OrgSyncError::malformed_dn("", "empty").is_recoverable());
        assert!(OrgSyncError::search_protocol(32, "noSuchObject", 0).is_recoverable());
        assert!(!OrgSyncError::subscription("reset").is_recoverable());
    }

    #[test]
    fn search_protocol_message() {
        let msg = OrgSyncError::search_protocol(32, "no such object", 3).to_string();
        assert!(msg.contains("32"));
        assert!(msg.contains("no such object"));
        assert!(msg.contains("3 entries"));
    }
}
