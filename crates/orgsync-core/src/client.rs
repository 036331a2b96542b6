//! Directory client seam.
//!
//! The synchronization engine never speaks the wire protocol itself. It
//! drives a [`DirectoryClient`]: bind, search, abandon, unbind. Searches
//! return a pull-based [`SearchEvents`] stream so that paging backpressure
//! is a property of the API: the client only asks the server for the next
//! page when the consumer pulls past a [`SearchEvent::PageEnd`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrgSyncResult;
use crate::model::DirectoryEntry;

/// Server-assigned identifier of an outstanding request.
pub type MessageId = i32;

/// LDAP result code for success.
pub const RESULT_SUCCESS: u32 = 0;

/// LDAP result code returned when the search base does not exist.
pub const RESULT_NO_SUCH_OBJECT: u32 = 32;

/// Active Directory control that turns a search into a change notification
/// subscription (`LDAP_SERVER_NOTIFICATION_OID`).
pub const SERVER_NOTIFICATION_OID: &str = "1.2.840.113556.1.4.528";

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    /// Only the base entry itself.
    Base,
    /// Entries one level below the base.
    #[serde(alias = "onelevel")]
    One,
    /// The base entry and its whole subtree.
    #[default]
    #[serde(alias = "subtree")]
    Sub,
}

impl SearchScope {
    /// Returns the scope keyword used in LDAP URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::One => "one",
            Self::Sub => "sub",
        }
    }
}

impl std::fmt::Display for SearchScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchScope {
    type Err = crate::error::OrgSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(Self::Base),
            "one" | "onelevel" => Ok(Self::One),
            "sub" | "subtree" => Ok(Self::Sub),
            other => Err(crate::error::OrgSyncError::config(format!(
                "unknown search scope '{other}'"
            ))),
        }
    }
}

/// A request control passed to the directory verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Control OID.
    pub oid: String,
    /// Whether the server must reject the request if it does not know the control.
    pub critical: bool,
    /// Encoded control value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Control {
    /// Creates a value-less control.
    #[must_use]
    pub fn new(oid: impl Into<String>, critical: bool) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value: None,
        }
    }
}

/// Parameters of one search operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Search base.
    pub base_dn: String,
    /// Search scope.
    pub scope: SearchScope,
    /// Filter string (RFC 4515).
    pub filter: String,
    /// Attributes to return.
    pub attributes: Vec<String>,
    /// Page size, if the results should be paged.
    pub page_size: Option<u32>,
    /// Request controls.
    pub controls: Vec<Control>,
}

impl SearchRequest {
    /// Creates an unpaged request without controls or attribute selection.
    #[must_use]
    pub fn new(base_dn: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            attributes: Vec::new(),
            page_size: None,
            controls: Vec::new(),
        }
    }

    /// Sets the attributes to return.
    #[must_use]
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Requests paged results.
    #[must_use]
    pub const fn paged(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Adds a request control.
    #[must_use]
    pub fn control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    /// Checks whether the request carries the given control.
    #[must_use]
    pub fn has_control(&self, oid: &str) -> bool {
        self.controls.iter().any(|c| c.oid == oid)
    }
}

/// Final status of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// LDAP result code.
    pub code: u32,
    /// Diagnostic message.
    pub message: String,
}

impl SearchOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: RESULT_SUCCESS,
            message: String::new(),
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failure(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Checks whether the search succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == RESULT_SUCCESS
    }
}

/// One event of a search response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    /// An entry was returned.
    Entry {
        /// Identifier of the request that produced the entry.
        message_id: MessageId,
        /// The entry.
        entry: DirectoryEntry,
        /// Response controls attached to the entry.
        controls: Vec<Control>,
    },
    /// The server finished a page and more pages remain. The next page is
    /// requested when the consumer pulls again.
    PageEnd {
        /// Identifier of the request for the finished page.
        message_id: MessageId,
    },
    /// The search is complete. No more events follow.
    Done(SearchOutcome),
}

/// Pull-based stream of search events.
#[async_trait]
pub trait SearchEvents: Send {
    /// Returns the next event, `Ok(None)` once the stream is exhausted.
    ///
    /// ## Errors
    ///
    /// Transport and protocol errors are returned here; the stream is
    /// finished afterwards.
    async fn next_event(&mut self) -> OrgSyncResult<Option<SearchEvent>>;

    /// Cancels an unfinished search and releases its server-side state.
    ///
    /// A page in flight is abandoned. Between pages, the paged result set
    /// is released with a zero-size page request (RFC 2696). Cancelling a
    /// finished search does nothing. The stream is finished afterwards.
    ///
    /// ## Errors
    ///
    /// Returns the transport error of the cancel request.
    async fn cancel(&mut self) -> OrgSyncResult<()>;
}

/// Directory operations the engine depends on.
///
/// Implementations must be thread-safe and support concurrent searches over
/// one bound connection. Bind operations must be serialized.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Binds with the given credentials.
    async fn bind(&self, dn: &str, password: &str) -> OrgSyncResult<()>;

    /// Issues a search.
    async fn search(&self, request: SearchRequest) -> OrgSyncResult<Box<dyn SearchEvents>>;

    /// Abandons an outstanding request.
    async fn abandon(&self, message_id: MessageId) -> OrgSyncResult<()>;

    /// Unbinds and closes the connection.
    async fn unbind(&self) -> OrgSyncResult<()>;
}

#[async_trait]
impl<C: DirectoryClient + ?Sized> DirectoryClient for std::sync::Arc<C> {
    async fn bind(&self, dn: &str, password: &str) -> OrgSyncResult<()> {
        (**self).bind(dn, password).await
    }

    async fn search(&self, request: SearchRequest) -> OrgSyncResult<Box<dyn SearchEvents>> {
        (**self).search(request).await
    }

    async fn abandon(&self, message_id: MessageId) -> OrgSyncResult<()> {
        (**self).abandon(message_id).await
    }

    async fn unbind(&self) -> OrgSyncResult<()> {
        (**self).unbind().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parsing() {
        assert_eq!("base".parse::<SearchScope>().unwrap(), SearchScope::Base);
        assert_eq!("ONE".parse::<SearchScope>().unwrap(), SearchScope::One);
        assert_eq!("subtree".parse::<SearchScope>().unwrap(), SearchScope::Sub);
        assert!("deep".parse::<SearchScope>().is_err());
        assert_eq!(SearchScope::default(), SearchScope::Sub);
    }

    #[test]
    fn request_builder() {
        let request = SearchRequest::new("dc=example", SearchScope::One, "(ou=*)")
            .attributes(["dn", "ou"])
            .paged(10)
            .control(Control::new("1.2.840.113556.1.4.528", false));
        assert_eq!(request.attributes, vec!["dn".to_string(), "ou".to_string()]);
        assert_eq!(request.page_size, Some(10));
        assert!(request.has_control("1.2.840.113556.1.4.528"));
        assert!(!request.has_control("1.2.3"));
    }

    #[test]
    fn outcome_status() {
        assert!(SearchOutcome::success().is_success());
        assert!(!SearchOutcome::failure(32, "noSuchObject").is_success());
    }
}
