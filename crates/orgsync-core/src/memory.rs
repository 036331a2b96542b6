//! In-memory directory.
//!
//! [`InMemoryDirectory`] implements [`DirectoryClient`] over a list of
//! entries. It evaluates scopes and filters the way a directory server
//! does, serves results in pages, and counts how many pages the consumer
//! actually pulled. Change notification searches are fed through
//! [`InMemoryDirectory::notify`].
//!
//! Cancelled searches are recorded apart from abandons, so a test can tell a
//! search that was really torn down from an abandon of a request id that
//! had already completed.
//!
//! Used for tests and for running the engine without a live server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{
    DirectoryClient, MessageId, SearchEvent, SearchEvents, SearchOutcome, SearchRequest, SearchScope,
    RESULT_NO_SUCH_OBJECT, SERVER_NOTIFICATION_OID,
};
use crate::dn::DistinguishedName;
use crate::error::{OrgSyncError, OrgSyncResult};
use crate::filter::Filter;
use crate::model::DirectoryEntry;

/// Message fed into a live change notification search.
#[derive(Debug)]
enum Notification {
    Change(DirectoryEntry),
    Failed(SearchOutcome),
}

/// In-memory [`DirectoryClient`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: Mutex<Vec<DirectoryEntry>>,
    credentials: Mutex<HashMap<String, String>>,
    failures: Mutex<HashMap<Vec<String>, SearchOutcome>>,
    subscriptions: Mutex<HashMap<MessageId, mpsc::UnboundedSender<Notification>>>,
    requests: Mutex<Vec<SearchRequest>>,
    abandoned: Mutex<Vec<MessageId>>,
    cancelled: Arc<Mutex<Vec<MessageId>>>,
    next_message_id: AtomicI32,
    pages_served: Arc<AtomicUsize>,
    bind_count: AtomicUsize,
    unbind_count: AtomicUsize,
    disconnected: Arc<AtomicBool>,
    notifications_unsupported: AtomicBool,
}

impl InMemoryDirectory {
    /// Creates an empty directory that accepts any bind.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory holding the given entries.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        let directory = Self::new();
        directory.entries.lock().extend(entries);
        directory
    }

    /// Adds an entry.
    pub fn add_entry(&self, entry: DirectoryEntry) {
        self.entries.lock().push(entry);
    }

    /// Restricts binds to the given credentials. Without any registered
    /// account every bind succeeds.
    pub fn add_account(&self, dn: impl Into<String>, password: impl Into<String>) {
        self.credentials.lock().insert(dn.into(), password.into());
    }

    /// Makes searches rooted at `base_dn` deliver their entries and then
    /// finish with the given failure.
    pub fn fail_searches_at(&self, base_dn: &str, code: u32, message: impl Into<String>) {
        let key = dn_key(base_dn).unwrap_or_default();
        self.failures
            .lock()
            .insert(key, SearchOutcome::failure(code, message));
    }

    /// Simulates a dropped connection. Every later operation fails.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.subscriptions.lock().clear();
    }

    /// Restores a connection dropped by [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.disconnected.store(false, Ordering::SeqCst);
    }

    /// Makes the server reject change notification searches.
    pub fn reject_notifications(&self) {
        self.notifications_unsupported.store(true, Ordering::SeqCst);
    }

    /// Delivers a change to every live notification search whose scope and
    /// filter cover the entry. Returns the number of searches notified.
    pub fn notify(&self, entry: DirectoryEntry) -> usize {
        let subscriptions = self.subscriptions.lock();
        let requests = self.requests.lock();
        let mut notified = 0;
        for (id, sender) in subscriptions.iter() {
            let covers = usize::try_from(*id - 1)
                .ok()
                .and_then(|idx| requests.get(idx))
                .map_or(true, |request| matches_request(request, &entry));
            if covers && sender.send(Notification::Change(entry.clone())).is_ok() {
                notified += 1;
            }
        }
        notified
    }

    /// Terminates every live notification search with the given failure.
    pub fn fail_notifications(&self, code: u32, message: impl Into<String>) {
        let outcome = SearchOutcome::failure(code, message);
        for (_, sender) in self.subscriptions.lock().drain() {
            let _ = sender.send(Notification::Failed(outcome.clone()));
        }
    }

    /// Returns the number of live notification searches.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Returns every search request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().clone()
    }

    /// Returns the message ids abandoned so far, in order.
    #[must_use]
    pub fn abandoned(&self) -> Vec<MessageId> {
        self.abandoned.lock().clone()
    }

    /// Returns the ids of searches cancelled before they finished, in order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<MessageId> {
        self.cancelled.lock().clone()
    }

    /// Returns the total number of result pages the server has started
    /// sending, across all searches.
    #[must_use]
    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }

    /// Returns the number of successful binds.
    #[must_use]
    pub fn bind_count(&self) -> usize {
        self.bind_count.load(Ordering::SeqCst)
    }

    /// Returns the number of unbind requests.
    #[must_use]
    pub fn unbind_count(&self) -> usize {
        self.unbind_count.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> OrgSyncResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(OrgSyncError::connection("connection closed"));
        }
        Ok(())
    }

    fn allocate_id(&self) -> MessageId {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn finished_search(&self, message_id: MessageId, outcome: SearchOutcome) -> MemorySearch {
        MemorySearch {
            message_id,
            results: VecDeque::new(),
            page_size: None,
            served_in_page: 0,
            page_open: false,
            outcome: Some(outcome),
            pages_served: self.pages_served.clone(),
            cancelled: self.cancelled.clone(),
            disconnected: self.disconnected.clone(),
        }
    }

    fn base_exists(&self, base: &[String]) -> bool {
        base.is_empty()
            || self
                .entries
                .lock()
                .iter()
                .any(|entry| dn_key(&entry.dn).ok().as_deref() == Some(base))
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn bind(&self, dn: &str, password: &str) -> OrgSyncResult<()> {
        self.ensure_connected()?;
        let credentials = self.credentials.lock();
        if !credentials.is_empty() && credentials.get(dn).map(String::as_str) != Some(password) {
            return Err(OrgSyncError::connection("invalid credentials"));
        }
        self.bind_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(&self, request: SearchRequest) -> OrgSyncResult<Box<dyn SearchEvents>> {
        self.ensure_connected()?;
        let filter = Filter::parse(&request.filter)?;
        let base = dn_key(&request.base_dn)?;

        // Ids are handed out in request order so notify() can find the request.
        let message_id = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            self.allocate_id()
        };
        tracing::trace!(
            message_id,
            base_dn = %request.base_dn,
            scope = %request.scope,
            filter = %request.filter,
            "In-memory search"
        );

        if request.has_control(SERVER_NOTIFICATION_OID) {
            if self.notifications_unsupported.load(Ordering::SeqCst) {
                return Ok(Box::new(
                    self.finished_search(message_id, SearchOutcome::failure(12, "unavailableCriticalExtension")),
                ));
            }
            let (sender, receiver) = mpsc::unbounded_channel();
            self.subscriptions.lock().insert(message_id, sender);
            return Ok(Box::new(NotificationSearch {
                message_id,
                receiver,
                finished: false,
            }));
        }

        if !self.base_exists(&base) {
            return Ok(Box::new(
                self.finished_search(message_id, SearchOutcome::failure(RESULT_NO_SUCH_OBJECT, "noSuchObject")),
            ));
        }

        let results: VecDeque<DirectoryEntry> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| {
                dn_key(&entry.dn)
                    .map(|dn| in_scope(&dn, &base, request.scope))
                    .unwrap_or(false)
            })
            .filter(|entry| filter.matches(entry))
            .map(|entry| project(entry, &request.attributes))
            .collect();

        let outcome = self
            .failures
            .lock()
            .get(&base)
            .cloned()
            .unwrap_or_else(SearchOutcome::success);

        Ok(Box::new(MemorySearch {
            message_id,
            results,
            page_size: request.page_size.map(|size| size as usize),
            served_in_page: 0,
            page_open: false,
            outcome: Some(outcome),
            pages_served: self.pages_served.clone(),
            cancelled: self.cancelled.clone(),
            disconnected: self.disconnected.clone(),
        }))
    }

    async fn abandon(&self, message_id: MessageId) -> OrgSyncResult<()> {
        self.ensure_connected()?;
        tracing::trace!(message_id, "In-memory abandon");
        self.abandoned.lock().push(message_id);
        self.subscriptions.lock().remove(&message_id);
        Ok(())
    }

    async fn unbind(&self) -> OrgSyncResult<()> {
        self.unbind_count.fetch_add(1, Ordering::SeqCst);
        self.disconnected.store(true, Ordering::SeqCst);
        self.subscriptions.lock().clear();
        Ok(())
    }
}

// ============================================================================
// Result streams
// ============================================================================

struct MemorySearch {
    message_id: MessageId,
    results: VecDeque<DirectoryEntry>,
    page_size: Option<usize>,
    served_in_page: usize,
    page_open: bool,
    outcome: Option<SearchOutcome>,
    pages_served: Arc<AtomicUsize>,
    cancelled: Arc<Mutex<Vec<MessageId>>>,
    disconnected: Arc<AtomicBool>,
}

#[async_trait]
impl SearchEvents for MemorySearch {
    async fn next_event(&mut self) -> OrgSyncResult<Option<SearchEvent>> {
        if self.outcome.is_none() {
            return Ok(None);
        }

        if !self.page_open {
            // Every page after the first is a new request on the wire.
            if self.disconnected.load(Ordering::SeqCst) {
                self.outcome = None;
                return Err(OrgSyncError::connection("connection closed"));
            }
            self.page_open = true;
            self.served_in_page = 0;
            self.pages_served.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(size) = self.page_size {
            if self.served_in_page >= size && !self.results.is_empty() {
                self.page_open = false;
                return Ok(Some(SearchEvent::PageEnd {
                    message_id: self.message_id,
                }));
            }
        }

        match self.results.pop_front() {
            Some(entry) => {
                self.served_in_page += 1;
                Ok(Some(SearchEvent::Entry {
                    message_id: self.message_id,
                    entry,
                    controls: Vec::new(),
                }))
            }
            None => Ok(self.outcome.take().map(SearchEvent::Done)),
        }
    }

    async fn cancel(&mut self) -> OrgSyncResult<()> {
        if self.outcome.take().is_some() {
            self.results.clear();
            self.cancelled.lock().push(self.message_id);
        }
        Ok(())
    }
}

struct NotificationSearch {
    message_id: MessageId,
    receiver: mpsc::UnboundedReceiver<Notification>,
    finished: bool,
}

#[async_trait]
impl SearchEvents for NotificationSearch {
    async fn next_event(&mut self) -> OrgSyncResult<Option<SearchEvent>> {
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv().await {
            Some(Notification::Change(entry)) => Ok(Some(SearchEvent::Entry {
                message_id: self.message_id,
                entry,
                controls: Vec::new(),
            })),
            Some(Notification::Failed(outcome)) => {
                self.finished = true;
                Ok(Some(SearchEvent::Done(outcome)))
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    async fn cancel(&mut self) -> OrgSyncResult<()> {
        self.finished = true;
        self.receiver.close();
        Ok(())
    }
}

// ============================================================================
// Matching helpers
// ============================================================================

/// Lower-cased components of a DN, most-specific first. The empty string
/// is the root.
fn dn_key(dn: &str) -> OrgSyncResult<Vec<String>> {
    if dn.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed = DistinguishedName::parse(dn)?;
    Ok(parsed
        .rdns()
        .iter()
        .map(|rdn| rdn.to_string().to_lowercase())
        .collect())
}

fn in_scope(dn: &[String], base: &[String], scope: SearchScope) -> bool {
    if dn.len() < base.len() || dn[dn.len() - base.len()..] != *base {
        return false;
    }
    match scope {
        SearchScope::Base => dn.len() == base.len() && !base.is_empty(),
        SearchScope::One => dn.len() == base.len() + 1,
        SearchScope::Sub => true,
    }
}

fn matches_request(request: &SearchRequest, entry: &DirectoryEntry) -> bool {
    let in_base = match (dn_key(&entry.dn), dn_key(&request.base_dn)) {
        (Ok(dn), Ok(base)) => in_scope(&dn, &base, request.scope),
        _ => false,
    };
    in_base
        && Filter::parse(&request.filter)
            .map(|filter| filter.matches(entry))
            .unwrap_or(false)
}

/// Keeps only the requested attributes. An empty selection returns all.
fn project(entry: &DirectoryEntry, attributes: &[String]) -> DirectoryEntry {
    if attributes.is_empty() {
        return entry.clone();
    }
    let mut projected = DirectoryEntry::new(entry.dn.clone());
    for (name, values) in &entry.attributes {
        if attributes.iter().any(|wanted| wanted.eq_ignore_ascii_case(name)) {
            for value in values {
                projected.push_attr(name.clone(), value.clone());
            }
        }
    }
    projected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::with_entries([
            DirectoryEntry::new("dc=example,dc=com").with_attr("objectClass", "domain"),
            DirectoryEntry::new("ou=Eng,dc=example,dc=com")
                .with_attr("objectClass", "organizationalUnit")
                .with_attr("ou", "Eng"),
            DirectoryEntry::new("cn=Alice,ou=Eng,dc=example,dc=com")
                .with_attr("objectClass", "person")
                .with_attr("cn", "Alice")
                .with_attr("mail", "alice@example.com"),
            DirectoryEntry::new("cn=Bob,ou=Eng,dc=example,dc=com")
                .with_attr("objectClass", "person")
                .with_attr("cn", "Bob"),
            DirectoryEntry::new("cn=Carol,ou=Eng,dc=example,dc=com")
                .with_attr("objectClass", "person")
                .with_attr("cn", "Carol"),
        ])
    }

    async fn drain(mut events: Box<dyn SearchEvents>) -> Vec<SearchEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.next_event().await.unwrap() {
            out.push(event);
        }
        out
    }

    fn entry_dns(events: &[SearchEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SearchEvent::Entry { entry, .. } => Some(entry.dn.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn scopes() {
        let dir = directory();
        let base = "ou=Eng,dc=example,dc=com";

        let events = drain(dir.search(SearchRequest::new(base, SearchScope::Base, "(objectClass=*)")).await.unwrap()).await;
        assert_eq!(entry_dns(&events), vec![base.to_string()]);

        let events = drain(dir.search(SearchRequest::new(base, SearchScope::One, "(objectClass=*)")).await.unwrap()).await;
        assert_eq!(entry_dns(&events).len(), 3);

        let events = drain(
            dir.search(SearchRequest::new("DC=Example,DC=Com", SearchScope::Sub, "(objectClass=*)"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(entry_dns(&events).len(), 5);
        assert_eq!(events.last(), Some(&SearchEvent::Done(SearchOutcome::success())));
    }

    #[tokio::test]
    async fn missing_base_is_no_such_object() {
        let dir = directory();
        let events = drain(
            dir.search(SearchRequest::new("dc=missing", SearchScope::Sub, "(objectClass=*)"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(
            events,
            vec![SearchEvent::Done(SearchOutcome::failure(RESULT_NO_SUCH_OBJECT, "noSuchObject"))]
        );
    }

    #[tokio::test]
    async fn pages_are_served_on_demand() {
        let dir = directory();
        let request = SearchRequest::new("ou=Eng,dc=example,dc=com", SearchScope::One, "(objectClass=person)").paged(2);
        let mut events = dir.search(request).await.unwrap();

        assert!(matches!(events.next_event().await.unwrap(), Some(SearchEvent::Entry { .. })));
        assert!(matches!(events.next_event().await.unwrap(), Some(SearchEvent::Entry { .. })));
        assert!(matches!(events.next_event().await.unwrap(), Some(SearchEvent::PageEnd { .. })));
        assert_eq!(dir.pages_served(), 1);

        assert!(matches!(events.next_event().await.unwrap(), Some(SearchEvent::Entry { .. })));
        assert_eq!(dir.pages_served(), 2);
        assert!(matches!(events.next_event().await.unwrap(), Some(SearchEvent::Done(_))));
        assert!(events.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_is_recorded_only_for_unfinished_searches() {
        let dir = directory();
        let request = SearchRequest::new("ou=Eng,dc=example,dc=com", SearchScope::One, "(objectClass=person)").paged(2);
        let mut events = dir.search(request.clone()).await.unwrap();
        events.next_event().await.unwrap();
        events.cancel().await.unwrap();
        events.cancel().await.unwrap();
        assert!(events.next_event().await.unwrap().is_none());
        assert_eq!(dir.cancelled(), vec![1]);
        assert!(dir.abandoned().is_empty());

        let mut finished = dir.search(request).await.unwrap();
        while finished.next_event().await.unwrap().is_some() {}
        finished.cancel().await.unwrap();
        assert_eq!(dir.cancelled(), vec![1]);
    }

    #[tokio::test]
    async fn next_page_fails_after_disconnect() {
        let dir = directory();
        let request = SearchRequest::new("ou=Eng,dc=example,dc=com", SearchScope::One, "(objectClass=person)").paged(2);
        let mut events = dir.search(request).await.unwrap();
        for _ in 0..3 {
            events.next_event().await.unwrap();
        }
        dir.disconnect();
        assert!(events.next_event().await.unwrap_err().is_connection_error());
        assert!(events.next_event().await.unwrap().is_none());

        dir.reconnect();
        dir.search(SearchRequest::new("", SearchScope::Sub, "(objectClass=*)")).await.unwrap();
    }

    #[tokio::test]
    async fn attribute_projection() {
        let dir = directory();
        let request = SearchRequest::new("cn=Alice,ou=Eng,dc=example,dc=com", SearchScope::Base, "(cn=*)").attributes(["CN"]);
        let events = drain(dir.search(request).await.unwrap()).await;
        match &events[0] {
            SearchEvent::Entry { entry, .. } => {
                assert_eq!(entry.get_attr("cn"), Some("Alice"));
                assert!(!entry.has_attr("mail"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn bind_checks_registered_accounts() {
        let dir = directory();
        dir.bind("cn=anyone", "x").await.unwrap();

        dir.add_account("cn=admin,dc=example,dc=com", "secret");
        assert!(dir.bind("cn=admin,dc=example,dc=com", "wrong").await.unwrap_err().is_connection_error());
        dir.bind("cn=admin,dc=example,dc=com", "secret").await.unwrap();
        assert_eq!(dir.bind_count(), 2);
    }

    #[tokio::test]
    async fn notifications_are_routed_by_scope() {
        let dir = directory();
        let request = SearchRequest::new("ou=Eng,dc=example,dc=com", SearchScope::Sub, "(objectClass=*)")
            .control(crate::client::Control::new(SERVER_NOTIFICATION_OID, false));
        let mut events = dir.search(request).await.unwrap();
        assert_eq!(dir.active_subscriptions(), 1);

        assert_eq!(dir.notify(DirectoryEntry::new("cn=Zed,dc=example,dc=com")), 0);
        assert_eq!(dir.notify(DirectoryEntry::new("cn=Dan,ou=Eng,dc=example,dc=com")), 1);
        match events.next_event().await.unwrap() {
            Some(SearchEvent::Entry { entry, message_id, .. }) => {
                assert_eq!(entry.dn, "cn=Dan,ou=Eng,dc=example,dc=com");
                dir.abandon(message_id).await.unwrap();
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(dir.active_subscriptions(), 0);
        assert!(events.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn disconnect_fails_operations() {
        let dir = directory();
        dir.disconnect();
        let err = dir
            .search(SearchRequest::new("", SearchScope::Sub, "(objectClass=*)"))
            .await
            .err()
            .unwrap();
        assert!(err.is_connection_error());
    }
}
