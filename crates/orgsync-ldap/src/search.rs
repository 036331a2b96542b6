//! Search executor.
//!
//! Issues one directory search and adapts its event stream either into a
//! materialized list of entries or into a [`PagedSearch`] that requests each
//! page only when the consumer asks for it.

use std::sync::Arc;

use futures::Stream;
use orgsync_core::{
    DirectoryClient, DirectoryEntry, OrgSyncError, OrgSyncResult, SearchEvent, SearchEvents, SearchRequest, SearchScope,
};

/// Runs searches against a shared directory client.
pub struct SearchExecutor<C: DirectoryClient + 'static> {
    client: Arc<C>,
    attributes: Vec<String>,
}

impl<C: DirectoryClient + 'static> Clone for SearchExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

impl<C: DirectoryClient + 'static> SearchExecutor<C> {
    /// Creates an executor that requests the given attributes.
    pub fn new<I, S>(client: Arc<C>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the shared client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn request(&self, filter: &str, base_dn: &str, scope: SearchScope) -> SearchRequest {
        SearchRequest::new(base_dn, scope, filter).attributes(self.attributes.iter().cloned())
    }

    /// Runs a search and collects every entry in delivery order.
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::SearchProtocol` if the search finishes with a
    /// non-success result, carrying the number of entries received before
    /// the failure. Transport errors are returned unchanged.
    pub async fn search(&self, filter: &str, base_dn: &str, scope: SearchScope) -> OrgSyncResult<Vec<DirectoryEntry>> {
        tracing::debug!(base_dn, %scope, filter, "Issuing search");
        let mut events = self.client.search(self.request(filter, base_dn, scope)).await?;

        let mut entries = Vec::new();
        while let Some(event) = events.next_event().await? {
            match event {
                SearchEvent::Entry { entry, .. } => entries.push(entry),
                SearchEvent::PageEnd { .. } => {}
                SearchEvent::Done(outcome) if outcome.is_success() => {
                    tracing::debug!(base_dn, %scope, count = entries.len(), "Search complete");
                    return Ok(entries);
                }
                SearchEvent::Done(outcome) => {
                    tracing::warn!(
                        base_dn,
                        %scope,
                        code = outcome.code,
                        message = %outcome.message,
                        partial = entries.len(),
                        "Search failed"
                    );
                    return Err(OrgSyncError::search_protocol(outcome.code, outcome.message, entries.len()));
                }
            }
        }

        Err(OrgSyncError::Internal(format!(
            "search at '{base_dn}' ended without a result"
        )))
    }

    /// Starts a paged search. Entries are converted with `map`.
    ///
    /// ## Errors
    ///
    /// Returns the client's error if the search cannot be issued.
    pub async fn search_paged<T, F>(
        &self,
        filter: &str,
        base_dn: &str,
        scope: SearchScope,
        page_size: u32,
        map: F,
    ) -> OrgSyncResult<PagedSearch<T>>
    where
        F: Fn(DirectoryEntry) -> T + Send + Sync + 'static,
    {
        tracing::debug!(base_dn, %scope, filter, page_size, "Issuing paged search");
        let events = self
            .client
            .search(self.request(filter, base_dn, scope).paged(page_size))
            .await?;

        Ok(PagedSearch {
            events: Some(events),
            map: Box::new(map),
            on_error: None,
            next_index: 0,
            delivered: 0,
            base_dn: base_dn.to_string(),
        })
    }
}

// ============================================================================
// Paged Search
// ============================================================================

/// One page of a paged search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Objects delivered in this page.
    pub objects: Vec<T>,
    /// Zero-based page number.
    pub index: usize,
    /// Whether this is the final page.
    pub is_last: bool,
}

type ErrorHook = Box<dyn Fn(&OrgSyncError) + Send + Sync>;

/// An in-progress paged search.
///
/// The next page is requested from the server only when
/// [`next_page`](Self::next_page) is called again. Dropping an unfinished
/// search cancels it on the server.
pub struct PagedSearch<T> {
    events: Option<Box<dyn SearchEvents>>,
    map: Box<dyn Fn(DirectoryEntry) -> T + Send + Sync>,
    on_error: Option<ErrorHook>,
    next_index: usize,
    delivered: usize,
    base_dn: String,
}

impl<T> std::fmt::Debug for PagedSearch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedSearch")
            .field("base_dn", &self.base_dn)
            .field("next_index", &self.next_index)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl<T> PagedSearch<T> {
    /// Returns true once the final page was delivered or the search failed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.events.is_none()
    }

    /// Returns the number of objects delivered so far.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Registers a callback that sees every error returned by
    /// [`next_page`](Self::next_page).
    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&OrgSyncError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Pulls the next page. Returns `Ok(None)` after the final page.
    ///
    /// ## Errors
    ///
    /// Returns `OrgSyncError::SearchProtocol` if the server ends the search
    /// with a failure; pages delivered earlier stay valid. Transport errors
    /// are returned unchanged. The search is finished after any error.
    pub async fn next_page(&mut self) -> OrgSyncResult<Option<Page<T>>> {
        let result = self.pull_page().await;
        if let (Err(e), Some(hook)) = (&result, &self.on_error) {
            hook(e);
        }
        result
    }

    async fn pull_page(&mut self) -> OrgSyncResult<Option<Page<T>>> {
        let Some(events) = self.events.as_mut() else {
            return Ok(None);
        };

        let mut objects = Vec::new();
        loop {
            let event = match events.next_event().await {
                Ok(event) => event,
                Err(e) => {
                    self.events = None;
                    return Err(e);
                }
            };

            match event {
                Some(SearchEvent::Entry { entry, .. }) => objects.push((self.map)(entry)),
                Some(SearchEvent::PageEnd { .. }) => return Ok(Some(self.page(objects, false))),
                Some(SearchEvent::Done(outcome)) if outcome.is_success() => {
                    self.events = None;
                    let page = self.page(objects, true);
                    tracing::debug!(base_dn = %self.base_dn, pages = self.next_index, count = self.delivered, "Paged search complete");
                    return Ok(Some(page));
                }
                Some(SearchEvent::Done(outcome)) => {
                    self.events = None;
                    let partial = self.delivered + objects.len();
                    tracing::warn!(
                        base_dn = %self.base_dn,
                        code = outcome.code,
                        message = %outcome.message,
                        partial,
                        "Paged search failed"
                    );
                    return Err(OrgSyncError::search_protocol(outcome.code, outcome.message, partial));
                }
                None => {
                    self.events = None;
                    return Ok(Some(self.page(objects, true)));
                }
            }
        }
    }

    fn page(&mut self, objects: Vec<T>, is_last: bool) -> Page<T> {
        let index = self.next_index;
        self.next_index += 1;
        self.delivered += objects.len();
        Page {
            objects,
            index,
            is_last,
        }
    }

    /// Adapts the search into a stream of pages.
    ///
    /// Each poll after a page requests the next one, so a consumer that
    /// stops polling stops the server as well.
    pub fn into_stream(self) -> impl Stream<Item = OrgSyncResult<Page<T>>> {
        futures::stream::unfold(self, |mut search| async move {
            match search.next_page().await {
                Ok(Some(page)) => Some((Ok(page), search)),
                Ok(None) => None,
                Err(e) => Some((Err(e), search)),
            }
        })
    }
}

impl<T> Drop for PagedSearch<T> {
    fn drop(&mut self) {
        let Some(mut events) = self.events.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(base_dn = %self.base_dn, "No runtime to cancel unfinished paged search");
            return;
        };

        tracing::debug!(base_dn = %self.base_dn, pages = self.next_index, "Cancelling unfinished paged search");
        let base_dn = std::mem::take(&mut self.base_dn);
        runtime.spawn(async move {
            if let Err(e) = events.cancel().await {
                tracing::warn!(base_dn = %base_dn, error = %e, "Failed to cancel paged search");
            }
        });
    }
}
