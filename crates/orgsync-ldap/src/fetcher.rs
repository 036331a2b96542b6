//! Organization fetcher facade.
//!
//! [`OrgFetcher`] owns one bound directory connection and exposes the
//! fetch, subscribe and release operations on top of it.
//!
//! ## Connection failures
//!
//! The first connection-level error (bind or transport) is logged once and
//! remembered. Every later operation on the same fetcher fails with that
//! error without touching the directory. Errors surfacing from a
//! [`PagedSearch`] after the fetch returned are recorded the same way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use orgsync_core::{
    DirectoryClient, DirectoryEntry, DirectoryObject, DirectoryUser, OrgSyncError, OrgSyncResult, OrganizationalUnit,
    SearchScope, WholeOrg,
};
use parking_lot::Mutex;

use crate::config::OrgSyncConfig;
use crate::connection::Ldap3Directory;
use crate::mapper::{ObjectMapper, SEARCH_ATTRIBUTES};
use crate::notifier::{ChangeNotifier, ChangeSubscription};
use crate::search::{PagedSearch, SearchExecutor};
use crate::tree::OuTreeBuilder;

/// Per-call overrides for OU and user fetches.
///
/// Unset values fall back to the configured filter template, the
/// configured base DN and subtree scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Search filter.
    pub filter: Option<String>,
    /// Search base.
    pub base_dn: Option<String>,
    /// Search scope.
    pub scope: Option<SearchScope>,
    /// Page size for paged fetches.
    pub page_size: Option<u32>,
}

impl FetchOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sets the search base.
    #[must_use]
    pub fn base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }

    /// Sets the scope.
    #[must_use]
    pub const fn scope(mut self, scope: SearchScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// Per-call overrides for whole-organization fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgOptions {
    /// User filter.
    pub user_filter: Option<String>,
    /// OU filter.
    pub ou_filter: Option<String>,
    /// Search base.
    pub base_dn: Option<String>,
}

impl OrgOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the user filter.
    #[must_use]
    pub fn user_filter(mut self, filter: impl Into<String>) -> Self {
        self.user_filter = Some(filter.into());
        self
    }

    /// Sets the OU filter.
    #[must_use]
    pub fn ou_filter(mut self, filter: impl Into<String>) -> Self {
        self.ou_filter = Some(filter.into());
        self
    }

    /// Sets the search base.
    #[must_use]
    pub fn base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = Some(base_dn.into());
        self
    }
}

/// Directory synchronization facade.
pub struct OrgFetcher<C: DirectoryClient + 'static = Ldap3Directory> {
    client: Arc<C>,
    config: OrgSyncConfig,
    mapper: ObjectMapper,
    executor: SearchExecutor<C>,
    tree: OuTreeBuilder<C>,
    notifier: ChangeNotifier<C>,
    released: AtomicBool,
    fatal: Arc<Mutex<Option<OrgSyncError>>>,
}

impl<C: DirectoryClient + 'static> std::fmt::Debug for OrgFetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgFetcher")
            .field("url", &self.config.url)
            .field("base_dn", &self.config.base_dn)
            .field("variant", &self.config.variant)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl OrgFetcher<Ldap3Directory> {
    /// Connects to the configured server and binds with the admin account.
    ///
    /// ## Errors
    ///
    /// - `OrgSyncError::Configuration` if the configuration is invalid
    /// - `OrgSyncError::Connection` if the server cannot be reached or the
    ///   bind is rejected
    pub async fn connect(config: OrgSyncConfig) -> OrgSyncResult<Self> {
        config.validate()?;
        let client = match Ldap3Directory::connect(&config).await {
            Ok(client) => client,
            Err(e) => {
                let e = OrgSyncError::from(e);
                tracing::error!(url = %config.url, error = %e, "Failed to connect to directory");
                return Err(e);
            }
        };
        Self::with_client(Arc::new(client), config).await
    }
}

impl<C: DirectoryClient + 'static> OrgFetcher<C> {
    /// Binds the given client with the admin account and wraps it.
    ///
    /// ## Errors
    ///
    /// - `OrgSyncError::Configuration` if the configuration is invalid
    /// - `OrgSyncError::Connection` if the bind is rejected
    pub async fn with_client(client: Arc<C>, config: OrgSyncConfig) -> OrgSyncResult<Self> {
        config.validate()?;

        if let Err(e) = client.bind(&config.admin_dn, &config.admin_password).await {
            tracing::error!(admin_dn = %config.admin_dn, error = %e, "Admin bind failed");
            return Err(e);
        }
        tracing::info!(url = %config.url, admin_dn = %config.admin_dn, variant = %config.variant, "Bound to directory");

        let mapper = ObjectMapper::new(config.variant);
        let executor = SearchExecutor::new(client.clone(), SEARCH_ATTRIBUTES.iter().copied());
        Ok(Self {
            tree: OuTreeBuilder::new(executor.clone(), mapper),
            notifier: ChangeNotifier::new(client.clone(), SEARCH_ATTRIBUTES.iter().copied(), config.variant),
            executor,
            mapper,
            client,
            config,
            released: AtomicBool::new(false),
            fatal: Arc::new(Mutex::new(None)),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &OrgSyncConfig {
        &self.config
    }

    /// Returns the shared client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Maps a raw entry, such as a received change, to a typed user or OU.
    #[must_use]
    pub fn classify(&self, entry: &DirectoryEntry) -> DirectoryObject {
        self.mapper.to_object(entry)
    }

    /// Checks whether [`release`](Self::release) was called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn ensure_usable(&self) -> OrgSyncResult<()> {
        if self.is_released() {
            return Err(OrgSyncError::connection("the connection has been released"));
        }
        if let Some(e) = self.fatal.lock().clone() {
            return Err(e);
        }
        Ok(())
    }

    fn track<T>(&self, result: OrgSyncResult<T>) -> OrgSyncResult<T> {
        if let Err(e) = &result {
            record_fatal(&self.fatal, e);
        }
        result
    }

    fn base_dn<'a>(&'a self, base_dn: Option<&'a str>) -> &'a str {
        base_dn.unwrap_or(&self.config.base_dn)
    }

    /// Fetches organizational units.
    ///
    /// ## Errors
    ///
    /// Returns search errors, or the remembered connection error.
    pub async fn fetch_ous(&self, options: FetchOptions) -> OrgSyncResult<Vec<OrganizationalUnit>> {
        self.ensure_usable()?;
        let filter = options.filter.as_deref().unwrap_or(self.config.ou_filter());
        let base_dn = self.base_dn(options.base_dn.as_deref());
        let result = self
            .tree
            .fetch_ous(filter, base_dn, options.scope.unwrap_or_default())
            .await;
        self.track(result)
    }

    /// Fetches users.
    ///
    /// ## Errors
    ///
    /// Returns search errors, or the remembered connection error.
    pub async fn fetch_users(&self, options: FetchOptions) -> OrgSyncResult<Vec<DirectoryUser>> {
        self.ensure_usable()?;
        let filter = options.filter.as_deref().unwrap_or(self.config.user_filter());
        let base_dn = self.base_dn(options.base_dn.as_deref());
        let result = self
            .tree
            .fetch_users(filter, base_dn, options.scope.unwrap_or_default())
            .await;
        self.track(result)
    }

    /// Starts a paged user fetch. Pages are requested as the caller pulls
    /// them.
    ///
    /// ## Errors
    ///
    /// Returns the error of issuing the search, or the remembered
    /// connection error.
    pub async fn fetch_users_paged(&self, options: FetchOptions) -> OrgSyncResult<PagedSearch<DirectoryUser>> {
        self.ensure_usable()?;
        let filter = options.filter.as_deref().unwrap_or(self.config.user_filter());
        let base_dn = self.base_dn(options.base_dn.as_deref());
        let page_size = options.page_size.unwrap_or(self.config.page_size).max(1);
        let mapper = self.mapper;
        let fatal = self.fatal.clone();
        let result = self
            .executor
            .search_paged(filter, base_dn, options.scope.unwrap_or_default(), page_size, move |entry| {
                mapper.to_user(&entry)
            })
            .await
            .map(|search| search.on_error(move |e| record_fatal(&fatal, e)));
        self.track(result)
    }

    /// Reconstructs the whole organization tree.
    ///
    /// ## Errors
    ///
    /// Returns the first search error of any branch, or the remembered
    /// connection error.
    pub async fn fetch_whole_org(&self, options: OrgOptions) -> OrgSyncResult<WholeOrg> {
        self.ensure_usable()?;
        let user_filter = options.user_filter.as_deref().unwrap_or(self.config.user_filter());
        let ou_filter = options.ou_filter.as_deref().unwrap_or(self.config.ou_filter());
        let base_dn = self.base_dn(options.base_dn.as_deref());
        let result = self.tree.fetch_whole_org(user_filter, ou_filter, base_dn).await;
        self.track(result)
    }

    /// Subscribes to directory changes below `base_dn` (default: the
    /// configured base DN). `filter` is evaluated locally.
    ///
    /// ## Errors
    ///
    /// - `OrgSyncError::Unsupported` for directories other than Active Directory
    /// - `OrgSyncError::InvalidFilter` for an unparsable filter
    /// - the error of issuing the search, or the remembered connection error
    pub async fn subscribe_to_changes(
        &self,
        base_dn: Option<&str>,
        filter: Option<&str>,
    ) -> OrgSyncResult<ChangeSubscription> {
        self.ensure_usable()?;
        let base_dn = self.base_dn(base_dn);
        let result = self.notifier.subscribe(base_dn, filter).await;
        self.track(result)
    }

    /// Unbinds and frees the connection. Calling it again does nothing.
    ///
    /// ## Errors
    ///
    /// Returns the client's unbind error on the first call.
    pub async fn release(&self) -> OrgSyncResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            tracing::debug!("Fetcher already released");
            return Ok(());
        }
        tracing::info!(url = %self.config.url, "Releasing directory connection");
        self.client.unbind().await
    }
}

/// Remembers the first connection-level error.
fn record_fatal(fatal: &Mutex<Option<OrgSyncError>>, e: &OrgSyncError) {
    if !e.is_connection_error() {
        return;
    }
    let mut fatal = fatal.lock();
    if fatal.is_none() {
        tracing::error!(error = %e, "Directory connection failed, further operations will fail");
        *fatal = Some(e.clone());
    }
}
