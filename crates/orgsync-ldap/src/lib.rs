//! # orgsync-ldap
//!
//! Directory synchronization engine over LDAP.
//!
//! This crate walks a directory tree and rebuilds its organization:
//!
//! - [`SearchExecutor`]: one search, collected or paged with backpressure
//! - [`OuTreeBuilder`]: nested OU trees built with structured concurrency
//! - [`ChangeNotifier`]: Active Directory change subscriptions that can be
//!   stopped before the server has acknowledged them
//! - [`OrgFetcher`]: the facade owning one bound connection
//!
//! The engine drives any [`DirectoryClient`](orgsync_core::DirectoryClient).
//! [`Ldap3Directory`] talks to a real server through `ldap3`.
//!
//! ## Example
//!
//! ```no_run
//! use orgsync_ldap::{OrgFetcher, OrgOptions, OrgSyncConfig};
//!
//! # async fn run() -> orgsync_core::OrgSyncResult<()> {
//! let config = OrgSyncConfig::builder()
//!     .url("ldaps://dc.example.com")
//!     .admin_dn("cn=admin,dc=example,dc=com")
//!     .admin_password("secret")
//!     .base_dn("dc=example,dc=com")
//!     .build()?;
//!
//! let fetcher = OrgFetcher::connect(config).await?;
//! let org = fetcher.fetch_whole_org(OrgOptions::new()).await?;
//! println!("{} units, {} users", org.ou_count(), org.user_count());
//! fetcher.release().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod connection;
pub mod error;
pub mod fetcher;
pub mod mapper;
pub mod notifier;
pub mod search;
pub mod tree;

pub use config::{DirectoryServiceVariant, FilterTemplates, OrgSyncConfig, OrgSyncConfigBuilder, TlsOptions};
pub use connection::Ldap3Directory;
pub use error::{LdapError, LdapResult};
pub use fetcher::{FetchOptions, OrgFetcher, OrgOptions};
pub use mapper::{ObjectMapper, SEARCH_ATTRIBUTES};
pub use notifier::{ChangeEvent, ChangeNotifier, ChangeSubscription, SubscriptionHandle, SubscriptionPhase};
pub use search::{Page, PagedSearch, SearchExecutor};
pub use tree::OuTreeBuilder;
