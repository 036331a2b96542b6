//! Common test utilities and fixtures.

use std::sync::Arc;
use std::time::Duration;

use orgsync_core::{DirectoryEntry, InMemoryDirectory};
use orgsync_ldap::{DirectoryServiceVariant, OrgFetcher, OrgSyncConfig};

/// Bind DN registered in every test directory.
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";

/// Bind password registered in every test directory.
pub const ADMIN_PASSWORD: &str = "secret";

/// Domain root of every test directory.
pub const BASE_DN: &str = "dc=example,dc=com";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Test environment: an in-memory directory and a fetcher bound to it.
pub struct TestEnv {
    /// The directory the fetcher talks to.
    pub directory: Arc<InMemoryDirectory>,
    /// Facade under test.
    pub fetcher: OrgFetcher<InMemoryDirectory>,
}

impl TestEnv {
    /// Creates an OpenLDAP-flavoured environment holding `entries`.
    pub async fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> anyhow::Result<Self> {
        Self::with_config(entries, config(DirectoryServiceVariant::OpenLdap).build()?).await
    }

    /// Creates an Active Directory environment holding `entries`.
    pub async fn active_directory(entries: impl IntoIterator<Item = DirectoryEntry>) -> anyhow::Result<Self> {
        Self::with_config(entries, config(DirectoryServiceVariant::ActiveDirectory).build()?).await
    }

    /// Creates an environment with an explicit configuration.
    pub async fn with_config(
        entries: impl IntoIterator<Item = DirectoryEntry>,
        config: OrgSyncConfig,
    ) -> anyhow::Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("orgsync_ldap=debug,orgsync_core=debug")
            .with_test_writer()
            .try_init();

        let directory = Arc::new(InMemoryDirectory::with_entries(entries));
        directory.add_account(ADMIN_DN, ADMIN_PASSWORD);
        let fetcher = OrgFetcher::with_client(directory.clone(), config).await?;
        Ok(Self { directory, fetcher })
    }

    /// Waits until the directory has recorded `count` cancelled searches.
    pub async fn wait_for_cancels(&self, count: usize) -> anyhow::Result<()> {
        tokio::time::timeout(WAIT, async {
            while self.directory.cancelled().len() < count {
                tokio::task::yield_now().await;
            }
        })
        .await?;
        Ok(())
    }
}

/// Returns a configuration builder for the test directory.
pub fn config(variant: DirectoryServiceVariant) -> orgsync_ldap::OrgSyncConfigBuilder {
    OrgSyncConfig::builder()
        .url("ldap://directory.test")
        .admin_dn(ADMIN_DN)
        .admin_password(ADMIN_PASSWORD)
        .base_dn(BASE_DN)
        .variant(variant)
}

/// The domain root entry.
pub fn domain() -> DirectoryEntry {
    DirectoryEntry::new(BASE_DN)
        .with_attr("objectClass", "top")
        .with_attr("objectClass", "domain")
        .with_attr("dc", "example")
}

/// An organizational unit named after its first RDN value.
pub fn ou(dn: &str) -> DirectoryEntry {
    let name = dn
        .split(',')
        .next()
        .and_then(|rdn| rdn.split_once('='))
        .map(|(_, value)| value)
        .unwrap_or_default();
    DirectoryEntry::new(dn)
        .with_attr("objectClass", "top")
        .with_attr("objectClass", "organizationalUnit")
        .with_attr("ou", name)
}

/// An OpenLDAP person with the given uid, placed below `parent`.
pub fn person(uid: &str, parent: &str) -> DirectoryEntry {
    DirectoryEntry::new(format!("uid={uid},{parent}"))
        .with_attr("objectClass", "top")
        .with_attr("objectClass", "person")
        .with_attr("objectClass", "inetOrgPerson")
        .with_attr("uid", uid)
        .with_attr("cn", uid)
        .with_attr("sn", uid)
        .with_attr("mail", format!("{uid}@example.com"))
}

/// An Active Directory account below `parent`.
pub fn ad_user(account: &str, parent: &str, disabled: bool) -> DirectoryEntry {
    let control = if disabled { "514" } else { "512" };
    DirectoryEntry::new(format!("CN={account},{parent}"))
        .with_attr("objectClass", "top")
        .with_attr("objectClass", "person")
        .with_attr("objectClass", "user")
        .with_attr("cn", account)
        .with_attr("sAMAccountName", account)
        .with_attr("sAMAccountType", "805306368")
        .with_attr("userAccountControl", control)
}
