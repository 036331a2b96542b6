//! Connection lifecycle integration tests.

use std::sync::Arc;

use orgsync_core::{InMemoryDirectory, OrgSyncError};
use orgsync_ldap::{DirectoryServiceVariant, FetchOptions, OrgFetcher, OrgOptions};

use crate::common::{config, domain, ou, person, TestEnv, ADMIN_DN};

/// The fetcher binds exactly once, however many operations follow.
#[tokio::test]
async fn test_binds_once() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Eng,dc=example,dc=com"),
        person("alice", "ou=Eng,dc=example,dc=com"),
    ])
    .await?;

    env.fetcher.fetch_ous(FetchOptions::new()).await?;
    env.fetcher.fetch_users(FetchOptions::new()).await?;
    env.fetcher.fetch_whole_org(OrgOptions::new()).await?;

    assert_eq!(env.directory.bind_count(), 1);
    Ok(())
}

/// Wrong credentials fail construction with a connection error.
#[tokio::test]
async fn test_rejected_bind() -> anyhow::Result<()> {
    let directory = Arc::new(InMemoryDirectory::with_entries([domain()]));
    directory.add_account(ADMIN_DN, "other");

    let config = config(DirectoryServiceVariant::OpenLdap).build()?;
    let err = OrgFetcher::with_client(directory.clone(), config)
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("bind should fail"))?;
    assert!(err.is_connection_error());
    assert_eq!(directory.bind_count(), 0);
    Ok(())
}

/// Releasing twice is harmless; later operations fail.
#[tokio::test]
async fn test_release_is_idempotent() -> anyhow::Result<()> {
    let env = TestEnv::new([domain()]).await?;

    env.fetcher.release().await?;
    env.fetcher.release().await?;
    assert!(env.fetcher.is_released());
    assert_eq!(env.directory.unbind_count(), 1);

    let err = env.fetcher.fetch_users(FetchOptions::new()).await.unwrap_err();
    assert!(err.is_connection_error());
    Ok(())
}

/// A lost connection is reported by every later operation.
#[tokio::test]
async fn test_connection_loss_is_sticky() -> anyhow::Result<()> {
    let env = TestEnv::new([domain(), ou("ou=Eng,dc=example,dc=com")]).await?;
    env.directory.disconnect();

    let first = env.fetcher.fetch_ous(FetchOptions::new()).await.unwrap_err();
    assert!(matches!(first, OrgSyncError::Connection(_)));

    let second = env.fetcher.fetch_whole_org(OrgOptions::new()).await.unwrap_err();
    assert_eq!(first, second);
    Ok(())
}

/// Searching below a missing base is a per-call protocol error.
#[tokio::test]
async fn test_missing_base_is_recoverable() -> anyhow::Result<()> {
    let env = TestEnv::new([domain(), ou("ou=Eng,dc=example,dc=com")]).await?;

    let err = env
        .fetcher
        .fetch_ous(FetchOptions::new().base_dn("ou=Gone,dc=example,dc=com"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgSyncError::SearchProtocol { code: 32, .. }));

    assert_eq!(env.fetcher.fetch_ous(FetchOptions::new()).await?.len(), 1);
    Ok(())
}
