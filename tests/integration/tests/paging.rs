//! Paged user fetch integration tests.

use std::collections::BTreeSet;

use futures::TryStreamExt;
use orgsync_core::{OrgSyncError, SearchScope};
use orgsync_ldap::{DirectoryServiceVariant, FetchOptions};

use crate::common::{config, domain, ou, person, TestEnv, BASE_DN};

fn staff(count: usize) -> Vec<orgsync_core::DirectoryEntry> {
    let mut entries = vec![domain(), ou("ou=Staff,dc=example,dc=com")];
    entries.extend((0..count).map(|i| person(&format!("user{i:02}"), "ou=Staff,dc=example,dc=com")));
    entries
}

/// 25 users in pages of 10 arrive as 10, 10 and 5, each page requested
/// only when pulled.
#[tokio::test]
async fn test_pages_follow_consumer() -> anyhow::Result<()> {
    let env = TestEnv::new(staff(25)).await?;

    let mut pager = env
        .fetcher
        .fetch_users_paged(FetchOptions::new().page_size(10))
        .await?;
    assert_eq!(env.directory.pages_served(), 0);

    let mut seen = BTreeSet::new();
    let mut sizes = Vec::new();
    while let Some(page) = pager.next_page().await? {
        assert_eq!(env.directory.pages_served(), page.index + 1);
        sizes.push(page.objects.len());
        seen.extend(page.objects.into_iter().map(|user| user.dn));
        if page.is_last {
            assert!(pager.is_finished());
        }
    }

    assert_eq!(sizes, [10, 10, 5]);
    assert_eq!(seen.len(), 25);
    assert_eq!(env.directory.requests().len(), 1);
    assert_eq!(env.directory.requests()[0].page_size, Some(10));
    Ok(())
}

/// Without an explicit size the configured page size applies.
#[tokio::test]
async fn test_configured_page_size() -> anyhow::Result<()> {
    let env = TestEnv::with_config(
        staff(12),
        config(DirectoryServiceVariant::OpenLdap).page_size(5).build()?,
    )
    .await?;

    let pages: Vec<_> = env
        .fetcher
        .fetch_users_paged(FetchOptions::new())
        .await?
        .into_stream()
        .try_collect()
        .await?;

    let sizes: Vec<_> = pages.iter().map(|page| page.objects.len()).collect();
    assert_eq!(sizes, [5, 5, 2]);
    assert!(pages.last().is_some_and(|page| page.is_last));
    Ok(())
}

/// A scoped paged fetch only sees its level.
#[tokio::test]
async fn test_paged_scope_and_base() -> anyhow::Result<()> {
    let mut entries = staff(3);
    entries.push(person("svc", BASE_DN));
    let env = TestEnv::new(entries).await?;

    let pages: Vec<_> = env
        .fetcher
        .fetch_users_paged(FetchOptions::new().base_dn(BASE_DN).scope(SearchScope::One).page_size(10))
        .await?
        .into_stream()
        .try_collect()
        .await?;

    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].objects.len(), 1);
    assert_eq!(pages[0].objects[0].account_name.as_deref(), Some("svc"));
    Ok(())
}

/// A server failure surfaces after the pages already delivered.
#[tokio::test]
async fn test_failure_after_delivered_pages() -> anyhow::Result<()> {
    let env = TestEnv::new(staff(15)).await?;
    env.directory.fail_searches_at(BASE_DN, 11, "adminLimitExceeded");

    let mut pager = env
        .fetcher
        .fetch_users_paged(FetchOptions::new().page_size(10))
        .await?;

    let first = pager.next_page().await?.ok_or_else(|| anyhow::anyhow!("no first page"))?;
    assert_eq!(first.objects.len(), 10);

    let err = pager.next_page().await.unwrap_err();
    assert!(matches!(err, OrgSyncError::SearchProtocol { code: 11, partial_results: 15, .. }));
    assert!(pager.next_page().await?.is_none());
    Ok(())
}

/// Dropping a pager mid-way cancels the search and requests no more pages.
#[tokio::test]
async fn test_dropped_pager_is_cancelled() -> anyhow::Result<()> {
    let env = TestEnv::new(staff(25)).await?;

    let mut pager = env
        .fetcher
        .fetch_users_paged(FetchOptions::new().page_size(10))
        .await?;
    pager.next_page().await?;
    drop(pager);

    env.wait_for_cancels(1).await?;
    assert_eq!(env.directory.pages_served(), 1);
    assert!(env.directory.abandoned().is_empty());
    Ok(())
}

/// A pager dropped before its first page still releases the search.
#[tokio::test]
async fn test_pager_dropped_before_first_page_is_cancelled() -> anyhow::Result<()> {
    let env = TestEnv::new(staff(25)).await?;

    let pager = env
        .fetcher
        .fetch_users_paged(FetchOptions::new().page_size(10))
        .await?;
    drop(pager);

    env.wait_for_cancels(1).await?;
    assert_eq!(env.directory.pages_served(), 0);
    Ok(())
}
