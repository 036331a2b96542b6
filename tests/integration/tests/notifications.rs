//! Change notification integration tests.

use std::time::Duration;

use orgsync_core::{OrgSyncError, SearchScope};
use orgsync_ldap::{ChangeEvent, ChangeSubscription, SubscriptionPhase};

use crate::common::{ad_user, domain, ou, TestEnv, BASE_DN, WAIT};

async fn next(subscription: &mut ChangeSubscription) -> anyhow::Result<Option<ChangeEvent>> {
    Ok(tokio::time::timeout(WAIT, subscription.recv()).await?)
}

async fn directory() -> anyhow::Result<TestEnv> {
    TestEnv::active_directory([domain(), ou("OU=Staff,dc=example,dc=com")]).await
}

/// A stop issued before the server acknowledged the subscription is
/// carried out on the first event, which is not delivered.
#[tokio::test]
async fn test_stop_before_acknowledgement() -> anyhow::Result<()> {
    let env = directory().await?;
    let mut subscription = env.fetcher.subscribe_to_changes(None, None).await?;

    subscription.stop().await?;
    assert!(env.directory.abandoned().is_empty());

    env.directory
        .notify(ad_user("alice", "OU=Staff,dc=example,dc=com", false));

    assert_eq!(next(&mut subscription).await?, Some(ChangeEvent::End));
    assert_eq!(next(&mut subscription).await?, None);
    assert_eq!(env.directory.abandoned().len(), 1);
    assert_eq!(subscription.phase(), SubscriptionPhase::Stopped);
    Ok(())
}

/// Changes failing the client-side filter are dropped; matching ones are
/// delivered as sent.
#[tokio::test]
async fn test_client_side_filter() -> anyhow::Result<()> {
    let env = directory().await?;
    let mut subscription = env
        .fetcher
        .subscribe_to_changes(None, Some("(sAMAccountName=alice)"))
        .await?;

    let bob = ad_user("bob", "OU=Staff,dc=example,dc=com", false);
    let alice = ad_user("alice", "OU=Staff,dc=example,dc=com", false);
    env.directory.notify(bob);
    env.directory.notify(alice.clone());

    match next(&mut subscription).await? {
        Some(ChangeEvent::Change { entry, .. }) => assert_eq!(entry.dn, alice.dn),
        other => anyhow::bail!("unexpected event {other:?}"),
    }

    subscription.stop_and_wait(WAIT).await?;
    assert_eq!(next(&mut subscription).await?, Some(ChangeEvent::End));
    Ok(())
}

/// The subscription search covers the subtree below the requested base.
#[tokio::test]
async fn test_subscription_base() -> anyhow::Result<()> {
    let env = directory().await?;
    let _subscription = env
        .fetcher
        .subscribe_to_changes(Some("OU=Staff,dc=example,dc=com"), None)
        .await?;

    let request = env
        .directory
        .requests()
        .pop()
        .ok_or_else(|| anyhow::anyhow!("no request"))?;
    assert_eq!(request.base_dn, "OU=Staff,dc=example,dc=com");
    assert_eq!(request.scope, SearchScope::Sub);

    assert_eq!(env.directory.notify(ad_user("out", BASE_DN, false)), 0);
    assert_eq!(
        env.directory
            .notify(ad_user("in", "OU=Staff,dc=example,dc=com", false)),
        1
    );
    Ok(())
}

/// Waiting for a stop that the server never confirms gives up.
#[tokio::test]
async fn test_stop_and_wait_times_out() -> anyhow::Result<()> {
    let env = directory().await?;
    let subscription = env.fetcher.subscribe_to_changes(None, None).await?;

    let timeout = Duration::from_millis(50);
    let err = subscription.stop_and_wait(timeout).await.unwrap_err();
    assert_eq!(err, OrgSyncError::CancellationRaceTimeout(timeout));
    assert_eq!(subscription.phase(), SubscriptionPhase::Subscribing);
    Ok(())
}

/// Server-side termination errors the subscription without retrying.
#[tokio::test]
async fn test_server_failure() -> anyhow::Result<()> {
    let env = directory().await?;
    let mut subscription = env.fetcher.subscribe_to_changes(None, None).await?;

    env.directory.fail_notifications(51, "busy");
    assert!(matches!(
        next(&mut subscription).await?,
        Some(ChangeEvent::Error(OrgSyncError::Subscription(_)))
    ));
    assert_eq!(subscription.phase(), SubscriptionPhase::Errored);
    assert_eq!(env.directory.requests().len(), 1);
    Ok(())
}

/// Only Active Directory offers change notifications.
#[tokio::test]
async fn test_unsupported_variant() -> anyhow::Result<()> {
    let env = TestEnv::new([domain()]).await?;
    let err = env.fetcher.subscribe_to_changes(None, None).await.unwrap_err();
    assert!(matches!(err, OrgSyncError::Unsupported(_)));
    Ok(())
}
