//! Organization tree integration tests.

use orgsync_core::OrgSyncError;
use orgsync_ldap::{FetchOptions, OrgOptions};

use crate::common::{ad_user, domain, ou, person, TestEnv, BASE_DN};

/// An OU at the base DN becomes the only root.
#[tokio::test]
async fn test_single_root_with_children() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Corp,dc=example,dc=com"),
        ou("ou=Eng,ou=Corp,dc=example,dc=com"),
        ou("ou=Sales,ou=Corp,dc=example,dc=com"),
        person("alice", "ou=Eng,ou=Corp,dc=example,dc=com"),
    ])
    .await?;

    let org = env
        .fetcher
        .fetch_whole_org(OrgOptions::new().base_dn("ou=Corp,dc=example,dc=com"))
        .await?;

    assert_eq!(org.ous.len(), 1);
    let root = &org.ous[0];
    assert_eq!(root.unit.ou, "Corp");
    assert_eq!(root.child_ous.len(), 2);
    assert!(root.users.is_empty());
    assert_eq!(org.user_count(), 1);
    assert!(org.users_not_in_ou.is_empty());

    let eng = root
        .find("ou=Eng,ou=Corp,dc=example,dc=com")
        .ok_or_else(|| anyhow::anyhow!("Eng missing"))?;
    assert_eq!(eng.users[0].account_name.as_deref(), Some("alice"));
    assert_eq!(eng.unit.parent_ou_dn.as_deref(), Some("ou=Corp,dc=example,dc=com"));
    Ok(())
}

/// Without an OU at the base DN, each OU one level down is a root and
/// users at that level are reported separately.
#[tokio::test]
async fn test_sibling_roots_and_stray_users() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Eng,dc=example,dc=com"),
        ou("ou=Sales,dc=example,dc=com"),
        person("svc", BASE_DN),
        person("bob", "ou=Sales,dc=example,dc=com"),
    ])
    .await?;

    let org = env.fetcher.fetch_whole_org(OrgOptions::new()).await?;

    assert_eq!(org.ous.len(), 2);
    assert_eq!(org.users_not_in_ou.len(), 1);
    assert_eq!(org.users_not_in_ou[0].account_name.as_deref(), Some("svc"));
    assert_eq!(org.ou_count(), 2);
    assert_eq!(org.user_count(), 2);

    let mut names: Vec<_> = org.ous.iter().map(|unit| unit.unit.ou.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, ["Eng", "Sales"]);
    Ok(())
}

/// Users directly under a root OU belong to that root.
#[tokio::test]
async fn test_base_level_users_belong_to_root() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Corp,dc=example,dc=com"),
        person("ceo", "ou=Corp,dc=example,dc=com"),
    ])
    .await?;

    let org = env
        .fetcher
        .fetch_whole_org(OrgOptions::new().base_dn("ou=Corp,dc=example,dc=com"))
        .await?;

    assert_eq!(org.ous.len(), 1);
    assert_eq!(org.ous[0].users.len(), 1);
    assert_eq!(org.ous[0].users[0].account_name.as_deref(), Some("ceo"));
    assert!(org.users_not_in_ou.is_empty());
    Ok(())
}

/// A failing sub-search fails the whole fetch; the fetcher stays usable.
#[tokio::test]
async fn test_failure_mid_tree_propagates() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Corp,dc=example,dc=com"),
        ou("ou=Eng,ou=Corp,dc=example,dc=com"),
        ou("ou=Ops,ou=Eng,ou=Corp,dc=example,dc=com"),
    ])
    .await?;
    env.directory
        .fail_searches_at("ou=Ops,ou=Eng,ou=Corp,dc=example,dc=com", 51, "busy");

    let err = env
        .fetcher
        .fetch_whole_org(OrgOptions::new().base_dn("ou=Corp,dc=example,dc=com"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrgSyncError::SearchProtocol { code: 51, .. }));
    assert!(err.is_recoverable());

    let units = env.fetcher.fetch_ous(FetchOptions::new()).await?;
    assert_eq!(units.len(), 3);
    Ok(())
}

/// Filters given per call replace the configured templates.
#[tokio::test]
async fn test_filter_overrides() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Eng,dc=example,dc=com"),
        ou("ou=Archive,dc=example,dc=com"),
        person("alice", "ou=Eng,dc=example,dc=com"),
        person("old", "ou=Eng,dc=example,dc=com"),
    ])
    .await?;

    let org = env
        .fetcher
        .fetch_whole_org(
            OrgOptions::new()
                .ou_filter("(&(objectClass=organizationalUnit)(!(ou=Archive)))")
                .user_filter("(&(objectClass=person)(!(uid=old)))"),
        )
        .await?;

    assert_eq!(org.ous.len(), 1);
    assert_eq!(org.ous[0].unit.ou, "Eng");
    assert_eq!(org.ous[0].users.len(), 1);
    Ok(())
}

/// The Active Directory template skips disabled accounts.
#[tokio::test]
async fn test_active_directory_template_skips_disabled_accounts() -> anyhow::Result<()> {
    let env = TestEnv::active_directory([
        domain(),
        ou("OU=Staff,dc=example,dc=com"),
        ad_user("alice", "OU=Staff,dc=example,dc=com", false),
        ad_user("mallory", "OU=Staff,dc=example,dc=com", true),
    ])
    .await?;

    let users = env.fetcher.fetch_users(FetchOptions::new()).await?;
    let accounts: Vec<_> = users.iter().filter_map(|user| user.account_name.as_deref()).collect();
    assert_eq!(accounts, ["alice"]);
    Ok(())
}

/// Trees serialize with the wire field names.
#[tokio::test]
async fn test_org_json_field_names() -> anyhow::Result<()> {
    let env = TestEnv::new([
        domain(),
        ou("ou=Eng,dc=example,dc=com"),
        ou("ou=Backend,ou=Eng,dc=example,dc=com"),
        person("svc", BASE_DN),
    ])
    .await?;

    let org = env.fetcher.fetch_whole_org(OrgOptions::new()).await?;
    let json = serde_json::to_value(&org)?;

    assert_eq!(json["usersNotInOU"][0]["accountName"], "svc");
    let backend = &json["ous"][0]["childOUs"][0];
    assert_eq!(backend["ou"], "Backend");
    assert_eq!(backend["parentOUDN"], "ou=Eng,dc=example,dc=com");
    Ok(())
}
