//! Organization tree reconstruction.
//!
//! Expands OUs recursively: for every unit the direct sub-units and the
//! direct users are fetched concurrently, and the node is complete only once
//! both branches (and all recursive work below them) have finished. The
//! first failing branch drops its siblings and the error propagates.
//!
//! Recursion depth follows the directory hierarchy. Entries are found by
//! one-level searches below their parent, so a conforming directory cannot
//! produce a cycle and none is checked for.

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use orgsync_core::{DirectoryClient, DirectoryUser, NestedOu, OrgSyncResult, OrganizationalUnit, SearchScope, WholeOrg};

use crate::mapper::ObjectMapper;
use crate::search::SearchExecutor;

/// Builds typed OU lists, user lists and nested organization trees.
pub struct OuTreeBuilder<C: DirectoryClient + 'static> {
    executor: SearchExecutor<C>,
    mapper: ObjectMapper,
}

impl<C: DirectoryClient + 'static> OuTreeBuilder<C> {
    /// Creates a builder on top of a search executor.
    pub fn new(executor: SearchExecutor<C>, mapper: ObjectMapper) -> Self {
        Self { executor, mapper }
    }

    /// Fetches OUs and computes each one's parent OU.
    ///
    /// ## Errors
    ///
    /// Propagates search errors.
    pub async fn fetch_ous(
        &self,
        filter: &str,
        base_dn: &str,
        scope: SearchScope,
    ) -> OrgSyncResult<Vec<OrganizationalUnit>> {
        let entries = self.executor.search(filter, base_dn, scope).await?;
        Ok(entries.iter().map(|entry| self.mapper.to_ou(entry)).collect())
    }

    /// Fetches users.
    ///
    /// ## Errors
    ///
    /// Propagates search errors.
    pub async fn fetch_users(&self, filter: &str, base_dn: &str, scope: SearchScope) -> OrgSyncResult<Vec<DirectoryUser>> {
        let entries = self.executor.search(filter, base_dn, scope).await?;
        Ok(entries.iter().map(|entry| self.mapper.to_user(entry)).collect())
    }

    /// Reconstructs the organization below `base_dn`.
    ///
    /// If `base_dn` itself is an OU it becomes the only root and users
    /// directly below it are members of that root. Otherwise every OU one
    /// level below `base_dn` is a root and users at that level are returned
    /// in `users_not_in_ou`.
    ///
    /// ## Errors
    ///
    /// Propagates the first search error from any branch.
    pub async fn fetch_whole_org(&self, user_filter: &str, ou_filter: &str, base_dn: &str) -> OrgSyncResult<WholeOrg> {
        let at_base = self.fetch_ous(ou_filter, base_dn, SearchScope::Base).await?;

        if let Some(root) = at_base.into_iter().next() {
            tracing::debug!(root = %root.dn, "Base DN is an OU, expanding single root");
            let root = self.expand(root, user_filter, ou_filter).await?;
            return Ok(WholeOrg {
                ous: vec![root],
                users_not_in_ou: Vec::new(),
            });
        }

        let roots = async {
            let units = self.fetch_ous(ou_filter, base_dn, SearchScope::One).await?;
            try_join_all(units.into_iter().map(|unit| self.expand(unit, user_filter, ou_filter))).await
        };
        let stray_users = self.fetch_users(user_filter, base_dn, SearchScope::One);
        let (ous, users_not_in_ou) = futures::try_join!(roots, stray_users)?;

        tracing::debug!(
            base_dn,
            roots = ous.len(),
            users_not_in_ou = users_not_in_ou.len(),
            "Organization tree built"
        );
        Ok(WholeOrg { ous, users_not_in_ou })
    }

    fn expand<'a>(
        &'a self,
        unit: OrganizationalUnit,
        user_filter: &'a str,
        ou_filter: &'a str,
    ) -> BoxFuture<'a, OrgSyncResult<NestedOu>> {
        async move {
            let children = async {
                let units = self.fetch_ous(ou_filter, &unit.dn, SearchScope::One).await?;
                try_join_all(units.into_iter().map(|child| self.expand(child, user_filter, ou_filter))).await
            };
            let users = self.fetch_users(user_filter, &unit.dn, SearchScope::One);
            let (child_ous, users) = futures::try_join!(children, users)?;

            tracing::trace!(ou = %unit.dn, children = child_ous.len(), users = users.len(), "OU expanded");
            Ok(NestedOu { unit, users, child_ous })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use orgsync_core::{DirectoryEntry, InMemoryDirectory, OrgSyncError};

    use super::*;
    use crate::config::{DirectoryServiceVariant, DEFAULT_OU_FILTER, OPENLDAP_USER_FILTER};
    use crate::mapper::SEARCH_ATTRIBUTES;

    fn ou(dn: &str, name: &str) -> DirectoryEntry {
        DirectoryEntry::new(dn)
            .with_attr("objectClass", "organizationalUnit")
            .with_attr("ou", name)
    }

    fn person(dn: &str, uid: &str) -> DirectoryEntry {
        DirectoryEntry::new(dn)
            .with_attr("objectClass", "person")
            .with_attr("uid", uid)
    }

    fn builder(dir: &Arc<InMemoryDirectory>) -> OuTreeBuilder<InMemoryDirectory> {
        OuTreeBuilder::new(
            SearchExecutor::new(dir.clone(), SEARCH_ATTRIBUTES.iter().copied()),
            ObjectMapper::new(DirectoryServiceVariant::OpenLdap),
        )
    }

    #[tokio::test]
    async fn fetch_ous_computes_parents() {
        let dir = Arc::new(InMemoryDirectory::with_entries([
            DirectoryEntry::new("dc=example,dc=com"),
            ou("ou=Eng,dc=example,dc=com", "Eng"),
            ou("ou=Backend,ou=Eng,dc=example,dc=com", "Backend"),
        ]));
        let units = builder(&dir)
            .fetch_ous(DEFAULT_OU_FILTER, "dc=example,dc=com", SearchScope::Sub)
            .await
            .unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].parent_ou_dn, None);
        assert_eq!(units[1].parent_ou_dn.as_deref(), Some("ou=Eng,dc=example,dc=com"));
    }

    #[tokio::test]
    async fn nested_children_are_expanded() {
        let dir = Arc::new(InMemoryDirectory::with_entries([
            ou("ou=Corp,dc=example,dc=com", "Corp"),
            ou("ou=Eng,ou=Corp,dc=example,dc=com", "Eng"),
            ou("ou=Backend,ou=Eng,ou=Corp,dc=example,dc=com", "Backend"),
            person("uid=deep,ou=Backend,ou=Eng,ou=Corp,dc=example,dc=com", "deep"),
        ]));
        let org = builder(&dir)
            .fetch_whole_org(OPENLDAP_USER_FILTER, DEFAULT_OU_FILTER, "ou=Corp,dc=example,dc=com")
            .await
            .unwrap();

        assert_eq!(org.ous.len(), 1);
        let backend = org.ous[0]
            .find("ou=Backend,ou=Eng,ou=Corp,dc=example,dc=com")
            .unwrap();
        assert_eq!(backend.users[0].account_name.as_deref(), Some("deep"));
        assert_eq!(org.ou_count(), 3);
        assert_eq!(org.user_count(), 1);
    }

    #[tokio::test]
    async fn failing_branch_propagates() {
        let dir = Arc::new(InMemoryDirectory::with_entries([
            ou("ou=Corp,dc=example,dc=com", "Corp"),
            ou("ou=Eng,ou=Corp,dc=example,dc=com", "Eng"),
            ou("ou=Ops,ou=Corp,dc=example,dc=com", "Ops"),
        ]));
        dir.fail_searches_at("ou=Ops,ou=Corp,dc=example,dc=com", 51, "busy");

        let err = builder(&dir)
            .fetch_whole_org(OPENLDAP_USER_FILTER, DEFAULT_OU_FILTER, "ou=Corp,dc=example,dc=com")
            .await
            .unwrap_err();
        assert!(matches!(err, OrgSyncError::SearchProtocol { code: 51, .. }));
    }
}
