//! Maps raw directory entries to the typed object model.

use orgsync_core::dn::DistinguishedName;
use orgsync_core::model::OU_ATTRIBUTE;
use orgsync_core::{DirectoryEntry, DirectoryObject, DirectoryUser, OrganizationalUnit};

use crate::config::DirectoryServiceVariant;

/// Attributes requested by every search.
pub const SEARCH_ATTRIBUTES: &[&str] = &[
    "dn",
    "objectClass",
    "ou",
    "cn",
    "sn",
    "givenName",
    "displayName",
    "mobile",
    "mail",
    "sAMAccountName",
    "uid",
];

/// Converts raw entries into users, OUs and tagged objects.
#[derive(Debug, Clone, Copy)]
pub struct ObjectMapper {
    account_attribute: &'static str,
}

impl ObjectMapper {
    /// Creates a mapper for the given directory variant.
    #[must_use]
    pub const fn new(variant: DirectoryServiceVariant) -> Self {
        Self {
            account_attribute: variant.account_attribute(),
        }
    }

    /// Returns the attribute holding the login name.
    #[must_use]
    pub const fn account_attribute(&self) -> &'static str {
        self.account_attribute
    }

    /// Maps an entry to a user.
    #[must_use]
    pub fn to_user(&self, entry: &DirectoryEntry) -> DirectoryUser {
        DirectoryUser::from_entry(entry, self.account_attribute)
    }

    /// Maps an entry to an OU and computes its parent OU.
    #[must_use]
    pub fn to_ou(&self, entry: &DirectoryEntry) -> OrganizationalUnit {
        let mut unit = OrganizationalUnit::from_entry(entry);
        unit.parent_ou_dn = parent_ou_dn(&entry.dn);
        unit
    }

    /// Classifies and maps an entry.
    #[must_use]
    pub fn to_object(&self, entry: &DirectoryEntry) -> DirectoryObject {
        match DirectoryObject::from_entry(entry, self.account_attribute) {
            DirectoryObject::OrganizationalUnit(_) => DirectoryObject::OrganizationalUnit(self.to_ou(entry)),
            user => user,
        }
    }
}

/// Returns the DN of the nearest enclosing OU of `dn`.
///
/// Walks outward from the parent of `dn` to the first component that has an
/// `ou` attribute. Returns `None` for unparsable names and for names with no
/// enclosing OU.
#[must_use]
pub fn parent_ou_dn(dn: &str) -> Option<String> {
    let dn = DistinguishedName::parse(dn).ok()?;
    let parent = dn
        .ancestors()
        .find(|ancestor| {
            ancestor
                .rdns()
                .first()
                .is_some_and(|rdn| rdn.has_attribute(OU_ATTRIBUTE))
        })
        .map(|ancestor| ancestor.format());
    parent
}
