//! Directory object model.
//!
//! Raw search results arrive as [`DirectoryEntry`] attribute bags. The small
//! set of attributes the engine understands is lifted into strongly typed
//! [`DirectoryUser`] and [`OrganizationalUnit`] records; everything else is
//! kept in an open extension map because directory schemas vary by vendor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dn::DistinguishedName;

/// Object class that marks an entry as an organizational unit.
pub const OU_OBJECT_CLASS: &str = "organizationalUnit";

/// Object classes that mark an entry as a person.
pub const USER_OBJECT_CLASSES: &[&str] = &["user", "person", "inetOrgPerson", "organizationalPerson"];

/// Attribute holding the unit name of an OU.
pub const OU_ATTRIBUTE: &str = "ou";

/// Display and contact attributes carried by every user.
pub const USER_ATTRIBUTES: &[&str] = &["cn", "sn", "givenName", "displayName", "mobile", "mail"];

// ============================================================================
// Raw Entry
// ============================================================================

/// A raw directory record: a DN plus its attributes.
///
/// All attributes are multi-valued. Attribute names keep the casing the
/// server sent; lookups ignore case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Distinguished name.
    pub dn: String,

    /// Attributes, keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a value to an attribute, builder style.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_attr(name, value);
        self
    }

    /// Adds a value to an attribute.
    pub fn push_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.entry(name.into()).or_default().push(value.into());
    }

    /// Gets all values of an attribute (case-insensitive name).
    #[must_use]
    pub fn get_attrs(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Gets the first value of an attribute (case-insensitive name).
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.get_attrs(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Checks if the entry has an attribute.
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.get_attrs(name).is_some()
    }

    /// Checks if any `objectClass` value equals `class` (case-insensitive).
    #[must_use]
    pub fn has_object_class(&self, class: &str) -> bool {
        self.get_attrs("objectClass")
            .is_some_and(|classes| classes.iter().any(|c| c.eq_ignore_ascii_case(class)))
    }

    /// Decides whether this entry is an organizational unit or a user.
    ///
    /// An entry is an OU if its object classes say so, or if it has no
    /// object classes that mark a person but does carry an `ou` attribute.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        if self.has_object_class(OU_OBJECT_CLASS) {
            return ObjectKind::OrganizationalUnit;
        }
        let is_person = USER_OBJECT_CLASSES.iter().any(|c| self.has_object_class(c));
        if !is_person && self.has_attr(OU_ATTRIBUTE) {
            ObjectKind::OrganizationalUnit
        } else {
            ObjectKind::User
        }
    }

    /// Attributes whose names are not in `known`, for the extension map.
    fn extra_attributes(&self, known: &[&str]) -> BTreeMap<String, Vec<String>> {
        self.attributes
            .iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case("dn") && !known.iter().any(|k| k.eq_ignore_ascii_case(name))
            })
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect()
    }
}

/// The two kinds of object the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// A person or account.
    User,
    /// An organizational unit.
    #[serde(rename = "ou")]
    OrganizationalUnit,
}

// ============================================================================
// Typed Objects
// ============================================================================

/// A user account read from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
    /// Distinguished name.
    pub dn: String,

    /// Common name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cn: Option<String>,

    /// Surname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sn: Option<String>,

    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Mobile phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,

    /// Login name (`sAMAccountName`, `uid`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    /// Attributes outside the fixed set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl DirectoryUser {
    /// Builds a user from a raw entry.
    ///
    /// `account_attribute` names the attribute that holds the login name.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry, account_attribute: &str) -> Self {
        let get = |name: &str| entry.get_attr(name).map(String::from);
        let mut known: Vec<&str> = USER_ATTRIBUTES.to_vec();
        known.push(account_attribute);

        Self {
            dn: entry.dn.clone(),
            cn: get("cn"),
            sn: get("sn"),
            given_name: get("givenName"),
            display_name: get("displayName"),
            mobile: get("mobile"),
            mail: get("mail"),
            account_name: get(account_attribute),
            extra: entry.extra_attributes(&known),
        }
    }
}

/// An organizational unit read from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    /// Distinguished name.
    pub dn: String,

    /// Unit name.
    pub ou: String,

    /// DN of the nearest enclosing OU, computed from `dn`. Unset for roots.
    #[serde(rename = "parentOUDN", default, skip_serializing_if = "Option::is_none")]
    pub parent_ou_dn: Option<String>,

    /// Attributes outside the fixed set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl OrganizationalUnit {
    /// Builds an OU from a raw entry.
    ///
    /// The unit name falls back to the `ou` value of the entry's own RDN when
    /// the attribute was not returned. `parent_ou_dn` is left unset.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry) -> Self {
        let ou = entry
            .get_attr(OU_ATTRIBUTE)
            .map(String::from)
            .or_else(|| {
                DistinguishedName::parse(&entry.dn)
                    .ok()
                    .and_then(|dn| dn.rdns().first().and_then(|rdn| rdn.get(OU_ATTRIBUTE)))
            })
            .unwrap_or_default();

        Self {
            dn: entry.dn.clone(),
            ou,
            parent_ou_dn: None,
            extra: entry.extra_attributes(&[OU_ATTRIBUTE]),
        }
    }
}

/// A user or an organizational unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DirectoryObject {
    /// A user account.
    #[serde(rename = "user")]
    User(DirectoryUser),

    /// An organizational unit.
    #[serde(rename = "ou")]
    OrganizationalUnit(OrganizationalUnit),
}

impl DirectoryObject {
    /// Classifies and converts a raw entry.
    #[must_use]
    pub fn from_entry(entry: &DirectoryEntry, account_attribute: &str) -> Self {
        match entry.kind() {
            ObjectKind::OrganizationalUnit => Self::OrganizationalUnit(OrganizationalUnit::from_entry(entry)),
            ObjectKind::User => Self::User(DirectoryUser::from_entry(entry, account_attribute)),
        }
    }

    /// Returns the distinguished name.
    #[must_use]
    pub fn dn(&self) -> &str {
        match self {
            Self::User(user) => &user.dn,
            Self::OrganizationalUnit(ou) => &ou.dn,
        }
    }

    /// Returns the kind of object.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        match self {
            Self::User(_) => ObjectKind::User,
            Self::OrganizationalUnit(_) => ObjectKind::OrganizationalUnit,
        }
    }
}

// ============================================================================
// Organization Tree
// ============================================================================

/// An OU with its direct members and direct sub-units attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedOu {
    /// The unit itself.
    #[serde(flatten)]
    pub unit: OrganizationalUnit,

    /// Users directly under this unit.
    #[serde(default)]
    pub users: Vec<DirectoryUser>,

    /// Units directly under this unit.
    #[serde(rename = "childOUs", default)]
    pub child_ous: Vec<NestedOu>,
}

impl NestedOu {
    /// Wraps an OU with empty member lists.
    #[must_use]
    pub fn new(unit: OrganizationalUnit) -> Self {
        Self {
            unit,
            users: Vec::new(),
            child_ous: Vec::new(),
        }
    }

    /// Counts the units in this subtree, including this one.
    #[must_use]
    pub fn ou_count(&self) -> usize {
        1 + self.child_ous.iter().map(Self::ou_count).sum::<usize>()
    }

    /// Counts the users in this subtree.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len() + self.child_ous.iter().map(Self::user_count).sum::<usize>()
    }

    /// Finds a unit anywhere in this subtree by DN.
    #[must_use]
    pub fn find(&self, dn: &str) -> Option<&NestedOu> {
        if self.unit.dn == dn {
            return Some(self);
        }
        self.child_ous.iter().find_map(|child| child.find(dn))
    }
}

/// The complete organization below a search base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WholeOrg {
    /// Root units.
    #[serde(default)]
    pub ous: Vec<NestedOu>,

    /// Users found directly under the search base when no single root OU
    /// exists there.
    #[serde(rename = "usersNotInOU", default)]
    pub users_not_in_ou: Vec<DirectoryUser>,
}

impl WholeOrg {
    /// Counts every unit in the organization.
    #[must_use]
    pub fn ou_count(&self) -> usize {
        self.ous.iter().map(NestedOu::ou_count).sum()
    }

    /// Counts every user in the organization.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users_not_in_ou.len() + self.ous.iter().map(NestedOu::user_count).sum::<usize>()
    }
}
