//! Command implementations.

pub mod org;
pub mod ous;
pub mod users;
pub mod watch;

pub use org::run_org;
pub use ous::run_ous;
pub use users::run_users;
pub use watch::run_watch;

use orgsync_core::{DirectoryUser, OrganizationalUnit};
use serde::Serialize;
use tabled::Tabled;

/// User representation for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct UserRow {
    /// Login name.
    #[tabled(rename = "Account")]
    pub account: String,
    /// Display name, falling back to the common name.
    #[tabled(rename = "Name")]
    pub name: String,
    /// Email address.
    #[tabled(rename = "Mail")]
    pub mail: String,
    /// Distinguished name.
    #[tabled(rename = "DN")]
    pub dn: String,
}

impl From<&DirectoryUser> for UserRow {
    fn from(user: &DirectoryUser) -> Self {
        Self {
            account: user.account_name.clone().unwrap_or_default(),
            name: user
                .display_name
                .clone()
                .or_else(|| user.cn.clone())
                .unwrap_or_default(),
            mail: user.mail.clone().unwrap_or_default(),
            dn: user.dn.clone(),
        }
    }
}

/// OU representation for display.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct OuRow {
    /// OU name.
    #[tabled(rename = "OU")]
    pub ou: String,
    /// Distinguished name.
    #[tabled(rename = "DN")]
    pub dn: String,
    /// Enclosing OU, if any.
    #[tabled(rename = "Parent")]
    pub parent: String,
}

impl From<&OrganizationalUnit> for OuRow {
    fn from(unit: &OrganizationalUnit) -> Self {
        Self {
            ou: unit.ou.clone(),
            dn: unit.dn.clone(),
            parent: unit.parent_ou_dn.clone().unwrap_or_default(),
        }
    }
}
