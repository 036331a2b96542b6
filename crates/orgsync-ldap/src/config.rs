//! Synchronization engine configuration.
//!
//! Settings are read once when an [`OrgFetcher`](crate::OrgFetcher) is
//! constructed. Filter templates are immutable tables; the variant's
//! templates are merged over the defaults key by key and explicit overrides
//! win over both.

use std::time::Duration;

use orgsync_core::Filter;
use serde::{Deserialize, Serialize};

use crate::error::{LdapError, LdapResult};

// ============================================================================
// Filter Templates
// ============================================================================

/// User filter used when the variant has no template of its own.
pub const DEFAULT_USER_FILTER: &str = "(&(|(objectclass=user)(objectclass=person)(objectclass=inetOrgPerson)(objectclass=organizationalPerson))(!(objectclass=computer)))";

/// Normal accounts that are not disabled (`ACCOUNTDISABLE` bit of
/// `userAccountControl`).
pub const ACTIVE_DIRECTORY_USER_FILTER: &str =
    "(&(sAMAccountType=805306368)(!(userAccountControl:1.2.840.113556.1.4.803:=2)))";

/// OpenLDAP user filter.
pub const OPENLDAP_USER_FILTER: &str = "(objectClass=person)";

/// OU filter used when the variant has no template of its own.
pub const DEFAULT_OU_FILTER: &str = "(objectClass=organizationalUnit)";

/// Resolved user and OU filter templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterTemplates {
    /// Filter selecting user entries.
    pub user: &'static str,
    /// Filter selecting organizational units.
    pub ou: &'static str,
}

/// Per-variant overrides of the default templates.
#[derive(Debug, Clone, Copy)]
struct TemplateOverrides {
    user: Option<&'static str>,
    ou: Option<&'static str>,
}

const DEFAULT_TEMPLATES: FilterTemplates = FilterTemplates {
    user: DEFAULT_USER_FILTER,
    ou: DEFAULT_OU_FILTER,
};

const ACTIVE_DIRECTORY_OVERRIDES: TemplateOverrides = TemplateOverrides {
    user: Some(ACTIVE_DIRECTORY_USER_FILTER),
    ou: None,
};

const OPENLDAP_OVERRIDES: TemplateOverrides = TemplateOverrides {
    user: Some(OPENLDAP_USER_FILTER),
    ou: None,
};

impl FilterTemplates {
    /// Returns the default templates merged with the variant's overrides.
    #[must_use]
    pub const fn for_variant(variant: DirectoryServiceVariant) -> Self {
        let overrides = match variant {
            DirectoryServiceVariant::ActiveDirectory => ACTIVE_DIRECTORY_OVERRIDES,
            DirectoryServiceVariant::OpenLdap => OPENLDAP_OVERRIDES,
        };
        Self {
            user: match overrides.user {
                Some(filter) => filter,
                None => DEFAULT_TEMPLATES.user,
            },
            ou: match overrides.ou {
                Some(filter) => filter,
                None => DEFAULT_TEMPLATES.ou,
            },
        }
    }
}

// ============================================================================
// Directory Service Variant
// ============================================================================

/// Known directory server families.
///
/// The variant selects filter templates, the account-name attribute and
/// whether change notifications are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DirectoryServiceVariant {
    /// Microsoft Active Directory.
    #[default]
    ActiveDirectory,

    /// OpenLDAP.
    #[serde(rename = "OpenLDAP", alias = "OpenLdap")]
    OpenLdap,
}

impl DirectoryServiceVariant {
    /// Returns the variant name as used in configuration files.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveDirectory => "ActiveDirectory",
            Self::OpenLdap => "OpenLDAP",
        }
    }

    /// Returns the attribute holding the login name.
    #[must_use]
    pub const fn account_attribute(&self) -> &'static str {
        match self {
            Self::ActiveDirectory => "sAMAccountName",
            Self::OpenLdap => "uid",
        }
    }

    /// Checks whether the server supports the change notification control.
    #[must_use]
    pub const fn supports_change_notifications(&self) -> bool {
        matches!(self, Self::ActiveDirectory)
    }

    /// Returns the filter templates for this variant.
    #[must_use]
    pub const fn filter_templates(&self) -> FilterTemplates {
        FilterTemplates::for_variant(*self)
    }
}

impl std::fmt::Display for DirectoryServiceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DirectoryServiceVariant {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "activedirectory" | "ad" => Ok(Self::ActiveDirectory),
            "openldap" => Ok(Self::OpenLdap),
            other => Err(LdapError::config(format!("unknown directory service variant '{other}'"))),
        }
    }
}

// ============================================================================
// TLS Options
// ============================================================================

/// Transport security options, handed to the client as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Upgrade a plain `ldap://` connection with StartTLS.
    pub starttls: bool,

    /// Whether to validate server certificates.
    pub validate_certificates: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            starttls: false,
            validate_certificates: true,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Default page size for paged user fetches.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Default connect timeout.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_connection_timeout() -> Duration {
    DEFAULT_CONNECTION_TIMEOUT
}

/// Synchronization engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgSyncConfig {
    // === Connection ===
    /// Directory server URL (`ldap://` or `ldaps://`).
    pub url: String,

    /// DN used for the administrative bind.
    pub admin_dn: String,

    /// Password for the administrative bind.
    #[serde(skip_serializing, default)]
    pub admin_password: String,

    /// Transport security options.
    #[serde(default)]
    pub tls: TlsOptions,

    /// Connect timeout.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// Per-operation timeout, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout: Option<Duration>,

    // === Directory Structure ===
    /// Default search root.
    #[serde(default)]
    pub base_dn: String,

    /// Directory server family.
    #[serde(default)]
    pub variant: DirectoryServiceVariant,

    // === Search ===
    /// Page size for paged fetches.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Overrides the variant's user filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_filter: Option<String>,

    /// Overrides the variant's OU filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ou_filter: Option<String>,
}

impl OrgSyncConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> OrgSyncConfigBuilder {
        OrgSyncConfigBuilder::new()
    }

    /// Validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Configuration` for an empty or non-LDAP URL, an
    /// empty admin DN, a zero page size or an unparsable filter override.
    pub fn validate(&self) -> LdapResult<()> {
        validate_url(&self.url)?;

        if self.admin_dn.trim().is_empty() {
            return Err(LdapError::config("admin_dn cannot be empty"));
        }

        if self.page_size == 0 {
            return Err(LdapError::config("page_size must be greater than zero"));
        }

        for (name, filter) in [("user_filter", &self.user_filter), ("ou_filter", &self.ou_filter)] {
            if let Some(filter) = filter {
                Filter::parse(filter).map_err(|e| LdapError::config(format!("{name}: {e}")))?;
            }
        }

        Ok(())
    }

    /// Returns the filter templates for the configured variant.
    #[must_use]
    pub const fn templates(&self) -> FilterTemplates {
        self.variant.filter_templates()
    }

    /// Returns the effective user filter.
    #[must_use]
    pub fn user_filter(&self) -> &str {
        self.user_filter.as_deref().unwrap_or(self.templates().user)
    }

    /// Returns the effective OU filter.
    #[must_use]
    pub fn ou_filter(&self) -> &str {
        self.ou_filter.as_deref().unwrap_or(self.templates().ou)
    }

    /// Returns the attribute holding the login name.
    #[must_use]
    pub const fn account_attribute(&self) -> &'static str {
        self.variant.account_attribute()
    }
}

fn validate_url(url: &str) -> LdapResult<()> {
    if url.trim().is_empty() {
        return Err(LdapError::config("url cannot be empty"));
    }

    let lower = url.to_ascii_lowercase();
    let host = lower
        .strip_prefix("ldaps://")
        .or_else(|| lower.strip_prefix("ldap://"))
        .ok_or_else(|| LdapError::config(format!("unsupported URL scheme in '{url}', expected ldap:// or ldaps://")))?;

    if host.is_empty() {
        return Err(LdapError::config("Invalid URL: missing host"));
    }

    Ok(())
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for [`OrgSyncConfig`].
#[derive(Debug, Default)]
pub struct OrgSyncConfigBuilder {
    url: Option<String>,
    admin_dn: Option<String>,
    admin_password: Option<String>,
    tls: TlsOptions,
    connection_timeout: Option<Duration>,
    operation_timeout: Option<Duration>,
    base_dn: String,
    variant: DirectoryServiceVariant,
    page_size: Option<u32>,
    user_filter: Option<String>,
    ou_filter: Option<String>,
}

impl OrgSyncConfigBuilder {
    /// Creates a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the admin bind DN.
    #[must_use]
    pub fn admin_dn(mut self, dn: impl Into<String>) -> Self {
        self.admin_dn = Some(dn.into());
        self
    }

    /// Sets the admin bind password.
    #[must_use]
    pub fn admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }

    /// Sets the TLS options.
    #[must_use]
    pub const fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Sets the per-operation timeout.
    #[must_use]
    pub const fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Sets the default search root.
    #[must_use]
    pub fn base_dn(mut self, dn: impl Into<String>) -> Self {
        self.base_dn = dn.into();
        self
    }

    /// Sets the directory server family.
    #[must_use]
    pub const fn variant(mut self, variant: DirectoryServiceVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Sets the page size for paged fetches.
    #[must_use]
    pub const fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Overrides the user filter template.
    #[must_use]
    pub fn user_filter(mut self, filter: impl Into<String>) -> Self {
        self.user_filter = Some(filter.into());
        self
    }

    /// Overrides the OU filter template.
    #[must_use]
    pub fn ou_filter(mut self, filter: impl Into<String>) -> Self {
        self.ou_filter = Some(filter.into());
        self
    }

    /// Builds and validates the configuration.
    ///
    /// ## Errors
    ///
    /// Returns `LdapError::Configuration` if a required setting is missing
    /// or validation fails.
    pub fn build(self) -> LdapResult<OrgSyncConfig> {
        let config = OrgSyncConfig {
            url: self.url.ok_or_else(|| LdapError::config("url is required"))?,
            admin_dn: self
                .admin_dn
                .ok_or_else(|| LdapError::config("admin_dn is required"))?,
            admin_password: self.admin_password.unwrap_or_default(),
            tls: self.tls,
            connection_timeout: self.connection_timeout.unwrap_or(DEFAULT_CONNECTION_TIMEOUT),
            operation_timeout: self.operation_timeout,
            base_dn: self.base_dn,
            variant: self.variant,
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            user_filter: self.user_filter,
            ou_filter: self.ou_filter,
        };

        config.validate()?;

        Ok(config)
    }
}
