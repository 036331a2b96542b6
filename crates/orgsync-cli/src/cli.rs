//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use orgsync_core::SearchScope;
use orgsync_ldap::DirectoryServiceVariant;

use crate::config::OutputFormat;

/// orgsync - fetch and watch directory organizations.
#[derive(Debug, Parser)]
#[command(name = "orgsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory server URL, `ldap://` or `ldaps://` (overrides config).
    #[arg(long, env = "ORGSYNC_URL")]
    pub url: Option<String>,

    /// DN to bind as (overrides config).
    #[arg(long, env = "ORGSYNC_ADMIN_DN")]
    pub admin_dn: Option<String>,

    /// Bind password. Prompted for when absent.
    #[arg(long, env = "ORGSYNC_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,

    /// Default search root (overrides config).
    #[arg(long, env = "ORGSYNC_BASE_DN", global = true)]
    pub base_dn: Option<String>,

    /// Directory server family (overrides config).
    #[arg(long, value_enum, env = "ORGSYNC_VARIANT")]
    pub variant: Option<VariantArg>,

    /// Configuration file (defaults to ~/.orgsync/orgsync.toml).
    #[arg(long, env = "ORGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format (overrides config).
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the whole organization tree.
    Org(OrgArgs),

    /// List organizational units.
    Ous(OusArgs),

    /// List users.
    Users(UsersArgs),

    /// Stream change notifications (Active Directory only).
    Watch(WatchArgs),
}

/// Arguments for `org`.
#[derive(Debug, Args)]
pub struct OrgArgs {
    /// User filter (overrides the directory's template).
    #[arg(long)]
    pub user_filter: Option<String>,

    /// OU filter (overrides the directory's template).
    #[arg(long)]
    pub ou_filter: Option<String>,
}

/// Arguments for `ous`.
#[derive(Debug, Args)]
pub struct OusArgs {
    /// LDAP filter.
    #[arg(long)]
    pub filter: Option<String>,

    /// Search scope.
    #[arg(long, value_enum)]
    pub scope: Option<ScopeArg>,
}

/// Arguments for `users`.
#[derive(Debug, Args)]
pub struct UsersArgs {
    /// LDAP filter.
    #[arg(long)]
    pub filter: Option<String>,

    /// Search scope.
    #[arg(long, value_enum)]
    pub scope: Option<ScopeArg>,

    /// Fetch and print one page at a time.
    #[arg(long)]
    pub paged: bool,

    /// Page size for paged fetches (overrides config).
    #[arg(long, requires = "paged")]
    pub page_size: Option<u32>,
}

/// Arguments for `watch`.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only report changed entries matching this LDAP filter.
    #[arg(long)]
    pub filter: Option<String>,

    /// Stop after this many changes.
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Search scope argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    /// The base entry only.
    Base,
    /// One level below the base.
    One,
    /// The whole subtree.
    Sub,
}

impl From<ScopeArg> for SearchScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Base => Self::Base,
            ScopeArg::One => Self::One,
            ScopeArg::Sub => Self::Sub,
        }
    }
}

/// Directory server family argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    /// Microsoft Active Directory.
    #[value(name = "ad", alias = "active-directory")]
    ActiveDirectory,
    /// OpenLDAP.
    #[value(name = "openldap")]
    OpenLdap,
}

impl From<VariantArg> for DirectoryServiceVariant {
    fn from(variant: VariantArg) -> Self {
        match variant {
            VariantArg::ActiveDirectory => Self::ActiveDirectory,
            VariantArg::OpenLdap => Self::OpenLdap,
        }
    }
}
