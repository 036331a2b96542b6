//! CLI configuration.
//!
//! Settings come from `~/.orgsync/orgsync.toml`; command-line flags and
//! `ORGSYNC_*` environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use orgsync_ldap::{DirectoryServiceVariant, OrgSyncConfig, TlsOptions};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::{CliError, CliResult};

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Directory server URL.
    pub url: Option<String>,

    /// DN to bind as.
    pub admin_dn: Option<String>,

    /// Default search root.
    pub base_dn: Option<String>,

    /// Directory server family.
    pub variant: DirectoryServiceVariant,

    /// Page size for paged user listings.
    pub page_size: Option<u32>,

    /// Transport security options.
    pub tls: TlsOptions,

    /// Connect timeout in seconds.
    pub connection_timeout_secs: Option<u64>,

    /// Per-operation timeout in seconds.
    pub operation_timeout_secs: Option<u64>,

    /// User filter override.
    pub user_filter: Option<String>,

    /// OU filter override.
    pub ou_filter: Option<String>,

    /// Output format.
    pub output_format: OutputFormat,
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            tracing::debug!(path = %config_path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> CliResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Gets the configuration file path.
    pub fn config_path() -> CliResult<PathBuf> {
        let home = dirs_next::home_dir()
            .ok_or_else(|| CliError::Config("could not determine home directory".to_string()))?;
        Ok(home.join(".orgsync").join("orgsync.toml"))
    }

    /// Applies command-line and environment overrides.
    #[must_use]
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(url) = &cli.url {
            self.url = Some(url.clone());
        }
        if let Some(admin_dn) = &cli.admin_dn {
            self.admin_dn = Some(admin_dn.clone());
        }
        if let Some(base_dn) = &cli.base_dn {
            self.base_dn = Some(base_dn.clone());
        }
        if let Some(variant) = cli.variant {
            self.variant = variant.into();
        }
        if let Some(output) = cli.output {
            self.output_format = output;
        }
        self
    }

    /// Builds the engine configuration with the given bind password.
    pub fn to_sync_config(&self, admin_password: String) -> CliResult<OrgSyncConfig> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| CliError::Config("no directory URL; set `url` or pass --url".to_string()))?;
        let admin_dn = self
            .admin_dn
            .clone()
            .ok_or_else(|| CliError::Config("no bind DN; set `admin_dn` or pass --admin-dn".to_string()))?;

        let mut builder = OrgSyncConfig::builder()
            .url(url)
            .admin_dn(admin_dn)
            .admin_password(admin_password)
            .base_dn(self.base_dn.clone().unwrap_or_default())
            .variant(self.variant)
            .tls(self.tls);

        if let Some(size) = self.page_size {
            builder = builder.page_size(size);
        }
        if let Some(secs) = self.connection_timeout_secs {
            builder = builder.connection_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.operation_timeout_secs {
            builder = builder.operation_timeout(Duration::from_secs(secs));
        }
        if let Some(filter) = &self.user_filter {
            builder = builder.user_filter(filter);
        }
        if let Some(filter) = &self.ou_filter {
            builder = builder.ou_filter(filter);
        }

        Ok(builder.build()?)
    }
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}
