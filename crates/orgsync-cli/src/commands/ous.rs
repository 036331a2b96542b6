//! OU listing command.

use orgsync_core::DirectoryClient;
use orgsync_ldap::{FetchOptions, OrgFetcher};

use super::OuRow;
use crate::cli::OusArgs;
use crate::config::OutputFormat;
use crate::output::{output, output_json};
use crate::CliResult;

/// Lists organizational units.
pub async fn run_ous<C: DirectoryClient + 'static>(
    args: OusArgs,
    fetcher: &OrgFetcher<C>,
    format: OutputFormat,
) -> CliResult<()> {
    let mut options = FetchOptions::new();
    if let Some(filter) = args.filter {
        options = options.filter(filter);
    }
    if let Some(scope) = args.scope {
        options = options.scope(scope.into());
    }

    let units = fetcher.fetch_ous(options).await?;
    match format {
        OutputFormat::Json => output_json(&units),
        OutputFormat::Table => output(&units.iter().map(OuRow::from).collect::<Vec<_>>(), format),
    }
}
