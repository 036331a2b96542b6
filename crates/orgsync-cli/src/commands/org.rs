//! Whole-organization command.

use orgsync_core::DirectoryClient;
use orgsync_ldap::{OrgFetcher, OrgOptions};

use crate::cli::OrgArgs;
use crate::config::OutputFormat;
use crate::output::{info, output_json, render_org};
use crate::CliResult;

/// Fetches and prints the whole organization tree.
pub async fn run_org<C: DirectoryClient + 'static>(
    args: OrgArgs,
    fetcher: &OrgFetcher<C>,
    format: OutputFormat,
) -> CliResult<()> {
    let mut options = OrgOptions::new();
    if let Some(filter) = args.user_filter {
        options = options.user_filter(filter);
    }
    if let Some(filter) = args.ou_filter {
        options = options.ou_filter(filter);
    }

    let org = fetcher.fetch_whole_org(options).await?;

    match format {
        OutputFormat::Json => output_json(&org)?,
        OutputFormat::Table => {
            print!("{}", render_org(&org));
            info(&format!(
                "{} OUs, {} users, {} outside any OU",
                org.ou_count(),
                org.user_count(),
                org.users_not_in_ou.len()
            ));
        }
    }
    Ok(())
}
