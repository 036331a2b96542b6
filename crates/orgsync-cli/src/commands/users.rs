//! User listing command.

use futures::TryStreamExt;
use orgsync_core::DirectoryClient;
use orgsync_ldap::{FetchOptions, OrgFetcher};

use super::UserRow;
use crate::cli::UsersArgs;
use crate::config::OutputFormat;
use crate::output::{info, output, output_json, render_table};
use crate::CliResult;

/// Lists users, either at once or one page at a time.
pub async fn run_users<C: DirectoryClient + 'static>(
    args: UsersArgs,
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
    if let Some(size) = args.page_size {
        options = options.page_size(size);
    }

    if !args.paged {
        let users = fetcher.fetch_users(options).await?;
        return match format {
            OutputFormat::Json => output_json(&users),
            OutputFormat::Table => output(&users.iter().map(UserRow::from).collect::<Vec<_>>(), format),
        };
    }

    let mut pages = Box::pin(fetcher.fetch_users_paged(options).await?.into_stream());
    let mut total = 0;
    while let Some(page) = pages.try_next().await? {
        total += page.objects.len();
        match format {
            // One JSON array per line, so pages can be consumed as they arrive.
            OutputFormat::Json => println!("{}", serde_json::to_string(&page.objects)?),
            OutputFormat::Table => {
                info(&format!("Page {} ({} users)", page.index + 1, page.objects.len()));
                if !page.objects.is_empty() {
                    let rows: Vec<UserRow> = page.objects.iter().map(UserRow::from).collect();
                    println!("{}", render_table(&rows));
                }
            }
        }
    }

    if format == OutputFormat::Table {
        info(&format!("{total} users"));
    }
    Ok(())
}
