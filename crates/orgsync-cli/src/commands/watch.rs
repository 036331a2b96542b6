//! Change notification command.

use std::future::Future;
use std::time::Duration;

use colored::Colorize;
use orgsync_core::{DirectoryClient, DirectoryObject, OrgSyncError};
use orgsync_ldap::{ChangeEvent, OrgFetcher};

use crate::cli::WatchArgs;
use crate::config::OutputFormat;
use crate::output::{info, warning};
use crate::CliResult;

/// How long to wait for the server to confirm the subscription on exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Streams changes until Ctrl-C or until `--limit` changes were seen.
pub async fn run_watch<C: DirectoryClient + 'static>(
    args: WatchArgs,
    fetcher: &OrgFetcher<C>,
    format: OutputFormat,
) -> CliResult<()> {
    let seen = watch_changes(args, fetcher, format, ctrl_c()).await?;
    if format == OutputFormat::Table {
        info(&format!("{seen} changes"));
    }
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Runs the watch loop until `shutdown` completes, the limit is reached or
/// the subscription ends. Returns the number of changes printed.
async fn watch_changes<C, F>(
    args: WatchArgs,
    fetcher: &OrgFetcher<C>,
    format: OutputFormat,
    shutdown: F,
) -> CliResult<usize>
where
    C: DirectoryClient + 'static,
    F: Future<Output = ()>,
{
    let mut subscription = fetcher.subscribe_to_changes(None, args.filter.as_deref()).await?;
    if format == OutputFormat::Table {
        info(&format!(
            "Watching {} for changes, Ctrl-C to stop",
            fetcher.config().base_dn
        ));
    }

    tokio::pin!(shutdown);
    let mut seen = 0;

    while args.limit.map_or(true, |limit| seen < limit) {
        tokio::select! {
            () = &mut shutdown => break,
            event = subscription.recv() => match event {
                Some(ChangeEvent::Change { entry, received_at }) => {
                    seen += 1;
                    println!("{}", render_change(&fetcher.classify(&entry), received_at, format)?);
                }
                Some(ChangeEvent::Error(e)) => return Err(e.into()),
                Some(ChangeEvent::End) | None => return Ok(seen),
            },
        }
    }

    match subscription.stop_and_wait(STOP_TIMEOUT).await {
        Ok(()) => {}
        Err(OrgSyncError::CancellationRaceTimeout(_)) => {
            warning("The server never confirmed the subscription; exiting anyway");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(seen)
}

fn render_change(
    object: &DirectoryObject,
    received_at: chrono::DateTime<chrono::Utc>,
    format: OutputFormat,
) -> CliResult<String> {
    match format {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "receivedAt": received_at.to_rfc3339(),
                "object": object,
            });
            Ok(serde_json::to_string(&line)?)
        }
        OutputFormat::Table => {
            let kind = match object {
                DirectoryObject::User(_) => "user",
                DirectoryObject::OrganizationalUnit(_) => "ou",
            };
            Ok(format!(
                "{} {:<4} {}",
                received_at.format("%H:%M:%S").to_string().dimmed(),
                kind,
                object.dn().bold()
            ))
        }
    }
}
