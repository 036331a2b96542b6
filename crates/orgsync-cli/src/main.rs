//! # orgsync
//!
//! Command-line tool for fetching and watching directory organizations.

#![forbid(unsafe_code)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Context;
use clap::Parser;
use orgsync_cli::{
    cli::{Cli, Command},
    commands::{run_org, run_ous, run_users, run_watch},
    config::CliConfig,
    output::{error, prompt_password, success},
};
use orgsync_ldap::OrgFetcher;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = CliConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .with_overrides(&cli);
    let format = config.output_format;

    let password = match cli.admin_password.clone() {
        Some(password) => password,
        None => prompt_password("Bind password: ")?,
    };
    let sync_config = config.to_sync_config(password)?;

    let fetcher = OrgFetcher::connect(sync_config)
        .await
        .context("failed to connect to the directory")?;

    let result = match cli.command {
        Command::Org(args) => run_org(args, &fetcher, format).await,
        Command::Ous(args) => run_ous(args, &fetcher, format).await,
        Command::Users(args) => run_users(args, &fetcher, format).await,
        Command::Watch(args) => run_watch(args, &fetcher, format).await,
    };

    fetcher.release().await.context("failed to release the connection")?;
    result?;

    if cli.verbose {
        success("Done");
    }
    Ok(())
}
