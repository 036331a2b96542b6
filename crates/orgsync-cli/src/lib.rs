//! # orgsync-cli
//!
//! Command-line front end for the directory synchronization engine.
//!
//! This crate provides commands for:
//! - Fetching the whole organization tree
//! - Listing OUs and users, optionally page by page
//! - Watching Active Directory change notifications

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::Cli;
pub use config::CliConfig;
pub use error::{CliError, CliResult};
