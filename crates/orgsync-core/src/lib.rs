//! # orgsync-core
//!
//! Directory model and protocol-independent building blocks for orgsync.
//!
//! This crate provides:
//!
//! - Distinguished name parsing and ancestry checks ([`dn`])
//! - The user and organizational unit model ([`model`])
//! - Search filter parsing and client-side evaluation ([`filter`])
//! - The [`DirectoryClient`] seam the engine drives ([`client`])
//! - An in-memory directory for tests and offline runs ([`memory`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dn;
pub mod error;
pub mod filter;
pub mod memory;
pub mod model;

pub use client::{
    Control, DirectoryClient, MessageId, SearchEvent, SearchEvents, SearchOutcome, SearchRequest, SearchScope,
};
pub use dn::DistinguishedName;
pub use error::{OrgSyncError, OrgSyncResult};
pub use filter::Filter;
pub use memory::InMemoryDirectory;
pub use model::{DirectoryEntry, DirectoryObject, DirectoryUser, NestedOu, ObjectKind, OrganizationalUnit, WholeOrg};
