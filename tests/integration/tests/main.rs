//! End-to-End Integration Tests
//!
//! These tests drive the public `OrgFetcher` facade against an
//! `InMemoryDirectory`, covering tree reconstruction, paging, change
//! notifications and connection lifecycle.

mod common;
mod lifecycle;
mod notifications;
mod org_tree;
mod paging;
