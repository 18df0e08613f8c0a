//! Registry Sync - webhook-driven reconciliation of manifest-declared registry
//! entries against remote git repositories.
//!
//! This library provides the catalog data model, the reconciliation engine,
//! and the collaborators it is wired to: a GitHub source control client, an
//! in-memory catalog store, a JSONL audit log and the HTTP ingress.

pub mod audit;
pub mod config;
pub mod engine;
pub mod github;
pub mod index;
pub mod manifest;
pub mod server;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;
