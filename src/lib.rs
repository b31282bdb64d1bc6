//! schemaport - migration readiness toolkit
//!
//! Assists a one-way MySQL to PostgreSQL schema migration for a multi-tenant
//! application database: verifies the source is free of migration-blocking
//! anomalies (optionally remediating them), verifies target preconditions,
//! resolves which set of schema migrations applies, and can validate
//! structural parity between the live schema and a freshly-built reference
//! schema by replaying the migration history into an ephemeral instance.

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod db;
pub mod error;
pub mod gitsrc;
pub mod ledger;
pub mod migrate;
pub mod pgloader;
pub mod pipeline;
pub mod procedures;
pub mod shadow;
pub mod snapshot;
pub mod source;
pub mod version_gate;

pub use error::{Error, Result};
