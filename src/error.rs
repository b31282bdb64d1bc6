//! Error handling module
//!
//! Provides the unified error taxonomy for the whole tool. Every variant maps
//! to a stable failure class so the CLI can translate errors into exit codes
//! without string matching. A non-empty drift report is deliberately *not* an
//! error; see [`crate::snapshot::DriftReport`].

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// Cannot reach or authenticate to a database. Fatal, never retried.
    #[error("could not reach {engine}: {message}")]
    Connectivity { engine: &'static str, message: String },

    /// The embedded check/fix/procedure catalog is missing or unreadable.
    #[error("check/fix catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The engine version is too old for a requested operation.
    #[error("detected version {detected} does not support {operation}, major version {required} or newer is required")]
    VersionUnsupported {
        detected: String,
        required: u32,
        operation: &'static str,
    },

    /// A check query itself failed to run (distinct from "anomaly found").
    #[error("check {name} could not run: {message}")]
    CheckExecution { name: String, message: String },

    /// A remediation query failed. Prior fixes remain applied, no rollback.
    #[error("fix for {name} failed: {message}")]
    FixExecution { name: String, message: String },

    /// None of the migration-source inputs could be used.
    #[error("could not determine a migration source: {0}")]
    SourceUndetermined(String),

    /// A specific migration script failed to apply.
    #[error("migration {script} failed: {message}")]
    MigrationApplication { script: String, message: String },

    /// The ephemeral reference instance could not be created.
    #[error("could not provision the reference instance: {0}")]
    Provisioning(String),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("postgres pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("mysql error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// Generic statement execution failure raised by [`crate::db::Database`]
    /// implementations that do not map onto a single driver error.
    #[error("sql error: {0}")]
    Sql(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Invalid input or internal invariant violation (e.g. diffing snapshots
    /// of different dialects).
    #[error("{0}")]
    Invalid(String),
}

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper to build an invalid-input error
pub fn invalid(msg: impl Into<String>) -> Error {
    Error::Invalid(msg.into())
}
