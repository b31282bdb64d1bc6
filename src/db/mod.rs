//! Database connection management
//!
//! Both engines sit behind the [`Database`] capability trait so the pipeline
//! runner, migration adapter, and comparator can be exercised against fakes.
//! Each handle serializes its own requests through one underlying connection;
//! no two runs share a handle concurrently. Every session carries a fixed
//! statement timeout ceiling, after which a statement fails and the pipeline
//! treats the failure as fatal.

pub mod mysql;
pub mod postgres;

use crate::error::Result;
use crate::snapshot::SchemaSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use mysql::MySqlDb;
pub use postgres::PostgresDb;

/// Statement timeout ceiling, applied per session
pub const STATEMENT_TIMEOUT_SECONDS: u64 = 60 * 5;

/// SQL dialect of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Whether DDL participates in transactions on this engine. MySQL commits
    /// implicitly around DDL, so per-script transactions are meaningless there.
    pub fn transactional_ddl(self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface over one database connection
#[async_trait]
pub trait Database: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Verify the connection is alive and authenticated
    async fn ping(&self) -> Result<()>;

    /// Run a query that must return exactly one integer
    async fn select_count(&self, sql: &str) -> Result<i64>;

    /// Execute one or more statements, discarding any result sets
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// The engine's self-reported version string
    async fn server_version(&self) -> Result<String>;

    /// Versions recorded in the migration ledger table, ascending
    async fn applied_migrations(&self) -> Result<Vec<i64>>;

    /// Capture a structural snapshot of the current schema
    async fn snapshot(&self) -> Result<SchemaSnapshot>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::error::Error;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Scripted in-memory database for pipeline/adapter/comparator tests.
    /// `counts` maps exact check SQL to an anomaly count; statements containing
    /// any `fail_on` fragment error out; everything executed is recorded.
    #[derive(Default)]
    pub struct FakeDatabase {
        pub dialect: Option<Dialect>,
        pub version: String,
        pub counts: Mutex<std::collections::HashMap<String, i64>>,
        pub fail_on: Vec<String>,
        pub executed: Mutex<Vec<String>>,
        pub applied: Mutex<Vec<i64>>,
        pub schema: Mutex<Option<SchemaSnapshot>>,
    }

    impl FakeDatabase {
        pub fn new(dialect: Dialect) -> Self {
            Self {
                dialect: Some(dialect),
                version: "8.0.36".to_string(),
                ..Default::default()
            }
        }

        pub fn with_version(mut self, version: &str) -> Self {
            self.version = version.to_string();
            self
        }

        pub fn with_count(self, sql: &str, count: i64) -> Self {
            self.counts.lock().unwrap().insert(sql.to_string(), count);
            self
        }

        pub fn failing_on(mut self, fragment: &str) -> Self {
            self.fail_on.push(fragment.to_string());
            self
        }

        pub fn with_schema(self, snapshot: SchemaSnapshot) -> Self {
            *self.schema.lock().unwrap() = Some(snapshot);
            self
        }

        pub fn executed(&self) -> Vec<String> {
            self.executed.lock().unwrap().clone()
        }

        fn should_fail(&self, sql: &str) -> bool {
            self.fail_on.iter().any(|f| sql.contains(f))
        }
    }

    #[async_trait]
    impl Database for FakeDatabase {
        fn dialect(&self) -> Dialect {
            self.dialect.unwrap_or(Dialect::MySql)
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn select_count(&self, sql: &str) -> Result<i64> {
            if self.should_fail(sql) {
                return Err(Error::Sql(format!("scripted failure for: {sql}")));
            }
            Ok(*self.counts.lock().unwrap().get(sql).unwrap_or(&0))
        }

        async fn execute_batch(&self, sql: &str) -> Result<()> {
            if self.should_fail(sql) {
                return Err(Error::Sql(format!("scripted failure for: {sql}")));
            }
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        async fn server_version(&self) -> Result<String> {
            Ok(self.version.clone())
        }

        async fn applied_migrations(&self) -> Result<Vec<i64>> {
            Ok(self.applied.lock().unwrap().clone())
        }

        async fn snapshot(&self) -> Result<SchemaSnapshot> {
            Ok(self
                .schema
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| SchemaSnapshot::new(self.dialect(), BTreeMap::new())))
        }
    }
}
