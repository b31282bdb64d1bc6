//! MySQL connection handle
//!
//! The source side of the migration. Check and fix queries, the applied
//! migration ledger, and the schema snapshot for the shadow comparison all go
//! through this handle.

use super::{Database, Dialect, STATEMENT_TIMEOUT_SECONDS};
use crate::error::{Error, Result};
use crate::snapshot::{ColumnDef, IndexDef, SchemaSnapshot, TableDef};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, Pool};
use tracing::debug;
use url::Url;

/// A live MySQL connection
pub struct MySqlDb {
    pool: Pool,
    database: String,
    user: String,
}

impl MySqlDb {
    /// Open a pool against the given `mysql://` URL
    pub fn connect(dsn: &str) -> Result<Self> {
        let uri = Url::parse(dsn)
            .map_err(|e| Error::Connectivity { engine: "mysql", message: e.to_string() })?;
        let database = uri.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(Error::Connectivity {
                engine: "mysql",
                message: "database name is missing from the connection URL".to_string(),
            });
        }
        let user = uri.username().to_string();

        let opts = Opts::from_url(dsn)
            .map_err(|e| Error::Connectivity { engine: "mysql", message: e.to_string() })?;

        Ok(Self {
            pool: Pool::new(opts),
            database,
            user,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Check out a connection with the statement timeout ceiling applied.
    /// MAX_EXECUTION_TIME only bounds reads; DDL is bounded by the driver's
    /// own connection timeouts.
    async fn conn(&self) -> Result<Conn> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(format!(
            "SET SESSION MAX_EXECUTION_TIME = {}",
            STATEMENT_TIMEOUT_SECONDS * 1000
        ))
        .await?;
        Ok(conn)
    }

    /// Close the underlying pool. Call on every exit path of a run; dropping
    /// the pool without disconnecting leaks the connection until process exit.
    pub async fn close(self) -> Result<()> {
        self.pool.disconnect().await?;
        Ok(())
    }

    async fn table_names(&self, conn: &mut Conn) -> Result<Vec<String>> {
        let tables = conn
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
            )
            .await?;
        Ok(tables)
    }

    async fn table_def(&self, conn: &mut Conn, table: &str) -> Result<TableDef> {
        let mut def = TableDef::default();

        let columns: Vec<(String, String, String, Option<String>)> = conn
            .exec(
                "SELECT column_name, column_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY ordinal_position",
                (table,),
            )
            .await?;

        for (name, data_type, nullable, default) in columns {
            def.columns.insert(
                name,
                ColumnDef {
                    data_type,
                    nullable: nullable == "YES",
                    has_default: default.is_some(),
                },
            );
        }

        let index_rows: Vec<(String, String, i64)> = conn
            .exec(
                "SELECT index_name, column_name, non_unique \
                 FROM information_schema.statistics \
                 WHERE table_schema = DATABASE() AND table_name = ? \
                 ORDER BY index_name, seq_in_index",
                (table,),
            )
            .await?;

        for (index, column, non_unique) in index_rows {
            let entry = def.indexes.entry(index.clone()).or_insert_with(|| IndexDef {
                columns: Vec::new(),
                unique: non_unique == 0,
                primary: index == "PRIMARY",
            });
            entry.columns.push(column);
        }

        if let Some(primary) = def.indexes.get("PRIMARY") {
            def.primary_key = Some(primary.columns.clone());
        }

        Ok(def)
    }
}

#[async_trait]
impl Database for MySqlDb {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::Connectivity { engine: "mysql", message: e.to_string() })?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| Error::Connectivity { engine: "mysql", message: e.to_string() })?;
        Ok(())
    }

    async fn select_count(&self, sql: &str) -> Result<i64> {
        let mut conn = self.conn().await?;
        let count: Option<i64> = conn.query_first(sql).await?;
        count.ok_or_else(|| Error::Sql("count query returned no rows".to_string()))
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.query_drop(sql).await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String> {
        let mut conn = self.conn().await?;
        let version: Option<String> = conn.query_first("SELECT VERSION()").await?;
        version.ok_or_else(|| Error::Sql("could not read server version".to_string()))
    }

    async fn applied_migrations(&self) -> Result<Vec<i64>> {
        let mut conn = self.conn().await?;
        let versions = conn
            .query("SELECT version FROM db_migrations ORDER BY version ASC")
            .await?;
        Ok(versions)
    }

    async fn snapshot(&self) -> Result<SchemaSnapshot> {
        let mut conn = self.conn().await?;
        let mut tables = std::collections::BTreeMap::new();
        for table in self.table_names(&mut conn).await? {
            let def = self.table_def(&mut conn, &table).await?;
            tables.insert(table, def);
        }
        debug!(tables = tables.len(), "captured mysql schema snapshot");
        Ok(SchemaSnapshot::new(Dialect::MySql, tables))
    }
}
