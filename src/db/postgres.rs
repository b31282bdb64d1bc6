//! PostgreSQL connection handle
//!
//! Wraps a deadpool pool around the target (or shadow) database and layers the
//! precondition checks the migration needs on the target side: schema
//! ownership, empty-table verification, and search_path handling.

use super::{Database, Dialect, STATEMENT_TIMEOUT_SECONDS};
use crate::error::{Error, Result};
use crate::snapshot::{ColumnDef, IndexDef, SchemaSnapshot, TableDef, IGNORED_TABLES};
use async_trait::async_trait;
use deadpool_postgres::{Client, Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};
use url::Url;

/// A live PostgreSQL connection
pub struct PostgresDb {
    pool: Pool,
    database: String,
    user: String,
}

impl PostgresDb {
    /// Open a pool against the given `postgres://` URL
    pub fn connect(dsn: &str) -> Result<Self> {
        let uri = Url::parse(dsn)
            .map_err(|e| Error::Connectivity { engine: "postgres", message: e.to_string() })?;

        if !matches!(uri.scheme(), "postgres" | "postgresql" | "pgsql") {
            return Err(Error::Connectivity {
                engine: "postgres",
                message: format!("invalid scheme {:?}, expected postgres", uri.scheme()),
            });
        }

        let database = uri.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(Error::Connectivity {
                engine: "postgres",
                message: "database name is missing from the connection URL".to_string(),
            });
        }
        let user = if uri.username().is_empty() { "postgres" } else { uri.username() }.to_string();

        let mut cfg = Config::new();
        cfg.host = Some(uri.host_str().unwrap_or("localhost").to_string());
        cfg.port = Some(uri.port().unwrap_or(5432));
        cfg.user = Some(user.clone());
        cfg.password = uri.password().map(String::from);
        cfg.dbname = Some(database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Connectivity { engine: "postgres", message: e.to_string() })?;

        Ok(Self { pool, database, user })
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Check out a client with the statement timeout ceiling applied
    async fn client(&self) -> Result<Client> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "SET statement_timeout = '{STATEMENT_TIMEOUT_SECONDS}s'"
            ))
            .await?;
        Ok(client)
    }

    /// Verify the connecting user owns the given schema
    pub async fn check_schema_ownership(&self, schema: &str) -> Result<()> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) FROM information_schema.schemata \
                 WHERE schema_name = $1 AND schema_owner = $2",
                &[&schema, &self.user],
            )
            .await?;
        let count: i64 = row.get(0);

        if count == 0 {
            return Err(Error::Invalid(format!(
                "the user {:?} is not the owner of the {:?} schema",
                self.user, schema
            )));
        }

        Ok(())
    }

    /// Tables in the public schema that still contain rows, excluding the
    /// documented bookkeeping tables
    pub async fn non_empty_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await?;

        let mut non_empty = Vec::new();
        for row in rows {
            let table: String = row.get(0);
            if IGNORED_TABLES.contains(&table.as_str()) {
                continue;
            }
            let count_row = client
                .query_one(&format!("SELECT COUNT(*) FROM \"{table}\""), &[])
                .await?;
            let count: i64 = count_row.get(0);
            if count > 0 {
                non_empty.push(table);
            }
        }

        Ok(non_empty)
    }

    /// Current session search_path
    pub async fn search_path(&self) -> Result<String> {
        let client = self.client().await?;
        let row = client.query_one("SHOW search_path", &[]).await?;
        Ok(row.get(0))
    }

    /// Ensure the default schema is part of search_path, setting it for the
    /// session when it is not
    pub async fn ensure_search_path(&self, schema: &str) -> Result<()> {
        let current = self.search_path().await?;
        if current.split(',').any(|s| s.trim().trim_matches('"') == schema) {
            debug!(schema, "search_path already includes the default schema");
            return Ok(());
        }

        info!(schema, "setting search_path for the current session");
        let client = self.client().await?;
        client
            .query_one(
                "SELECT pg_catalog.set_config('search_path', $1, false)",
                &[&format!("\"$user\", {schema}")],
            )
            .await?;
        Ok(())
    }

    async fn table_names(&self, client: &Client) -> Result<Vec<String>> {
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                   AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn table_columns(&self, client: &Client, table: &str) -> Result<TableDef> {
        let rows = client
            .query(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
                   AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await?;

        let mut def = TableDef::default();
        for row in rows {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let nullable: String = row.get(2);
            let default: Option<String> = row.get(3);
            def.columns.insert(
                name,
                ColumnDef {
                    data_type,
                    nullable: nullable == "YES",
                    has_default: default.is_some(),
                },
            );
        }

        let index_rows = client
            .query(
                "SELECT i.relname AS index_name, \
                        COALESCE(array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)), ARRAY[]::text[]) AS columns, \
                        ix.indisunique AS is_unique, \
                        ix.indisprimary AS is_primary \
                 FROM pg_class t \
                 JOIN pg_index ix ON t.oid = ix.indrelid \
                 JOIN pg_class i ON i.oid = ix.indexrelid \
                 JOIN pg_namespace n ON n.oid = t.relnamespace \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
                 WHERE n.nspname NOT IN ('pg_catalog', 'information_schema') \
                   AND t.relkind = 'r' AND t.relname = $1 \
                 GROUP BY i.relname, ix.indisunique, ix.indisprimary \
                 ORDER BY i.relname",
                &[&table],
            )
            .await?;

        for row in index_rows {
            let name: String = row.get(0);
            let columns: Vec<String> = row.try_get(1).unwrap_or_default();
            let unique: bool = row.get(2);
            let primary: bool = row.get(3);
            if primary {
                def.primary_key = Some(columns.clone());
            }
            def.indexes.insert(name, IndexDef { columns, unique, primary });
        }

        Ok(def)
    }
}

#[async_trait]
impl Database for PostgresDb {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::Connectivity { engine: "postgres", message: e.to_string() })?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| Error::Connectivity { engine: "postgres", message: e.to_string() })?;
        Ok(())
    }

    async fn select_count(&self, sql: &str) -> Result<i64> {
        let client = self.client().await?;
        let row = client.query_one(sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let client = self.client().await?;
        client.batch_execute(sql).await?;
        Ok(())
    }

    async fn server_version(&self) -> Result<String> {
        let client = self.client().await?;
        let row = client.query_one("SHOW server_version", &[]).await?;
        Ok(row.get(0))
    }

    async fn applied_migrations(&self) -> Result<Vec<i64>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT version FROM db_migrations ORDER BY version ASC", &[])
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn snapshot(&self) -> Result<SchemaSnapshot> {
        let client = self.client().await?;
        let mut tables = std::collections::BTreeMap::new();
        for table in self.table_names(&client).await? {
            let def = self.table_columns(&client, &table).await?;
            tables.insert(table, def);
        }
        debug!(tables = tables.len(), "captured postgres schema snapshot");
        Ok(SchemaSnapshot::new(Dialect::Postgres, tables))
    }
}
