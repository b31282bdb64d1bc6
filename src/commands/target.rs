//! The `target` subcommand: verify the PostgreSQL database and bring its
//! schema up before the data move

use crate::cli::TargetArgs;
use crate::db::{Database, Dialect, PostgresDb};
use crate::error::{Error, Result};
use crate::gitsrc::GitFetcher;
use crate::migrate;
use crate::source::{resolve, MigrationSource};
use tracing::{info, warn};

pub async fn target(args: &TargetArgs) -> Result<u8> {
    // resolve the migration source before touching the database, so a bad
    // ledger or an empty directory fails without half-finished preflight work
    let migration_source = if args.run_migrations {
        Some(resolve_source(args).await?)
    } else {
        None
    };

    let db = PostgresDb::connect(&args.postgres_dsn)?;
    db.ping().await?;
    let version = db.server_version().await?;
    info!(%version, database = %db.database_name(), "connected to postgres");

    if args.skip_owner_check {
        warn!("skipping the schema ownership check");
    } else {
        db.check_schema_ownership("public").await?;
        info!(user = %db.user(), "the connected role owns the public schema");
    }

    let populated = db.non_empty_tables().await?;
    if !populated.is_empty() {
        if args.skip_empty_check {
            warn!(tables = ?populated, "target tables already hold rows");
        } else {
            return Err(Error::Invalid(format!(
                "target tables already hold rows ({}), pass --skip-empty-check to proceed anyway",
                populated.join(", ")
            )));
        }
    }

    if let Some(migration_source) = migration_source {
        apply(&db, &migration_source).await?;
    }

    Ok(0)
}

async fn resolve_source(args: &TargetArgs) -> Result<MigrationSource> {
    let fetcher = GitFetcher::new(
        args.git_repository.as_deref().unwrap_or_default(),
        &args.migrations_root,
    );
    resolve(
        args.applied_migrations.as_deref(),
        args.migrations_dir.as_deref(),
        args.from_version.as_deref(),
        Dialect::Postgres,
        &fetcher,
    )
    .await
}

async fn apply(db: &PostgresDb, migration_source: &MigrationSource) -> Result<()> {
    info!("applying {}", migration_source.describe());
    let applied = migrate::apply(db, migration_source).await?;
    info!("target schema is up, {applied} migration(s) applied");
    Ok(())
}
