//! The `post-migrate` subcommand: restore what was deferred for the bulk
//! data move, full-text indexes chiefly

use crate::catalog;
use crate::cli::PostMigrateArgs;
use crate::db::{Database, PostgresDb};
use crate::error::Result;
use crate::migrate;
use tracing::info;

pub async fn post_migrate(args: &PostMigrateArgs) -> Result<u8> {
    let db = PostgresDb::connect(&args.postgres_dsn)?;
    db.ping().await?;
    db.ensure_search_path("public").await?;

    let scripts = catalog::load_post_migrate()?;
    let applied = migrate::apply_standalone(&db, &scripts).await?;
    info!("{applied} post-migration script(s) applied");

    Ok(0)
}
