//! The `source` subcommand: verify the MySQL database before the data move

use super::EXIT_DRIFT;
use crate::catalog::{self, Category};
use crate::cli::SourceArgs;
use crate::db::{Database, Dialect, MySqlDb};
use crate::error::Result;
use crate::ledger::AppliedMigrationLedger;
use crate::shadow::{Comparator, DockerProvisioner};
use crate::source::resolve;
use crate::{pipeline, procedures};
use tracing::{info, warn};

pub async fn source(args: &SourceArgs) -> Result<u8> {
    let db = MySqlDb::connect(&args.mysql_dsn)?;
    db.ping().await?;
    let version = db.server_version().await?;
    info!(%version, database = %db.database_name(), "connected to mysql");

    // release and disconnect on every exit path past this point
    let outcome = run(&db, args).await;
    db.close().await?;
    outcome
}

async fn run(db: &MySqlDb, args: &SourceArgs) -> Result<u8> {
    let ledger = AppliedMigrationLedger::new(db.applied_migrations().await?)?;
    ledger.save(&args.output, args.overwrite_output)?;
    info!(
        path = %args.output.display(),
        migrations = ledger.applied_migrations.len(),
        "applied-migration ledger exported"
    );

    let mut drifted = false;
    if args.full_schema_check {
        let migration_source = resolve(
            Some(&args.output),
            None,
            None,
            Dialect::MySql,
            &NoFetcher,
        )
        .await?;

        let provisioner = DockerProvisioner::new(Dialect::MySql);
        let report = Comparator::new(&provisioner)
            .compare(db, &migration_source, args.save_diff.as_deref())
            .await?;
        drifted = !report.is_empty();
    }

    let guard = procedures::install(db, catalog::load_procedures()?).await;
    let outcome = run_categories(db, args).await;
    guard.release(db).await;
    let still_failing = outcome?;

    if still_failing > 0 {
        warn!("{still_failing} check(s) still require a fix, re-run with the matching --fix flag");
    }

    Ok(if drifted { EXIT_DRIFT } else { 0 })
}

async fn run_categories(db: &dyn Database, args: &SourceArgs) -> Result<usize> {
    let plan = [
        (Category::Artifacts, args.fix_artifacts),
        (Category::Unicode, args.fix_unicode),
        (Category::Varchar, args.fix_varchar),
        (Category::VarcharExtended, args.fix_varchar),
    ];

    let mut still_failing = 0usize;
    for (category, apply_fixes) in plan {
        let report = pipeline::run(db, category, apply_fixes).await?;
        still_failing += report.still_failing;
    }
    Ok(still_failing)
}

/// The source run always resolves from the ledger it just wrote
struct NoFetcher;

#[async_trait::async_trait]
impl crate::source::MigrationFetcher for NoFetcher {
    async fn fetch(&self, tag: &str, _dialect: Dialect) -> Result<std::path::PathBuf> {
        Err(crate::error::Error::SourceUndetermined(format!(
            "version tag {tag} is not a valid input here"
        )))
    }
}
