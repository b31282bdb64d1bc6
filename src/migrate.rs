//! Migration application adapter
//!
//! Applies an ordered migration source to a connection and keeps the
//! `db_migrations` ledger table in step. Each script runs inside its own
//! transaction on engines with transactional DDL; the ledger row commits with
//! the script it records. A script failure aborts the remaining sequence and
//! surfaces the failing script's identity. Re-running against the same
//! database is idempotent: versions already in the ledger are skipped.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::source::{MigrationSource, Script};
use std::collections::HashSet;
use tracing::{debug, info};

const LEDGER_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS db_migrations (\
     version bigint NOT NULL PRIMARY KEY, \
     name varchar(191) NOT NULL)";

/// Apply every script in the source, in order. Returns the number of scripts
/// actually applied (already-recorded versions are skipped).
pub async fn apply(db: &dyn Database, source: &MigrationSource) -> Result<usize> {
    db.execute_batch(LEDGER_TABLE_DDL)
        .await
        .map_err(|e| Error::MigrationApplication {
            script: "db_migrations ledger table".to_string(),
            message: e.to_string(),
        })?;

    let already_applied: HashSet<i64> = db.applied_migrations().await?.into_iter().collect();

    let mut applied = 0usize;
    for script in source.scripts() {
        if already_applied.contains(&script.version) {
            debug!(script = %script.file_name(), "already applied, skipping");
            continue;
        }

        debug!(script = %script.file_name(), "applying");
        db.execute_batch(&statement_for(db, script))
            .await
            .map_err(|e| Error::MigrationApplication {
                script: script.file_name(),
                message: e.to_string(),
            })?;
        applied += 1;
    }

    info!("{applied} migration(s) applied");
    Ok(applied)
}

/// The script plus its ledger insert, wrapped in one transaction where the
/// engine supports transactional DDL. MySQL commits implicitly around DDL, so
/// wrapping would be a lie there; the statements run back to back instead.
fn statement_for(db: &dyn Database, script: &Script) -> String {
    let record = format!(
        "INSERT INTO db_migrations (version, name) VALUES ({}, '{}');",
        script.version, script.name
    );
    if db.dialect().transactional_ddl() {
        format!("BEGIN;\n{}\n{record}\nCOMMIT;", script.sql)
    } else {
        format!("{}\n{record}", script.sql)
    }
}

/// Run a set of standalone scripts (post-migrate index rebuilds). These are
/// not versioned and never touch the ledger.
pub async fn apply_standalone(db: &dyn Database, scripts: &[(String, String)]) -> Result<usize> {
    for (name, sql) in scripts {
        info!(script = %name, "applying");
        db.execute_batch(sql)
            .await
            .map_err(|e| Error::MigrationApplication {
                script: name.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(scripts.len())
}
