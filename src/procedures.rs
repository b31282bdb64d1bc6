//! Helper procedure lifecycle
//!
//! Some checks lean on stored routines that must exist before the pipeline
//! runs and must be gone afterwards regardless of outcome. Installation is
//! best-effort: a routine that fails to install is logged and skipped, since
//! checks are independent and only some of them need each helper. The
//! returned guard's [`InstalledProcedures::release`] must run on every exit
//! path; drops are equally best-effort.

use crate::catalog::ProcedureDefinition;
use crate::db::Database;
use tracing::{debug, warn};

/// Guard over installed helper routines. Call [`release`](Self::release)
/// exactly once when the pipeline run is over.
#[must_use = "helper procedures must be released when the run is over"]
pub struct InstalledProcedures {
    procedures: Vec<ProcedureDefinition>,
}

/// Install every helper routine, best-effort
pub async fn install(db: &dyn Database, procedures: Vec<ProcedureDefinition>) -> InstalledProcedures {
    for procedure in &procedures {
        match db.execute_batch(&procedure.create_sql).await {
            Ok(()) => debug!(name = %procedure.name, "installed helper procedure"),
            Err(e) => warn!(name = %procedure.name, error = %e, "could not install helper procedure"),
        }
    }

    InstalledProcedures { procedures }
}

impl InstalledProcedures {
    /// Drop every helper routine, best-effort. Drop scripts are written with
    /// IF EXISTS so releasing a routine that never installed is harmless.
    pub async fn release(self, db: &dyn Database) {
        for procedure in &self.procedures {
            match db.execute_batch(&procedure.drop_sql).await {
                Ok(()) => debug!(name = %procedure.name, "dropped helper procedure"),
                Err(e) => warn!(name = %procedure.name, error = %e, "could not drop helper procedure"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::FakeDatabase;
    use crate::db::Dialect;

    fn procedure(name: &str) -> ProcedureDefinition {
        ProcedureDefinition {
            name: name.to_string(),
            create_sql: format!("CREATE FUNCTION {name}() RETURNS INT RETURN 0"),
            drop_sql: format!("DROP FUNCTION IF EXISTS {name}"),
        }
    }

    #[tokio::test]
    async fn install_failure_is_not_fatal_and_release_drops_everything() {
        let db = FakeDatabase::new(Dialect::MySql).failing_on("CREATE FUNCTION broken");

        let guard = install(&db, vec![procedure("broken"), procedure("working")]).await;

        // the working routine installed despite the broken one
        let executed = db.executed();
        assert!(executed.iter().any(|s| s.contains("CREATE FUNCTION working")));
        assert!(!executed.iter().any(|s| s.contains("CREATE FUNCTION broken")));

        guard.release(&db).await;

        // release attempts the drop for both routines
        let executed = db.executed();
        assert!(executed.iter().any(|s| s.contains("DROP FUNCTION IF EXISTS broken")));
        assert!(executed.iter().any(|s| s.contains("DROP FUNCTION IF EXISTS working")));
    }

    #[tokio::test]
    async fn drop_failure_is_swallowed() {
        let db = FakeDatabase::new(Dialect::MySql).failing_on("DROP FUNCTION IF EXISTS broken");

        let guard = install(&db, vec![procedure("broken"), procedure("working")]).await;
        guard.release(&db).await;

        let executed = db.executed();
        assert!(executed.iter().any(|s| s.contains("DROP FUNCTION IF EXISTS working")));
    }
}
