//! Check/fix pipeline runner
//!
//! Executes every check in a category in catalog order. Each check query must
//! return a single anomaly count; zero means clean. Non-zero counts are
//! remediated in place when fixes are requested. A check or fix query that
//! itself fails aborts the whole run: that is an execution error, not an
//! anomaly. Checks are idempotent and independent, so an aborted run leaves
//! the database valid and resumable.

use crate::catalog::{self, Category, CheckDefinition};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::version_gate;
use tracing::{debug, info};

/// Outcome of a single check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub anomaly_count: i64,
    pub fixed: bool,
}

/// Aggregate outcome of a category run
///
/// Invariant: `still_failing` equals the number of results with a non-zero
/// anomaly count that were not fixed.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub category: Category,
    pub total_checked: usize,
    pub still_failing: usize,
    pub results: Vec<CheckResult>,
}

/// Run every check in a category, loading definitions from the catalog
pub async fn run(db: &dyn Database, category: Category, apply_fixes: bool) -> Result<PipelineReport> {
    let checks = catalog::load_category(category)?;
    run_checks(db, category, &checks, apply_fixes).await
}

/// Run the given checks. The version gate for version-dependent categories
/// runs first, before any check executes, and only when fixes are requested.
pub async fn run_checks(
    db: &dyn Database,
    category: Category,
    checks: &[CheckDefinition],
    apply_fixes: bool,
) -> Result<PipelineReport> {
    if apply_fixes {
        if let Some(operation) = version_gate::requirement_for(category) {
            let version = db.server_version().await?;
            version_gate::enforce(&version, operation)?;
        }
    }

    info!("running checks for {category}...");

    let mut results = Vec::with_capacity(checks.len());
    let mut still_failing = 0usize;

    for check in checks {
        debug!(name = %check.name, "checking");
        let count = db
            .select_count(&check.check_sql)
            .await
            .map_err(|e| Error::CheckExecution {
                name: check.name.clone(),
                message: e.to_string(),
            })?;

        if count == 0 {
            debug!(name = %check.name, "check is clean");
            results.push(CheckResult {
                name: check.name.clone(),
                anomaly_count: 0,
                fixed: false,
            });
            continue;
        }

        info!(name = %check.name, count, "a fix is required");

        let mut fixed = false;
        if apply_fixes {
            let fix_sql = check.fix_sql.as_ref().ok_or_else(|| {
                Error::CatalogUnavailable(format!(
                    "fix_{}.sql is missing for {category}/{}",
                    check.name, check.name
                ))
            })?;

            db.execute_batch(fix_sql)
                .await
                .map_err(|e| Error::FixExecution {
                    name: check.name.clone(),
                    message: e.to_string(),
                })?;

            info!(name = %check.name, "fix applied");
            fixed = true;
        }

        if !fixed {
            still_failing += 1;
        }
        results.push(CheckResult {
            name: check.name.clone(),
            anomaly_count: count,
            fixed,
        });
    }

    let total_checked = results.len();
    if still_failing == 0 {
        info!("{total_checked} checks made, all good for {category}");
    } else {
        info!("{total_checked} checks made, {still_failing} fix(es) required for {category}");
    }

    Ok(PipelineReport {
        category,
        total_checked,
        still_failing,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::FakeDatabase;
    use crate::db::Dialect;

    fn check(name: &str, fix: bool) -> CheckDefinition {
        CheckDefinition {
            category: Category::Artifacts,
            name: name.to_string(),
            check_sql: format!("SELECT COUNT(*) FROM t WHERE kind = '{name}'"),
            fix_sql: fix.then(|| format!("DELETE FROM t WHERE kind = '{name}'")),
        }
    }

    fn five_checks() -> Vec<CheckDefinition> {
        vec![
            check("a", true),
            check("b", true),
            check("c", true),
            check("d", true),
            check("e", true),
        ]
    }

    #[tokio::test]
    async fn two_failing_checks_both_fixed() {
        let db = FakeDatabase::new(Dialect::MySql)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'b'", 3)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'd'", 1);

        let report = run_checks(&db, Category::Artifacts, &five_checks(), true)
            .await
            .unwrap();

        assert_eq!(report.total_checked, 5);
        assert_eq!(report.still_failing, 0);
        assert_eq!(db.executed().len(), 2);
    }

    #[tokio::test]
    async fn dry_run_never_mutates() {
        let db = FakeDatabase::new(Dialect::MySql)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'b'", 3)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'd'", 1);

        let report = run_checks(&db, Category::Artifacts, &five_checks(), false)
            .await
            .unwrap();

        assert_eq!(report.total_checked, 5);
        assert_eq!(report.still_failing, 2);
        assert!(db.executed().is_empty(), "dry run must not execute fixes");
    }

    #[tokio::test]
    async fn report_invariant_holds() {
        let db = FakeDatabase::new(Dialect::MySql)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'a'", 2);

        let report = run_checks(&db, Category::Artifacts, &five_checks(), false)
            .await
            .unwrap();

        let unfixed = report
            .results
            .iter()
            .filter(|r| r.anomaly_count > 0 && !r.fixed)
            .count();
        assert_eq!(report.still_failing, unfixed);
    }

    #[tokio::test]
    async fn check_query_failure_aborts_the_run() {
        let checks = vec![check("a", true), check("boom", true), check("c", true)];
        let db = FakeDatabase::new(Dialect::MySql).failing_on("kind = 'boom'");

        let err = run_checks(&db, Category::Artifacts, &checks, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CheckExecution { .. }));
    }

    #[tokio::test]
    async fn fix_failure_aborts_and_leaves_prior_fixes_applied() {
        let checks = vec![check("a", true), check("b", true), check("c", true)];
        let db = FakeDatabase::new(Dialect::MySql)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'a'", 1)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'b'", 1)
            .failing_on("DELETE FROM t WHERE kind = 'b'");

        let err = run_checks(&db, Category::Artifacts, &checks, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FixExecution { .. }));

        // the first fix stays applied, no rollback
        assert_eq!(db.executed(), vec!["DELETE FROM t WHERE kind = 'a'".to_string()]);
    }

    #[tokio::test]
    async fn missing_fix_is_fatal_only_when_requested() {
        let checks = vec![check("unpaired", false)];
        let db = FakeDatabase::new(Dialect::MySql)
            .with_count("SELECT COUNT(*) FROM t WHERE kind = 'unpaired'", 4);

        // tolerated while only checking
        let report = run_checks(&db, Category::Artifacts, &checks, false)
            .await
            .unwrap();
        assert_eq!(report.still_failing, 1);

        // fatal once a fix is actually requested
        let err = run_checks(&db, Category::Artifacts, &checks, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CatalogUnavailable(_)));
    }

    #[tokio::test]
    async fn version_gate_runs_before_any_check() {
        let checks = vec![CheckDefinition {
            category: Category::Unicode,
            name: "null_bytes".to_string(),
            check_sql: "SELECT COUNT(*) FROM documents".to_string(),
            fix_sql: Some("UPDATE documents SET content = ''".to_string()),
        }];
        let db = FakeDatabase::new(Dialect::MySql).with_version("5.7.31");

        let err = run_checks(&db, Category::Unicode, &checks, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionUnsupported { .. }));
        assert!(db.executed().is_empty());

        // without fixes the gate does not apply
        let report = run_checks(&db, Category::Unicode, &checks, false)
            .await
            .unwrap();
        assert_eq!(report.total_checked, 1);
    }
}
