//! Applied-migration ledger
//!
//! The portable record of which migration versions the source database had
//! applied at the moment of query. Produced by the source-side run, consumed
//! by the target-side run as the cross-dialect correlation key: the two
//! engines share migration *versions* by convention, never SQL text.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ledger file contents: `{"applied_migrations": [1, 2, ...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedMigrationLedger {
    pub applied_migrations: Vec<i64>,
}

impl AppliedMigrationLedger {
    /// Build a ledger, validating that versions are strictly increasing with
    /// no duplicates
    pub fn new(applied_migrations: Vec<i64>) -> Result<Self> {
        let ledger = Self { applied_migrations };
        ledger.validate()?;
        Ok(ledger)
    }

    fn validate(&self) -> Result<()> {
        for pair in self.applied_migrations.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::Invalid(format!(
                    "ledger versions must be strictly increasing, found {} after {}",
                    pair[1], pair[0]
                )));
            }
        }
        Ok(())
    }

    /// Read and validate a ledger file. Any failure here is a resolution
    /// failure: a present-but-broken ledger must never silently fall through
    /// to a lower-priority migration source.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            Error::SourceUndetermined(format!("could not read ledger file {}: {e}", path.display()))
        })?;
        let ledger: Self = serde_json::from_slice(&bytes).map_err(|e| {
            Error::SourceUndetermined(format!("malformed ledger file {}: {e}", path.display()))
        })?;
        ledger.validate().map_err(|e| {
            Error::SourceUndetermined(format!("invalid ledger file {}: {e}", path.display()))
        })?;
        Ok(ledger)
    }

    /// Serialize to a file. Refuses to clobber an existing file unless
    /// `overwrite` is set; the ledger is never mutated after serialization.
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<()> {
        if path.exists() && !overwrite {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!(
                    "{} already exists, pass --overwrite-output to replace it",
                    path.display()
                ),
            )));
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Invalid(format!("could not serialize ledger: {e}")))?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing_versions_are_accepted() {
        let ledger = AppliedMigrationLedger::new(vec![1, 2, 5]).unwrap();
        assert_eq!(ledger.applied_migrations, vec![1, 2, 5]);
    }

    #[test]
    fn duplicates_and_regressions_are_rejected() {
        assert!(AppliedMigrationLedger::new(vec![1, 1]).is_err());
        assert!(AppliedMigrationLedger::new(vec![2, 1]).is_err());
    }

    #[test]
    fn round_trips_through_the_wire_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.output");

        let ledger = AppliedMigrationLedger::new(vec![1, 2, 5]).unwrap();
        ledger.save(&path, false).unwrap();

        let loaded = AppliedMigrationLedger::load(&path).unwrap();
        assert_eq!(loaded.applied_migrations, vec![1, 2, 5]);
    }

    #[test]
    fn save_refuses_to_clobber_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.output");

        let ledger = AppliedMigrationLedger::new(vec![1]).unwrap();
        ledger.save(&path, false).unwrap();
        assert!(ledger.save(&path, false).is_err());
        ledger.save(&path, true).unwrap();
    }

    #[test]
    fn malformed_ledger_is_a_resolution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.output");
        std::fs::write(&path, "{\"applied_migrations\": [2, 1]}").unwrap();

        let err = AppliedMigrationLedger::load(&path).unwrap_err();
        assert!(matches!(err, Error::SourceUndetermined(_)));
    }
}
