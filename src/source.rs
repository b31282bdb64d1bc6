//! Migration source resolution
//!
//! Decides which ordered set of migration scripts a run applies. The three
//! inputs are mutually exclusive with a strict priority: a ledger file beats
//! an explicit directory, which beats a product version tag. A
//! higher-priority input that is present but unusable fails the resolution
//! outright; it never silently falls through to the next input.

use crate::catalog;
use crate::db::Dialect;
use crate::error::{Error, Result};
use crate::ledger::AppliedMigrationLedger;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `<version>_<name>.(up|down).sql`
static SCRIPT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_([A-Za-z0-9_\-]+)\.(up|down)\.sql$").unwrap());

/// Migration direction encoded in the script file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// One migration script, tagged with its version and direction
#[derive(Debug, Clone)]
pub struct Script {
    pub version: i64,
    pub name: String,
    pub direction: Direction,
    pub sql: String,
}

impl Script {
    pub fn file_name(&self) -> String {
        let direction = match self.direction {
            Direction::Up => "up",
            Direction::Down => "down",
        };
        format!("{:06}_{}.{}.sql", self.version, self.name, direction)
    }
}

/// Parse a migration file name into (version, name, direction)
pub fn parse_script_name(file_name: &str) -> Option<(i64, String, Direction)> {
    let captures = SCRIPT_NAME.captures(file_name)?;
    let version: i64 = captures[1].parse().ok()?;
    let direction = match &captures[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };
    Some((version, captures[2].to_string(), direction))
}

/// The resolved migration source. Exactly one variant is ever active; the
/// enum keeps the three mutually-exclusive inputs from collapsing into
/// ad-hoc optional fields.
#[derive(Debug)]
pub enum MigrationSource {
    /// Replay exactly the scripts whose version appears in the ledger, from
    /// the embedded migration catalog, in ledger order
    FromLedger {
        ledger: AppliedMigrationLedger,
        scripts: Vec<Script>,
    },
    /// All Up scripts from an explicit directory, ordered by version
    FromDirectory { dir: PathBuf, scripts: Vec<Script> },
    /// A product version tag, materialized into a directory by the
    /// source-control collaborator and then treated as FromDirectory
    FromVersionTag { tag: String, scripts: Vec<Script> },
}

impl MigrationSource {
    pub fn scripts(&self) -> &[Script] {
        match self {
            MigrationSource::FromLedger { scripts, .. } => scripts,
            MigrationSource::FromDirectory { scripts, .. } => scripts,
            MigrationSource::FromVersionTag { scripts, .. } => scripts,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            MigrationSource::FromLedger { scripts, .. } => {
                format!("{} migrations from the applied-migration ledger", scripts.len())
            }
            MigrationSource::FromDirectory { dir, scripts } => {
                format!("{} migrations from {}", scripts.len(), dir.display())
            }
            MigrationSource::FromVersionTag { tag, scripts } => {
                format!("{} migrations for version {tag}", scripts.len())
            }
        }
    }
}

/// Materializes migration scripts for a product version tag
#[async_trait]
pub trait MigrationFetcher: Send + Sync {
    /// Fetch the migrations for `tag` and return the directory they landed in
    async fn fetch(&self, tag: &str, dialect: Dialect) -> Result<PathBuf>;
}

/// Resolve the migration source from the three mutually-exclusive inputs
pub async fn resolve(
    ledger_file: Option<&Path>,
    directory: Option<&Path>,
    version_tag: Option<&str>,
    dialect: Dialect,
    fetcher: &dyn MigrationFetcher,
) -> Result<MigrationSource> {
    match (ledger_file, directory, version_tag) {
        (Some(path), _, _) => from_ledger(path, dialect),
        (None, Some(dir), _) => {
            let scripts = read_directory(dir)?;
            Ok(MigrationSource::FromDirectory {
                dir: dir.to_path_buf(),
                scripts,
            })
        }
        (None, None, Some(tag)) => {
            info!(tag, "materializing migrations from source control");
            let dir = fetcher.fetch(tag, dialect).await?;
            let scripts = read_directory(&dir)?;
            // the fetched directory is a temporary materialization; the
            // scripts are in memory now
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                debug!(path = %dir.display(), error = %e, "could not remove fetched migrations");
            }
            Ok(MigrationSource::FromVersionTag {
                tag: tag.to_string(),
                scripts,
            })
        }
        (None, None, None) => Err(Error::SourceUndetermined(
            "no ledger file, migrations directory, or version tag was provided".to_string(),
        )),
    }
}

/// Reconstruct the exact applied set: Up scripts from the embedded catalog
/// whose version appears in the ledger, ascending
fn from_ledger(path: &Path, dialect: Dialect) -> Result<MigrationSource> {
    let ledger = AppliedMigrationLedger::load(path)?;

    let mut by_version = std::collections::HashMap::new();
    for (file_name, sql) in catalog::embedded_migrations(dialect)? {
        let Some((version, name, direction)) = parse_script_name(&file_name) else {
            continue;
        };
        if direction != Direction::Up {
            continue;
        }
        by_version.insert(
            version,
            Script {
                version,
                name,
                direction,
                sql,
            },
        );
    }

    let mut scripts = Vec::with_capacity(ledger.applied_migrations.len());
    for version in &ledger.applied_migrations {
        let script = by_version.remove(version).ok_or_else(|| {
            Error::SourceUndetermined(format!(
                "ledger references version {version}, which is not in the embedded {dialect} catalog"
            ))
        })?;
        scripts.push(script);
    }

    Ok(MigrationSource::FromLedger { ledger, scripts })
}

/// All Up scripts in a directory, ordered by ascending version
fn read_directory(dir: &Path) -> Result<Vec<Script>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::SourceUndetermined(format!(
            "could not read migrations directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some((version, name, direction)) = parse_script_name(&file_name) else {
            continue;
        };
        if direction != Direction::Up {
            continue;
        }
        let sql = std::fs::read_to_string(entry.path())?;
        scripts.push(Script {
            version,
            name,
            direction,
            sql,
        });
    }

    if scripts.is_empty() {
        return Err(Error::SourceUndetermined(format!(
            "no migration scripts found in {}",
            dir.display()
        )));
    }

    scripts.sort_by_key(|s| s.version);
    Ok(scripts)
}
