//! Source-control migration fetcher
//!
//! Materializes the migration scripts shipped with a given product version
//! tag by sparse-checking-out the migrations subtree of the product
//! repository. Sparse checkout with a tree filter needs git 2.28 or newer, so
//! the local binary is version-gated before any network work starts.

use crate::db::Dialect;
use crate::error::{Error, Result};
use crate::source::MigrationFetcher;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const MIN_GIT: (u32, u32) = (2, 28);

static GIT_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.\d+)?").unwrap());

/// Fetches migrations from a git repository by version tag
pub struct GitFetcher {
    repo_url: String,
    migrations_root: String,
    git_bin: String,
}

impl GitFetcher {
    pub fn new(repo_url: &str, migrations_root: &str) -> Self {
        Self {
            repo_url: repo_url.to_string(),
            migrations_root: migrations_root.trim_matches('/').to_string(),
            git_bin: "git".to_string(),
        }
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        debug!(?args, "git");
        let output = Command::new(&self.git_bin)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| Error::SourceUndetermined(format!("could not run git: {e}")))?;

        if !output.status.success() {
            return Err(Error::SourceUndetermined(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn ensure_git_version(&self) -> Result<()> {
        let reported = self.git(Path::new("."), &["--version"]).await?;
        let (major, minor) = parse_git_version(&reported).ok_or_else(|| {
            Error::SourceUndetermined(format!("could not parse git version from {reported:?}"))
        })?;

        if (major, minor) < MIN_GIT {
            return Err(Error::SourceUndetermined(format!(
                "git {major}.{minor} is too old, sparse checkout requires {}.{} or newer",
                MIN_GIT.0, MIN_GIT.1
            )));
        }
        Ok(())
    }

    async fn sparse_checkout(&self, checkout: &Path, tag: &str, subtree: &str) -> Result<PathBuf> {
        self.git(
            checkout,
            &[
                "clone",
                "--no-checkout",
                "--depth=1",
                "--filter=tree:0",
                "--branch",
                tag,
                &self.repo_url,
                ".",
            ],
        )
        .await?;
        self.git(checkout, &["sparse-checkout", "set", "--no-cone", subtree])
            .await?;
        self.git(checkout, &["checkout"]).await?;

        let migrations_dir = checkout.join(subtree);
        if !migrations_dir.is_dir() {
            return Err(Error::SourceUndetermined(format!(
                "tag {tag} carries no migrations under {subtree}"
            )));
        }
        Ok(migrations_dir)
    }
}

/// Pull `major.minor` out of `git --version` output
pub fn parse_git_version(reported: &str) -> Option<(u32, u32)> {
    let captures = GIT_VERSION.captures(reported)?;
    Some((captures[1].parse().ok()?, captures[2].parse().ok()?))
}

#[async_trait::async_trait]
impl MigrationFetcher for GitFetcher {
    async fn fetch(&self, tag: &str, dialect: Dialect) -> Result<PathBuf> {
        self.ensure_git_version().await?;

        let checkout = std::env::temp_dir().join(format!(
            "schemaport-clone-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&checkout)?;

        info!(%tag, repo = %self.repo_url, "fetching migrations from source control");

        let subtree = format!("{}/{}", self.migrations_root, dialect.as_str());
        let fetched = self.sparse_checkout(&checkout, tag, &subtree).await;

        // the clone carries far more than the scripts; copy them out and
        // remove it whether or not the checkout worked
        let result = fetched.and_then(|migrations_dir| {
            let dest = std::env::temp_dir().join(format!(
                "schemaport-migrations-{tag}-{}-{}",
                dialect,
                std::process::id()
            ));
            copy_scripts(&migrations_dir, &dest)?;
            Ok(dest)
        });
        if let Err(e) = std::fs::remove_dir_all(&checkout) {
            debug!(path = %checkout.display(), error = %e, "could not remove the clone");
        }
        result
    }
}

/// Copy the script files (not subdirectories) of `from` into `to`
fn copy_scripts(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            std::fs::copy(entry.path(), to.join(entry.file_name()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_version_output_parses() {
        assert_eq!(parse_git_version("git version 2.39.2"), Some((2, 39)));
        assert_eq!(parse_git_version("git version 2.28.0.windows.1"), Some((2, 28)));
        assert_eq!(parse_git_version("nonsense"), None);
    }

    #[test]
    fn copy_scripts_takes_files_and_leaves_directories() {
        let from = tempfile::tempdir().unwrap();
        std::fs::write(from.path().join("000001_a.up.sql"), "CREATE TABLE a").unwrap();
        std::fs::write(from.path().join("000001_a.down.sql"), "DROP TABLE a").unwrap();
        std::fs::create_dir(from.path().join(".git")).unwrap();

        let to = tempfile::tempdir().unwrap();
        let dest = to.path().join("scripts");
        copy_scripts(from.path(), &dest).unwrap();

        assert!(dest.join("000001_a.up.sql").is_file());
        assert!(dest.join("000001_a.down.sql").is_file());
        assert!(!dest.join(".git").exists());
    }

    #[test]
    fn old_git_is_below_the_floor() {
        let version = parse_git_version("git version 2.25.1").unwrap();
        assert!(version < MIN_GIT);
        let version = parse_git_version("git version 2.43.0").unwrap();
        assert!(version >= MIN_GIT);
    }
}
