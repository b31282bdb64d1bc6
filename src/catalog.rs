//! Check/fix/procedure catalog
//!
//! The catalog is pure data compiled into the binary: an asset tree of SQL
//! text organized by category, with checks and fixes paired by naming
//! convention (`check_<name>.sql` / `fix_<name>.sql`). Loading is
//! deterministic (lexical by name) so that pipeline reports are reproducible
//! across runs. An unpaired check is legal; the missing fix only becomes an
//! error if remediation is actually requested for it.

use crate::db::Dialect;
use crate::error::{Error, Result};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct Assets;

/// A named grouping of related checks addressing one class of
/// migration-blocking anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Leftover rows from older product versions
    Artifacts,
    /// Characters the target encoding cannot represent
    Unicode,
    /// Rows overflowing the target varchar limits
    Varchar,
    /// Varchar checks that rely on installed helper routines
    VarcharExtended,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Artifacts,
        Category::Unicode,
        Category::Varchar,
        Category::VarcharExtended,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Artifacts => "artifacts",
            Category::Unicode => "unicode",
            Category::Varchar => "varchar",
            Category::VarcharExtended => "varchar-extended",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One check and its optional paired fix. Identity is (category, name).
#[derive(Debug, Clone)]
pub struct CheckDefinition {
    pub category: Category,
    pub name: String,
    pub check_sql: String,
    pub fix_sql: Option<String>,
}

/// A helper routine installed before checks run and dropped afterwards
#[derive(Debug, Clone)]
pub struct ProcedureDefinition {
    pub name: String,
    pub create_sql: String,
    pub drop_sql: String,
}

fn read_asset(path: &str) -> Result<String> {
    let file = Assets::get(path)
        .ok_or_else(|| Error::CatalogUnavailable(format!("missing asset {path}")))?;
    String::from_utf8(file.data.into_owned())
        .map_err(|_| Error::CatalogUnavailable(format!("asset {path} is not valid utf-8")))
}

/// Strip the `check_`/`fix_`/`create_`/`drop_` prefix and `.sql` suffix
fn strip_query_name(file_name: &str) -> &str {
    let name = file_name
        .strip_prefix("check_")
        .or_else(|| file_name.strip_prefix("fix_"))
        .or_else(|| file_name.strip_prefix("create_"))
        .or_else(|| file_name.strip_prefix("drop_"))
        .unwrap_or(file_name);
    name.strip_suffix(".sql").unwrap_or(name)
}

/// Load every check in a category, lexically ordered by name
pub fn load_category(category: Category) -> Result<Vec<CheckDefinition>> {
    let prefix = format!("checks/{}/", category.as_str());

    let mut checks = Vec::new();
    for path in Assets::iter() {
        let Some(file_name) = path.strip_prefix(prefix.as_str()) else {
            continue;
        };
        if !file_name.starts_with("check_") {
            continue;
        }

        let name = strip_query_name(file_name).to_string();
        let check_sql = read_asset(&path)?;
        let fix_path = format!("fixes/{}/fix_{name}.sql", category.as_str());
        let fix_sql = match Assets::get(&fix_path) {
            Some(_) => Some(read_asset(&fix_path)?),
            None => None,
        };

        checks.push(CheckDefinition {
            category,
            name,
            check_sql,
            fix_sql,
        });
    }

    if checks.is_empty() {
        return Err(Error::CatalogUnavailable(format!(
            "no checks found for category {category}"
        )));
    }

    checks.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(checks)
}

/// Load every helper routine, lexically ordered by name. A create script
/// without a matching drop script is a malformed catalog.
pub fn load_procedures() -> Result<Vec<ProcedureDefinition>> {
    let mut procedures = Vec::new();
    for path in Assets::iter() {
        let Some(file_name) = path.strip_prefix("procedures/") else {
            continue;
        };
        if !file_name.starts_with("create_") {
            continue;
        }

        let name = strip_query_name(file_name).to_string();
        let drop_path = format!("procedures/drop_{name}.sql");
        procedures.push(ProcedureDefinition {
            create_sql: read_asset(&path)?,
            drop_sql: read_asset(&drop_path)?,
            name,
        });
    }

    procedures.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(procedures)
}

/// Post-migration scripts (index rebuilds and similar), lexically ordered
pub fn load_post_migrate() -> Result<Vec<(String, String)>> {
    let mut scripts = Vec::new();
    for path in Assets::iter() {
        let Some(file_name) = path.strip_prefix("post-migrate/") else {
            continue;
        };
        scripts.push((file_name.to_string(), read_asset(&path)?));
    }

    if scripts.is_empty() {
        return Err(Error::CatalogUnavailable(
            "no post-migrate scripts found".to_string(),
        ));
    }

    scripts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(scripts)
}

/// File names and contents of the embedded migration catalog for a dialect
pub fn embedded_migrations(dialect: Dialect) -> Result<Vec<(String, String)>> {
    let prefix = format!("migrations/{}/", dialect.as_str());

    let mut files = Vec::new();
    for path in Assets::iter() {
        let Some(file_name) = path.strip_prefix(prefix.as_str()) else {
            continue;
        };
        files.push((file_name.to_string(), read_asset(&path)?));
    }

    if files.is_empty() {
        return Err(Error::CatalogUnavailable(format!(
            "no embedded migrations for dialect {dialect}"
        )));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_category_loads_in_lexical_order() {
        for category in Category::ALL {
            let checks = load_category(category).unwrap();
            assert!(!checks.is_empty(), "category {category} is empty");

            let names: Vec<_> = checks.iter().map(|c| c.name.clone()).collect();
            let mut sorted = names.clone();
            sorted.sort();
            assert_eq!(names, sorted, "category {category} not lexically ordered");
        }
    }

    #[test]
    fn loading_is_deterministic() {
        let a = load_category(Category::Artifacts).unwrap();
        let b = load_category(Category::Artifacts).unwrap();
        let names_a: Vec<_> = a.iter().map(|c| &c.name).collect();
        let names_b: Vec<_> = b.iter().map(|c| &c.name).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn procedures_carry_create_and_drop() {
        let procedures = load_procedures().unwrap();
        assert!(!procedures.is_empty());
        for p in procedures {
            assert!(p.create_sql.to_uppercase().contains("CREATE"));
            assert!(p.drop_sql.to_uppercase().contains("DROP"));
        }
    }

    #[test]
    fn embedded_migrations_exist_for_both_dialects() {
        assert!(!embedded_migrations(Dialect::Postgres).unwrap().is_empty());
        assert!(!embedded_migrations(Dialect::MySql).unwrap().is_empty());
    }

    #[test]
    fn strip_query_name_handles_all_prefixes() {
        assert_eq!(strip_query_name("check_orphaned_sessions.sql"), "orphaned_sessions");
        assert_eq!(strip_query_name("fix_orphaned_sessions.sql"), "orphaned_sessions");
        assert_eq!(strip_query_name("create_text_overflow.sql"), "text_overflow");
        assert_eq!(strip_query_name("drop_text_overflow.sql"), "text_overflow");
    }
}
