//! Schema snapshot and drift detection
//!
//! A [`SchemaSnapshot`] is a structural capture of a live database schema at a
//! point in time. Two snapshots of the same dialect can be compared with
//! [`diff`], producing a [`DriftReport`]; an empty report means the schemas
//! are structurally identical modulo the documented bookkeeping tables.
//!
//! All collections are `BTreeMap`s so that serialized reports are
//! deterministic for identical inputs (stable key ordering), which keeps
//! persisted diffs snapshot-testable.

use crate::db::Dialect;
use crate::error::{invalid, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

/// Bookkeeping tables excluded from drift comparison. These exist only on
/// whichever side has run real migrations and carry no application schema.
pub const IGNORED_TABLES: &[&str] = &["db_migrations", "systems", "config_migrations", "db_lock"];

/// Column descriptor
///
/// Default values are compared by presence only; their textual rendering
/// differs between engine versions and is not a meaningful drift signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

/// Index descriptor, compared by ordered column list and uniqueness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// Table descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    pub columns: BTreeMap<String, ColumnDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
    #[serde(default)]
    pub indexes: BTreeMap<String, IndexDef>,
}

/// Complete schema snapshot at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub dialect: Dialect,
    pub captured_at: DateTime<Utc>,
    pub tables: BTreeMap<String, TableDef>,
    pub checksum: String,
}

impl SchemaSnapshot {
    /// Build a snapshot, computing its content checksum
    pub fn new(dialect: Dialect, tables: BTreeMap<String, TableDef>) -> Self {
        let checksum = Self::compute_checksum(&tables);
        Self {
            dialect,
            captured_at: Utc::now(),
            tables,
            checksum,
        }
    }

    /// Compute a checksum over schema content. BTreeMap iteration order makes
    /// this stable across captures of the same schema.
    pub fn compute_checksum(tables: &BTreeMap<String, TableDef>) -> String {
        let mut hasher = Sha256::new();

        for (table, def) in tables {
            hasher.update(table.as_bytes());
            for (col, c) in &def.columns {
                hasher.update(
                    format!("{table}.{col}:{}:{}:{}", c.data_type, c.nullable, c.has_default)
                        .as_bytes(),
                );
            }
            if let Some(pk) = &def.primary_key {
                hasher.update(format!("{table}.pk:{}", pk.join(",")).as_bytes());
            }
            for (name, idx) in &def.indexes {
                hasher.update(
                    format!("{table}.idx.{name}:{}:{}", idx.columns.join(","), idx.unique)
                        .as_bytes(),
                );
            }
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Field-level change on a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnChange {
    pub from: ColumnDef,
    pub to: ColumnDef,
}

/// Per-table drift details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDrift {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed_columns: BTreeMap<String, ColumnChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_indexes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_indexes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed_indexes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key_change: Option<String>,
}

impl TableDrift {
    fn is_empty(&self) -> bool {
        self.added_columns.is_empty()
            && self.removed_columns.is_empty()
            && self.changed_columns.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
            && self.changed_indexes.is_empty()
            && self.primary_key_change.is_none()
    }
}

/// Structural difference between a live schema and a reference schema
///
/// "Added" means present in the live schema but absent from the reference;
/// "removed" means the reference has it and the live schema does not. A
/// non-empty report is the intended signal that the two sides are not yet
/// schema-equivalent; it is never treated as a failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    pub live_checksum: String,
    pub reference_checksum: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed_tables: BTreeMap<String, TableDrift>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.added_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.changed_tables.is_empty()
    }

    pub fn total_changes(&self) -> usize {
        self.added_tables.len() + self.removed_tables.len() + self.changed_tables.len()
    }

    /// Write the report as pretty JSON. Output is deterministic for identical
    /// inputs: every map is a BTreeMap and every list is sorted on build.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| invalid(format!("could not serialize drift report: {e}")))?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }
}

/// Compare a live snapshot against a reference snapshot
///
/// Both snapshots must come from the same dialect; type names are not
/// comparable across engines.
pub fn diff(live: &SchemaSnapshot, reference: &SchemaSnapshot) -> Result<DriftReport> {
    if live.dialect != reference.dialect {
        return Err(invalid(format!(
            "cannot compare snapshots of different dialects ({} vs {})",
            live.dialect.as_str(),
            reference.dialect.as_str()
        )));
    }

    let ignored = |name: &str| IGNORED_TABLES.contains(&name);

    let mut report = DriftReport {
        live_checksum: live.checksum.clone(),
        reference_checksum: reference.checksum.clone(),
        ..Default::default()
    };

    for name in live.tables.keys() {
        if !ignored(name) && !reference.tables.contains_key(name) {
            report.added_tables.push(name.clone());
        }
    }

    for name in reference.tables.keys() {
        if !ignored(name) && !live.tables.contains_key(name) {
            report.removed_tables.push(name.clone());
        }
    }

    for (name, live_table) in &live.tables {
        if ignored(name) {
            continue;
        }
        let Some(ref_table) = reference.tables.get(name) else {
            continue;
        };

        let drift = diff_table(live_table, ref_table);
        if !drift.is_empty() {
            report.changed_tables.insert(name.clone(), drift);
        }
    }

    Ok(report)
}

fn diff_table(live: &TableDef, reference: &TableDef) -> TableDrift {
    let mut drift = TableDrift::default();

    for (col, live_col) in &live.columns {
        match reference.columns.get(col) {
            None => drift.added_columns.push(col.clone()),
            Some(ref_col) if ref_col != live_col => {
                drift.changed_columns.insert(
                    col.clone(),
                    ColumnChange {
                        from: live_col.clone(),
                        to: ref_col.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for col in reference.columns.keys() {
        if !live.columns.contains_key(col) {
            drift.removed_columns.push(col.clone());
        }
    }

    for (name, live_idx) in &live.indexes {
        match reference.indexes.get(name) {
            None => drift.added_indexes.push(name.clone()),
            Some(ref_idx) if ref_idx != live_idx => {
                drift.changed_indexes.insert(
                    name.clone(),
                    format!(
                        "columns ({}) unique={} vs columns ({}) unique={}",
                        live_idx.columns.join(", "),
                        live_idx.unique,
                        ref_idx.columns.join(", "),
                        ref_idx.unique
                    ),
                );
            }
            Some(_) => {}
        }
    }

    for name in reference.indexes.keys() {
        if !live.indexes.contains_key(name) {
            drift.removed_indexes.push(name.clone());
        }
    }

    if live.primary_key != reference.primary_key {
        drift.primary_key_change = Some(format!(
            "{:?} vs {:?}",
            live.primary_key, reference.primary_key
        ));
    }

    drift
}
