//! Validation report structures.
//!
//! A [`ValidationReport`] is immutable once produced and is regenerated on
//! every validation run. The overall score is a pure function of the
//! summary counts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Validation status of a schema entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityStatus {
    /// Exists and matches its definition
    Valid,
    /// Does not exist at all
    Missing,
    /// Exists but is missing at least one declared column or constraint
    Incomplete,
    /// Exists in a contradictory shape, or could not be inspected
    Invalid,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Valid => "valid",
            EntityStatus::Missing => "missing",
            EntityStatus::Incomplete => "incomplete",
            EntityStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table constraint found missing during validation
///
/// Structured so the script generator can synthesize the exact ALTER
/// statement without re-introspecting the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MissingConstraint {
    PrimaryKey {
        columns: Vec<String>,
    },
    Unique {
        columns: Vec<String>,
    },
    ForeignKey {
        column: String,
        referenced_table: String,
        referenced_column: String,
    },
}

impl MissingConstraint {
    /// Short human-readable label used in warnings
    pub fn describe(&self) -> String {
        match self {
            MissingConstraint::PrimaryKey { columns } => {
                format!("primary key ({})", columns.join(", "))
            }
            MissingConstraint::Unique { columns } => {
                format!("unique ({})", columns.join(", "))
            }
            MissingConstraint::ForeignKey {
                column,
                referenced_table,
                ..
            } => format!("foreign key {column} -> {referenced_table}"),
        }
    }
}

/// Validation outcome for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableValidation {
    pub name: String,
    pub status: EntityStatus,
    pub exists: bool,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub missing_constraints: Vec<MissingConstraint>,
    /// Declared indexes on this table that are absent (detail only; each
    /// index also has its own entity validation)
    pub missing_indexes: Vec<String>,
    /// Declared policies on this table that are absent (detail only)
    pub missing_policies: Vec<String>,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Validation outcome for one index
#[derive(Debug, Clone, Serialize)]
pub struct IndexValidation {
    pub name: String,
    pub table: String,
    pub status: EntityStatus,
    pub exists: bool,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Validation outcome for one policy
#[derive(Debug, Clone, Serialize)]
pub struct PolicyValidation {
    pub name: String,
    pub table: String,
    pub status: EntityStatus,
    pub exists: bool,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Validation outcome for one stored function
#[derive(Debug, Clone, Serialize)]
pub struct FunctionValidation {
    pub name: String,
    pub status: EntityStatus,
    pub exists: bool,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Migration ledger state observed during validation
#[derive(Debug, Clone, Serialize)]
pub struct MigrationValidation {
    /// Whether the ledger table exists at all (absence is not an error)
    pub ledger_present: bool,
    pub applied: Vec<String>,
    pub issues: Vec<String>,
}

/// Per-kind counts and the overall weighted score
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub tables_total: usize,
    pub tables_valid: usize,
    pub indexes_total: usize,
    pub indexes_valid: usize,
    pub policies_total: usize,
    pub policies_valid: usize,
    pub functions_total: usize,
    pub functions_valid: usize,
    pub overall_score: u8,
}

/// Score weights: tables carry the bulk of the structure, functions the
/// least. The weights sum to 1.0.
const WEIGHT_TABLES: f64 = 0.40;
const WEIGHT_INDEXES: f64 = 0.25;
const WEIGHT_POLICIES: f64 = 0.25;
const WEIGHT_FUNCTIONS: f64 = 0.10;

fn sub_score(valid: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * valid as f64 / total as f64
    }
}

/// Compute the overall score from per-kind counts
///
/// A pure, deterministic function: weighted sum of the per-kind
/// sub-scores, rounded to the nearest integer, clamped to [0, 100].
pub fn overall_score(
    tables: (usize, usize),
    indexes: (usize, usize),
    policies: (usize, usize),
    functions: (usize, usize),
) -> u8 {
    let score = WEIGHT_TABLES * sub_score(tables.0, tables.1)
        + WEIGHT_INDEXES * sub_score(indexes.0, indexes.1)
        + WEIGHT_POLICIES * sub_score(policies.0, policies.1)
        + WEIGHT_FUNCTIONS * sub_score(functions.0, functions.1);
    score.round().clamp(0.0, 100.0) as u8
}

impl ValidationSummary {
    pub fn new(
        tables: (usize, usize),
        indexes: (usize, usize),
        policies: (usize, usize),
        functions: (usize, usize),
    ) -> Self {
        Self {
            tables_valid: tables.0,
            tables_total: tables.1,
            indexes_valid: indexes.0,
            indexes_total: indexes.1,
            policies_valid: policies.0,
            policies_total: policies.1,
            functions_valid: functions.0,
            functions_total: functions.1,
            overall_score: overall_score(tables, indexes, policies, functions),
        }
    }
}

/// The full validation report
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub summary: ValidationSummary,
    pub tables: Vec<TableValidation>,
    pub indexes: Vec<IndexValidation>,
    pub policies: Vec<PolicyValidation>,
    pub functions: Vec<FunctionValidation>,
    pub migrations: MigrationValidation,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    /// Whether any entity needs creation or alteration
    ///
    /// `Invalid` entities are excluded: they are surfaced in `errors` but
    /// cannot be remediated mechanically.
    pub fn remediation_needed(&self) -> bool {
        let needs = |s: EntityStatus| matches!(s, EntityStatus::Missing | EntityStatus::Incomplete);
        self.tables.iter().any(|t| needs(t.status))
            || self.indexes.iter().any(|i| needs(i.status))
            || self.policies.iter().any(|p| needs(p.status))
            || self.functions.iter().any(|f| needs(f.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_score_all_valid() {
        assert_eq!(overall_score((5, 5), (3, 3), (2, 2), (1, 1)), 100);
    }

    #[test]
    fn test_overall_score_empty_catalog_is_perfect() {
        assert_eq!(overall_score((0, 0), (0, 0), (0, 0), (0, 0)), 100);
    }

    #[test]
    fn test_overall_score_nothing_valid() {
        assert_eq!(overall_score((0, 4), (0, 2), (0, 2), (0, 1)), 0);
    }

    #[test]
    fn test_overall_score_weighted_example() {
        // 15 of 17 tables valid, everything else fully valid:
        // 0.40 * 88.235 + 25 + 25 + 10 = 95.294 -> 95
        assert_eq!(overall_score((15, 17), (4, 4), (3, 3), (2, 2)), 95);
    }

    #[test]
    fn test_overall_score_empty_kinds_count_as_full() {
        // Only tables declared and half of them valid:
        // 0.40 * 50 + 25 + 25 + 10 = 80
        assert_eq!(overall_score((1, 2), (0, 0), (0, 0), (0, 0)), 80);
    }

    #[test]
    fn test_missing_constraint_describe() {
        let fk = MissingConstraint::ForeignKey {
            column: "tenant_id".into(),
            referenced_table: "tenants".into(),
            referenced_column: "id".into(),
        };
        assert_eq!(fk.describe(), "foreign key tenant_id -> tenants");
    }
}
