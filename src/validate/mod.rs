//! Schema validation.
//!
//! The [`Validator`] combines the declared catalog with live introspection
//! results into a [`ValidationReport`]. It fails fatally only when the
//! database cannot be reached at all; every structural discrepancy and
//! every per-entity introspection failure is captured as data in the
//! report, so partial results are always returned.

pub mod report;

pub use report::{
    EntityStatus, FunctionValidation, IndexValidation, MigrationValidation, MissingConstraint,
    PolicyValidation, TableValidation, ValidationReport, ValidationSummary,
};

use chrono::Utc;
use std::collections::HashMap;

use crate::catalog::{IndexDefinition, PolicyDefinition, SchemaCatalog, TableDefinition};
use crate::executor::GuardError;
use crate::introspect::{ConstraintKind, LivePolicy, SchemaBackend};

/// Validates the live database against the declared catalog
pub struct Validator<'a> {
    catalog: &'a SchemaCatalog,
    backend: &'a dyn SchemaBackend,
}

impl<'a> Validator<'a> {
    pub fn new(catalog: &'a SchemaCatalog, backend: &'a dyn SchemaBackend) -> Self {
        Self { catalog, backend }
    }

    /// Run the full validation pass
    ///
    /// # Errors
    ///
    /// Returns `GuardError` only when the connectivity probe fails.
    /// Everything else is recorded inside the report.
    pub fn validate(&self) -> Result<ValidationReport, GuardError> {
        self.backend.ping()?;

        log::debug!(
            "validating {} declared entities against live schema",
            self.catalog.entity_count()
        );

        // Policies are fetched once per distinct table and shared between
        // the policy validations and the per-table detail.
        let policy_fetches = self.fetch_policies_per_table();

        let indexes: Vec<IndexValidation> = self
            .catalog
            .indexes
            .iter()
            .map(|def| self.validate_index(def))
            .collect();

        let policies: Vec<PolicyValidation> = self
            .catalog
            .policies
            .iter()
            .map(|def| self.validate_policy(def, &policy_fetches))
            .collect();

        let tables: Vec<TableValidation> = self
            .catalog
            .tables
            .iter()
            .map(|def| self.validate_table(def, &indexes, &policies))
            .collect();

        let functions: Vec<report::FunctionValidation> = self
            .catalog
            .functions
            .iter()
            .map(|def| self.validate_function(def))
            .collect();

        let migrations = self.validate_migrations();

        let count_valid = |statuses: &[EntityStatus]| {
            statuses.iter().filter(|s| **s == EntityStatus::Valid).count()
        };
        let table_statuses: Vec<EntityStatus> = tables.iter().map(|t| t.status).collect();
        let index_statuses: Vec<EntityStatus> = indexes.iter().map(|i| i.status).collect();
        let policy_statuses: Vec<EntityStatus> = policies.iter().map(|p| p.status).collect();
        let function_statuses: Vec<EntityStatus> = functions.iter().map(|f| f.status).collect();

        let summary = ValidationSummary::new(
            (count_valid(&table_statuses), table_statuses.len()),
            (count_valid(&index_statuses), index_statuses.len()),
            (count_valid(&policy_statuses), policy_statuses.len()),
            (count_valid(&function_statuses), function_statuses.len()),
        );

        let mut rep = ValidationReport {
            generated_at: Utc::now(),
            summary,
            tables,
            indexes,
            policies,
            functions,
            migrations,
            errors: Vec::new(),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        };
        flatten_findings(&mut rep);

        log::info!(
            "validation complete: score {}/100, {} errors, {} warnings",
            rep.summary.overall_score,
            rep.errors.len(),
            rep.warnings.len()
        );

        Ok(rep)
    }

    fn fetch_policies_per_table(
        &self,
    ) -> HashMap<String, Result<Vec<LivePolicy>, GuardError>> {
        let mut fetches = HashMap::new();
        for policy in &self.catalog.policies {
            if !fetches.contains_key(&policy.table) {
                fetches.insert(
                    policy.table.clone(),
                    self.backend.table_policies(&policy.table),
                );
            }
        }
        fetches
    }

    fn validate_table(
        &self,
        def: &TableDefinition,
        indexes: &[IndexValidation],
        policies: &[PolicyValidation],
    ) -> TableValidation {
        let checked_at = Utc::now();
        let mut validation = TableValidation {
            name: def.name.clone(),
            status: EntityStatus::Valid,
            exists: false,
            missing_columns: Vec::new(),
            extra_columns: Vec::new(),
            missing_constraints: Vec::new(),
            missing_indexes: indexes
                .iter()
                .filter(|i| i.table == def.name && i.status == EntityStatus::Missing)
                .map(|i| i.name.clone())
                .collect(),
            missing_policies: policies
                .iter()
                .filter(|p| p.table == def.name && p.status == EntityStatus::Missing)
                .map(|p| p.name.clone())
                .collect(),
            issues: Vec::new(),
            checked_at,
        };

        match self.inspect_table(def, &mut validation) {
            Ok(()) => validation,
            Err(e) => {
                validation.status = EntityStatus::Invalid;
                validation
                    .issues
                    .push(format!("introspection failed: {e}"));
                validation
            }
        }
    }

    fn inspect_table(
        &self,
        def: &TableDefinition,
        validation: &mut TableValidation,
    ) -> Result<(), GuardError> {
        validation.exists = self.backend.table_exists(&def.name)?;
        if !validation.exists {
            validation.status = EntityStatus::Missing;
            validation.issues.push("table does not exist".to_string());
            return Ok(());
        }

        let live_columns = self.backend.table_columns(&def.name)?;
        for declared in &def.columns {
            if !live_columns.iter().any(|c| c.name == declared.name) {
                validation.missing_columns.push(declared.name.clone());
                validation
                    .issues
                    .push(format!("missing column '{}'", declared.name));
            }
        }
        for live in &live_columns {
            if def.find_column(&live.name).is_none() {
                validation.extra_columns.push(live.name.clone());
            }
        }

        let live_constraints = self.backend.table_constraints(&def.name)?;
        let has_key = |kind: ConstraintKind, columns: &[String]| {
            let mut wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
            wanted.sort_unstable();
            live_constraints.iter().any(|c| {
                if c.kind != kind {
                    return false;
                }
                let mut have: Vec<&str> = c.columns.iter().map(String::as_str).collect();
                have.sort_unstable();
                have == wanted
            })
        };

        if !def.primary_key.is_empty() && !has_key(ConstraintKind::PrimaryKey, &def.primary_key) {
            validation
                .missing_constraints
                .push(MissingConstraint::PrimaryKey {
                    columns: def.primary_key.clone(),
                });
        }
        for unique in &def.unique_constraints {
            if !has_key(ConstraintKind::Unique, unique) {
                validation
                    .missing_constraints
                    .push(MissingConstraint::Unique {
                        columns: unique.clone(),
                    });
            }
        }
        for fk in &def.foreign_keys {
            // A foreign key on a missing column is already covered by the
            // missing column itself; the constraint rides along in the
            // same alteration script.
            if validation.missing_columns.contains(&fk.column) {
                continue;
            }
            if !has_key(ConstraintKind::ForeignKey, std::slice::from_ref(&fk.column)) {
                validation
                    .missing_constraints
                    .push(MissingConstraint::ForeignKey {
                        column: fk.column.clone(),
                        referenced_table: fk.referenced_table.clone(),
                        referenced_column: fk.referenced_column.clone(),
                    });
            }
        }
        for missing in &validation.missing_constraints {
            validation
                .issues
                .push(format!("missing constraint: {}", missing.describe()));
        }

        // Check constraints are compared by count only: PostgreSQL
        // normalizes expressions, which defeats text-level diffing.
        let live_checks = live_constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::Check)
            .count();
        if live_checks < def.check_constraints.len() {
            validation.issues.push(format!(
                "declares {} check constraints but only {} found",
                def.check_constraints.len(),
                live_checks
            ));
        }

        if !validation.missing_columns.is_empty() || !validation.missing_constraints.is_empty() {
            validation.status = EntityStatus::Incomplete;
        }
        Ok(())
    }

    fn validate_index(&self, def: &IndexDefinition) -> IndexValidation {
        let checked_at = Utc::now();
        let mut validation = IndexValidation {
            name: def.name.clone(),
            table: def.table.clone(),
            status: EntityStatus::Valid,
            exists: false,
            issues: Vec::new(),
            checked_at,
        };

        match self.backend.find_index(&def.name) {
            Ok(None) => {
                validation.status = EntityStatus::Missing;
                validation.issues.push("index does not exist".to_string());
            }
            Ok(Some(live)) => {
                validation.exists = true;
                if live.table != def.table {
                    validation.status = EntityStatus::Invalid;
                    validation.issues.push(format!(
                        "exists on table '{}', expected '{}'",
                        live.table, def.table
                    ));
                } else if live.unique != def.unique {
                    validation.status = EntityStatus::Invalid;
                    validation.issues.push(format!(
                        "uniqueness mismatch: declared unique={}, found unique={}",
                        def.unique, live.unique
                    ));
                } else if live.columns != def.columns {
                    validation.status = EntityStatus::Invalid;
                    validation.issues.push(format!(
                        "column list mismatch: declared ({}), found ({})",
                        def.columns.join(", "),
                        live.columns.join(", ")
                    ));
                }
            }
            Err(e) => {
                validation.status = EntityStatus::Invalid;
                validation
                    .issues
                    .push(format!("introspection failed: {e}"));
            }
        }
        validation
    }

    fn validate_policy(
        &self,
        def: &PolicyDefinition,
        fetches: &HashMap<String, Result<Vec<LivePolicy>, GuardError>>,
    ) -> PolicyValidation {
        let checked_at = Utc::now();
        let mut validation = PolicyValidation {
            name: def.name.clone(),
            table: def.table.clone(),
            status: EntityStatus::Valid,
            exists: false,
            issues: Vec::new(),
            checked_at,
        };

        let live = match fetches.get(&def.table) {
            Some(Ok(policies)) => policies.iter().find(|p| p.name == def.name),
            Some(Err(e)) => {
                validation.status = EntityStatus::Invalid;
                validation
                    .issues
                    .push(format!("introspection failed: {e}"));
                return validation;
            }
            None => None,
        };

        match live {
            None => {
                validation.status = EntityStatus::Missing;
                validation.issues.push("policy does not exist".to_string());
            }
            Some(live) => {
                validation.exists = true;
                if !live.command.eq_ignore_ascii_case(def.command.as_sql()) {
                    validation.status = EntityStatus::Invalid;
                    validation.issues.push(format!(
                        "command scope mismatch: declared {}, found {}",
                        def.command, live.command
                    ));
                }
                if def.using_expr.is_some() && live.using_expr.is_none() {
                    validation.status = EntityStatus::Invalid;
                    validation
                        .issues
                        .push("missing USING predicate".to_string());
                }
                if def.with_check.is_some() && live.with_check.is_none() {
                    validation.status = EntityStatus::Invalid;
                    validation
                        .issues
                        .push("missing WITH CHECK expression".to_string());
                }
            }
        }
        validation
    }

    fn validate_function(
        &self,
        def: &crate::catalog::FunctionDefinition,
    ) -> FunctionValidation {
        let checked_at = Utc::now();
        let mut validation = FunctionValidation {
            name: def.name.clone(),
            status: EntityStatus::Valid,
            exists: false,
            issues: Vec::new(),
            checked_at,
        };

        match self.backend.find_function(&def.name) {
            Ok(None) => {
                validation.status = EntityStatus::Missing;
                validation
                    .issues
                    .push("function does not exist".to_string());
            }
            Ok(Some(live)) => {
                validation.exists = true;
                if !live.returns.eq_ignore_ascii_case(&def.returns) {
                    validation.status = EntityStatus::Invalid;
                    validation.issues.push(format!(
                        "return type mismatch: declared {}, found {}",
                        def.returns, live.returns
                    ));
                }
            }
            Err(e) => {
                validation.status = EntityStatus::Invalid;
                validation
                    .issues
                    .push(format!("introspection failed: {e}"));
            }
        }
        validation
    }

    fn validate_migrations(&self) -> MigrationValidation {
        match self.backend.applied_migrations() {
            Ok(applied) => {
                // Distinguishing "empty ledger" from "no ledger table yet"
                // only matters for reporting; neither is an error.
                let ledger_present = match self.backend.table_exists(crate::ledger::LEDGER_TABLE) {
                    Ok(present) => present,
                    Err(_) => !applied.is_empty(),
                };
                MigrationValidation {
                    ledger_present,
                    applied: applied.into_iter().map(|m| m.name).collect(),
                    issues: Vec::new(),
                }
            }
            Err(e) => MigrationValidation {
                ledger_present: false,
                applied: Vec::new(),
                issues: vec![format!("migration ledger could not be read: {e}")],
            },
        }
    }
}

/// Fold per-entity findings into the flattened report lists
///
/// Ordering is deterministic: tables, indexes, policies, functions, in
/// catalog declaration order.
fn flatten_findings(report: &mut ValidationReport) {
    for table in &report.tables {
        match table.status {
            EntityStatus::Missing => {
                report
                    .errors
                    .push(format!("table '{}' is missing", table.name));
            }
            EntityStatus::Incomplete => {
                report.warnings.push(format!(
                    "table '{}' is incomplete: {}",
                    table.name,
                    table.issues.join("; ")
                ));
            }
            EntityStatus::Invalid => {
                report.errors.push(format!(
                    "table '{}' could not be validated: {}",
                    table.name,
                    table.issues.join("; ")
                ));
            }
            EntityStatus::Valid => {}
        }
        if !table.extra_columns.is_empty() {
            report.recommendations.push(format!(
                "table '{}' has undeclared columns: {}",
                table.name,
                table.extra_columns.join(", ")
            ));
        }
    }

    for index in &report.indexes {
        match index.status {
            EntityStatus::Missing => report.warnings.push(format!(
                "index '{}' on '{}' is missing",
                index.name, index.table
            )),
            EntityStatus::Invalid => report.errors.push(format!(
                "index '{}' is invalid: {}",
                index.name,
                index.issues.join("; ")
            )),
            _ => {}
        }
    }

    for policy in &report.policies {
        match policy.status {
            EntityStatus::Missing => report.warnings.push(format!(
                "policy '{}' on '{}' is missing",
                policy.name, policy.table
            )),
            EntityStatus::Invalid => report.errors.push(format!(
                "policy '{}' on '{}' is invalid: {}",
                policy.name,
                policy.table,
                policy.issues.join("; ")
            )),
            _ => {}
        }
    }

    for function in &report.functions {
        match function.status {
            EntityStatus::Missing => report
                .warnings
                .push(format!("function '{}' is missing", function.name)),
            EntityStatus::Invalid => report.errors.push(format!(
                "function '{}' is invalid: {}",
                function.name,
                function.issues.join("; ")
            )),
            _ => {}
        }
    }

    let migration_issues = report.migrations.issues.clone();
    report.warnings.extend(migration_issues);

    if report.remediation_needed() {
        report
            .recommendations
            .push("run full setup to create missing schema entities".to_string());
    }
}
