//! Script generation.
//!
//! The [`ScriptGenerator`] turns a validation report and the catalog into
//! an ordered list of [`SqlScript`] values: idempotent forward DDL plus
//! rollback DDL, each carrying an explicit dependency identifier list.
//! Output is deterministic: the same report and catalog always produce the
//! same scripts in the same order.

pub mod dependency;
pub mod sql;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::catalog::{EntityKind, SchemaCatalog};
use crate::validate::{EntityStatus, ValidationReport};
use dependency::DependencyNode;

/// Script generation failure
///
/// Any failure yields zero scripts for the run.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// The dependency relation over the entities is not a DAG
    #[error("dependency cycle detected among entities: {}", entities.join(", "))]
    CyclicDependency { entities: Vec<String> },
    /// An entity references a definition the catalog does not contain
    #[error("entity '{entity}' references '{referenced}', which is not defined in the catalog")]
    MissingDefinition { entity: String, referenced: String },
}

/// One generated DDL script
///
/// Scripts are generated fresh per run and never persisted; only the
/// ledger entry for an executed script survives the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScript {
    /// Unique script name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Forward DDL
    pub forward_sql: String,
    /// Rollback DDL, when the script is reversible
    pub rollback_sql: Option<String>,
    /// Position in the execution order (1-based, assigned after sorting)
    pub order: u32,
    /// Names of entities that must exist before this script runs
    pub dependencies: Vec<String>,
    /// Whether the script carries rollback DDL
    pub reversible: bool,
    /// Kind of the entity this script creates or alters
    pub kind: EntityKind,
    /// Table whose structure the script touches (None for functions)
    pub target_table: Option<String>,
}

impl SqlScript {
    /// Build a script; `reversible` is derived from the rollback presence
    /// so a reversible script can never carry empty rollback DDL
    fn new(
        name: String,
        description: String,
        forward_sql: String,
        rollback_sql: Option<String>,
        kind: EntityKind,
        target_table: Option<String>,
        dependencies: Vec<String>,
    ) -> Self {
        let rollback_sql = rollback_sql.filter(|sql| !sql.trim().is_empty());
        let reversible = rollback_sql.is_some();
        Self {
            name,
            description,
            forward_sql,
            rollback_sql,
            order: 0,
            dependencies,
            reversible,
            kind,
            target_table,
        }
    }
}

/// Deterministic fingerprint of a script batch
///
/// Hashes the script names and forward DDL in order; identical batches
/// yield identical fingerprints across runs and hosts.
pub fn batch_fingerprint(scripts: &[SqlScript]) -> String {
    let mut hasher = Sha256::new();
    for script in scripts {
        hasher.update(script.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(script.forward_sql.as_bytes());
        hasher.update([0u8]);
    }
    let hash = hasher.finalize();
    format!("{hash:x}")[..12].to_string()
}

/// Generates ordered remediation scripts from a validation report
pub struct ScriptGenerator<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Generate the ordered script list for the report
    ///
    /// Entities with status `missing` get a guarded creation script with a
    /// drop rollback; entities with status `incomplete` get a targeted
    /// alteration. `invalid` entities produce no scripts; they are already
    /// surfaced in the report's errors.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError`] on a dependency cycle or an unresolvable
    /// reference. No scripts are returned in either case.
    pub fn generate(&self, report: &ValidationReport) -> Result<Vec<SqlScript>, GenerateError> {
        let mut scripts = Vec::new();

        for tv in &report.tables {
            let def = self.catalog.find_table(&tv.name).ok_or_else(|| {
                GenerateError::MissingDefinition {
                    entity: tv.name.clone(),
                    referenced: tv.name.clone(),
                }
            })?;
            let dependencies = def.depends_on();
            for dep in &dependencies {
                if self.catalog.find_table(dep).is_none() {
                    return Err(GenerateError::MissingDefinition {
                        entity: def.name.clone(),
                        referenced: dep.clone(),
                    });
                }
            }
            match tv.status {
                EntityStatus::Missing => {
                    scripts.push(SqlScript::new(
                        format!("create_table_{}", def.name),
                        format!("Create table '{}'", def.name),
                        sql::render_create_table(def),
                        Some(sql::render_drop_table(&def.name)),
                        EntityKind::Table,
                        Some(def.name.clone()),
                        dependencies,
                    ));
                }
                EntityStatus::Incomplete => {
                    let forward =
                        sql::render_alter_table(def, &tv.missing_columns, &tv.missing_constraints);
                    if forward.trim().is_empty() {
                        continue;
                    }
                    let rollback = sql::render_alter_table_rollback(
                        def,
                        &tv.missing_columns,
                        &tv.missing_constraints,
                    );
                    scripts.push(SqlScript::new(
                        format!("alter_table_{}", def.name),
                        format!("Add missing columns and constraints to '{}'", def.name),
                        forward,
                        Some(rollback),
                        EntityKind::Table,
                        Some(def.name.clone()),
                        dependencies,
                    ));
                }
                _ => {}
            }
        }

        for iv in report
            .indexes
            .iter()
            .filter(|iv| iv.status == EntityStatus::Missing)
        {
            let def = self.catalog.find_index(&iv.name).ok_or_else(|| {
                GenerateError::MissingDefinition {
                    entity: iv.name.clone(),
                    referenced: iv.name.clone(),
                }
            })?;
            if self.catalog.find_table(&def.table).is_none() {
                return Err(GenerateError::MissingDefinition {
                    entity: def.name.clone(),
                    referenced: def.table.clone(),
                });
            }
            scripts.push(SqlScript::new(
                format!("create_index_{}", def.name),
                format!("Create index '{}' on '{}'", def.name, def.table),
                sql::render_create_index(def),
                Some(sql::render_drop_index(&def.name)),
                EntityKind::Index,
                Some(def.table.clone()),
                vec![def.table.clone()],
            ));
        }

        for pv in report
            .policies
            .iter()
            .filter(|pv| pv.status == EntityStatus::Missing)
        {
            let def = self
                .catalog
                .find_policy(&pv.table, &pv.name)
                .ok_or_else(|| GenerateError::MissingDefinition {
                    entity: pv.name.clone(),
                    referenced: pv.name.clone(),
                })?;
            if self.catalog.find_table(&def.table).is_none() {
                return Err(GenerateError::MissingDefinition {
                    entity: def.name.clone(),
                    referenced: def.table.clone(),
                });
            }
            scripts.push(SqlScript::new(
                format!("create_policy_{}_{}", def.table, def.name),
                format!("Create policy '{}' on '{}'", def.name, def.table),
                sql::render_create_policy(def),
                Some(sql::render_drop_policy(&def.name, &def.table)),
                EntityKind::Policy,
                Some(def.table.clone()),
                vec![def.table.clone()],
            ));
        }

        for fv in report
            .functions
            .iter()
            .filter(|fv| fv.status == EntityStatus::Missing)
        {
            let def = self.catalog.find_function(&fv.name).ok_or_else(|| {
                GenerateError::MissingDefinition {
                    entity: fv.name.clone(),
                    referenced: fv.name.clone(),
                }
            })?;
            scripts.push(SqlScript::new(
                format!("create_function_{}", def.name),
                format!("Create function '{}'", def.name),
                sql::render_create_function(def),
                Some(sql::render_drop_function(def)),
                EntityKind::Function,
                None,
                Vec::new(),
            ));
        }

        if scripts.is_empty() {
            return Ok(scripts);
        }

        self.order_scripts(scripts)
    }

    /// Sort the drafted scripts into dependency order and assign positions
    fn order_scripts(&self, mut scripts: Vec<SqlScript>) -> Result<Vec<SqlScript>, GenerateError> {
        // Scripts that create or alter a table, keyed by table name. A
        // dependency on a table that needs no script this run is already
        // satisfied and produces no edge.
        let script_for_table: std::collections::HashMap<String, String> = scripts
            .iter()
            .filter(|s| s.kind == EntityKind::Table)
            .map(|s| (s.target_table.clone().unwrap_or_default(), s.name.clone()))
            .collect();

        let nodes: Vec<DependencyNode> = scripts
            .iter()
            .map(|script| DependencyNode {
                name: script.name.clone(),
                kind: script.kind,
                declared_index: self.declared_index(script),
                dependencies: script
                    .dependencies
                    .iter()
                    .filter_map(|entity| script_for_table.get(entity).cloned())
                    .filter(|dep| *dep != script.name)
                    .collect(),
            })
            .collect();

        let sorted = dependency::topological_sort(&nodes).map_err(|entities| {
            // Map script names back to the entity names they carry.
            let entities = entities
                .into_iter()
                .map(|script_name| {
                    scripts
                        .iter()
                        .find(|s| s.name == script_name)
                        .and_then(|s| s.target_table.clone())
                        .unwrap_or(script_name)
                })
                .collect();
            GenerateError::CyclicDependency { entities }
        })?;

        scripts.sort_by_key(|s| sorted.iter().position(|name| *name == s.name).unwrap_or(0));
        for (i, script) in scripts.iter_mut().enumerate() {
            script.order = (i + 1) as u32;
        }

        log::debug!(
            "generated {} scripts, batch fingerprint {}",
            scripts.len(),
            batch_fingerprint(&scripts)
        );

        Ok(scripts)
    }

    fn declared_index(&self, script: &SqlScript) -> usize {
        match script.kind {
            EntityKind::Table => script
                .target_table
                .as_deref()
                .and_then(|t| self.catalog.table_position(t))
                .unwrap_or(0),
            EntityKind::Index => self
                .catalog
                .indexes
                .iter()
                .position(|i| script.name == format!("create_index_{}", i.name))
                .unwrap_or(0),
            EntityKind::Policy => self
                .catalog
                .policies
                .iter()
                .position(|p| {
                    script.name == format!("create_policy_{}_{}", p.table, p.name)
                })
                .unwrap_or(0),
            EntityKind::Function => self
                .catalog
                .functions
                .iter()
                .position(|f| script.name == format!("create_function_{}", f.name))
                .unwrap_or(0),
        }
    }
}
