//! In-memory [`SchemaBackend`] used by the integration tests.
//!
//! The mock holds a live-schema model seeded either empty or satisfying
//! the catalog, records every executed statement, and applies the DDL the
//! engine renders so that a second validation pass observes the effect of
//! the first run. Failure and cancellation hooks let tests drive the
//! coordinator through its error paths.

#![allow(dead_code)]

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

use schemaguard::catalog::SchemaCatalog;
use schemaguard::introspect::{
    AppliedMigration, ConstraintKind, LiveColumn, LiveConstraint, LiveFunction, LiveIndex,
    LivePolicy,
};
use schemaguard::ledger::LEDGER_TABLE;
use schemaguard::{GuardError, SchemaBackend};

#[derive(Debug, Clone, Default)]
pub struct MockTable {
    pub columns: Vec<LiveColumn>,
    pub constraints: Vec<LiveConstraint>,
}

#[derive(Default)]
struct MockState {
    tables: BTreeMap<String, MockTable>,
    indexes: BTreeMap<String, LiveIndex>,
    policies: Vec<LivePolicy>,
    functions: BTreeMap<String, LiveFunction>,
    ledger: Option<Vec<AppliedMigration>>,
    executed: Vec<String>,
}

type ExecuteHook = Box<dyn FnMut(&str) + Send>;

pub struct MockBackend {
    catalog: SchemaCatalog,
    state: Mutex<MockState>,
    ping_fails: Mutex<bool>,
    fail_on: Mutex<Option<String>>,
    fail_reads_for: Mutex<Option<String>>,
    after_execute: Mutex<Option<ExecuteHook>>,
}

impl MockBackend {
    /// A database with nothing in it
    pub fn empty(catalog: &SchemaCatalog) -> Self {
        Self {
            catalog: catalog.clone(),
            state: Mutex::new(MockState::default()),
            ping_fails: Mutex::new(false),
            fail_on: Mutex::new(None),
            fail_reads_for: Mutex::new(None),
            after_execute: Mutex::new(None),
        }
    }

    /// A database that fully satisfies the catalog
    pub fn satisfying(catalog: &SchemaCatalog) -> Self {
        let backend = Self::empty(catalog);
        {
            let mut state = backend.state.lock().unwrap();
            for table in &catalog.tables {
                state
                    .tables
                    .insert(table.name.clone(), table_from_catalog(catalog, &table.name));
            }
            for index in &catalog.indexes {
                state.indexes.insert(
                    index.name.clone(),
                    LiveIndex {
                        name: index.name.clone(),
                        table: index.table.clone(),
                        unique: index.unique,
                        columns: index.columns.clone(),
                    },
                );
            }
            for policy in &catalog.policies {
                state.policies.push(LivePolicy {
                    name: policy.name.clone(),
                    table: policy.table.clone(),
                    command: policy.command.as_sql().to_string(),
                    using_expr: policy.using_expr.clone(),
                    with_check: policy.with_check.clone(),
                });
            }
            for function in &catalog.functions {
                state.functions.insert(
                    function.name.clone(),
                    LiveFunction {
                        name: function.name.clone(),
                        returns: function.returns.clone(),
                        language: function.language.clone(),
                    },
                );
            }
        }
        backend
    }

    pub fn set_ping_fails(&self) {
        *self.ping_fails.lock().unwrap() = true;
    }

    /// Fail any executed statement containing the marker
    pub fn set_fail_on(&self, marker: &str) {
        *self.fail_on.lock().unwrap() = Some(marker.to_string());
    }

    /// Fail column introspection for the given table
    pub fn set_fail_reads_for(&self, table: &str) {
        *self.fail_reads_for.lock().unwrap() = Some(table.to_string());
    }

    /// Invoke the hook after every successfully executed statement
    pub fn set_after_execute(&self, hook: impl FnMut(&str) + Send + 'static) {
        *self.after_execute.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn executed_count(&self) -> usize {
        self.state.lock().unwrap().executed.len()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(name)
    }

    pub fn applied_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .ledger
            .as_ref()
            .map(|rows| rows.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn seed_ledger(&self, names: &[&str]) {
        let rows = names
            .iter()
            .map(|name| AppliedMigration {
                name: (*name).to_string(),
                executed_at: Utc::now(),
            })
            .collect();
        self.state.lock().unwrap().ledger = Some(rows);
    }

    pub fn drop_column(&self, table: &str, column: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(table) {
            t.columns.retain(|c| c.name != column);
        }
    }

    pub fn add_column(&self, table: &str, column: &str, data_type: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(table) {
            t.columns.push(LiveColumn {
                name: column.to_string(),
                data_type: data_type.to_string(),
                nullable: true,
                default_expr: None,
            });
        }
    }

    pub fn remove_unique(&self, table: &str, columns: &[&str]) {
        let mut wanted: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        wanted.sort();
        let mut state = self.state.lock().unwrap();
        if let Some(t) = state.tables.get_mut(table) {
            t.constraints.retain(|c| {
                if c.kind != ConstraintKind::Unique {
                    return true;
                }
                let mut have = c.columns.clone();
                have.sort();
                have != wanted
            });
        }
    }

    pub fn set_index_unique(&self, name: &str, unique: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.indexes.get_mut(name) {
            index.unique = unique;
        }
    }

    /// Apply the state effects of one executed statement batch
    fn apply(&self, sql: &str) {
        let mut state = self.state.lock().unwrap();
        for raw_line in sql.lines() {
            let line = raw_line.trim().trim_end_matches(';');

            if let Some(rest) = line.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
                let name = first_identifier(rest);
                if name == LEDGER_TABLE {
                    if state.ledger.is_none() {
                        state.ledger = Some(Vec::new());
                    }
                } else if !state.tables.contains_key(&name) {
                    state
                        .tables
                        .insert(name.clone(), table_from_catalog(&self.catalog, &name));
                }
            } else if let Some(rest) = line.strip_prefix("CREATE UNIQUE INDEX IF NOT EXISTS ") {
                insert_index(&mut state, rest, true);
            } else if let Some(rest) = line.strip_prefix("CREATE INDEX IF NOT EXISTS ") {
                insert_index(&mut state, rest, false);
            } else if let Some(pos) = line.find("CREATE POLICY ") {
                insert_policy(&mut state, &line[pos + "CREATE POLICY ".len()..]);
            } else if let Some(rest) = line.strip_prefix("CREATE OR REPLACE FUNCTION ") {
                let name = rest.split('(').next().unwrap_or_default().to_string();
                let (returns, language) = self
                    .catalog
                    .find_function(&name)
                    .map(|f| (f.returns.clone(), f.language.clone()))
                    .unwrap_or_else(|| ("void".to_string(), "sql".to_string()));
                state.functions.insert(
                    name.clone(),
                    LiveFunction {
                        name,
                        returns,
                        language,
                    },
                );
            } else if let Some(rest) = line.strip_prefix("INSERT INTO schemaguard_migrations") {
                if let Some(name) = quoted_value(rest) {
                    if state.ledger.is_none() {
                        state.ledger = Some(Vec::new());
                    }
                    let rows = state.ledger.as_mut().unwrap();
                    if !rows.iter().any(|r| r.name == name) {
                        rows.push(AppliedMigration {
                            name,
                            executed_at: Utc::now(),
                        });
                    }
                }
            } else if let Some(rest) = line.strip_prefix("DROP TABLE IF EXISTS ") {
                let name = first_identifier(rest);
                state.tables.remove(&name);
                state.indexes.retain(|_, i| i.table != name);
                state.policies.retain(|p| p.table != name);
            } else if let Some(rest) = line.strip_prefix("DROP INDEX IF EXISTS ") {
                let name = first_identifier(rest);
                state.indexes.remove(&name);
            } else if let Some(rest) = line.strip_prefix("DROP POLICY IF EXISTS ") {
                let mut parts = rest.split(" ON ");
                let name = parts.next().unwrap_or_default().trim().to_string();
                let table = first_identifier(parts.next().unwrap_or_default());
                state
                    .policies
                    .retain(|p| !(p.name == name && p.table == table));
            } else if let Some(rest) = line.strip_prefix("DROP FUNCTION IF EXISTS ") {
                let name = rest.split('(').next().unwrap_or_default().to_string();
                state.functions.remove(&name);
            } else if line.starts_with("ALTER TABLE ") {
                apply_alter(&self.catalog, &mut state, line);
            }
        }
    }
}

fn apply_alter(catalog: &SchemaCatalog, state: &mut MockState, line: &str) {
    let rest = line.strip_prefix("ALTER TABLE ").unwrap_or(line);
    let table = first_identifier(rest);

    if let Some(pos) = rest.find(" ADD COLUMN IF NOT EXISTS ") {
        let column_part = &rest[pos + " ADD COLUMN IF NOT EXISTS ".len()..];
        let column = first_identifier(column_part);
        let declared = catalog
            .find_table(&table)
            .and_then(|t| t.find_column(&column).cloned());
        if let Some(t) = state.tables.get_mut(&table) {
            if !t.columns.iter().any(|c| c.name == column) {
                t.columns.push(match declared {
                    Some(def) => LiveColumn {
                        name: def.name,
                        data_type: def.sql_type.to_lowercase(),
                        nullable: def.nullable,
                        default_expr: def.default_expr,
                    },
                    None => LiveColumn {
                        name: column,
                        data_type: "text".to_string(),
                        nullable: true,
                        default_expr: None,
                    },
                });
            }
        }
    } else if let Some(pos) = rest.find(" ADD CONSTRAINT ") {
        let constraint_part = &rest[pos + " ADD CONSTRAINT ".len()..];
        let name = first_identifier(constraint_part);
        let body = constraint_part[name.len()..].trim();
        let (kind, columns) = if let Some(cols) = body.strip_prefix("PRIMARY KEY (") {
            (ConstraintKind::PrimaryKey, parse_columns(cols))
        } else if let Some(cols) = body.strip_prefix("UNIQUE (") {
            (ConstraintKind::Unique, parse_columns(cols))
        } else if let Some(cols) = body.strip_prefix("FOREIGN KEY (") {
            (ConstraintKind::ForeignKey, parse_columns(cols))
        } else {
            return;
        };
        if let Some(t) = state.tables.get_mut(&table) {
            if !t.constraints.iter().any(|c| c.name == name) {
                t.constraints.push(LiveConstraint {
                    name,
                    kind,
                    columns,
                    expression: None,
                });
            }
        }
    } else if let Some(pos) = rest.find(" DROP CONSTRAINT IF EXISTS ") {
        let name = first_identifier(&rest[pos + " DROP CONSTRAINT IF EXISTS ".len()..]);
        if let Some(t) = state.tables.get_mut(&table) {
            t.constraints.retain(|c| c.name != name);
        }
    } else if let Some(pos) = rest.find(" DROP COLUMN IF EXISTS ") {
        let name = first_identifier(&rest[pos + " DROP COLUMN IF EXISTS ".len()..]);
        if let Some(t) = state.tables.get_mut(&table) {
            t.columns.retain(|c| c.name != name);
        }
    }
}

fn insert_index(state: &mut MockState, rest: &str, unique: bool) {
    // Shape: name ON table (col, col) [WHERE ...]
    let name = first_identifier(rest);
    let Some(on_pos) = rest.find(" ON ") else {
        return;
    };
    let after_on = &rest[on_pos + 4..];
    let table = first_identifier(after_on);
    let columns = after_on
        .find('(')
        .and_then(|open| {
            after_on[open + 1..]
                .find(')')
                .map(|close| parse_columns(&after_on[open + 1..open + 1 + close]))
        })
        .unwrap_or_default();
    state.indexes.insert(
        name.clone(),
        LiveIndex {
            name,
            table,
            unique,
            columns,
        },
    );
}

fn insert_policy(state: &mut MockState, rest: &str) {
    // Shape: name ON table FOR cmd [USING (...)] [WITH CHECK (...)]
    let name = first_identifier(rest);
    let Some(on_pos) = rest.find(" ON ") else {
        return;
    };
    let after_on = &rest[on_pos + 4..];
    let table = first_identifier(after_on);
    let command = after_on
        .find(" FOR ")
        .map(|pos| first_identifier(&after_on[pos + 5..]))
        .unwrap_or_else(|| "ALL".to_string());
    let using_expr = rest.contains(" USING (").then(|| "<predicate>".to_string());
    let with_check = rest
        .contains(" WITH CHECK (")
        .then(|| "<predicate>".to_string());
    if !state
        .policies
        .iter()
        .any(|p| p.name == name && p.table == table)
    {
        state.policies.push(LivePolicy {
            name,
            table,
            command,
            using_expr,
            with_check,
        });
    }
}

/// First bare identifier of a fragment, with ident quoting stripped
fn first_identifier(fragment: &str) -> String {
    fragment
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
        .replace('"', "")
}

fn parse_columns(fragment: &str) -> Vec<String> {
    fragment
        .split(')')
        .next()
        .unwrap_or_default()
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// First single-quoted value of a fragment
fn quoted_value(fragment: &str) -> Option<String> {
    let start = fragment.find('\'')? + 1;
    let end = fragment[start..].find('\'')? + start;
    Some(fragment[start..end].to_string())
}

fn table_from_catalog(catalog: &SchemaCatalog, name: &str) -> MockTable {
    let Some(def) = catalog.find_table(name) else {
        return MockTable::default();
    };
    let columns = def
        .columns
        .iter()
        .map(|c| LiveColumn {
            name: c.name.clone(),
            data_type: c.sql_type.to_lowercase(),
            nullable: c.nullable,
            default_expr: c.default_expr.clone(),
        })
        .collect();
    let mut constraints = Vec::new();
    if !def.primary_key.is_empty() {
        constraints.push(LiveConstraint {
            name: format!("{name}_pkey"),
            kind: ConstraintKind::PrimaryKey,
            columns: def.primary_key.clone(),
            expression: None,
        });
    }
    for (i, unique) in def.unique_constraints.iter().enumerate() {
        constraints.push(LiveConstraint {
            name: format!("{name}_key_{i}"),
            kind: ConstraintKind::Unique,
            columns: unique.clone(),
            expression: None,
        });
    }
    for fk in &def.foreign_keys {
        constraints.push(LiveConstraint {
            name: format!("{name}_{}_fkey", fk.column),
            kind: ConstraintKind::ForeignKey,
            columns: vec![fk.column.clone()],
            expression: None,
        });
    }
    for (i, check) in def.check_constraints.iter().enumerate() {
        constraints.push(LiveConstraint {
            name: format!("{name}_check_{i}"),
            kind: ConstraintKind::Check,
            columns: Vec::new(),
            expression: Some(check.clone()),
        });
    }
    MockTable {
        columns,
        constraints,
    }
}

impl SchemaBackend for MockBackend {
    fn ping(&self) -> Result<(), GuardError> {
        if *self.ping_fails.lock().unwrap() {
            return Err(GuardError::Connection("mock database unreachable".into()));
        }
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, GuardError> {
        let state = self.state.lock().unwrap();
        if table == LEDGER_TABLE {
            return Ok(state.ledger.is_some());
        }
        Ok(state.tables.contains_key(table))
    }

    fn table_columns(&self, table: &str) -> Result<Vec<LiveColumn>, GuardError> {
        if self.fail_reads_for.lock().unwrap().as_deref() == Some(table) {
            return Err(GuardError::Query(format!(
                "forced introspection failure for '{table}'"
            )));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn table_constraints(&self, table: &str) -> Result<Vec<LiveConstraint>, GuardError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(table)
            .map(|t| t.constraints.clone())
            .unwrap_or_default())
    }

    fn table_policies(&self, table: &str) -> Result<Vec<LivePolicy>, GuardError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .policies
            .iter()
            .filter(|p| p.table == table)
            .cloned()
            .collect())
    }

    fn find_index(&self, name: &str) -> Result<Option<LiveIndex>, GuardError> {
        let state = self.state.lock().unwrap();
        Ok(state.indexes.get(name).cloned())
    }

    fn find_function(&self, name: &str) -> Result<Option<LiveFunction>, GuardError> {
        let state = self.state.lock().unwrap();
        Ok(state.functions.get(name).cloned())
    }

    fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, GuardError> {
        let state = self.state.lock().unwrap();
        Ok(state.ledger.clone().unwrap_or_default())
    }

    fn execute(&self, sql: &str) -> Result<u64, GuardError> {
        self.state.lock().unwrap().executed.push(sql.to_string());

        if let Some(marker) = self.fail_on.lock().unwrap().as_deref() {
            if sql.contains(marker) {
                return Err(GuardError::Query(format!(
                    "forced execution failure on '{marker}'"
                )));
            }
        }

        self.apply(sql);

        if let Some(hook) = self.after_execute.lock().unwrap().as_mut() {
            hook(sql);
        }
        Ok(0)
    }
}
