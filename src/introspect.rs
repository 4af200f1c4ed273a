//! Live schema introspection.
//!
//! Queries the system catalogs (`information_schema`, `pg_index`,
//! `pg_policies`, `pg_proc`) and maps rows into strongly-typed per-entity
//! structures at this boundary, so the validator never handles
//! loosely-typed data.
//!
//! The [`SchemaBackend`] trait is the surface the engine consumes: typed
//! read probes plus a single `execute` entry point for DDL. [`PgBackend`]
//! is the production implementation over a [`GuardExecutor`]. Transient
//! read failures are retried a small, bounded number of times; DDL is
//! never retried so a statement can never be applied twice.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::Duration;

use crate::executor::{GuardError, GuardExecutor};
use crate::ledger::LEDGER_TABLE;

/// A column as it exists in the live database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_expr: Option<String>,
}

/// Constraint kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

/// A table constraint as it exists in the live database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConstraint {
    pub name: String,
    pub kind: ConstraintKind,
    /// Constrained columns, in ordinal order (empty for check constraints)
    pub columns: Vec<String>,
    /// Check expression, when the kind is `Check`
    pub expression: Option<String>,
}

/// An index as it exists in the live database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub table: String,
    pub unique: bool,
    pub columns: Vec<String>,
}

/// A row-level security policy as it exists in the live database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePolicy {
    pub name: String,
    pub table: String,
    /// Command scope as reported by `pg_policies.cmd` (e.g. "ALL", "SELECT")
    pub command: String,
    pub using_expr: Option<String>,
    pub with_check: Option<String>,
}

/// A stored function as it exists in the live database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFunction {
    pub name: String,
    pub returns: String,
    pub language: String,
}

/// A migration ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

/// Typed access to the live database
///
/// Read probes return per-entity structures; `execute` runs DDL (and the
/// ledger DML). Implementations must not retry `execute`.
pub trait SchemaBackend {
    /// Verify connectivity with a trivial read
    fn ping(&self) -> Result<(), GuardError>;

    /// Whether a table with the given name exists in the public schema
    fn table_exists(&self, table: &str) -> Result<bool, GuardError>;

    /// Columns of the given table, in ordinal order
    fn table_columns(&self, table: &str) -> Result<Vec<LiveColumn>, GuardError>;

    /// Constraints of the given table
    fn table_constraints(&self, table: &str) -> Result<Vec<LiveConstraint>, GuardError>;

    /// Policies attached to the given table
    fn table_policies(&self, table: &str) -> Result<Vec<LivePolicy>, GuardError>;

    /// Look up an index by its (globally unique) name
    fn find_index(&self, name: &str) -> Result<Option<LiveIndex>, GuardError>;

    /// Look up a stored function by name in the public schema
    fn find_function(&self, name: &str) -> Result<Option<LiveFunction>, GuardError>;

    /// Read the migration ledger; an absent ledger table is not an error
    /// and reads as zero applied migrations
    fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, GuardError>;

    /// Execute a DDL (or ledger DML) statement batch
    fn execute(&self, sql: &str) -> Result<u64, GuardError>;
}

/// Production [`SchemaBackend`] over a [`GuardExecutor`]
pub struct PgBackend<'a> {
    executor: &'a dyn GuardExecutor,
    read_retries: u32,
}

impl<'a> PgBackend<'a> {
    /// Create a backend with the given bounded retry count for reads
    pub fn new(executor: &'a dyn GuardExecutor, read_retries: u32) -> Self {
        Self {
            executor,
            read_retries,
        }
    }

    /// Retry a transient read a bounded number of times
    fn read_with_retry<T>(
        &self,
        what: &str,
        f: impl Fn() -> Result<T, GuardError>,
    ) -> Result<T, GuardError> {
        let mut attempt = 0u32;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.read_retries => {
                    attempt += 1;
                    log::warn!(
                        "introspection read '{what}' failed (attempt {attempt}): {e}; retrying"
                    );
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a timestamp string returned by the driver
///
/// `may_postgres` returns TIMESTAMP columns as strings in a handful of
/// formats, so several are tried in order.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, GuardError> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(GuardError::Parse(format!(
        "Failed to parse timestamp '{value}': unrecognized format"
    )))
}

impl SchemaBackend for PgBackend<'_> {
    fn ping(&self) -> Result<(), GuardError> {
        self.executor
            .query_one("SELECT 1", &[])
            .map(|_| ())
            .map_err(|e| GuardError::Connection(format!("connectivity probe failed: {e}")))
    }

    fn table_exists(&self, table: &str) -> Result<bool, GuardError> {
        self.read_with_retry("table_exists", || {
            let row = self.executor.query_one(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 AND table_name = $1",
                &[&table],
            )?;
            let count: i64 = row.get(0);
            Ok(count > 0)
        })
    }

    fn table_columns(&self, table: &str) -> Result<Vec<LiveColumn>, GuardError> {
        self.read_with_retry("table_columns", || {
            let rows = self.executor.query_all(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )?;
            Ok(rows.iter().map(map_column).collect())
        })
    }

    fn table_constraints(&self, table: &str) -> Result<Vec<LiveConstraint>, GuardError> {
        self.read_with_retry("table_constraints", || {
            let mut constraints: Vec<LiveConstraint> = Vec::new();

            // Key constraints (primary key, unique, foreign key) with their
            // column lists, in ordinal order per constraint.
            let key_rows = self.executor.query_all(
                "SELECT tc.constraint_name, tc.constraint_type, kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_name = kcu.table_name \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                 AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE', 'FOREIGN KEY') \
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&table],
            )?;
            for row in &key_rows {
                let (name, kind, column) = map_key_constraint_row(row)?;
                match constraints.iter_mut().find(|c| c.name == name) {
                    Some(existing) => existing.columns.push(column),
                    None => constraints.push(LiveConstraint {
                        name,
                        kind,
                        columns: vec![column],
                        expression: None,
                    }),
                }
            }

            // Check constraints carry an expression instead of columns.
            let check_rows = self.executor.query_all(
                "SELECT tc.constraint_name, cc.check_clause \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.check_constraints cc \
                   ON tc.constraint_name = cc.constraint_name \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                 AND tc.constraint_type = 'CHECK'",
                &[&table],
            )?;
            for row in &check_rows {
                let name: String = row.get(0);
                let expression: String = row.get(1);
                // PostgreSQL surfaces NOT NULL as synthesized check
                // constraints; those are column attributes, not declared
                // checks, so they are filtered out here.
                if expression.to_uppercase().ends_with("IS NOT NULL") {
                    continue;
                }
                constraints.push(LiveConstraint {
                    name,
                    kind: ConstraintKind::Check,
                    columns: Vec::new(),
                    expression: Some(expression),
                });
            }

            Ok(constraints)
        })
    }

    fn table_policies(&self, table: &str) -> Result<Vec<LivePolicy>, GuardError> {
        self.read_with_retry("table_policies", || {
            let rows = self.executor.query_all(
                "SELECT policyname, tablename, cmd, qual, with_check \
                 FROM pg_policies \
                 WHERE schemaname = 'public' AND tablename = $1 \
                 ORDER BY policyname",
                &[&table],
            )?;
            Ok(rows.iter().map(map_policy).collect())
        })
    }

    fn find_index(&self, name: &str) -> Result<Option<LiveIndex>, GuardError> {
        self.read_with_retry("find_index", || {
            let rows = self.executor.query_all(
                "SELECT i.relname AS indexname, t.relname AS tablename, \
                        ix.indisunique, a.attname \
                 FROM pg_class i \
                 JOIN pg_index ix ON ix.indexrelid = i.oid \
                 JOIN pg_class t ON t.oid = ix.indrelid \
                 JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS ord(attnum, ordinality) ON true \
                 JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ord.attnum \
                 WHERE i.relname = $1 \
                 ORDER BY ord.ordinality",
                &[&name],
            )?;
            if rows.is_empty() {
                return Ok(None);
            }
            let mut index = LiveIndex {
                name: rows[0].get(0),
                table: rows[0].get(1),
                unique: rows[0].get(2),
                columns: Vec::new(),
            };
            for row in &rows {
                index.columns.push(row.get(3));
            }
            Ok(Some(index))
        })
    }

    fn find_function(&self, name: &str) -> Result<Option<LiveFunction>, GuardError> {
        self.read_with_retry("find_function", || {
            let rows = self.executor.query_all(
                "SELECT p.proname, pg_get_function_result(p.oid), l.lanname \
                 FROM pg_proc p \
                 JOIN pg_language l ON l.oid = p.prolang \
                 JOIN pg_namespace n ON n.oid = p.pronamespace \
                 WHERE n.nspname = 'public' AND p.proname = $1",
                &[&name],
            )?;
            Ok(rows.first().map(map_function))
        })
    }

    fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, GuardError> {
        // An absent ledger table reads as zero applied migrations.
        if !self.table_exists(LEDGER_TABLE)? {
            return Ok(Vec::new());
        }
        self.read_with_retry("applied_migrations", || {
            let sql = format!(
                "SELECT name, executed_at FROM {LEDGER_TABLE} ORDER BY executed_at, name"
            );
            let rows = self.executor.query_all(&sql, &[])?;
            rows.iter().map(map_applied_migration).collect()
        })
    }

    fn execute(&self, sql: &str) -> Result<u64, GuardError> {
        // Never retried: a duplicate application of DDL is worse than a
        // surfaced failure.
        self.executor.execute(sql, &[])
    }
}

fn map_column(row: &may_postgres::Row) -> LiveColumn {
    let name: String = row.get(0);
    let data_type: String = row.get(1);
    let is_nullable: String = row.get(2);
    let default_expr: Option<String> = row.get(3);
    LiveColumn {
        name,
        data_type,
        nullable: is_nullable == "YES",
        default_expr,
    }
}

fn map_key_constraint_row(
    row: &may_postgres::Row,
) -> Result<(String, ConstraintKind, String), GuardError> {
    let name: String = row.get(0);
    let constraint_type: String = row.get(1);
    let column: String = row.get(2);
    let kind = match constraint_type.as_str() {
        "PRIMARY KEY" => ConstraintKind::PrimaryKey,
        "UNIQUE" => ConstraintKind::Unique,
        "FOREIGN KEY" => ConstraintKind::ForeignKey,
        other => {
            return Err(GuardError::Parse(format!(
                "unexpected constraint type '{other}' for constraint '{name}'"
            )))
        }
    };
    Ok((name, kind, column))
}

fn map_policy(row: &may_postgres::Row) -> LivePolicy {
    LivePolicy {
        name: row.get(0),
        table: row.get(1),
        command: row.get(2),
        using_expr: row.get(3),
        with_check: row.get(4),
    }
}

fn map_function(row: &may_postgres::Row) -> LiveFunction {
    LiveFunction {
        name: row.get(0),
        returns: row.get(1),
        language: row.get(2),
    }
}

fn map_applied_migration(row: &may_postgres::Row) -> Result<AppliedMigration, GuardError> {
    let name: String = row.get(0);
    let executed_at_str: String = row.get(1);
    Ok(AppliedMigration {
        name,
        executed_at: parse_timestamp(&executed_at_str)?,
    })
}
