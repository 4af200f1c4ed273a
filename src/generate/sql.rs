//! DDL rendering.
//!
//! Renders idempotent PostgreSQL DDL from catalog definitions. Creation
//! statements are guarded (`IF NOT EXISTS`, `CREATE OR REPLACE`, or a
//! `DO` block probing the system catalogs) so re-application is a no-op,
//! and every rendered script has a matching drop for rollback.

use std::fmt::Write;

use crate::catalog::{
    FunctionDefinition, FunctionSecurity, IndexDefinition, PolicyDefinition, TableDefinition,
};
use crate::validate::MissingConstraint;

/// Sanitize a name for use in constraint identifiers
pub fn sanitize_identifier(name: &str) -> String {
    name.replace(['-', '.'], "_").to_lowercase()
}

/// Render the creation script for a table
///
/// Includes column definitions, primary key, unique and check
/// constraints, guarded foreign keys, row-level security enablement, and
/// the table comment. Foreign keys are emitted as guarded ALTER TABLE
/// statements so the CREATE TABLE itself never depends on constraint
/// name collisions.
pub fn render_create_table(def: &TableDefinition) -> String {
    let mut sql = String::new();
    let table = &def.name;

    let _ = writeln!(sql, "CREATE TABLE IF NOT EXISTS {table} (");

    let mut lines: Vec<String> = Vec::new();
    for col in &def.columns {
        let mut line = format!("    {} {}", col.name, col.sql_type);
        if col.nullable {
            line.push_str(" NULL");
        } else {
            line.push_str(" NOT NULL");
        }
        if let Some(ref default) = col.default_expr {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        lines.push(line);
    }

    if !def.primary_key.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", def.primary_key.join(", ")));
    }
    for unique in &def.unique_constraints {
        lines.push(format!("    UNIQUE ({})", unique.join(", ")));
    }
    for (i, check) in def.check_constraints.iter().enumerate() {
        lines.push(format!(
            "    CONSTRAINT check_{}_{} CHECK ({check})",
            sanitize_identifier(table),
            i + 1
        ));
    }

    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        if i == last {
            let _ = writeln!(sql, "{line}");
        } else {
            let _ = writeln!(sql, "{line},");
        }
    }
    let _ = writeln!(sql, ");");

    for fk in &def.foreign_keys {
        sql.push_str(&render_add_foreign_key(
            table,
            &fk.column,
            &fk.referenced_table,
            &fk.referenced_column,
            fk.on_delete.as_deref(),
        ));
    }

    if def.row_level_security {
        let _ = writeln!(sql, "ALTER TABLE {table} ENABLE ROW LEVEL SECURITY;");
    }

    if let Some(ref comment) = def.description {
        let escaped = comment.replace('\'', "''");
        let _ = writeln!(sql, "COMMENT ON TABLE {table} IS '{escaped}';");
    }

    sql
}

/// Render the rollback for a table creation
pub fn render_drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table};\n")
}

/// Render a guarded ALTER TABLE ADD CONSTRAINT for a foreign key
///
/// PostgreSQL has no `ADD CONSTRAINT IF NOT EXISTS`, so the statement is
/// wrapped in a DO block that probes `pg_constraint` first.
fn render_add_foreign_key(
    table: &str,
    column: &str,
    referenced_table: &str,
    referenced_column: &str,
    on_delete: Option<&str>,
) -> String {
    let constraint = format!(
        "fk_{}_{}",
        sanitize_identifier(table),
        sanitize_identifier(column)
    );
    let action = on_delete
        .map(|a| format!(" ON DELETE {a}"))
        .unwrap_or_default();
    format!(
        "DO $$ BEGIN\n\
         \x20   IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{constraint}') THEN\n\
         \x20       ALTER TABLE {table} ADD CONSTRAINT {constraint} FOREIGN KEY ({column}) REFERENCES {referenced_table}({referenced_column}){action};\n\
         \x20   END IF;\n\
         END $$;\n"
    )
}

/// Render a guarded ALTER TABLE ADD CONSTRAINT for a key constraint
fn render_add_key_constraint(table: &str, constraint: &str, body: &str) -> String {
    format!(
        "DO $$ BEGIN\n\
         \x20   IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{constraint}') THEN\n\
         \x20       ALTER TABLE {table} ADD CONSTRAINT {constraint} {body};\n\
         \x20   END IF;\n\
         END $$;\n"
    )
}

/// Render a targeted alteration script for an incomplete table
///
/// Adds exactly the missing columns and constraints; nothing is recreated.
pub fn render_alter_table(
    def: &TableDefinition,
    missing_columns: &[String],
    missing_constraints: &[MissingConstraint],
) -> String {
    let mut sql = String::new();
    let table = &def.name;

    for name in missing_columns {
        // Columns that disappeared from the definition produce no DDL;
        // the validator reported them from the same catalog.
        let Some(col) = def.find_column(name) else {
            continue;
        };
        let mut line = format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {} {}",
            col.name, col.sql_type
        );
        if col.nullable {
            line.push_str(" NULL");
        } else if let Some(ref default) = col.default_expr {
            // The default backfills existing rows, so NOT NULL can hold.
            line.push_str(&format!(" DEFAULT {default} NOT NULL"));
        }
        // A NOT NULL column without a default is added nullable: existing
        // rows would reject the constraint until data is backfilled.
        sql.push_str(&line);
        sql.push_str(";\n");
    }

    for constraint in missing_constraints {
        match constraint {
            MissingConstraint::PrimaryKey { columns } => {
                let name = format!("pk_{}", sanitize_identifier(table));
                sql.push_str(&render_add_key_constraint(
                    table,
                    &name,
                    &format!("PRIMARY KEY ({})", columns.join(", ")),
                ));
            }
            MissingConstraint::Unique { columns } => {
                let name = format!(
                    "uq_{}_{}",
                    sanitize_identifier(table),
                    columns
                        .iter()
                        .map(|c| sanitize_identifier(c))
                        .collect::<Vec<_>>()
                        .join("_")
                );
                sql.push_str(&render_add_key_constraint(
                    table,
                    &name,
                    &format!("UNIQUE ({})", columns.join(", ")),
                ));
            }
            MissingConstraint::ForeignKey {
                column,
                referenced_table,
                referenced_column,
            } => {
                let on_delete = def
                    .foreign_keys
                    .iter()
                    .find(|fk| &fk.column == column)
                    .and_then(|fk| fk.on_delete.as_deref());
                sql.push_str(&render_add_foreign_key(
                    table,
                    column,
                    referenced_table,
                    referenced_column,
                    on_delete,
                ));
            }
        }
    }

    sql
}

/// Render the rollback for a targeted alteration
///
/// Removes exactly what the forward script added. Dropping a column
/// discards any data written to it after the alteration; dry runs warn
/// about replaying this out of context.
pub fn render_alter_table_rollback(
    def: &TableDefinition,
    missing_columns: &[String],
    missing_constraints: &[MissingConstraint],
) -> String {
    let mut sql = String::new();
    let table = &def.name;

    // Constraints first: a column drop would fail while a constraint
    // still references it.
    for constraint in missing_constraints {
        let name = match constraint {
            MissingConstraint::PrimaryKey { .. } => format!("pk_{}", sanitize_identifier(table)),
            MissingConstraint::Unique { columns } => format!(
                "uq_{}_{}",
                sanitize_identifier(table),
                columns
                    .iter()
                    .map(|c| sanitize_identifier(c))
                    .collect::<Vec<_>>()
                    .join("_")
            ),
            MissingConstraint::ForeignKey { column, .. } => format!(
                "fk_{}_{}",
                sanitize_identifier(table),
                sanitize_identifier(column)
            ),
        };
        let _ = writeln!(sql, "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {name};");
    }

    for name in missing_columns {
        let _ = writeln!(sql, "ALTER TABLE {table} DROP COLUMN IF EXISTS {name};");
    }

    sql
}

/// Render the creation script for an index
pub fn render_create_index(def: &IndexDefinition) -> String {
    let unique = if def.unique { "UNIQUE " } else { "" };
    let mut sql = format!(
        "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({})",
        def.name,
        def.table,
        def.columns.join(", ")
    );
    if let Some(ref clause) = def.partial_where {
        sql.push_str(&format!(" WHERE {clause}"));
    }
    sql.push_str(";\n");
    sql
}

/// Render the rollback for an index creation
pub fn render_drop_index(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {name};\n")
}

/// Render the creation script for a policy
///
/// PostgreSQL has no `CREATE POLICY IF NOT EXISTS`, so the statement is
/// wrapped in a DO block that probes `pg_policies` first.
pub fn render_create_policy(def: &PolicyDefinition) -> String {
    let mut create = format!(
        "CREATE POLICY {} ON {} FOR {}",
        def.name,
        def.table,
        def.command.as_sql()
    );
    if let Some(ref using) = def.using_expr {
        create.push_str(&format!(" USING ({using})"));
    }
    if let Some(ref check) = def.with_check {
        create.push_str(&format!(" WITH CHECK ({check})"));
    }
    format!(
        "DO $$ BEGIN\n\
         \x20   IF NOT EXISTS (SELECT 1 FROM pg_policies WHERE tablename = '{}' AND policyname = '{}') THEN\n\
         \x20       {create};\n\
         \x20   END IF;\n\
         END $$;\n",
        def.table, def.name
    )
}

/// Render the rollback for a policy creation
pub fn render_drop_policy(name: &str, table: &str) -> String {
    format!("DROP POLICY IF EXISTS {name} ON {table};\n")
}

/// Render the creation script for a stored function
pub fn render_create_function(def: &FunctionDefinition) -> String {
    let security = match def.security {
        FunctionSecurity::Invoker => "",
        FunctionSecurity::Definer => " SECURITY DEFINER",
    };
    format!(
        "CREATE OR REPLACE FUNCTION {}({}) RETURNS {} LANGUAGE {}{security} AS $fn$\n{}\n$fn$;\n",
        def.name, def.signature, def.returns, def.language, def.body
    )
}

/// Render the rollback for a function creation
pub fn render_drop_function(def: &FunctionDefinition) -> String {
    format!("DROP FUNCTION IF EXISTS {};\n", def.qualified_signature())
}

/// Count the SQL statements in a script
///
/// Counts top-level `;` terminators, treating dollar-quoted bodies
/// (`$$ ... $$`, `$fn$ ... $fn$`) as opaque.
pub fn count_statements(sql: &str) -> usize {
    let mut count = 0;
    let mut in_dollar: Option<String> = None;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            // Scan a dollar-quote tag: $tag$ where tag is alphanumeric or empty
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'$' {
                let tag = sql[i..=j].to_string();
                match in_dollar {
                    Some(ref open) if *open == tag => in_dollar = None,
                    None => in_dollar = Some(tag),
                    _ => {}
                }
                i = j + 1;
                continue;
            }
        }
        if bytes[i] == b';' && in_dollar.is_none() {
            count += 1;
        }
        i += 1;
    }
    count
}
