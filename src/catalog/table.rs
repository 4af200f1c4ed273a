//! Table and column definition metadata.
//!
//! `TableDefinition` stores everything the engine expects a table to look
//! like: ordered columns, primary key, foreign keys, unique and check
//! constraints, plus a free-text description used for `COMMENT ON TABLE`.

use serde::Serialize;

/// Column definition metadata
///
/// Stores information about a column's SQL type, nullability, default
/// expression, and key flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "UUID", "TEXT", "TIMESTAMPTZ", "JSONB")
    pub sql_type: String,
    /// Whether the column is nullable
    pub nullable: bool,
    /// Default SQL expression (e.g., "now()", "gen_random_uuid()")
    pub default_expr: Option<String>,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Whether the column carries a foreign key
    pub foreign_key: bool,
}

impl ColumnDefinition {
    /// Create a non-null column with no default and no key flags
    pub fn new(name: &str, sql_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.to_string(),
            nullable: false,
            default_expr: None,
            primary_key: false,
            foreign_key: false,
        }
    }

    /// Mark the column nullable
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set a default SQL expression
    #[must_use]
    pub fn default_expr(mut self, expr: &str) -> Self {
        self.default_expr = Some(expr.to_string());
        self
    }

    /// Mark the column as part of the primary key
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Foreign key definition metadata
///
/// A single-column reference to another table. The referenced table becomes
/// an implicit dependency of the owning table for script ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDefinition {
    /// Referencing column in the owning table
    pub column: String,
    /// Referenced table name
    pub referenced_table: String,
    /// Referenced column name
    pub referenced_column: String,
    /// Referential action (e.g., "CASCADE", "SET NULL")
    pub on_delete: Option<String>,
}

impl ForeignKeyDefinition {
    pub fn new(column: &str, referenced_table: &str, referenced_column: &str) -> Self {
        Self {
            column: column.to_string(),
            referenced_table: referenced_table.to_string(),
            referenced_column: referenced_column.to_string(),
            on_delete: None,
        }
    }

    /// Set the ON DELETE action
    #[must_use]
    pub fn on_delete(mut self, action: &str) -> Self {
        self.on_delete = Some(action.to_string());
        self
    }
}

/// Table definition metadata
///
/// The declared shape of one table. Column order is significant and is
/// preserved in generated DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TableDefinition {
    /// Table name
    pub name: String,
    /// Ordered column definitions
    pub columns: Vec<ColumnDefinition>,
    /// Primary key column set (in key order)
    pub primary_key: Vec<String>,
    /// Foreign key definitions
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// Unique constraints, each a set of column names
    pub unique_constraints: Vec<Vec<String>>,
    /// Check constraint expressions
    pub check_constraints: Vec<String>,
    /// Table description, emitted as a COMMENT ON TABLE
    pub description: Option<String>,
    /// Whether row-level security is enabled on this table
    pub row_level_security: bool,
}

impl TableDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        if column.primary_key {
            self.primary_key.push(column.name.clone());
        }
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKeyDefinition) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == fk.column) {
            col.foreign_key = true;
        }
        self.foreign_keys.push(fk);
        self
    }

    #[must_use]
    pub fn unique(mut self, columns: &[&str]) -> Self {
        self.unique_constraints
            .push(columns.iter().map(|c| (*c).to_string()).collect());
        self
    }

    #[must_use]
    pub fn check(mut self, expression: &str) -> Self {
        self.check_constraints.push(expression.to_string());
        self
    }

    #[must_use]
    pub fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    #[must_use]
    pub fn with_row_level_security(mut self) -> Self {
        self.row_level_security = true;
        self
    }

    /// Look up a column definition by name
    pub fn find_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Tables this table depends on through its foreign keys
    ///
    /// Self-references are excluded: a table can be created before its
    /// self-referencing constraint without ordering help.
    pub fn depends_on(&self) -> Vec<String> {
        let mut deps = Vec::new();
        for fk in &self.foreign_keys {
            if fk.referenced_table != self.name && !deps.contains(&fk.referenced_table) {
                deps.push(fk.referenced_table.clone());
            }
        }
        deps
    }
}
