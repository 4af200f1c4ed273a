//! Row-level security policy definition metadata.

use serde::Serialize;
use std::fmt;

/// Command scope a policy applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyCommand {
    All,
    Select,
    Insert,
    Update,
    Delete,
}

impl PolicyCommand {
    /// SQL keyword for the FOR clause, matching what `pg_policies.cmd` reports
    pub fn as_sql(&self) -> &'static str {
        match self {
            PolicyCommand::All => "ALL",
            PolicyCommand::Select => "SELECT",
            PolicyCommand::Insert => "INSERT",
            PolicyCommand::Update => "UPDATE",
            PolicyCommand::Delete => "DELETE",
        }
    }
}

impl fmt::Display for PolicyCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Row-level security policy definition
///
/// Policy names are unique per table; the pair `(table, name)` identifies
/// the entity. The owning table is a dependency for script ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDefinition {
    /// Policy name (unique within the owning table)
    pub name: String,
    /// Owning table
    pub table: String,
    /// Command scope
    pub command: PolicyCommand,
    /// USING predicate expression
    pub using_expr: Option<String>,
    /// WITH CHECK expression (if any)
    pub with_check: Option<String>,
}

impl PolicyDefinition {
    pub fn new(name: &str, table: &str, command: PolicyCommand) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            command,
            using_expr: None,
            with_check: None,
        }
    }

    #[must_use]
    pub fn using(mut self, expr: &str) -> Self {
        self.using_expr = Some(expr.to_string());
        self
    }

    #[must_use]
    pub fn with_check(mut self, expr: &str) -> Self {
        self.with_check = Some(expr.to_string());
        self
    }
}
