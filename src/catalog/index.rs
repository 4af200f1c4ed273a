//! Index definition metadata.

use serde::Serialize;

/// Index definition metadata
///
/// Index names are globally unique in PostgreSQL, so `name` doubles as the
/// entity identifier. The owning table is a dependency for script ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    /// Index name (globally unique)
    pub name: String,
    /// Owning table
    pub table: String,
    /// Ordered column list
    pub columns: Vec<String>,
    /// Whether this is a unique index
    pub unique: bool,
    /// Partial index WHERE clause (if any)
    pub partial_where: Option<String>,
}

impl IndexDefinition {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            unique: false,
            partial_where: None,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn partial(mut self, where_clause: &str) -> Self {
        self.partial_where = Some(where_clause.to_string());
        self
    }
}
