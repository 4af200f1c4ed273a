//! Stored function definition metadata.

use serde::Serialize;

/// Security mode for a stored function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FunctionSecurity {
    /// Runs with the privileges of the caller (the PostgreSQL default)
    Invoker,
    /// Runs with the privileges of the owner
    Definer,
}

/// Stored function definition
///
/// Functions carry no structural dependency on tables for ordering
/// purposes, even when their bodies reference them: PostgreSQL resolves
/// function bodies at call time, not at creation time (for `sql` and
/// `plpgsql` functions created without body validation dependencies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Argument signature, e.g. "" or "p_tenant uuid"
    pub signature: String,
    /// Return type, e.g. "uuid" or "trigger"
    pub returns: String,
    /// Implementation language tag, e.g. "sql" or "plpgsql"
    pub language: String,
    /// Security mode
    pub security: FunctionSecurity,
    /// Function body (without the surrounding dollar quoting)
    pub body: String,
}

impl FunctionDefinition {
    pub fn new(name: &str, signature: &str, returns: &str, language: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
            returns: returns.to_string(),
            language: language.to_string(),
            security: FunctionSecurity::Invoker,
            body: body.to_string(),
        }
    }

    #[must_use]
    pub fn security_definer(mut self) -> Self {
        self.security = FunctionSecurity::Definer;
        self
    }

    /// The `name(signature)` form used by DROP FUNCTION
    pub fn qualified_signature(&self) -> String {
        format!("{}({})", self.name, self.signature)
    }
}
