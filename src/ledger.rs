//! Migration ledger.
//!
//! The `schemaguard_migrations` table is the only state the engine
//! persists across runs. One row is appended per executed script at the
//! end of a successful remediating run; the insert tolerates duplicate
//! names so re-running a completed setup is safe.

use sea_query::{ColumnDef, Expr, Index, IndexCreateStatement, PostgresQueryBuilder, Table, TableCreateStatement};

use crate::executor::GuardError;
use crate::introspect::SchemaBackend;

/// Name of the ledger table
pub const LEDGER_TABLE: &str = "schemaguard_migrations";

/// Build the CREATE TABLE statement for the ledger
pub fn ledger_table_statement() -> TableCreateStatement {
    Table::create()
        .table(LEDGER_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("name")
                .string()
                .string_len(255)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new("executed_at").timestamp().not_null())
        .col(ColumnDef::new("execution_time_ms").big_integer().null())
        .to_owned()
}

/// Build the index on `executed_at` for faster history queries
pub fn ledger_index_statement() -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name("idx_schemaguard_migrations_executed_at")
        .table(LEDGER_TABLE)
        .col(Expr::col("executed_at"))
        .to_owned()
}

/// Create the ledger table and its index if they do not exist
///
/// # Errors
///
/// Returns `GuardError` if either statement fails.
pub fn initialize_ledger(backend: &dyn SchemaBackend) -> Result<(), GuardError> {
    let table_sql = ledger_table_statement().build(PostgresQueryBuilder);
    backend.execute(&table_sql)?;

    let index_sql = ledger_index_statement().build(PostgresQueryBuilder);
    backend.execute(&index_sql)?;

    Ok(())
}

/// Append a ledger row for an executed script
///
/// Uses `ON CONFLICT (name) DO NOTHING` so recording the same script name
/// twice is a no-op rather than an error.
///
/// # Errors
///
/// Returns `GuardError` if the insert fails.
pub fn record_applied(
    backend: &dyn SchemaBackend,
    name: &str,
    execution_time_ms: i64,
) -> Result<(), GuardError> {
    // Script names are engine-generated identifiers; quotes never appear
    // in them but must not break the statement if they ever do.
    let escaped = name.replace('\'', "''");
    let sql = format!(
        "INSERT INTO {LEDGER_TABLE} (name, executed_at, execution_time_ms) \
         VALUES ('{escaped}', NOW(), {execution_time_ms}) \
         ON CONFLICT (name) DO NOTHING"
    );
    backend.execute(&sql)?;
    Ok(())
}
