//! The default platform catalog.
//!
//! Declares the multi-tenant platform schema: tenants, users, memberships,
//! invitations, and the audit log, together with their indexes, row-level
//! security policies, and helper functions. Tenant isolation is enforced in
//! the database through RLS policies that compare each row's `tenant_id`
//! against the `app.tenant_id` session setting.

use once_cell::sync::Lazy;

use super::{
    ColumnDefinition, ForeignKeyDefinition, FunctionDefinition, IndexDefinition, PolicyCommand,
    PolicyDefinition, SchemaCatalog, TableDefinition,
};

static PLATFORM_CATALOG: Lazy<SchemaCatalog> = Lazy::new(build_platform_catalog);

/// The catalog describing the platform schema
pub fn platform_catalog() -> &'static SchemaCatalog {
    &PLATFORM_CATALOG
}

fn build_platform_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .table(tenants())
        .table(users())
        .table(memberships())
        .table(invitations())
        .table(audit_log())
        .index(IndexDefinition::new(
            "idx_memberships_tenant_id",
            "memberships",
            &["tenant_id"],
        ))
        .index(IndexDefinition::new(
            "idx_memberships_user_id",
            "memberships",
            &["user_id"],
        ))
        .index(
            IndexDefinition::new("idx_invitations_token", "invitations", &["token"]).unique(),
        )
        .index(
            IndexDefinition::new("idx_invitations_pending", "invitations", &["tenant_id"])
                .partial("accepted_at IS NULL"),
        )
        .index(IndexDefinition::new(
            "idx_audit_log_tenant_created",
            "audit_log",
            &["tenant_id", "created_at"],
        ))
        .policy(
            PolicyDefinition::new("tenant_isolation", "memberships", PolicyCommand::All)
                .using("tenant_id = current_tenant_id()")
                .with_check("tenant_id = current_tenant_id()"),
        )
        .policy(
            PolicyDefinition::new("tenant_isolation", "invitations", PolicyCommand::All)
                .using("tenant_id = current_tenant_id()")
                .with_check("tenant_id = current_tenant_id()"),
        )
        .policy(
            PolicyDefinition::new("tenant_isolation", "audit_log", PolicyCommand::Select)
                .using("tenant_id = current_tenant_id()"),
        )
        .policy(
            PolicyDefinition::new("audit_append_only", "audit_log", PolicyCommand::Insert)
                .with_check("tenant_id = current_tenant_id()"),
        )
        .function(FunctionDefinition::new(
            "current_tenant_id",
            "",
            "uuid",
            "sql",
            "SELECT NULLIF(current_setting('app.tenant_id', true), '')::uuid",
        ))
        .function(FunctionDefinition::new(
            "set_updated_at",
            "",
            "trigger",
            "plpgsql",
            "BEGIN NEW.updated_at := now(); RETURN NEW; END",
        ))
}

fn tenants() -> TableDefinition {
    TableDefinition::new("tenants")
        .column(
            ColumnDefinition::new("id", "UUID")
                .primary_key()
                .default_expr("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("slug", "TEXT"))
        .column(ColumnDefinition::new("name", "TEXT"))
        .column(ColumnDefinition::new("created_at", "TIMESTAMPTZ").default_expr("now()"))
        .column(ColumnDefinition::new("updated_at", "TIMESTAMPTZ").default_expr("now()"))
        .unique(&["slug"])
        .check("char_length(slug) BETWEEN 3 AND 63")
        .description("One row per tenant organization")
}

fn users() -> TableDefinition {
    TableDefinition::new("users")
        .column(
            ColumnDefinition::new("id", "UUID")
                .primary_key()
                .default_expr("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("email", "TEXT"))
        .column(ColumnDefinition::new("display_name", "TEXT").nullable())
        .column(ColumnDefinition::new("created_at", "TIMESTAMPTZ").default_expr("now()"))
        .column(ColumnDefinition::new("updated_at", "TIMESTAMPTZ").default_expr("now()"))
        .unique(&["email"])
        .check("position('@' in email) > 1")
        .description("Platform user accounts, shared across tenants")
}

fn memberships() -> TableDefinition {
    TableDefinition::new("memberships")
        .column(
            ColumnDefinition::new("id", "UUID")
                .primary_key()
                .default_expr("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("tenant_id", "UUID"))
        .column(ColumnDefinition::new("user_id", "UUID"))
        .column(ColumnDefinition::new("role", "TEXT").default_expr("'member'"))
        .column(ColumnDefinition::new("created_at", "TIMESTAMPTZ").default_expr("now()"))
        .foreign_key(ForeignKeyDefinition::new("tenant_id", "tenants", "id").on_delete("CASCADE"))
        .foreign_key(ForeignKeyDefinition::new("user_id", "users", "id").on_delete("CASCADE"))
        .unique(&["tenant_id", "user_id"])
        .check("role IN ('owner', 'admin', 'member')")
        .with_row_level_security()
        .description("Tenant membership and role assignment")
}

fn invitations() -> TableDefinition {
    TableDefinition::new("invitations")
        .column(
            ColumnDefinition::new("id", "UUID")
                .primary_key()
                .default_expr("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("tenant_id", "UUID"))
        .column(ColumnDefinition::new("email", "TEXT"))
        .column(ColumnDefinition::new("role", "TEXT").default_expr("'member'"))
        .column(ColumnDefinition::new("token", "TEXT"))
        .column(ColumnDefinition::new("expires_at", "TIMESTAMPTZ"))
        .column(ColumnDefinition::new("accepted_at", "TIMESTAMPTZ").nullable())
        .foreign_key(ForeignKeyDefinition::new("tenant_id", "tenants", "id").on_delete("CASCADE"))
        .check("role IN ('admin', 'member')")
        .with_row_level_security()
        .description("Outstanding and accepted tenant invitations")
}

fn audit_log() -> TableDefinition {
    TableDefinition::new("audit_log")
        .column(
            ColumnDefinition::new("id", "UUID")
                .primary_key()
                .default_expr("gen_random_uuid()"),
        )
        .column(ColumnDefinition::new("tenant_id", "UUID"))
        .column(ColumnDefinition::new("actor_id", "UUID").nullable())
        .column(ColumnDefinition::new("action", "TEXT"))
        .column(ColumnDefinition::new("payload", "JSONB").default_expr("'{}'::jsonb"))
        .column(ColumnDefinition::new("created_at", "TIMESTAMPTZ").default_expr("now()"))
        .foreign_key(ForeignKeyDefinition::new("tenant_id", "tenants", "id").on_delete("CASCADE"))
        .foreign_key(ForeignKeyDefinition::new("actor_id", "users", "id").on_delete("SET NULL"))
        .with_row_level_security()
        .description("Append-only audit trail of tenant-scoped actions")
}
