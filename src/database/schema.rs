// SQL schema shipped with the binary for tooling that needs it outside
// the sqlx migrator (the admin CLI's `migrate` subcommand prints these).

pub const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");
pub const APPROVALS_AUDIT_SCHEMA: &str = include_str!("../../migrations/002_approvals_audit.sql");
pub const MANIFESTS_SCHEMA: &str = include_str!("../../migrations/003_manifests.sql");
