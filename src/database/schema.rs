use sqlx::PgPool;
use tracing::info;

use super::manager::DatabaseError;

/// Idempotent bootstrap DDL, one statement per entry
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS objs (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL,
        group_id TEXT,
        tag TEXT NOT NULL,
        data JSONB NOT NULL,
        meta JSONB,
        unique_on TEXT[] NOT NULL DEFAULT '{}',
        unique_key TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        created_by TEXT NOT NULL,
        created_by_type TEXT NOT NULL,
        updated_by TEXT NOT NULL,
        updated_by_type TEXT NOT NULL,
        deleted_at TIMESTAMPTZ,
        deleted_by TEXT,
        deleted_by_type TEXT
    )"#,
    r#"CREATE INDEX IF NOT EXISTS objs_scope_idx
        ON objs (app_id, tag, group_id, created_at, id)"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS objs_live_unique_idx
        ON objs (app_id, COALESCE(group_id, ''), tag, unique_key)
        WHERE deleted_at IS NULL AND unique_key IS NOT NULL"#,
    r#"CREATE INDEX IF NOT EXISTS objs_data_idx ON objs USING GIN (data jsonb_path_ops)"#,
    r#"CREATE TABLE IF NOT EXISTS obj_fields (
        app_id TEXT NOT NULL,
        group_id TEXT NOT NULL DEFAULT '',
        tag TEXT NOT NULL,
        path TEXT NOT NULL,
        field_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (app_id, group_id, tag, path, field_type)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS obj_idempotency (
        app_id TEXT NOT NULL,
        group_id TEXT NOT NULL DEFAULT '',
        tag TEXT NOT NULL,
        key TEXT NOT NULL,
        fingerprint TEXT NOT NULL,
        result JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (app_id, group_id, tag, key)
    )"#,
    r#"CREATE INDEX IF NOT EXISTS obj_idempotency_created_idx ON obj_idempotency (created_at)"#,
];

/// Serializes concurrent bootstraps against the same database
const SCHEMA_LOCK: i64 = 0x6669_6d69_6478;

pub async fn ensure_schema(pool: &PgPool) -> Result<(), DatabaseError> {
    let mut conn = pool.acquire().await?;
    sqlx::query("SELECT pg_advisory_lock($1)").bind(SCHEMA_LOCK).execute(&mut *conn).await?;
    let mut result: Result<(), DatabaseError> = Ok(());
    for statement in SCHEMA {
        if let Err(e) = sqlx::query(statement).execute(&mut *conn).await {
            result = Err(e.into());
            break;
        }
    }
    sqlx::query("SELECT pg_advisory_unlock($1)").bind(SCHEMA_LOCK).execute(&mut *conn).await?;
    result?;
    info!("Storage schema ready");
    Ok(())
}
