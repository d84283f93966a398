//! Relational backend: one `objs` table with a JSONB `data` column and an
//! `obj_fields` catalog table. Live-object uniqueness is enforced by a partial
//! unique index, so concurrent writers cannot both win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::bind::{bind_param_query, bind_param_query_as};
use super::manager::{DatabaseError, DatabaseManager};
use super::schema::ensure_schema;
use super::sql_where::{SqlParam, SqlResult, SqlWhere};
use crate::catalog::infer::{FieldType, FlatField};
use crate::config::{DatabaseConfig, StorageConfig};
use crate::filter::coerce::FieldTypes;
use crate::filter::CompiledQuery;
use crate::models::{now, Obj, TenantScope};
use crate::storage::{
    check_single_match, resolve_conflict, DeleteSpec, IdempotencyKey, IdempotencyRecord, ObjBackend, Resolution,
    StorageKind, StoreError, UpdateSpec, Window,
};
use crate::types::{OnConflict, Tag};

const COLUMNS: &str = "id, app_id, group_id, tag, data, meta, unique_on, created_at, updated_at, \
    created_by, created_by_type, updated_by, updated_by_type, deleted_at, deleted_by, deleted_by_type";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, FromRow)]
struct ObjRow {
    id: String,
    app_id: String,
    group_id: Option<String>,
    tag: String,
    data: Value,
    meta: Option<Value>,
    unique_on: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: String,
    created_by_type: String,
    updated_by: String,
    updated_by_type: String,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<String>,
    deleted_by_type: Option<String>,
}

impl TryFrom<ObjRow> for Obj {
    type Error = DatabaseError;

    fn try_from(row: ObjRow) -> Result<Self, Self::Error> {
        let parse_actor = |s: &str| s.parse().map_err(DatabaseError::QueryError);
        Ok(Obj {
            tag: row.tag.parse().map_err(DatabaseError::QueryError)?,
            created_by_type: parse_actor(&row.created_by_type)?,
            updated_by_type: parse_actor(&row.updated_by_type)?,
            deleted_by_type: row.deleted_by_type.as_deref().map(parse_actor).transpose()?,
            id: row.id,
            app_id: row.app_id,
            group_id: row.group_id,
            data: row.data,
            meta: row.meta,
            unique_on: row.unique_on,
            created_at: row.created_at,
            updated_at: row.updated_at,
            created_by: row.created_by,
            updated_by: row.updated_by,
            deleted_at: row.deleted_at,
            deleted_by: row.deleted_by,
        })
    }
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    slow_query_threshold: Option<Duration>,
}

impl PostgresStore {
    /// Connect through the shared pool cache and bootstrap the schema
    pub async fn connect(storage: &StorageConfig, database: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = DatabaseManager::pool(storage, database).await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool, database))
    }

    pub fn new(pool: PgPool, database: &DatabaseConfig) -> Self {
        let slow_query_threshold = database
            .enable_slow_query_warning
            .then(|| Duration::from_millis(database.slow_query_threshold_ms));
        Self { pool, slow_query_threshold }
    }

    fn observe(&self, label: &str, started: Instant) {
        let elapsed = started.elapsed();
        match self.slow_query_threshold {
            Some(threshold) if elapsed > threshold => {
                warn!("Slow {} query: {}ms (threshold {}ms)", label, elapsed.as_millis(), threshold.as_millis())
            }
            _ => debug!("{} query took {}ms", label, elapsed.as_millis()),
        }
    }

    fn select_sql(query: &CompiledQuery, window: Option<Window>, lock: bool) -> SqlResult {
        let mut w = SqlWhere::new();
        let clause = w.generate(query);
        let order = w.order_by(&query.sort);
        let mut sql = format!("SELECT {} FROM objs WHERE {} ORDER BY {}", COLUMNS, clause, order);
        if let Some(window) = window {
            let limit = w.param(SqlParam::BigInt(window.limit as i64));
            let offset = w.param(SqlParam::BigInt(window.offset as i64));
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        }
        if lock {
            sql.push_str(" FOR UPDATE");
        }
        SqlResult { query: sql, params: w.into_params() }
    }

    async fn fetch_objs<'c, E>(executor: E, sql: &SqlResult) -> Result<Vec<Obj>, DatabaseError>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let mut q = sqlx::query_as::<_, ObjRow>(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query_as(q, p);
        }
        let rows = q.fetch_all(executor).await?;
        rows.into_iter().map(Obj::try_from).collect()
    }

    /// Live object holding `key` in the object's uniqueness partition, locked
    async fn find_live_by_key(
        tx: &mut Transaction<'static, Postgres>,
        obj: &Obj,
        key: &str,
    ) -> Result<Option<Obj>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM objs WHERE app_id = $1 AND COALESCE(group_id, '') = $2 AND tag = $3 \
             AND unique_key = $4 AND deleted_at IS NULL FOR UPDATE",
            COLUMNS
        );
        let row = sqlx::query_as::<_, ObjRow>(&sql)
            .bind(&obj.app_id)
            .bind(obj.group_id.clone().unwrap_or_default())
            .bind(obj.tag.as_str())
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(Obj::try_from).transpose()
    }

    async fn insert_obj(tx: &mut Transaction<'static, Postgres>, obj: &Obj) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO objs ({}, unique_key) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            COLUMNS
        );
        sqlx::query(&sql)
            .bind(&obj.id)
            .bind(&obj.app_id)
            .bind(&obj.group_id)
            .bind(obj.tag.as_str())
            .bind(&obj.data)
            .bind(&obj.meta)
            .bind(&obj.unique_on)
            .bind(obj.created_at)
            .bind(obj.updated_at)
            .bind(&obj.created_by)
            .bind(obj.created_by_type.as_str())
            .bind(&obj.updated_by)
            .bind(obj.updated_by_type.as_str())
            .bind(obj.deleted_at)
            .bind(&obj.deleted_by)
            .bind(obj.deleted_by_type.map(|t| t.as_str()))
            .bind(obj.unique_key())
            .execute(&mut **tx)
            .await
            .map_err(|e| Self::write_error(e, obj))?;
        Ok(())
    }

    async fn write_obj(tx: &mut Transaction<'static, Postgres>, obj: &Obj) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE objs SET data = $2, meta = $3, unique_on = $4, unique_key = $5, \
             updated_at = $6, updated_by = $7, updated_by_type = $8 WHERE id = $1",
        )
        .bind(&obj.id)
        .bind(&obj.data)
        .bind(&obj.meta)
        .bind(&obj.unique_on)
        .bind(obj.unique_key())
        .bind(obj.updated_at)
        .bind(&obj.updated_by)
        .bind(obj.updated_by_type.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| Self::write_error(e, obj))?;
        Ok(())
    }

    /// Unique index violations surface as conflicts on the object being written
    fn write_error(err: sqlx::Error, obj: &Obj) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::conflict(obj.tag, &obj.unique_on, &obj.unique_key().unwrap_or_default());
            }
        }
        err.into()
    }

    fn catalog_scope(scope: &TenantScope, tag: Tag, w: &mut SqlWhere) -> String {
        let mut clause = format!(
            "app_id = {} AND tag = {}",
            w.param(SqlParam::Text(scope.app_id.clone())),
            w.param(SqlParam::Text(tag.as_str().to_string()))
        );
        if let Some(group_id) = &scope.group_id {
            clause.push_str(&format!(" AND group_id = {}", w.param(SqlParam::Text(group_id.clone()))));
        }
        clause
    }

    fn window_sql(window: Window, w: &mut SqlWhere) -> String {
        format!(
            "LIMIT {} OFFSET {}",
            w.param(SqlParam::BigInt(window.limit as i64)),
            w.param(SqlParam::BigInt(window.offset as i64))
        )
    }

    async fn fetch_rows(&self, sql: &SqlResult) -> Result<Vec<sqlx::postgres::PgRow>, DatabaseError> {
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param_query(q, p);
        }
        Ok(q.fetch_all(&self.pool).await?)
    }

    fn flat_field(row: &sqlx::postgres::PgRow) -> Result<FlatField, DatabaseError> {
        let path: String = row.try_get("path")?;
        let field_type: String = row.try_get("field_type")?;
        let field_type: FieldType = field_type.parse().map_err(DatabaseError::QueryError)?;
        Ok(FlatField { path, field_type })
    }
}

#[async_trait]
impl ObjBackend for PostgresStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Postgres
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn set_objs(&self, objs: Vec<Obj>, on_conflict: OnConflict) -> Result<Vec<Obj>, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut staged: HashSet<(String, Option<String>, Tag, String)> = HashSet::new();
        let mut results = Vec::with_capacity(objs.len());

        for obj in objs {
            let key = match obj.unique_key() {
                Some(key) => key,
                None => {
                    Self::insert_obj(&mut tx, &obj).await?;
                    results.push(obj);
                    continue;
                }
            };
            if !staged.insert((obj.app_id.clone(), obj.group_id.clone(), obj.tag, key.clone())) {
                return Err(StoreError::conflict(obj.tag, &obj.unique_on, &key));
            }

            match Self::find_live_by_key(&mut tx, &obj, &key).await? {
                None => {
                    Self::insert_obj(&mut tx, &obj).await?;
                    results.push(obj);
                }
                Some(current) => match resolve_conflict(&current, &obj, on_conflict) {
                    Resolution::Reject => return Err(StoreError::conflict(obj.tag, &obj.unique_on, &key)),
                    Resolution::Keep => results.push(current),
                    Resolution::Write(updated) => {
                        Self::write_obj(&mut tx, &updated).await?;
                        results.push(updated);
                    }
                },
            }
        }

        tx.commit().await?;
        self.observe("set", started);
        Ok(results)
    }

    async fn update_objs(&self, query: &CompiledQuery, spec: &UpdateSpec) -> Result<Vec<Obj>, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;
        let window = spec.count.map(|count| Window::new(0, count));
        let sql = Self::select_sql(query, window, true);
        let mut objs = Self::fetch_objs(&mut *tx, &sql).await?;

        for obj in objs.iter_mut() {
            obj.apply_update(&spec.data, spec.meta.as_ref(), spec.mode, &spec.actor, spec.at);
            Self::write_obj(&mut tx, obj).await?;
        }

        tx.commit().await?;
        self.observe("update", started);
        Ok(objs)
    }

    async fn delete_objs(&self, query: &CompiledQuery, spec: &DeleteSpec) -> Result<u64, StoreError> {
        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let mut w = SqlWhere::new();
        let clause = w.generate(query);
        let select = SqlResult {
            query: format!("SELECT id, deleted_at IS NULL AS live FROM objs WHERE {} FOR UPDATE", clause),
            params: w.into_params(),
        };
        let mut q = sqlx::query(&select.query);
        for p in select.params.iter() {
            q = bind_param_query(q, p);
        }
        let rows = q.fetch_all(&mut *tx).await?;
        let ids: Vec<String> = rows.iter().map(|row| row.try_get("id")).collect::<Result<_, _>>()?;
        let live = rows
            .iter()
            .map(|row| row.try_get::<bool, _>("live"))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|live| *live)
            .count();

        check_single_match(ids.len(), live, spec)?;
        if ids.is_empty() {
            return Ok(0);
        }

        if spec.hard {
            sqlx::query("DELETE FROM objs WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query(
                "UPDATE objs SET deleted_at = $1, deleted_by = $2, deleted_by_type = $3, \
                 updated_at = $1, updated_by = $2, updated_by_type = $3 WHERE id = ANY($4)",
            )
            .bind(spec.at)
            .bind(&spec.actor.id)
            .bind(spec.actor.kind.as_str())
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.observe("delete", started);
        Ok(ids.len() as u64)
    }

    async fn find_objs(&self, query: &CompiledQuery, window: Window) -> Result<Vec<Obj>, StoreError> {
        let started = Instant::now();
        let sql = Self::select_sql(query, Some(window), false);
        let objs = Self::fetch_objs(&self.pool, &sql).await?;
        self.observe("find", started);
        Ok(objs)
    }

    async fn count_objs(&self, query: &CompiledQuery) -> Result<u64, StoreError> {
        let started = Instant::now();
        let mut w = SqlWhere::new();
        let clause = w.generate(query);
        let sql = SqlResult {
            query: format!("SELECT COUNT(*) AS count FROM objs WHERE {}", clause),
            params: w.into_params(),
        };
        let rows = self.fetch_rows(&sql).await?;
        let count: i64 = match rows.first() {
            Some(row) => row.try_get("count")?,
            None => 0,
        };
        self.observe("count", started);
        Ok(count as u64)
    }

    async fn record_fields(&self, scope: &TenantScope, tag: Tag, fields: &[FlatField]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let paths: Vec<String> = fields.iter().map(|f| f.path.clone()).collect();
        let types: Vec<String> = fields.iter().map(|f| f.field_type.as_str().to_string()).collect();
        sqlx::query(
            "INSERT INTO obj_fields (app_id, group_id, tag, path, field_type, created_at, updated_at) \
             SELECT $1, $2, $3, f.path, f.field_type, $6, $6 FROM UNNEST($4::text[], $5::text[]) AS f(path, field_type) \
             ON CONFLICT (app_id, group_id, tag, path, field_type) DO UPDATE SET updated_at = EXCLUDED.updated_at",
        )
        .bind(&scope.app_id)
        .bind(scope.group_id.clone().unwrap_or_default())
        .bind(tag.as_str())
        .bind(&paths)
        .bind(&types)
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_fields(&self, scope: &TenantScope, tag: Tag, window: Window) -> Result<Vec<FlatField>, StoreError> {
        let mut w = SqlWhere::new();
        let clause = Self::catalog_scope(scope, tag, &mut w);
        let limit = Self::window_sql(window, &mut w);
        let sql = SqlResult {
            query: format!(
                "SELECT path, field_type FROM obj_fields WHERE {} GROUP BY path, field_type \
                 ORDER BY path COLLATE \"C\", field_type COLLATE \"C\" {}",
                clause, limit
            ),
            params: w.into_params(),
        };
        let rows = self.fetch_rows(&sql).await?;
        Ok(rows.iter().map(Self::flat_field).collect::<Result<_, _>>()?)
    }

    async fn field_types(&self, scope: &TenantScope, tag: Tag, paths: &[String]) -> Result<FieldTypes, StoreError> {
        let mut types = FieldTypes::new();
        if paths.is_empty() {
            return Ok(types);
        }
        let mut w = SqlWhere::new();
        let clause = Self::catalog_scope(scope, tag, &mut w);
        let paths_param = w.param(SqlParam::TextArray(paths.to_vec()));
        let sql = SqlResult {
            query: format!(
                "SELECT DISTINCT path, field_type FROM obj_fields WHERE {} AND path = ANY({})",
                clause, paths_param
            ),
            params: w.into_params(),
        };
        for row in self.fetch_rows(&sql).await? {
            let field = Self::flat_field(&row)?;
            types.entry(field.path).or_default().insert(field.field_type);
        }
        Ok(types)
    }

    async fn list_field_values(
        &self,
        scope: &TenantScope,
        tag: Tag,
        path: &str,
        window: Window,
    ) -> Result<Vec<Value>, StoreError> {
        let mut w = SqlWhere::new();
        let mut clause = format!(
            "app_id = {} AND tag = {} AND deleted_at IS NULL",
            w.param(SqlParam::Text(scope.app_id.clone())),
            w.param(SqlParam::Text(tag.as_str().to_string()))
        );
        if let Some(group_id) = &scope.group_id {
            clause.push_str(&format!(" AND group_id = {}", w.param(SqlParam::Text(group_id.clone()))));
        }
        let segments = crate::models::value::split_path(path);
        let x = format!("data #> {}::text[]", w.param(SqlParam::TextArray(segments)));
        let limit = Self::window_sql(window, &mut w);
        let sql = SqlResult {
            query: format!(
                "SELECT v.value AS value FROM objs \
                 CROSS JOIN LATERAL jsonb_array_elements(\
                 CASE WHEN jsonb_typeof({x}) = 'array' THEN {x} ELSE jsonb_build_array({x}) END) AS v(value) \
                 WHERE {clause} AND {x} IS NOT NULL GROUP BY v.value ORDER BY v.value {limit}",
                x = x,
                clause = clause,
                limit = limit
            ),
            params: w.into_params(),
        };
        let rows = self.fetch_rows(&sql).await?;
        Ok(rows
            .iter()
            .map(|row| row.try_get::<Value, _>("value"))
            .collect::<Result<_, _>>()?)
    }

    async fn find_idempotency(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT fingerprint, result, created_at FROM obj_idempotency \
             WHERE app_id = $1 AND group_id = $2 AND tag = $3 AND key = $4",
        )
        .bind(&key.scope.app_id)
        .bind(key.scope.group_id.clone().unwrap_or_default())
        .bind(key.tag.as_str())
        .bind(&key.key)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(IdempotencyRecord {
            key: key.clone(),
            fingerprint: row.try_get("fingerprint")?,
            result: row.try_get("result")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO obj_idempotency (app_id, group_id, tag, key, fingerprint, result, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (app_id, group_id, tag, key) DO UPDATE SET \
             fingerprint = EXCLUDED.fingerprint, result = EXCLUDED.result, created_at = EXCLUDED.created_at",
        )
        .bind(&record.key.scope.app_id)
        .bind(record.key.scope.group_id.clone().unwrap_or_default())
        .bind(record.key.tag.as_str())
        .bind(&record.key.key)
        .bind(&record.fingerprint)
        .bind(&record.result)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_idempotency(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM obj_idempotency WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }
}
