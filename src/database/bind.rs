use sqlx::postgres::{PgArguments, PgRow};
use sqlx::FromRow;

use super::sql_where::SqlParam;

pub fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    p: &SqlParam,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
    match p {
        SqlParam::Text(s) => q.bind(s.clone()),
        SqlParam::TextArray(items) => q.bind(items.clone()),
        SqlParam::Float(f) => q.bind(*f),
        SqlParam::BigInt(i) => q.bind(*i),
        SqlParam::Json(v) => q.bind(v.clone()), // JSONB
        SqlParam::Timestamp(at) => q.bind(*at),
    }
}

pub fn bind_param_query_as<'q, O>(
    q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>,
    p: &SqlParam,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, PgRow>,
{
    match p {
        SqlParam::Text(s) => q.bind(s.clone()),
        SqlParam::TextArray(items) => q.bind(items.clone()),
        SqlParam::Float(f) => q.bind(*f),
        SqlParam::BigInt(i) => q.bind(*i),
        SqlParam::Json(v) => q.bind(v.clone()),
        SqlParam::Timestamp(at) => q.bind(*at),
    }
}
