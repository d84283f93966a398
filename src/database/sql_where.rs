//! Translation of the backend-neutral predicate into parameterized SQL over
//! the `objs` table. Data paths are addressed with `data #> $n::text[]`.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::filter::{CompiledQuery, Condition, FieldRef, FilterOp, Operand, Predicate, SortKey, SystemField};
use crate::storage::document::like_segments;

/// A bound parameter. Values keep their SQL type so casts stay explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    TextArray(Vec<String>),
    Float(f64),
    BigInt(i64),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub params: Vec<SqlParam>,
}

/// Accumulates `$n` parameters while clauses are generated
#[derive(Debug, Default)]
pub struct SqlWhere {
    params: Vec<SqlParam>,
}

impl SqlWhere {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a parameter and return its placeholder
    pub fn param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }

    /// Scope, tag and tombstone filter followed by the predicate
    pub fn generate(&mut self, query: &CompiledQuery) -> String {
        let mut clauses = vec![
            format!("app_id = {}", self.param(SqlParam::Text(query.scope.app_id.clone()))),
            format!("tag = {}", self.param(SqlParam::Text(query.tag.as_str().to_string()))),
        ];
        if let Some(group_id) = &query.scope.group_id {
            clauses.push(format!("group_id = {}", self.param(SqlParam::Text(group_id.clone()))));
        }
        if !query.include_deleted {
            clauses.push("deleted_at IS NULL".to_string());
        }
        match &query.predicate {
            Predicate::All => {}
            predicate => clauses.push(self.predicate(predicate, query.like_case_insensitive)),
        }
        clauses.join(" AND ")
    }

    pub fn predicate(&mut self, predicate: &Predicate, like_ci: bool) -> String {
        match predicate {
            Predicate::All => "TRUE".to_string(),
            Predicate::And(parts) if parts.is_empty() => "TRUE".to_string(),
            Predicate::Or(parts) if parts.is_empty() => "FALSE".to_string(),
            Predicate::And(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| self.predicate(p, like_ci)).collect();
                format!("({})", parts.join(" AND "))
            }
            Predicate::Or(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| self.predicate(p, like_ci)).collect();
                format!("({})", parts.join(" OR "))
            }
            Predicate::Condition(condition) => match &condition.field {
                FieldRef::Data(path) => {
                    let column = format!("data #> {}::text[]", self.param(SqlParam::TextArray(path.clone())));
                    self.data_condition(&column, condition, like_ci)
                }
                FieldRef::System(system) => self.system_condition(*system, condition, like_ci),
            },
        }
    }

    fn data_condition(&mut self, x: &str, condition: &Condition, like_ci: bool) -> String {
        match (&condition.op, &condition.operand) {
            (FilterOp::Exists, _) => format!("{} IS NOT NULL", x),
            (FilterOp::Eq, Operand::One(v)) => self.json_eq(x, v),
            (FilterOp::Neq, Operand::One(v)) => {
                let eq = self.json_eq(x, v);
                format!("({} IS NOT NULL AND NOT {})", x, eq)
            }
            (FilterOp::In, Operand::Many(values)) => self.json_in(x, values),
            (FilterOp::NotIn, Operand::Many(values)) => {
                let any = self.json_in(x, values);
                format!("({} IS NOT NULL AND NOT {})", x, any)
            }
            (op, Operand::One(v)) if op.is_ordering() => {
                let number = Self::number_of(x);
                match v.as_f64() {
                    Some(n) => format!("{} {} {}", number, Self::comparator(*op), self.param(SqlParam::Float(n))),
                    None => "FALSE".to_string(),
                }
            }
            (FilterOp::Between, Operand::Range(low, high)) => match (low.as_f64(), high.as_f64()) {
                (Some(low), Some(high)) => format!(
                    "{} BETWEEN {} AND {}",
                    Self::number_of(x),
                    self.param(SqlParam::Float(low)),
                    self.param(SqlParam::Float(high))
                ),
                _ => "FALSE".to_string(),
            },
            (FilterOp::Like, Operand::One(Value::String(pattern))) => {
                let text = format!("(CASE WHEN jsonb_typeof({x}) = 'string' THEN {x} #>> '{{}}' END)", x = x);
                self.like(&text, pattern, like_ci)
            }
            _ => "FALSE".to_string(),
        }
    }

    fn system_condition(&mut self, system: SystemField, condition: &Condition, like_ci: bool) -> String {
        let column = system.column();
        let bind = |w: &mut Self, v: &Value| -> Option<String> {
            if system.is_timestamp() {
                let millis = v.as_f64()? as i64;
                let at = Utc.timestamp_millis_opt(millis).single()?;
                Some(w.param(SqlParam::Timestamp(at)))
            } else {
                Some(w.param(SqlParam::Text(v.as_str()?.to_string())))
            }
        };

        let clause = match (&condition.op, &condition.operand) {
            (FilterOp::Exists, _) => Some("TRUE".to_string()),
            (FilterOp::Eq, Operand::One(v)) => bind(self, v).map(|p| format!("{} = {}", column, p)),
            (FilterOp::Neq, Operand::One(v)) => bind(self, v).map(|p| format!("{} <> {}", column, p)),
            (FilterOp::In, Operand::Many(values)) | (FilterOp::NotIn, Operand::Many(values)) => {
                let placeholders: Option<Vec<String>> = values.iter().map(|v| bind(self, v)).collect();
                placeholders.map(|ps| {
                    let negate = if condition.op == FilterOp::NotIn { "NOT " } else { "" };
                    format!("{} {}IN ({})", column, negate, ps.join(", "))
                })
            }
            (op, Operand::One(v)) if op.is_ordering() => {
                bind(self, v).map(|p| format!("{} {} {}", column, Self::comparator(*op), p))
            }
            (FilterOp::Between, Operand::Range(low, high)) => {
                match (bind(self, low), bind(self, high)) {
                    (Some(l), Some(h)) => Some(format!("{} BETWEEN {} AND {}", column, l, h)),
                    _ => None,
                }
            }
            (FilterOp::Like, Operand::One(Value::String(pattern))) => Some(self.like(column, pattern, like_ci)),
            _ => None,
        };
        clause.unwrap_or_else(|| "FALSE".to_string())
    }

    /// Scalars use containment so arrays match by membership
    fn json_eq(&mut self, x: &str, value: &Value) -> String {
        let p = self.param(SqlParam::Json(value.clone()));
        if value.is_array() || value.is_object() {
            format!("{} = {}::jsonb", x, p)
        } else {
            format!("{} @> {}::jsonb", x, p)
        }
    }

    fn json_in(&mut self, x: &str, values: &[Value]) -> String {
        let parts: Vec<String> = values.iter().map(|v| self.json_eq(x, v)).collect();
        format!("({})", parts.join(" OR "))
    }

    fn like(&mut self, text: &str, pattern: &str, like_ci: bool) -> String {
        let operator = if like_ci { "ILIKE" } else { "LIKE" };
        let p = self.param(SqlParam::Text(like_pattern(pattern)));
        format!("{} {} {} ESCAPE '\\'", text, operator, p)
    }

    fn number_of(x: &str) -> String {
        format!("(CASE WHEN jsonb_typeof({x}) = 'number' THEN ({x} #>> '{{}}')::float8 END)", x = x)
    }

    fn comparator(op: FilterOp) -> &'static str {
        match op {
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            _ => "<=",
        }
    }

    /// `ORDER BY` body. Missing values sort last in both directions.
    pub fn order_by(&mut self, sort: &[SortKey]) -> String {
        let parts: Vec<String> = sort
            .iter()
            .map(|key| {
                let direction = key.direction.to_sql();
                match &key.field {
                    FieldRef::Data(path) => {
                        let p = self.param(SqlParam::TextArray(path.clone()));
                        format!("data #> {}::text[] {} NULLS LAST", p, direction)
                    }
                    FieldRef::System(system) if system.is_timestamp() => {
                        format!("{} {} NULLS LAST", system.column(), direction)
                    }
                    FieldRef::System(system) => {
                        format!("{} COLLATE \"C\" {} NULLS LAST", system.column(), direction)
                    }
                }
            })
            .collect();
        parts.join(", ")
    }
}

/// SQL `LIKE` pattern with `_`, `\` and literal `%` escaped
pub fn like_pattern(pattern: &str) -> String {
    like_segments(pattern)
        .into_iter()
        .map(|segment| segment.replace('\\', "\\\\").replace('_', "\\_"))
        .collect::<Vec<_>>()
        .join("%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::coerce::FieldTypes;
    use crate::filter::{Filter, FilterExpr, FilterOptions, SortDirection, SortSpec};
    use crate::models::TenantScope;
    use crate::types::Tag;
    use serde_json::json;

    fn compile(scope: TenantScope, expr: Value, sort: Vec<SortSpec>) -> CompiledQuery {
        let expr: FilterExpr = serde_json::from_value(expr).unwrap();
        let mut filter = Filter::new(scope, Tag::Log, FilterOptions::default()).unwrap();
        filter.where_clause(Some(expr)).order(sort);
        filter.prepare().unwrap().compile(&FieldTypes::new()).unwrap()
    }

    #[test]
    fn scope_and_eq_clause() {
        let q = compile(TenantScope::group("a", "g"), json!({"field": "level", "op": "eq", "value": "info"}), vec![]);
        let mut w = SqlWhere::new();
        let sql = w.generate(&q);
        assert_eq!(
            sql,
            "app_id = $1 AND tag = $2 AND group_id = $3 AND deleted_at IS NULL AND data #> $4::text[] @> $5::jsonb"
        );
        let params = w.into_params();
        assert_eq!(params[3], SqlParam::TextArray(vec!["level".to_string()]));
        assert_eq!(params[4], SqlParam::Json(json!("info")));
    }

    #[test]
    fn neq_requires_presence_and_empty_or_is_false() {
        let q = compile(TenantScope::app("a"), json!({"field": "a.b", "op": "neq", "value": 1}), vec![]);
        let sql = SqlWhere::new().generate(&q);
        assert!(sql.ends_with("(data #> $3::text[] IS NOT NULL AND NOT data #> $3::text[] @> $4::jsonb)"));

        let q = compile(TenantScope::app("a"), json!({"or": []}), vec![]);
        assert!(SqlWhere::new().generate(&q).ends_with("FALSE"));
    }

    #[test]
    fn ordering_and_like() {
        let q = compile(TenantScope::app("a"), json!({"field": "n", "op": "between", "value": [1, 2]}), vec![]);
        let sql = SqlWhere::new().generate(&q);
        assert!(sql.contains("jsonb_typeof(data #> $3::text[]) = 'number'"));
        assert!(sql.contains("BETWEEN $4 AND $5"));

        let q = compile(TenantScope::app("a"), json!({"field": "$createdBy", "op": "like", "value": "us_r"}), vec![]);
        let mut w = SqlWhere::new();
        let sql = w.generate(&q);
        assert!(sql.ends_with("created_by ILIKE $3 ESCAPE '\\'"));
        assert_eq!(w.into_params()[2], SqlParam::Text("%us\\_r%".to_string()));
    }

    #[test]
    fn like_pattern_escaping() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("ab%c"), "ab%c");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn order_by_appends_tie_break() {
        let q = compile(
            TenantScope::app("a"),
            json!({"field": "n", "op": "exists"}),
            vec![SortSpec::new("n", SortDirection::Desc)],
        );
        let mut w = SqlWhere::new();
        let order = w.order_by(&q.sort);
        assert_eq!(
            order,
            "data #> $1::text[] DESC NULLS LAST, created_at ASC NULLS LAST, id COLLATE \"C\" ASC NULLS LAST"
        );
    }
}
