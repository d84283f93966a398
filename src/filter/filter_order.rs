use serde_json::Value;

use super::error::FilterError;
use super::filter_where::FilterWhere;
use super::types::{FieldRef, SortDirection, SortKey, SortSpec, SystemField};

pub struct FilterOrder;

impl FilterOrder {
    /// Accepts `"createdAt desc, name"`, `["name asc", {"field": "x", "direction": "desc"}]`
    /// or `{ "name": "asc" }`.
    pub fn validate_and_parse(order: &Value) -> Result<Vec<SortSpec>, FilterError> {
        match order {
            Value::Null => Ok(vec![]),
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)?),
                        Value::Object(_) => {
                            let spec: SortSpec = serde_json::from_value(v.clone())
                                .map_err(|e| FilterError::InvalidSort(e.to_string()))?;
                            out.push(spec);
                        }
                        other => return Err(FilterError::InvalidSort(format!("Unsupported sort entry: {}", other))),
                    }
                }
                Ok(out)
            }
            Value::Object(obj) => {
                let mut out = Vec::new();
                for (k, v) in obj {
                    out.push(SortSpec::new(k.clone(), Self::parse_direction(v.as_str().unwrap_or("asc"))?));
                }
                Ok(out)
            }
            other => Err(FilterError::InvalidSort(format!("Unsupported sort format: {}", other))),
        }
    }

    fn parse_order_string(s: &str) -> Result<Vec<SortSpec>, FilterError> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                let dir = Self::parse_direction(it.next().unwrap_or("asc"))?;
                out.push(SortSpec::new(col, dir));
            }
        }
        Ok(out)
    }

    fn parse_direction(dir: &str) -> Result<SortDirection, FilterError> {
        if dir.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if dir.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(FilterError::InvalidSort(format!("Unknown direction: {}", dir)))
        }
    }

    /// Resolve caller sort specs and append the deterministic tie-break
    pub fn resolve(specs: &[SortSpec]) -> Result<Vec<SortKey>, FilterError> {
        let mut keys = Vec::with_capacity(specs.len() + 2);
        for spec in specs {
            let field = FilterWhere::parse_field(&spec.field)
                .map_err(|_| FilterError::InvalidSort(format!("Invalid sort field: {}", spec.field)))?;
            keys.push(SortKey { field, direction: spec.direction });
        }
        keys.extend(Self::tie_break());
        Ok(keys)
    }

    /// Insertion order, ties broken by id
    pub fn tie_break() -> Vec<SortKey> {
        vec![
            SortKey { field: FieldRef::System(SystemField::CreatedAt), direction: SortDirection::Asc },
            SortKey { field: FieldRef::System(SystemField::Id), direction: SortDirection::Asc },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_all_order_shapes() {
        let from_string = FilterOrder::validate_and_parse(&json!("count desc, name")).unwrap();
        assert_eq!(from_string, vec![SortSpec::new("count", SortDirection::Desc), SortSpec::new("name", SortDirection::Asc)]);

        let from_array = FilterOrder::validate_and_parse(&json!(["a asc", {"field": "$updatedAt", "direction": "desc"}])).unwrap();
        assert_eq!(from_array[1], SortSpec::new("$updatedAt", SortDirection::Desc));

        let from_object = FilterOrder::validate_and_parse(&json!({"level": "DESC"})).unwrap();
        assert_eq!(from_object, vec![SortSpec::new("level", SortDirection::Desc)]);

        assert!(FilterOrder::validate_and_parse(&json!("a sideways")).is_err());
    }

    #[test]
    fn resolve_appends_tie_break() {
        let keys = FilterOrder::resolve(&[SortSpec::new("level", SortDirection::Desc)]).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].field, FieldRef::Data(vec!["level".to_string()]));
        assert_eq!(keys[1].field, FieldRef::System(SystemField::CreatedAt));
        assert_eq!(keys[2].field, FieldRef::System(SystemField::Id));
        assert!(FilterOrder::resolve(&[SortSpec::new("$bogus", SortDirection::Asc)]).is_err());
    }
}
