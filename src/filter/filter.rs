use std::collections::BTreeSet;

use super::coerce::{check_predicate, FieldTypes};
use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{CompiledQuery, FilterExpr, Predicate, SortKey, SortSpec};
use crate::config::FilterConfig;
use crate::models::TenantScope;
use crate::types::Tag;

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub max_nested_depth: usize,
    pub like_case_insensitive: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self { max_nested_depth: 10, like_case_insensitive: true }
    }
}

impl From<&FilterConfig> for FilterOptions {
    fn from(config: &FilterConfig) -> Self {
        Self {
            max_nested_depth: config.max_nested_depth as usize,
            like_case_insensitive: config.like_case_insensitive,
        }
    }
}

/// Query builder bound to a `(tenantScope, tag)` pair
pub struct Filter {
    scope: TenantScope,
    tag: Tag,
    where_data: Option<FilterExpr>,
    order_data: Vec<SortSpec>,
    include_deleted: bool,
    options: FilterOptions,
}

impl Filter {
    pub fn new(scope: TenantScope, tag: Tag, options: FilterOptions) -> Result<Self, FilterError> {
        Self::validate_scope(&scope)?;
        Ok(Self {
            scope,
            tag,
            where_data: None,
            order_data: vec![],
            include_deleted: false,
            options,
        })
    }

    pub fn where_clause(&mut self, conditions: Option<FilterExpr>) -> &mut Self {
        self.where_data = conditions;
        self
    }

    pub fn order(&mut self, order_spec: Vec<SortSpec>) -> &mut Self {
        self.order_data = order_spec;
        self
    }

    pub fn include_deleted(&mut self, include_deleted: bool) -> &mut Self {
        self.include_deleted = include_deleted;
        self
    }

    /// Structural validation: operators, arity, field names, sort. No I/O.
    pub fn prepare(&self) -> Result<PreparedQuery, FilterError> {
        let (predicate, data_paths) =
            FilterWhere::generate(self.where_data.as_ref(), self.options.max_nested_depth)?;
        let sort = FilterOrder::resolve(&self.order_data)?;
        Ok(PreparedQuery {
            scope: self.scope.clone(),
            tag: self.tag,
            predicate,
            sort,
            include_deleted: self.include_deleted,
            like_case_insensitive: self.options.like_case_insensitive,
            data_paths,
        })
    }

    fn validate_scope(scope: &TenantScope) -> Result<(), FilterError> {
        if scope.app_id.trim().is_empty() {
            return Err(FilterError::InvalidScope("appId cannot be empty".to_string()));
        }
        if matches!(scope.group_id.as_deref(), Some(g) if g.trim().is_empty()) {
            return Err(FilterError::InvalidScope("groupId cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// A structurally valid query awaiting catalog type checks
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub scope: TenantScope,
    pub tag: Tag,
    pub predicate: Predicate,
    pub sort: Vec<SortKey>,
    pub include_deleted: bool,
    pub like_case_insensitive: bool,
    /// Data paths referenced by the predicate, for catalog lookup
    pub data_paths: BTreeSet<String>,
}

impl PreparedQuery {
    /// Apply catalog type checks and coercion, producing the backend query
    pub fn compile(self, types: &FieldTypes) -> Result<CompiledQuery, FilterError> {
        let mut predicate = self.predicate;
        check_predicate(&mut predicate, types)?;
        Ok(CompiledQuery {
            scope: self.scope,
            tag: self.tag,
            predicate,
            include_deleted: self.include_deleted,
            sort: self.sort,
            like_case_insensitive: self.like_case_insensitive,
        })
    }
}
