use serde::Deserialize;
use serde_json::Value;
use shopdesk_core::case::{snake_case_filter, snake_case_keys, snake_case_list};

use super::filter::FilterError;

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 100;

/// One-based page number and page size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }
    }

    /// Rows to skip; never negative, so `page <= 0` reads from the start.
    pub fn offset(&self) -> i64 {
        self.page.saturating_sub(1).saturating_mul(self.limit.max(0)).max(0)
    }

    /// Page size clamped to zero; SQLite treats a negative LIMIT as unbounded.
    pub fn limit(&self) -> i64 {
        self.limit.max(0)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

/// List query parameters as they arrive over HTTP, in camelCase.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub filter: Option<String>,
    pub include: Option<String>,
    pub join: Option<String>,
    pub order_by: Option<String>,
}

/// Normalized list parameters: field names snake_case, JSON parsed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterParams {
    pub filter: Option<Value>,
    pub join: Option<Value>,
    pub include: Option<String>,
    pub order_by: Option<String>,
    /// `None` returns every matching row.
    pub pagination: Option<Pagination>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize an HTTP query. Missing `page`/`limit` fall back to 1/100,
    /// so HTTP listings are always paginated.
    pub fn from_query(query: &FilterQuery) -> Result<Self, FilterError> {
        let filter = parse_json_param("filter", query.filter.as_deref())?.map(|f| snake_case_filter(&f));
        let join = parse_json_param("join", query.join.as_deref())?.map(|j| match j {
            Value::Object(map) => Value::Object(snake_case_keys(&map)),
            other => other,
        });

        Ok(Self {
            filter,
            join,
            include: non_empty(query.include.as_deref()).map(snake_case_list),
            order_by: non_empty(query.order_by.as_deref()).map(snake_case_list),
            pagination: Some(Pagination::new(
                query.page.unwrap_or(DEFAULT_PAGE),
                query.limit.unwrap_or(DEFAULT_LIMIT),
            )),
        })
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_join(mut self, join: Value) -> Self {
        self.join = Some(join);
        self
    }

    pub fn with_include(mut self, include: impl Into<String>) -> Self {
        self.include = Some(include.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_pagination(mut self, page: i64, limit: i64) -> Self {
        self.pagination = Some(Pagination::new(page, limit));
        self
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_json_param(param: &'static str, raw: Option<&str>) -> Result<Option<Value>, FilterError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| FilterError::InvalidJson {
                param,
                detail: e.to_string(),
            }),
    }
}
