//! Filter expressions compiled to SQL predicates.
//!
//! A filter is JSON: an object is a conjunction of its entries, an array is
//! a disjunction of its elements. Keys that are decimal integers are
//! position markers whose value is a nested sub-expression; every other key
//! is a condition of the form `field` or `field__operator`, where `field` is
//! a column of the root entity or `relation.column` for a joined relation.
//!
//! ```text
//! {"0": [{"quantity__gt": 5}, {"full_name__ilike": "lamp"}], "owner_id__isnull": false}
//! => ((quantity > 5) OR (lower(full_name) LIKE lower('%lamp%'))) AND owner_id IS NOT NULL
//! ```

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use shopdesk_core::case::{is_numeric_key, OPERATOR_SEPARATOR};

use crate::entity::{quote_ident, EntityDescriptor, EntityRegistry, Relation};
use crate::row_helpers::json_scalar;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("invalid JSON in '{param}': {detail}")]
    InvalidJson { param: &'static str, detail: String },

    #[error("filter must be an object or an array, got {0}")]
    InvalidShape(String),

    #[error("unsupported operator '{operator}' in '{key}'")]
    UnsupportedOperator { key: String, operator: String },

    #[error("unknown column '{column}' on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("unknown relation '{relation}' on {table}")]
    UnknownRelation { table: String, relation: String },

    #[error("relation '{0}' must be joined before filtering on it")]
    RelationNotJoined(String),

    #[error("invalid value for '{key}': {detail}")]
    InvalidValue { key: String, detail: String },

    #[error("entity table '{0}' is not registered")]
    UnregisteredTable(String),
}

/// The closed set of comparison operators a filter key may name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gte,
    Gt,
    Neq,
    Like,
    Ilike,
    In,
    Nin,
    Is,
    Isn,
    Between,
    IsNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gte => "gte",
            Self::Gt => "gt",
            Self::Neq => "neq",
            Self::Like => "like",
            Self::Ilike => "ilike",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Is => "is",
            Self::Isn => "isn",
            Self::Between => "between",
            Self::IsNull => "isnull",
        }
    }

    /// Split `field__op` into its field and operator. A key without the
    /// separator compares for equality.
    pub fn split_key(key: &str) -> Result<(&str, Operator), FilterError> {
        match key.split_once(OPERATOR_SEPARATOR) {
            None => Ok((key, Operator::Eq)),
            Some((field, op)) => {
                let operator = op.parse().map_err(|_| FilterError::UnsupportedOperator {
                    key: key.to_string(),
                    operator: op.to_string(),
                })?;
                Ok((field, operator))
            }
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => f.write_str("eq"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => Self::Eq,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "gte" => Self::Gte,
            "gt" => Self::Gt,
            "neq" => Self::Neq,
            "like" => Self::Like,
            "ilike" => Self::Ilike,
            "in" => Self::In,
            "nin" => Self::Nin,
            "is" => Self::Is,
            "isn" => Self::Isn,
            "between" => Self::Between,
            "isnull" => Self::IsNull,
            _ => return Err(()),
        })
    }
}

/// A column qualified by the alias it is selected under.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: &'static str,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: &'static str) -> Self {
        Self {
            alias: alias.into(),
            column,
        }
    }

    fn sql(&self) -> String {
        format!("{}.{}", quote_ident(&self.alias), quote_ident(self.column))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Scalar(SqlValue),
    List(Vec<SqlValue>),
    Range(SqlValue, SqlValue),
    Flag(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub column: ColumnRef,
    pub operator: Operator,
    pub operand: Operand,
}

/// A compiled boolean expression over the rows of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Always,
    Never,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Condition(Condition),
}

impl Predicate {
    /// Conjunction; the empty conjunction accepts every row.
    pub fn all(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Predicate::Always);
        match parts.len() {
            0 => Predicate::Always,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    /// Disjunction; the empty disjunction rejects every row.
    pub fn any(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Predicate::Never);
        match parts.len() {
            0 => Predicate::Never,
            1 => parts.remove(0),
            _ => Predicate::Or(parts),
        }
    }

    pub fn eq(column: ColumnRef, value: SqlValue) -> Self {
        Predicate::Condition(Condition {
            column,
            operator: Operator::Eq,
            operand: Operand::Scalar(value),
        })
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Predicate::Condition(Condition {
            column,
            operator: Operator::IsNull,
            operand: Operand::Flag(true),
        })
    }

    /// Render as an SQL boolean expression with positional `?` placeholders,
    /// appending bound values to `params` in placeholder order.
    pub fn to_sql(&self, params: &mut Vec<SqlValue>) -> String {
        match self {
            Predicate::Always => "1 = 1".to_string(),
            Predicate::Never => "1 = 0".to_string(),
            Predicate::And(parts) => join_sql(parts, " AND ", params),
            Predicate::Or(parts) => join_sql(parts, " OR ", params),
            Predicate::Condition(cond) => cond.to_sql(params),
        }
    }
}

fn join_sql(parts: &[Predicate], sep: &str, params: &mut Vec<SqlValue>) -> String {
    let rendered: Vec<String> = parts.iter().map(|p| p.to_sql(params)).collect();
    format!("({})", rendered.join(sep))
}

impl Condition {
    fn to_sql(&self, params: &mut Vec<SqlValue>) -> String {
        let col = self.column.sql();
        match (&self.operator, &self.operand) {
            (Operator::Eq, Operand::Scalar(SqlValue::Null)) => format!("{col} IS NULL"),
            (Operator::Neq, Operand::Scalar(SqlValue::Null)) => format!("{col} IS NOT NULL"),
            (Operator::IsNull, Operand::Flag(true)) => format!("{col} IS NULL"),
            (Operator::IsNull, Operand::Flag(false)) => format!("{col} IS NOT NULL"),
            (Operator::Like, Operand::Scalar(v)) => {
                params.push(v.clone());
                format!("CAST({col} AS TEXT) GLOB ?")
            }
            (Operator::Ilike, Operand::Scalar(v)) => {
                params.push(v.clone());
                format!("LOWER(CAST({col} AS TEXT)) LIKE LOWER(?)")
            }
            (Operator::In, Operand::List(values)) if values.is_empty() => "1 = 0".to_string(),
            (Operator::Nin, Operand::List(values)) if values.is_empty() => "1 = 1".to_string(),
            (Operator::In | Operator::Nin, Operand::List(values)) => {
                params.extend(values.iter().cloned());
                let marks = vec!["?"; values.len()].join(", ");
                let not = if self.operator == Operator::Nin { "NOT " } else { "" };
                format!("{col} {not}IN ({marks})")
            }
            (Operator::Between, Operand::Range(lo, hi)) => {
                params.push(lo.clone());
                params.push(hi.clone());
                format!("{col} BETWEEN ? AND ?")
            }
            (op, Operand::Scalar(v)) => {
                params.push(v.clone());
                let sql_op = match op {
                    Operator::Lt => "<",
                    Operator::Lte => "<=",
                    Operator::Gte => ">=",
                    Operator::Gt => ">",
                    Operator::Neq => "!=",
                    Operator::Is => "IS",
                    Operator::Isn => "IS NOT",
                    _ => "=",
                };
                format!("{col} {sql_op} ?")
            }
            // Operand shapes are fixed by the compiler; anything else matches nothing.
            _ => "1 = 0".to_string(),
        }
    }
}

/// Translate an SQL LIKE pattern into an equivalent case-sensitive GLOB.
/// `%` and `_` keep their wildcard meaning; GLOB metacharacters are literal.
pub fn like_to_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 2);
    for ch in pattern.chars() {
        match ch {
            '%' => out.push('*'),
            '_' => out.push('?'),
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            other => out.push(other),
        }
    }
    out
}

/// Compiles filter expressions against a root entity and the relations
/// joined into the query.
pub struct FilterCompiler<'a> {
    registry: &'a EntityRegistry,
    root: &'static EntityDescriptor,
    joined: &'a [&'static Relation],
}

impl<'a> FilterCompiler<'a> {
    pub fn new(registry: &'a EntityRegistry, root: &'static EntityDescriptor) -> Self {
        Self {
            registry,
            root,
            joined: &[],
        }
    }

    pub fn with_joins(mut self, joined: &'a [&'static Relation]) -> Self {
        self.joined = joined;
        self
    }

    /// Compile a filter expression. An empty object accepts every row; an
    /// empty array rejects every row.
    pub fn compile(&self, expr: &Value) -> Result<Predicate, FilterError> {
        match expr {
            Value::Object(map) => {
                let parts = map
                    .iter()
                    .map(|(key, value)| {
                        if is_numeric_key(key) {
                            self.compile(value)
                        } else {
                            self.compile_condition(key, value)
                        }
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::all(parts))
            }
            Value::Array(items) => {
                let parts = items
                    .iter()
                    .map(|item| self.compile(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::any(parts))
            }
            other => Err(FilterError::InvalidShape(json_kind(other).to_string())),
        }
    }

    fn compile_condition(&self, key: &str, value: &Value) -> Result<Predicate, FilterError> {
        let (field, operator) = Operator::split_key(key)?;
        let column = self.resolve(field)?;
        let invalid = |detail: &str| FilterError::InvalidValue {
            key: key.to_string(),
            detail: detail.to_string(),
        };

        let operand = match operator {
            Operator::In | Operator::Nin => {
                let items = value.as_array().ok_or_else(|| invalid("expected an array"))?;
                let values = items
                    .iter()
                    .map(|v| match json_scalar(v) {
                        Some(SqlValue::Null) | None => Err(invalid("array elements must be non-null scalars")),
                        Some(s) => Ok(s),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Operand::List(values)
            }
            Operator::Between => match value.as_array().map(Vec::as_slice) {
                Some([lo, hi]) => {
                    let lo = non_null_scalar(lo).ok_or_else(|| invalid("bounds must be non-null scalars"))?;
                    let hi = non_null_scalar(hi).ok_or_else(|| invalid("bounds must be non-null scalars"))?;
                    Operand::Range(lo, hi)
                }
                _ => return Err(invalid("expected a two-element array")),
            },
            Operator::IsNull => {
                Operand::Flag(value.as_bool().ok_or_else(|| invalid("expected a boolean"))?)
            }
            Operator::Like | Operator::Ilike => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err(invalid("expected a string")),
                };
                let pattern = format!("%{text}%");
                let bound = if operator == Operator::Like {
                    like_to_glob(&pattern)
                } else {
                    pattern
                };
                Operand::Scalar(SqlValue::Text(bound))
            }
            Operator::Eq | Operator::Neq | Operator::Is | Operator::Isn => {
                Operand::Scalar(json_scalar(value).ok_or_else(|| invalid("expected a scalar"))?)
            }
            Operator::Lt | Operator::Lte | Operator::Gte | Operator::Gt => {
                Operand::Scalar(non_null_scalar(value).ok_or_else(|| invalid("expected a non-null scalar"))?)
            }
        };

        Ok(Predicate::Condition(Condition {
            column,
            operator,
            operand,
        }))
    }

    /// Resolve `column` on the root entity or `relation.column` on a joined
    /// relation.
    fn resolve(&self, field: &str) -> Result<ColumnRef, FilterError> {
        if let Some((relation_name, column_name)) = field.split_once('.') {
            let relation = self.root.relation(relation_name).ok_or_else(|| {
                FilterError::UnknownRelation {
                    table: self.root.table.to_string(),
                    relation: relation_name.to_string(),
                }
            })?;
            if !self.joined.iter().any(|j| j.name == relation.name) {
                return Err(FilterError::RelationNotJoined(relation.name.to_string()));
            }
            let target = self
                .registry
                .get(relation.target_table)
                .ok_or_else(|| FilterError::UnregisteredTable(relation.target_table.to_string()))?;
            let column = target
                .column(column_name)
                .ok_or_else(|| FilterError::UnknownColumn {
                    table: target.table.to_string(),
                    column: column_name.to_string(),
                })?;
            Ok(ColumnRef::new(relation.name, column.name))
        } else {
            let column = self.root.column(field).ok_or_else(|| FilterError::UnknownColumn {
                table: self.root.table.to_string(),
                column: field.to_string(),
            })?;
            Ok(ColumnRef::new(self.root.table, column.name))
        }
    }
}

fn non_null_scalar(value: &Value) -> Option<SqlValue> {
    match json_scalar(value)? {
        SqlValue::Null => None,
        v => Some(v),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
