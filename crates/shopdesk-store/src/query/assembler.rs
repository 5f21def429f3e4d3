//! Turns [`FilterParams`] into a single SELECT over the root entity.
//!
//! Assembly order: joins, filter predicate, soft-delete guard, includes,
//! ordering, pagination. Included relations are loaded after the main query
//! with one `IN (...)` query per relation and attached to each record under
//! the relation name.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::debug;

use super::filter::{ColumnRef, Condition, FilterCompiler, FilterError, Operand, Operator, Predicate};
use super::params::{FilterParams, Pagination};
use crate::entity::{
    quote_ident, EntityDescriptor, EntityRegistry, Relation, RelationKind, DELETED_AT_COLUMN,
    ID_COLUMN,
};
use crate::error::StoreError;
use crate::row_helpers::{json_scalar, read_record, Record};

/// Whether soft-deleted rows are visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Rows with `deleted_at` set are hidden.
    Active,
    IncludingInactive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: &'static str,
    pub descending: bool,
}

/// A fully resolved query against one root entity.
#[derive(Clone, Debug)]
pub struct Query {
    root: &'static EntityDescriptor,
    visibility: Visibility,
    joins: Vec<&'static Relation>,
    predicate: Predicate,
    includes: Vec<&'static Relation>,
    order: Vec<OrderTerm>,
    pagination: Option<Pagination>,
}

impl Query {
    pub fn new(root: &'static EntityDescriptor, visibility: Visibility) -> Self {
        Self {
            root,
            visibility,
            joins: Vec::new(),
            predicate: Predicate::Always,
            includes: Vec::new(),
            order: Vec::new(),
            pagination: None,
        }
    }

    /// Resolve every list parameter against `root`. Unknown relations,
    /// columns or operators fail here, before any SQL runs.
    pub fn build(
        registry: &EntityRegistry,
        root: &'static EntityDescriptor,
        params: &FilterParams,
        visibility: Visibility,
    ) -> Result<Self, FilterError> {
        let joins = resolve_joins(root, params.join.as_ref())?;
        let predicate = match &params.filter {
            Some(expr) => FilterCompiler::new(registry, root)
                .with_joins(&joins)
                .compile(expr)?,
            None => Predicate::Always,
        };
        let includes = resolve_includes(registry, root, params.include.as_deref())?;
        let order = resolve_order(root, params.order_by.as_deref())?;

        Ok(Self {
            root,
            visibility,
            joins,
            predicate,
            includes,
            order,
            pagination: params.pagination,
        })
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Predicate::all(vec![self.predicate, predicate]);
        self
    }

    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn root(&self) -> &'static EntityDescriptor {
        self.root
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Filter plus the soft-delete guard for [`Visibility::Active`].
    fn effective_predicate(&self) -> Predicate {
        match self.visibility {
            Visibility::Active => Predicate::all(vec![
                self.predicate.clone(),
                Predicate::is_null(ColumnRef::new(self.root.table, DELETED_AT_COLUMN)),
            ]),
            Visibility::IncludingInactive => self.predicate.clone(),
        }
    }

    /// A one-to-many join repeats the root row once per matching child.
    fn fans_out(&self) -> bool {
        self.joins.iter().any(|rel| rel.kind == RelationKind::OneToMany)
    }

    fn from_clause(&self) -> String {
        let table = quote_ident(self.root.table);
        let mut sql = format!("FROM {table}");
        for rel in &self.joins {
            let alias = quote_ident(rel.name);
            sql.push_str(&format!(
                " INNER JOIN {} AS {alias} ON {alias}.{} = {table}.{}",
                quote_ident(rel.target_table),
                quote_ident(rel.remote_column),
                quote_ident(rel.local_column),
            ));
        }
        sql
    }

    /// The row query with its bound parameters.
    pub fn select_sql(&self) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let where_sql = self.effective_predicate().to_sql(&mut params);
        let mut sql = format!(
            "SELECT {}{} {} WHERE {where_sql}",
            if self.fans_out() { "DISTINCT " } else { "" },
            self.root.select_list(self.root.table),
            self.from_clause()
        );
        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|t| {
                    format!(
                        "{}.{} {}",
                        quote_ident(self.root.table),
                        quote_ident(t.column),
                        if t.descending { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if let Some(page) = self.pagination {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(page.limit()));
            params.push(SqlValue::Integer(page.offset()));
        }
        (sql, params)
    }

    /// Count of rows matching joins, filter and guard, ignoring pagination.
    pub fn count_sql(&self) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let where_sql = self.effective_predicate().to_sql(&mut params);
        let counted = if self.fans_out() {
            format!(
                "COUNT(DISTINCT {}.{})",
                quote_ident(self.root.table),
                quote_ident(ID_COLUMN)
            )
        } else {
            "COUNT(*)".to_string()
        };
        (
            format!("SELECT {counted} {} WHERE {where_sql}", self.from_clause()),
            params,
        )
    }

    pub fn fetch(&self, conn: &Connection, registry: &EntityRegistry) -> Result<Vec<Record>, StoreError> {
        let (sql, params) = self.select_sql();
        debug!(table = self.root.table, %sql, "select");
        let mut records = query_records(conn, &sql, params, self.root)?;
        for rel in &self.includes {
            attach_relation(conn, registry, rel, self.visibility, &mut records)?;
        }
        Ok(records)
    }

    pub fn fetch_first(
        &self,
        conn: &Connection,
        registry: &EntityRegistry,
    ) -> Result<Option<Record>, StoreError> {
        let first = self.clone().paginate(Pagination::new(1, 1));
        Ok(first.fetch(conn, registry)?.into_iter().next())
    }

    pub fn count(&self, conn: &Connection) -> Result<i64, StoreError> {
        let (sql, params) = self.count_sql();
        Ok(conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?)
    }
}

fn resolve_joins(
    root: &'static EntityDescriptor,
    join: Option<&Value>,
) -> Result<Vec<&'static Relation>, FilterError> {
    let Some(Value::Object(map)) = join else {
        return Ok(Vec::new());
    };
    map.keys()
        .map(|name| {
            root.relation(name).ok_or_else(|| FilterError::UnknownRelation {
                table: root.table.to_string(),
                relation: name.clone(),
            })
        })
        .collect()
}

fn resolve_includes(
    registry: &EntityRegistry,
    root: &'static EntityDescriptor,
    include: Option<&str>,
) -> Result<Vec<&'static Relation>, FilterError> {
    let Some(include) = include else {
        return Ok(Vec::new());
    };
    let mut out: Vec<&'static Relation> = Vec::new();
    for name in include.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let rel = root.relation(name).ok_or_else(|| FilterError::UnknownRelation {
            table: root.table.to_string(),
            relation: name.to_string(),
        })?;
        if registry.get(rel.target_table).is_none() {
            return Err(FilterError::UnregisteredTable(rel.target_table.to_string()));
        }
        if !out.iter().any(|r| r.name == rel.name) {
            out.push(rel);
        }
    }
    Ok(out)
}

fn resolve_order(
    root: &'static EntityDescriptor,
    order_by: Option<&str>,
) -> Result<Vec<OrderTerm>, FilterError> {
    let Some(order_by) = order_by else {
        return Ok(Vec::new());
    };
    order_by
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|term| {
            let (name, descending) = match term.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (term, false),
            };
            let column = root.column(name).ok_or_else(|| FilterError::UnknownColumn {
                table: root.table.to_string(),
                column: name.to_string(),
            })?;
            Ok(OrderTerm {
                column: column.name,
                descending,
            })
        })
        .collect()
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: Vec<SqlValue>,
    descriptor: &'static EntityDescriptor,
) -> Result<Vec<Record>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(read_record(row, descriptor, 0)?);
    }
    Ok(records)
}

/// Load `rel` for every record in one query and attach it under `rel.name`:
/// an object (or null) for many-to-one, an array for one-to-many.
fn attach_relation(
    conn: &Connection,
    registry: &EntityRegistry,
    rel: &'static Relation,
    visibility: Visibility,
    records: &mut [Record],
) -> Result<(), StoreError> {
    let target = registry
        .get(rel.target_table)
        .ok_or_else(|| FilterError::UnregisteredTable(rel.target_table.to_string()))?;

    let mut keys: Vec<SqlValue> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for record in records.iter() {
        let Some(value) = record.get(rel.local_column).filter(|v| !v.is_null()) else {
            continue;
        };
        let key = value.to_string();
        if seen.contains(&key) {
            continue;
        }
        if let Some(bound) = json_scalar(value) {
            seen.push(key);
            keys.push(bound);
        }
    }

    let mut grouped: HashMap<String, Vec<Record>> = HashMap::new();
    if !keys.is_empty() {
        let remote = ColumnRef::new(target.table, rel.remote_column);
        let mut query = Query::new(target, visibility);
        query.predicate = Predicate::Condition(Condition {
            column: remote,
            operator: Operator::In,
            operand: Operand::List(keys),
        });
        let (sql, params) = query.select_sql();
        debug!(relation = rel.name, %sql, "include");
        for related in query_records(conn, &sql, params, target)? {
            let key = related
                .get(rel.remote_column)
                .map(Value::to_string)
                .unwrap_or_default();
            grouped.entry(key).or_default().push(related);
        }
    }

    for record in records.iter_mut() {
        let key = record.get(rel.local_column).map(Value::to_string);
        let matches = key.and_then(|k| grouped.get(&k)).cloned().unwrap_or_default();
        let attached = match rel.kind {
            RelationKind::ManyToOne => matches
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null),
            RelationKind::OneToMany => {
                Value::Array(matches.into_iter().map(Value::Object).collect())
            }
        };
        record.insert(rel.name.to_string(), attached);
    }
    Ok(())
}
