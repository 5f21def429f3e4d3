use chrono::{SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Number, Value};

use crate::entity::{Column, ColumnType, EntityDescriptor};
use crate::error::StoreError;

/// A materialized row: column name to JSON value, plus any included relations.
pub type Record = Map<String, Value>;

/// Current UTC time as fixed-width RFC 3339 text, so timestamps sort lexically.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Read a row selected with [`EntityDescriptor::select_list`] starting at `offset`.
pub fn read_record(
    row: &rusqlite::Row<'_>,
    descriptor: &'static EntityDescriptor,
    offset: usize,
) -> Result<Record, StoreError> {
    let mut record = Record::new();
    for (idx, column) in descriptor.columns.iter().enumerate() {
        let raw: SqlValue = row.get(offset + idx).map_err(|e| StoreError::CorruptRow {
            table: descriptor.table,
            column: column.name,
            detail: e.to_string(),
        })?;
        record.insert(column.name.to_string(), sql_to_json(raw, column, descriptor.table)?);
    }
    Ok(record)
}

/// Convert a stored value to JSON according to the column's declared type.
pub fn sql_to_json(
    raw: SqlValue,
    column: &'static Column,
    table: &'static str,
) -> Result<Value, StoreError> {
    let corrupt = |detail: String| StoreError::CorruptRow {
        table,
        column: column.name,
        detail,
    };
    Ok(match (column.ty, raw) {
        (_, SqlValue::Null) => Value::Null,
        (ColumnType::Boolean, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (ColumnType::Integer, SqlValue::Integer(i)) => Value::from(i),
        (ColumnType::Real, SqlValue::Integer(i)) => Value::from(i as f64),
        (ColumnType::Real, SqlValue::Real(f)) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| corrupt(format!("non-finite real: {f}")))?,
        (ColumnType::Text | ColumnType::Timestamp, SqlValue::Text(s)) => Value::String(s),
        (ty, other) => return Err(corrupt(format!("{ty:?} column holds {other:?}"))),
    })
}

/// Convert a JSON scalar to an SQL parameter. Arrays and objects have no
/// scalar form and yield `None`.
pub fn json_scalar(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => Some(SqlValue::Null),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Convert an input value for a write into `column`.
pub fn json_to_sql(
    value: &Value,
    column: &'static Column,
    table: &'static str,
) -> Result<SqlValue, StoreError> {
    let mismatch = || {
        StoreError::InvalidInput(format!(
            "{table}.{} cannot store {value}",
            column.name
        ))
    };
    match (column.ty, value) {
        (_, Value::Null) => Ok(SqlValue::Null),
        (ColumnType::Boolean, Value::Bool(b)) => Ok(SqlValue::Integer(i64::from(*b))),
        (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer).ok_or_else(mismatch),
        (ColumnType::Real, Value::Number(n)) => n.as_f64().map(SqlValue::Real).ok_or_else(mismatch),
        (ColumnType::Text | ColumnType::Timestamp, Value::String(s)) => Ok(SqlValue::Text(s.clone())),
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::items::Item;
    use serde_json::json;

    const QTY: Column = Column::integer("quantity");
    const FLAG: Column = Column::boolean("is_active");
    const NAME: Column = Column::text("full_name");

    #[test]
    fn timestamps_are_fixed_width_utc() {
        let a = now_timestamp();
        assert!(a.ends_with('Z'), "{a}");
        assert_eq!(a.len(), "2024-01-01T00:00:00.000000Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&a).is_ok());
    }

    #[test]
    fn boolean_columns_read_as_bool() {
        assert_eq!(sql_to_json(SqlValue::Integer(1), &FLAG, "items").unwrap(), json!(true));
        assert_eq!(sql_to_json(SqlValue::Integer(0), &FLAG, "items").unwrap(), json!(false));
    }

    #[test]
    fn null_reads_as_null_for_any_type() {
        assert_eq!(sql_to_json(SqlValue::Null, &QTY, "items").unwrap(), Value::Null);
    }

    #[test]
    fn type_mismatch_is_corrupt_row() {
        let result = sql_to_json(SqlValue::Text("seven".into()), &QTY, "items");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "items", column: "quantity", .. })
        ));
    }

    #[test]
    fn json_scalar_maps_primitives() {
        assert_eq!(json_scalar(&json!(true)), Some(SqlValue::Integer(1)));
        assert_eq!(json_scalar(&json!(3)), Some(SqlValue::Integer(3)));
        assert_eq!(json_scalar(&json!(2.5)), Some(SqlValue::Real(2.5)));
        assert_eq!(json_scalar(&json!("x")), Some(SqlValue::Text("x".into())));
        assert_eq!(json_scalar(&Value::Null), Some(SqlValue::Null));
        assert_eq!(json_scalar(&json!([1])), None);
        assert_eq!(json_scalar(&json!({})), None);
    }

    #[test]
    fn json_to_sql_checks_column_type() {
        assert_eq!(json_to_sql(&json!(4), &QTY, "items").unwrap(), SqlValue::Integer(4));
        assert_eq!(
            json_to_sql(&json!("Lamp"), &NAME, "items").unwrap(),
            SqlValue::Text("Lamp".into())
        );
        assert!(matches!(
            json_to_sql(&json!("four"), &QTY, "items"),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(json_to_sql(&json!({"a": 1}), &NAME, "items").is_err());
    }

    #[test]
    fn read_record_follows_descriptor_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let record = conn
            .query_row(
                "SELECT 'i1', 1, 't0', 't1', NULL, 'Lamp', 'desc', 3, NULL",
                [],
                |row| Ok(read_record(row, Item::descriptor(), 0)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(record["id"], "i1");
        assert_eq!(record["is_active"], true);
        assert_eq!(record["deleted_at"], Value::Null);
        assert_eq!(record["full_name"], "Lamp");
        assert_eq!(record["quantity"], 3);
        assert_eq!(record["owner_id"], Value::Null);
    }
}
