//! Naming conversions between the external camelCase wire format and the
//! snake_case column names used by the store.

use serde_json::{Map, Value};

/// Separator between a field and its operator in filter keys (`age__gte`).
pub const OPERATOR_SEPARATOR: &str = "__";

/// `displayName` -> `display_name`. Already snake_case input is unchanged.
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, ch) in s.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('_') && !out.ends_with('.') {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// `display_name` -> `displayName`.
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for ch in s.chars() {
        if ch == '_' && !out.is_empty() {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a comma-separated list of names (include / orderBy params).
/// A leading `-` on an entry is preserved.
pub fn snake_case_list(list: &str) -> String {
    list.split(',')
        .map(|part| {
            let part = part.trim();
            match part.strip_prefix('-') {
                Some(rest) => format!("-{}", to_snake_case(rest)),
                None => to_snake_case(part),
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert the field part of a filter key, leaving the operator suffix as is.
/// `owner.displayName__ilike` -> `owner.display_name__ilike`.
pub fn snake_case_filter_key(key: &str) -> String {
    match key.split_once(OPERATOR_SEPARATOR) {
        Some((field, op)) => format!("{}{OPERATOR_SEPARATOR}{op}", to_snake_case(field)),
        None => to_snake_case(key),
    }
}

/// Convert every condition key of a filter expression. Numeric keys hold
/// nested expressions and are recursed into; literal values are untouched.
pub fn snake_case_filter(expr: &Value) -> Value {
    match expr {
        Value::Array(items) => Value::Array(items.iter().map(snake_case_filter).collect()),
        Value::Object(map) => {
            let converted = map
                .iter()
                .map(|(key, value)| {
                    if is_numeric_key(key) {
                        (key.clone(), snake_case_filter(value))
                    } else {
                        (snake_case_filter_key(key), value.clone())
                    }
                })
                .collect::<Map<_, _>>();
            Value::Object(converted)
        }
        other => other.clone(),
    }
}

/// Convert the top-level keys of an object. When both spellings are present
/// the snake_case one wins.
pub fn snake_case_keys(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        let snake = to_snake_case(key);
        if snake != *key && map.contains_key(&snake) {
            continue;
        }
        out.insert(snake, value.clone());
    }
    out
}

/// Recursively convert object keys to camelCase (response bodies).
pub fn camel_case_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_camel_case(&k), camel_case_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_value).collect()),
        other => other,
    }
}

/// Keys made only of ASCII digits mark nested sub-expressions in filters.
pub fn is_numeric_key(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}
