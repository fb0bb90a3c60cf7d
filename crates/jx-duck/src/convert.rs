//! Conversion between DuckDB values and JSON

use duckdb::types::Value as Duck;
use serde_json::{Map, Value};

/// JSON form of a DuckDB cell. Structs become objects and lists become
/// arrays; temporal values are reported as their raw numbers.
pub fn to_json(value: Duck) -> Value {
    match value {
        Duck::Null => Value::Null,
        Duck::Boolean(b) => Value::Bool(b),
        Duck::TinyInt(i) => Value::from(i),
        Duck::SmallInt(i) => Value::from(i),
        Duck::Int(i) => Value::from(i),
        Duck::BigInt(i) => Value::from(i),
        Duck::HugeInt(i) => match i64::try_from(i) {
            Ok(i) => Value::from(i),
            Err(_) => float(i as f64),
        },
        Duck::UTinyInt(i) => Value::from(i),
        Duck::USmallInt(i) => Value::from(i),
        Duck::UInt(i) => Value::from(i),
        Duck::UBigInt(i) => Value::from(i),
        Duck::Float(f) => float(f64::from(f)),
        Duck::Double(f) => float(f),
        Duck::Decimal(d) => d.to_string().parse().map_or(Value::Null, float),
        Duck::Text(s) | Duck::Enum(s) => Value::String(s),
        Duck::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        Duck::Date32(days) => Value::from(i64::from(days) * 86_400),
        Duck::Timestamp(_, t) | Duck::Time64(_, t) => Value::from(t),
        Duck::List(items) | Duck::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect())
        }
        Duck::Struct(fields) => {
            let mut object = Map::new();
            for (key, value) in fields.iter() {
                object.insert(key.clone(), to_json(value.clone()));
            }
            Value::Object(object)
        }
        Duck::Union(inner) => to_json(*inner),
        other => Value::String(format!("{other:?}")),
    }
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Bind parameter for a shredded cell. Containers are bound as JSON text.
pub fn to_param(value: &Value) -> Duck {
    match value {
        Value::Null => Duck::Null,
        Value::Bool(b) => Duck::Boolean(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Duck::BigInt(i),
            (None, Some(f)) => Duck::Double(f),
            _ => Duck::Null,
        },
        Value::String(s) => Duck::Text(s.clone()),
        other => Duck::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(to_json(Duck::BigInt(3)), json!(3));
        assert_eq!(to_json(Duck::Double(1.5)), json!(1.5));
        assert_eq!(to_json(Duck::HugeInt(60)), json!(60));
        assert_eq!(to_json(Duck::Double(f64::NAN)), Value::Null);
        assert_eq!(to_json(Duck::Text("x".into())), json!("x"));
    }

    #[test]
    fn test_lists() {
        let list = Duck::List(vec![Duck::Double(10.0), Duck::Null]);
        assert_eq!(to_json(list), json!([10.0, null]));
    }

    #[test]
    fn test_params() {
        assert_eq!(to_param(&json!(7)), Duck::BigInt(7));
        assert_eq!(to_param(&json!(0.5)), Duck::Double(0.5));
        assert_eq!(to_param(&json!([1, [2]])), Duck::Text("[1,[2]]".into()));
        assert_eq!(to_param(&Value::Null), Duck::Null);
    }
}
