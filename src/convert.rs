//! Conversion between runtime values and the plain `serde_json` documents
//! the driver layer speaks.

use linked_hash_map::LinkedHashMap;
use serde_json::{Map, Number, Value as JsonValue};

use crate::value::Value;

/// Converts a runtime value into a plain document. Functions, natives,
/// classes, promises, and handles have no document form; converting one is
/// an error naming the offending type.
pub fn runtime_to_plain(value: &Value) -> Result<JsonValue, String> {
    match value {
        Value::Null => Ok(JsonValue::Null),
        Value::Boolean(b) => Ok(JsonValue::Bool(*b)),
        Value::Number(n) => {
            // Integral numbers stay integers on the wire.
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 9e15 {
                Ok(JsonValue::Number(Number::from(*n as i64)))
            } else {
                Number::from_f64(*n)
                    .map(JsonValue::Number)
                    .ok_or_else(|| "cannot convert a non-finite number to a document".to_string())
            }
        }
        Value::Str(s) => Ok(JsonValue::String(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items.borrow().iter() {
                out.push(runtime_to_plain(item)?);
            }
            Ok(JsonValue::Array(out))
        }
        Value::Object(o) => {
            let mut out = Map::new();
            for (k, v) in o.borrow().properties.iter() {
                out.insert(k.clone(), runtime_to_plain(v)?);
            }
            Ok(JsonValue::Object(out))
        }
        Value::Operation(chain) => runtime_to_plain(&chain.last_result.borrow()),
        other => Err(format!(
            "cannot convert a {} to a document",
            other.type_name()
        )),
    }
}

/// Converts a plain document back into a runtime value. Extended-JSON
/// `{"$oid": s}` and `{"$date": s}` singletons collapse to their string
/// forms.
pub fn plain_to_runtime(value: &JsonValue) -> Value {
    match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Boolean(*b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => Value::array(items.iter().map(plain_to_runtime).collect()),
        JsonValue::Object(map) => {
            if map.len() == 1 {
                if let Some(JsonValue::String(s)) = map.get("$oid").or_else(|| map.get("$date")) {
                    return Value::Str(s.clone());
                }
            }
            let mut properties = LinkedHashMap::new();
            for (k, v) in map {
                properties.insert(k.clone(), plain_to_runtime(v));
            }
            Value::object(properties)
        }
    }
}
