//! Stable rendering of runtime values: JSON output and the multi-line
//! `inspect` form.

use std::rc::Rc;

use crate::convert::runtime_to_plain;
use crate::value::{format_number, Value};

/// Compact JSON for a data value. Non-data values (functions, handles) are
/// an error.
pub fn to_json(value: &Value) -> Result<String, String> {
    let plain = runtime_to_plain(value)?;
    serde_json::to_string(&plain).map_err(|e| e.to_string())
}

/// Pretty-printed JSON with 2-space indentation.
pub fn to_json_pretty(value: &Value) -> Result<String, String> {
    let plain = runtime_to_plain(value)?;
    serde_json::to_string_pretty(&plain).map_err(|e| e.to_string())
}

/// Multi-line rendering used by the `inspect` native. Unlike JSON output it
/// accepts every value kind and survives cycles.
pub fn inspect(value: &Value) -> String {
    let mut visiting = Vec::new();
    render(value, 0, &mut visiting)
}

fn render(value: &Value, indent: usize, visiting: &mut Vec<usize>) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::Str(s) => format!("\"{}\"", escape(s)),
        Value::Array(items) => {
            let key = Rc::as_ptr(items) as usize;
            if visiting.contains(&key) {
                return "[circular]".to_string();
            }
            let elements = items.borrow();
            if elements.is_empty() {
                return "[]".to_string();
            }
            visiting.push(key);
            let pad = "  ".repeat(indent + 1);
            let inner: Vec<String> = elements
                .iter()
                .map(|v| format!("{}{}", pad, render(v, indent + 1, visiting)))
                .collect();
            visiting.pop();
            format!("[\n{}\n{}]", inner.join(",\n"), "  ".repeat(indent))
        }
        Value::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if visiting.contains(&key) {
                return "[circular]".to_string();
            }
            let data = o.borrow();
            let prefix = match &data.schema_name {
                Some(name) => format!("{} ", name),
                None => String::new(),
            };
            if data.properties.is_empty() {
                return format!("{}{{}}", prefix);
            }
            visiting.push(key);
            let pad = "  ".repeat(indent + 1);
            let inner: Vec<String> = data
                .properties
                .iter()
                .map(|(k, v)| format!("{}{}: {}", pad, k, render(v, indent + 1, visiting)))
                .collect();
            visiting.pop();
            format!(
                "{}{{\n{}\n{}}}",
                prefix,
                inner.join(",\n"),
                "  ".repeat(indent)
            )
        }
        Value::Operation(chain) => render(&chain.last_result.borrow(), indent, visiting),
        other => other.stringify(),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}
