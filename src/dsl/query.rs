//! Pure lowering of `query { ... }` blocks into query documents.
//!
//! This layer performs no I/O and touches no driver state, so its shape is
//! directly testable.

use linked_hash_map::LinkedHashMap;

use crate::ast::CompareOp;
use crate::value::Value;

/// Lowers evaluated query conditions into a query document.
///
/// Equality assigns the bare value; other comparators build `{$op: value}`
/// objects. Conditions repeating a field merge into one comparator object,
/// with equality stored under `$eq`:
///
/// ```text
/// query { a == 1, a > 0 }   =>   { a: { $eq: 1, $gt: 0 } }
/// ```
pub fn lower_query(conditions: Vec<(String, CompareOp, Value)>) -> Value {
    let mut document: LinkedHashMap<String, Value> = LinkedHashMap::new();

    for (field, op, value) in conditions {
        match op {
            CompareOp::Eq => match document.get(&field) {
                Some(existing) if is_comparator_object(existing) => {
                    if let Value::Object(o) = existing {
                        o.borrow_mut().properties.insert("$eq".to_string(), value);
                    }
                }
                _ => {
                    document.insert(field, value);
                }
            },
            other => {
                let key = other.mongo_key().to_string();
                match document.get(&field) {
                    Some(existing) if is_comparator_object(existing) => {
                        if let Value::Object(o) = existing {
                            o.borrow_mut().properties.insert(key, value);
                        }
                    }
                    Some(previous_equality) => {
                        // A bare equality already sits at this field; fold
                        // it into the new comparator object as $eq.
                        let mut comparators = LinkedHashMap::new();
                        comparators.insert("$eq".to_string(), previous_equality.clone());
                        comparators.insert(key, value);
                        document.insert(field, Value::object(comparators));
                    }
                    None => {
                        let mut comparators = LinkedHashMap::new();
                        comparators.insert(key, value);
                        document.insert(field, Value::object(comparators));
                    }
                }
            }
        }
    }

    Value::object(document)
}

/// A non-empty object whose keys all start with `$`.
pub fn is_comparator_object(value: &Value) -> bool {
    match value {
        Value::Object(o) => {
            let properties = &o.borrow().properties;
            !properties.is_empty() && properties.keys().all(|k| k.starts_with('$'))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::to_json;

    fn cond(field: &str, op: CompareOp, n: f64) -> (String, CompareOp, Value) {
        (field.to_string(), op, Value::Number(n))
    }

    #[test]
    fn bare_equality() {
        let doc = lower_query(vec![cond("a", CompareOp::Eq, 1.0)]);
        assert_eq!(to_json(&doc).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn comparators_merge_per_field() {
        let doc = lower_query(vec![
            cond("a", CompareOp::Eq, 1.0),
            cond("a", CompareOp::Gt, 0.0),
            cond("b", CompareOp::Ne, 2.0),
        ]);
        assert_eq!(
            to_json(&doc).unwrap(),
            r#"{"a":{"$eq":1,"$gt":0},"b":{"$ne":2}}"#
        );
    }

    #[test]
    fn equality_into_existing_comparators() {
        let doc = lower_query(vec![
            cond("a", CompareOp::Gte, 5.0),
            cond("a", CompareOp::Eq, 7.0),
        ]);
        assert_eq!(to_json(&doc).unwrap(), r#"{"a":{"$gte":5,"$eq":7}}"#);
    }
}
