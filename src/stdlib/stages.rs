//! Pipeline-stage and comparison-operator builder natives.
//!
//! These assemble the plain document shapes used in aggregation pipelines
//! and composed filters: `match({...})` becomes `{$match: {...}}`,
//! `gt("age", 18)` becomes `{age: {$gt: 18}}`, and `and`/`or` wrap their
//! conditions in `$and`/`$or` arrays.

use crate::environment::Environment;
use crate::evaluator::{throw_message, EvalResult};
use crate::stdlib::{check_arity, register, singleton, string_at};
use crate::value::Value;

pub fn install(env: &Environment) {
    // One-payload stages: stage(payload) => { $stage: payload }
    for stage in [
        "match",
        "project",
        "sort",
        "limit",
        "skip",
        "group",
        "addFields",
    ] {
        let key = format!("${}", stage);
        register(env, stage, move |_, _, args| {
            check_arity(stage, &args, 1)?;
            Ok(singleton(key.clone(), args[0].clone()))
        });
    }

    register(env, "count", |_, _, args| {
        check_arity("count", &args, 1)?;
        let name = string_at("count", &args, 0)?;
        Ok(singleton("$count", Value::Str(name)))
    });

    register(env, "lookup", native_lookup);
    register(env, "unwind", native_unwind);

    // Comparison builders: eq assigns directly, the rest wrap in {$op: v}.
    register(env, "eq", |_, _, args| {
        check_arity("eq", &args, 2)?;
        let field = string_at("eq", &args, 0)?;
        Ok(singleton(field, args[1].clone()))
    });
    for (name, op) in [
        ("ne", "$ne"),
        ("gt", "$gt"),
        ("gte", "$gte"),
        ("lt", "$lt"),
        ("lte", "$lte"),
    ] {
        register(env, name, move |_, _, args| {
            check_arity(name, &args, 2)?;
            let field = string_at(name, &args, 0)?;
            Ok(singleton(field, singleton(op, args[1].clone())))
        });
    }

    register(env, "and", |_, _, args| combine("and", "$and", args));
    register(env, "or", |_, _, args| combine("or", "$or", args));
}

/// `lookup` takes either a ready spec object or the four join strings
/// `(from, localField, foreignField, as)`.
fn native_lookup(
    _: &mut crate::evaluator::Interpreter,
    _: &Environment,
    args: Vec<Value>,
) -> EvalResult {
    match args.len() {
        1 => match &args[0] {
            spec @ Value::Object(_) => Ok(singleton("$lookup", spec.clone())),
            other => Err(throw_message(format!(
                "lookup() expects a spec object, got a {}",
                other.type_name()
            ))),
        },
        4 => {
            let mut map = linked_hash_map::LinkedHashMap::new();
            for (index, key) in ["from", "localField", "foreignField", "as"]
                .iter()
                .enumerate()
            {
                map.insert(key.to_string(), Value::Str(string_at("lookup", &args, index)?));
            }
            Ok(singleton("$lookup", Value::object(map)))
        }
        n => Err(throw_message(format!(
            "lookup() takes 1 spec object or 4 strings, got {} argument(s)",
            n
        ))),
    }
}

/// `unwind` takes a field path (auto-prefixed with `$`) or an options
/// object.
fn native_unwind(
    _: &mut crate::evaluator::Interpreter,
    _: &Environment,
    args: Vec<Value>,
) -> EvalResult {
    check_arity("unwind", &args, 1)?;
    match &args[0] {
        Value::Str(path) => {
            let path = if path.starts_with('$') {
                path.clone()
            } else {
                format!("${}", path)
            };
            Ok(singleton("$unwind", Value::Str(path)))
        }
        options @ Value::Object(_) => Ok(singleton("$unwind", options.clone())),
        other => Err(throw_message(format!(
            "unwind() expects a path string or an options object, got a {}",
            other.type_name()
        ))),
    }
}

/// `and`/`or` accept either varargs conditions or a single array of them.
fn combine(name: &str, key: &str, args: Vec<Value>) -> EvalResult {
    let conditions: Vec<Value> = match args.as_slice() {
        [Value::Array(items)] => items.borrow().clone(),
        _ => args,
    };
    if conditions.is_empty() {
        return Err(throw_message(format!(
            "{}() requires at least one condition",
            name
        )));
    }
    for condition in &conditions {
        if !matches!(condition, Value::Object(_)) {
            return Err(throw_message(format!(
                "{}() expects condition objects, got a {}",
                name,
                condition.type_name()
            )));
        }
    }
    Ok(singleton(key, Value::array(conditions)))
}
