//! The native function library installed into the global environment.
//!
//! Every native validates its arity and argument kinds up front and raises
//! a catchable runtime exception with a readable message on mismatch.

pub mod stages;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use linked_hash_map::LinkedHashMap;

use crate::environment::Environment;
use crate::evaluator::{throw_message, EvalResult, Interpreter, RuntimeError, Signal};
use crate::output;
use crate::value::{
    deep_clone, shallow_clone, DatabaseRef, NativeFnData, PromiseState, Value,
};

/// Declares the global constants and every native function.
pub fn install(env: &Environment) {
    env.declare_var("true", Value::Boolean(true), true)
        .expect("fresh globals");
    env.declare_var("false", Value::Boolean(false), true)
        .expect("fresh globals");
    env.declare_var("null", Value::Null, true)
        .expect("fresh globals");

    register(env, "print", native_print);
    register(env, "time", native_time);
    register(env, "sleep", native_sleep);
    register(env, "showASTNode", native_show_ast_node);
    register(env, "typeOf", native_type_of);
    register(env, "inspect", native_inspect);
    register(env, "assert", native_assert);

    register(env, "abs", |_, _, args| {
        Ok(Value::Number(number_arg("abs", &args, 0, 1)?.abs()))
    });
    register(env, "sqrt", |_, _, args| {
        Ok(Value::Number(number_arg("sqrt", &args, 0, 1)?.sqrt()))
    });
    register(env, "pow", |_, _, args| {
        check_arity("pow", &args, 2)?;
        let base = number_at("pow", &args, 0)?;
        let exponent = number_at("pow", &args, 1)?;
        Ok(Value::Number(base.powf(exponent)))
    });
    register(env, "max", |_, _, args| fold_numbers("max", args, f64::max));
    register(env, "min", |_, _, args| fold_numbers("min", args, f64::min));
    register(env, "clamp", |_, _, args| {
        check_arity("clamp", &args, 3)?;
        let x = number_at("clamp", &args, 0)?;
        let lo = number_at("clamp", &args, 1)?;
        let hi = number_at("clamp", &args, 2)?;
        Ok(Value::Number(x.max(lo).min(hi)))
    });
    register(env, "round", |_, _, args| {
        Ok(Value::Number(number_arg("round", &args, 0, 1)?.round()))
    });
    register(env, "floor", |_, _, args| {
        Ok(Value::Number(number_arg("floor", &args, 0, 1)?.floor()))
    });
    register(env, "ceil", |_, _, args| {
        Ok(Value::Number(number_arg("ceil", &args, 0, 1)?.ceil()))
    });

    register(env, "strlen", |_, _, args| {
        check_arity("strlen", &args, 1)?;
        let s = string_at("strlen", &args, 0)?;
        Ok(Value::Number(s.chars().count() as f64))
    });
    register(env, "uppercase", |_, _, args| {
        check_arity("uppercase", &args, 1)?;
        Ok(Value::Str(string_at("uppercase", &args, 0)?.to_uppercase()))
    });
    register(env, "lowercase", |_, _, args| {
        check_arity("lowercase", &args, 1)?;
        Ok(Value::Str(string_at("lowercase", &args, 0)?.to_lowercase()))
    });
    register(env, "contains", native_contains);
    register(env, "split", native_split);
    register(env, "trim", |_, _, args| {
        check_arity("trim", &args, 1)?;
        Ok(Value::Str(string_at("trim", &args, 0)?.trim().to_string()))
    });
    register(env, "toNumber", native_to_number);
    register(env, "toString", |_, _, args| {
        check_arity("toString", &args, 1)?;
        Ok(Value::Str(args[0].stringify()))
    });

    register(env, "keys", native_keys);
    register(env, "values", native_values);
    register(env, "entries", native_entries);
    register(env, "len", native_len);
    register(env, "clone", |_, _, args| {
        check_arity("clone", &args, 1)?;
        Ok(shallow_clone(&args[0]))
    });
    register(env, "deepClone", |_, _, args| {
        check_arity("deepClone", &args, 1)?;
        Ok(deep_clone(&args[0]))
    });

    register_log(env, "debug");
    register_log(env, "info");
    register_log(env, "warn");
    register_log(env, "error");

    register(env, "schemaInfo", native_schema_info);
    register(env, "env", native_env);
    register(env, "uuid", |_, _, args| {
        check_arity("uuid", &args, 0)?;
        Ok(Value::Str(uuid::Uuid::new_v4().to_string()))
    });
    register(env, "schedule", native_schedule);
    register(env, "connect", native_connect);
    register(env, "disconnect", native_disconnect);

    stages::install(env);
}

pub(crate) fn register(
    env: &Environment,
    name: &str,
    f: impl Fn(&mut Interpreter, &Environment, Vec<Value>) -> EvalResult + 'static,
) {
    env.declare_var(name, Value::NativeFn(NativeFnData::new(name, f)), true)
        .expect("native registered twice");
}

fn register_log(env: &Environment, level: &'static str) {
    register(env, level, move |interp, _, args| {
        let parts: Vec<String> = args.iter().map(Value::stringify).collect();
        interp.emit(&format!("[{}] {}\n", level, parts.join(" ")));
        Ok(Value::Null)
    });
}

// ----------------------------------------------------------------------
// Argument validation helpers
// ----------------------------------------------------------------------

pub(crate) fn check_arity(name: &str, args: &[Value], expected: usize) -> Result<(), Signal> {
    if args.len() != expected {
        return Err(throw_message(format!(
            "{}() takes exactly {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_arity_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), Signal> {
    if args.len() < min || args.len() > max {
        return Err(throw_message(format!(
            "{}() takes between {} and {} argument(s), got {}",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn number_at(name: &str, args: &[Value], index: usize) -> Result<f64, Signal> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        Some(other) => Err(throw_message(format!(
            "{}() expects a number for argument {}, got a {}",
            name,
            index + 1,
            other.type_name()
        ))),
        None => Err(throw_message(format!(
            "{}() is missing argument {}",
            name,
            index + 1
        ))),
    }
}

/// Validates arity, then reads one numeric argument.
fn number_arg(name: &str, args: &[Value], index: usize, arity: usize) -> Result<f64, Signal> {
    check_arity(name, args, arity)?;
    number_at(name, args, index)
}

pub(crate) fn string_at(name: &str, args: &[Value], index: usize) -> Result<String, Signal> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.clone()),
        Some(other) => Err(throw_message(format!(
            "{}() expects a string for argument {}, got a {}",
            name,
            index + 1,
            other.type_name()
        ))),
        None => Err(throw_message(format!(
            "{}() is missing argument {}",
            name,
            index + 1
        ))),
    }
}

// ----------------------------------------------------------------------
// Core natives
// ----------------------------------------------------------------------

fn native_print(interp: &mut Interpreter, _env: &Environment, args: Vec<Value>) -> EvalResult {
    let parts: Vec<String> = args.iter().map(Value::stringify).collect();
    interp.emit(&format!("{}\n", parts.join(" ")));
    Ok(Value::Null)
}

fn native_time(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("time", &args, 0)?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    Ok(Value::Number(millis as f64))
}

fn native_sleep(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("sleep", &args, 1)?;
    let ms = number_at("sleep", &args, 0)?;
    if !ms.is_finite() || ms < 0.0 {
        return Err(throw_message("sleep() expects a non-negative duration"));
    }
    Ok(Value::Promise(Rc::new(RefCell::new(PromiseState::Timer {
        due: Instant::now() + Duration::from_millis(ms as u64),
        value: Value::Null,
    }))))
}

fn native_show_ast_node(
    interp: &mut Interpreter,
    _env: &Environment,
    args: Vec<Value>,
) -> EvalResult {
    check_arity("showASTNode", &args, 1)?;
    let rendered = match &args[0] {
        Value::Function(f) => {
            let params: Vec<String> = f.params.iter().map(|p| p.name.clone()).collect();
            format!(
                "func {}({}) {{ {} statement(s) }}",
                f.name,
                params.join(", "),
                f.body.len()
            )
        }
        other => output::inspect(other),
    };
    interp.emit(&format!("{}\n", rendered));
    Ok(Value::Null)
}

fn native_type_of(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("typeOf", &args, 1)?;
    let tag = match &args[0] {
        Value::Object(o) => match &o.borrow().schema_name {
            Some(schema) => schema.clone(),
            None => "object".to_string(),
        },
        Value::Class(c) => c.name.clone(),
        other => other.type_name().to_string(),
    };
    Ok(Value::Str(tag))
}

fn native_inspect(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("inspect", &args, 1)?;
    Ok(Value::Str(output::inspect(&args[0])))
}

fn native_assert(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity_range("assert", &args, 1, 2)?;
    if args[0].is_truthy() {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(v) => v.stringify(),
        None => "assertion failed".to_string(),
    };
    Err(Signal::Throw(Value::Str(message)))
}

fn fold_numbers(name: &str, args: Vec<Value>, pick: fn(f64, f64) -> f64) -> EvalResult {
    // Accepts either varargs or a single array of numbers.
    let numbers: Vec<Value> = match args.as_slice() {
        [Value::Array(items)] => items.borrow().clone(),
        _ => args,
    };
    if numbers.is_empty() {
        return Err(throw_message(format!(
            "{}() requires at least one number",
            name
        )));
    }
    let mut best: Option<f64> = None;
    for value in &numbers {
        let Value::Number(n) = value else {
            return Err(throw_message(format!(
                "{}() expects numbers, got a {}",
                name,
                value.type_name()
            )));
        };
        best = Some(match best {
            Some(b) => pick(b, *n),
            None => *n,
        });
    }
    Ok(Value::Number(best.unwrap()))
}

fn native_contains(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("contains", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Str(haystack), Value::Str(needle)) => {
            Ok(Value::Boolean(haystack.contains(needle.as_str())))
        }
        (Value::Array(items), needle) => Ok(Value::Boolean(
            items.borrow().iter().any(|item| item.equals(needle)),
        )),
        (Value::Object(o), Value::Str(key)) => {
            Ok(Value::Boolean(o.borrow().properties.contains_key(key)))
        }
        (a, b) => Err(throw_message(format!(
            "contains() cannot search a {} for a {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn native_split(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("split", &args, 2)?;
    let s = string_at("split", &args, 0)?;
    let sep = string_at("split", &args, 1)?;
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        s.split(sep.as_str())
            .map(|p| Value::Str(p.to_string()))
            .collect()
    };
    Ok(Value::array(parts))
}

fn native_to_number(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("toNumber", &args, 1)?;
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Boolean(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        Value::Null => Ok(Value::Number(0.0)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| throw_message(format!("toNumber() cannot parse \"{}\"", s))),
        other => Err(throw_message(format!(
            "toNumber() cannot convert a {}",
            other.type_name()
        ))),
    }
}

fn object_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a Value, Signal> {
    match args.get(index) {
        Some(value @ Value::Object(_)) => Ok(value),
        Some(other) => Err(throw_message(format!(
            "{}() expects an object, got a {}",
            name,
            other.type_name()
        ))),
        None => Err(throw_message(format!(
            "{}() is missing argument {}",
            name,
            index + 1
        ))),
    }
}

fn native_keys(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("keys", &args, 1)?;
    let Value::Object(o) = object_arg("keys", &args, 0)? else {
        unreachable!()
    };
    let keys: Vec<Value> = o
        .borrow()
        .properties
        .keys()
        .map(|k| Value::Str(k.clone()))
        .collect();
    Ok(Value::array(keys))
}

fn native_values(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("values", &args, 1)?;
    let Value::Object(o) = object_arg("values", &args, 0)? else {
        unreachable!()
    };
    let values: Vec<Value> = o.borrow().properties.values().cloned().collect();
    Ok(Value::array(values))
}

fn native_entries(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("entries", &args, 1)?;
    let Value::Object(o) = object_arg("entries", &args, 0)? else {
        unreachable!()
    };
    let entries: Vec<Value> = o
        .borrow()
        .properties
        .iter()
        .map(|(k, v)| Value::array(vec![Value::Str(k.clone()), v.clone()]))
        .collect();
    Ok(Value::array(entries))
}

fn native_len(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("len", &args, 1)?;
    let n = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::Array(items) => items.borrow().len(),
        Value::Object(o) => o.borrow().properties.len(),
        other => {
            return Err(throw_message(format!(
                "len() expects a string, array, or object, got a {}",
                other.type_name()
            )))
        }
    };
    Ok(Value::Number(n as f64))
}

fn native_schema_info(_: &mut Interpreter, env: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("schemaInfo", &args, 1)?;
    match &args[0] {
        Value::Class(class) => Ok(crate::evaluator::class::class_info(class, None)),
        Value::Object(instance) => {
            let schema = instance.borrow().schema_name.clone().ok_or_else(|| {
                throw_message("schemaInfo() expects a schema or a schema instance")
            })?;
            match env.lookup_var(&schema) {
                Ok(Value::Class(class)) => {
                    Ok(crate::evaluator::class::class_info(&class, Some(instance)))
                }
                _ => Err(throw_message(format!(
                    "schemaInfo() cannot resolve schema '{}'",
                    schema
                ))),
            }
        }
        other => Err(throw_message(format!(
            "schemaInfo() expects a schema or a schema instance, got a {}",
            other.type_name()
        ))),
    }
}

fn native_env(_: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity("env", &args, 1)?;
    let name = string_at("env", &args, 0)?;
    match std::env::var(&name) {
        Ok(value) => Ok(Value::Str(value)),
        Err(_) => Ok(Value::Null),
    }
}

fn native_schedule(interp: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity_range("schedule", &args, 2, 3)?;
    let delay = number_at("schedule", &args, 0)?;
    let callee = args[1].clone();
    if !matches!(callee, Value::Function(_) | Value::NativeFn(_)) {
        return Err(throw_message(format!(
            "schedule() expects a callable, got a {}",
            callee.type_name()
        )));
    }

    // The argument snapshot is deep-cloned so later mutation does not leak
    // into the deferred call.
    let call_args: Vec<Value> = match args.get(2) {
        Some(Value::Array(items)) => items.borrow().iter().map(deep_clone).collect(),
        Some(other) => {
            return Err(throw_message(format!(
                "schedule() expects an array of arguments, got a {}",
                other.type_name()
            )))
        }
        None => Vec::new(),
    };

    let id = interp.scheduler.schedule(delay, callee, call_args);
    Ok(Value::Number(id as f64))
}

fn native_connect(interp: &mut Interpreter, _: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity_range("connect", &args, 1, 2)?;
    let uri = string_at("connect", &args, 0)?;
    let db_name = match args.get(1) {
        Some(Value::Str(name)) => Some(name.clone()),
        Some(other) => {
            return Err(throw_message(format!(
                "connect() expects a database name string, got a {}",
                other.type_name()
            )))
        }
        None => None,
    };

    let handle = interp
        .connector
        .connect(&uri, db_name.as_deref())
        .map_err(|e| Signal::Throw(Value::Str(e.to_string())))?;
    let db = Value::Database(Rc::new(DatabaseRef {
        name: handle.name(),
        uri: handle.uri(),
        handle,
        collections: RefCell::new(HashMap::new()),
    }));
    Ok(Value::resolved_promise(db))
}

fn native_disconnect(interp: &mut Interpreter, env: &Environment, args: Vec<Value>) -> EvalResult {
    check_arity_range("disconnect", &args, 0, 1)?;

    let target = match args.into_iter().next() {
        Some(Value::Database(db)) => Some(db),
        Some(other) => {
            return Err(throw_message(format!(
                "disconnect() expects a database handle, got a {}",
                other.type_name()
            )))
        }
        None => None,
    };

    let active_name = interp.dsl.active_database.clone();
    let active_db = active_name.as_ref().and_then(|name| match env.lookup_var(name) {
        Ok(Value::Database(db)) => Some(db),
        _ => None,
    });

    let (db, is_active) = match target {
        Some(db) => {
            let is_active = active_db
                .as_ref()
                .map(|a| Rc::ptr_eq(a, &db))
                .unwrap_or(false);
            (db, is_active)
        }
        None => {
            // Bare disconnect refers to the active database binding.
            let Some(name) = active_name.clone() else {
                return Err(Signal::Fail(RuntimeError::DslError(
                    "disconnect() with no argument requires an active database".to_string(),
                )));
            };
            let db = active_db.ok_or_else(|| {
                Signal::Fail(RuntimeError::DslError(format!(
                    "active database binding '{}' is stale",
                    name
                )))
            })?;
            (db, true)
        }
    };

    let _ = db.handle.close();
    if is_active {
        if let Some(name) = active_name {
            env.remove_var(&name);
        }
        let bindings: Vec<String> = interp.dsl.collections.drain().collect();
        for binding in bindings {
            env.remove_var(&binding);
        }
        interp.dsl.clear();
    }
    Ok(Value::Null)
}

/// Builds a single-entry object, the shape most stage helpers return.
pub(crate) fn singleton(key: impl Into<String>, value: Value) -> Value {
    let mut map = LinkedHashMap::new();
    map.insert(key.into(), value);
    Value::object(map)
}
