//! Execution of the document-store DSL: the infix operators, the `update`
//! clause, the binding statements, and the `using mongo` scope.
//!
//! The lowering into plain documents lives in [`crate::dsl::query`] and
//! [`crate::convert`]; this module wires evaluated operands to the driver
//! and wraps results in operation chains. Driver failures become catchable
//! runtime exceptions carrying their message; misuse of the DSL itself
//! (wrong operand kinds, missing active database) is fatal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use linked_hash_map::LinkedHashMap;
use serde_json::Value as JsonValue;

use crate::ast::{Expr, MongoOp, UsingMongo};
use crate::convert::{plain_to_runtime, runtime_to_plain};
use crate::driver::{DriverError, FindOptions, UpdateOptions, UpdateOutcome};
use crate::environment::Environment;
use crate::evaluator::{EvalResult, Interpreter, RuntimeError, Signal};
use crate::value::{
    CollectionRef, DatabaseRef, FindDefaults, NativeFnData, OperationChain, Value,
};

/// A chain used as a plain value stands for its last result.
pub(crate) fn unwrap_chain(value: Value) -> Value {
    match value {
        Value::Operation(chain) => chain.last_result.borrow().clone(),
        other => other,
    }
}

fn dsl_error(msg: impl Into<String>) -> Signal {
    Signal::Fail(RuntimeError::DslError(msg.into()))
}

fn throw_driver(e: DriverError) -> Signal {
    // Host errors surface as catchable exceptions, coerced to strings.
    Signal::Throw(Value::Str(e.to_string()))
}

fn make_chain(collection: Value, result: Value) -> Value {
    Value::Operation(Rc::new(OperationChain {
        collection,
        last_result: RefCell::new(result),
    }))
}

/// Derives (and caches) the collection handle a database property names.
pub(crate) fn database_collection(db: &Rc<DatabaseRef>, name: &str) -> Value {
    if let Some(cached) = db.collections.borrow().get(name) {
        return cached.clone();
    }
    let value = Value::Collection(Rc::new(CollectionRef {
        name: name.to_string(),
        handle: db.handle.collection(name),
        defaults: RefCell::new(FindDefaults::default()),
    }));
    db.collections
        .borrow_mut()
        .insert(name.to_string(), value.clone());
    value
}

/// The database handle behind the active binding.
fn active_database_ref(
    interp: &Interpreter,
    env: &Environment,
) -> Result<Rc<DatabaseRef>, Signal> {
    let name = interp
        .dsl
        .active_database
        .clone()
        .ok_or_else(|| dsl_error("no active database; bind one with 'database' first"))?;
    match env.lookup_var(&name) {
        Ok(Value::Database(db)) => Ok(db),
        Ok(_) | Err(_) => Err(dsl_error(format!(
            "active database binding '{}' is stale",
            name
        ))),
    }
}

fn expect_collection(value: &Value, context: &str) -> Result<Rc<CollectionRef>, Signal> {
    match value {
        Value::Collection(col) => Ok(col.clone()),
        other => Err(dsl_error(format!(
            "{} must be a collection, got a {}",
            context,
            other.type_name()
        ))),
    }
}

/// A filter operand: `null` means the empty filter, anything else must be
/// an object.
fn filter_document(value: &Value, context: &str) -> Result<JsonValue, Signal> {
    match value {
        Value::Null => Ok(JsonValue::Object(serde_json::Map::new())),
        Value::Object(_) => document(value),
        other => Err(dsl_error(format!(
            "{} filter must be an object, got a {}",
            context,
            other.type_name()
        ))),
    }
}

fn document(value: &Value) -> Result<JsonValue, Signal> {
    runtime_to_plain(value).map_err(|msg| Signal::Fail(RuntimeError::TypeError(msg)))
}

fn find_options(col: &CollectionRef, with_limit: bool) -> FindOptions {
    let defaults = col.defaults.borrow();
    FindOptions {
        projection: defaults.projection.clone(),
        sort: defaults.sort.clone(),
        limit: if with_limit { defaults.limit } else { None },
    }
}

// ----------------------------------------------------------------------
// Operator execution
// ----------------------------------------------------------------------

pub(crate) fn eval_mongo_operation(
    interp: &mut Interpreter,
    op: MongoOp,
    target: &Expr,
    operand: &Expr,
    env: &Environment,
) -> EvalResult {
    let target = unwrap_chain(interp.eval_expr(target, env)?);
    let col = expect_collection(
        &target,
        &format!("left operand of '{}'", op.symbol()),
    )?;
    let operand = unwrap_chain(interp.eval_expr(operand, env)?);

    let result = match op {
        MongoOp::Insert => perform_insert(&col, &operand)?,
        MongoOp::DeleteOne => perform_delete(&col, &operand, false)?,
        MongoOp::DeleteMany => perform_delete(&col, &operand, true)?,
        MongoOp::FindOne => perform_find_one(&col, &operand)?,
        MongoOp::FindMany => perform_find_many(&col, &operand)?,
        MongoOp::Aggregate => perform_aggregate(&col, &operand)?,
    };
    Ok(make_chain(Value::Collection(col), result))
}

pub(crate) fn eval_mongo_update(
    interp: &mut Interpreter,
    target: &Expr,
    filter: &Expr,
    update: &Expr,
    options: Option<&Expr>,
    many: bool,
    env: &Environment,
) -> EvalResult {
    let target = unwrap_chain(interp.eval_expr(target, env)?);
    let col = expect_collection(&target, "update target")?;

    let filter = unwrap_chain(interp.eval_expr(filter, env)?);
    let update = unwrap_chain(interp.eval_expr(update, env)?);
    let options = match options {
        Some(expr) => Some(unwrap_chain(interp.eval_expr(expr, env)?)),
        None => None,
    };

    let result = perform_update(&col, &filter, &update, options.as_ref(), many)?;
    Ok(make_chain(Value::Collection(col), result))
}

fn perform_insert(col: &Rc<CollectionRef>, doc: &Value) -> EvalResult {
    match doc {
        Value::Array(items) => {
            let mut docs = Vec::new();
            for item in items.borrow().iter() {
                let item = unwrap_chain(item.clone());
                if !matches!(item, Value::Object(_)) {
                    return Err(dsl_error(format!(
                        "inserting an array requires every element to be an object, got a {}",
                        item.type_name()
                    )));
                }
                docs.push(document(&item)?);
            }
            let ids = col.handle.insert_many(docs).map_err(throw_driver)?;
            Ok(Value::array(ids.into_iter().map(Value::Str).collect()))
        }
        Value::Object(_) => {
            let id = col
                .handle
                .insert_one(document(doc)?)
                .map_err(throw_driver)?;
            Ok(Value::Str(id))
        }
        other => Err(dsl_error(format!(
            "cannot insert a {}",
            other.type_name()
        ))),
    }
}

fn perform_delete(col: &Rc<CollectionRef>, filter: &Value, many: bool) -> EvalResult {
    let filter = filter_document(filter, "delete")?;
    let count = if many {
        col.handle.delete_many(&filter).map_err(throw_driver)?
    } else {
        col.handle.delete_one(&filter).map_err(throw_driver)?
    };
    Ok(Value::Number(count as f64))
}

fn perform_find_one(col: &Rc<CollectionRef>, filter: &Value) -> EvalResult {
    let filter = filter_document(filter, "find")?;
    let options = find_options(col, false);
    let doc = col
        .handle
        .find_one(&filter, &options)
        .map_err(throw_driver)?;
    Ok(match doc {
        Some(doc) => plain_to_runtime(&doc),
        None => Value::Null,
    })
}

fn perform_find_many(col: &Rc<CollectionRef>, filter: &Value) -> EvalResult {
    let filter = filter_document(filter, "find")?;
    let options = find_options(col, true);
    let docs = col
        .handle
        .find_many(&filter, &options)
        .map_err(throw_driver)?;
    Ok(Value::array(docs.iter().map(plain_to_runtime).collect()))
}

fn perform_aggregate(col: &Rc<CollectionRef>, pipeline: &Value) -> EvalResult {
    let Value::Array(stages) = pipeline else {
        return Err(dsl_error(format!(
            "right operand of '|>' must be a pipeline array, got a {}",
            pipeline.type_name()
        )));
    };
    let mut plain = Vec::new();
    for stage in stages.borrow().iter() {
        plain.push(document(&unwrap_chain(stage.clone()))?);
    }
    let docs = col.handle.aggregate(&plain).map_err(throw_driver)?;
    Ok(Value::array(docs.iter().map(plain_to_runtime).collect()))
}

fn perform_update(
    col: &Rc<CollectionRef>,
    filter: &Value,
    update: &Value,
    options: Option<&Value>,
    many: bool,
) -> EvalResult {
    let filter = filter_document(filter, "update")?;

    if !matches!(update, Value::Object(_)) {
        return Err(dsl_error(format!(
            "update document must be an object, got a {}",
            update.type_name()
        )));
    }
    let mut update = document(update)?;
    // A document with no operator keys is shorthand for $set.
    let has_operators = update
        .as_object()
        .map(|m| m.keys().any(|k| k.starts_with('$')))
        .unwrap_or(false);
    if !has_operators {
        update = serde_json::json!({ "$set": update });
    }

    let mut update_options = UpdateOptions::default();
    if let Some(options) = options {
        let Value::Object(o) = options else {
            return Err(dsl_error(format!(
                "update options must be an object, got a {}",
                options.type_name()
            )));
        };
        if let Some(upsert) = o.borrow().properties.get("upsert") {
            update_options.upsert = upsert.is_truthy();
        }
    }

    let outcome = if many {
        col.handle
            .update_many(&filter, &update, &update_options)
            .map_err(throw_driver)?
    } else {
        col.handle
            .update_one(&filter, &update, &update_options)
            .map_err(throw_driver)?
    };
    Ok(outcome_value(outcome))
}

fn outcome_value(outcome: UpdateOutcome) -> Value {
    let mut map = LinkedHashMap::new();
    map.insert(
        "matchedCount".to_string(),
        Value::Number(outcome.matched_count as f64),
    );
    map.insert(
        "modifiedCount".to_string(),
        Value::Number(outcome.modified_count as f64),
    );
    map.insert(
        "upsertedCount".to_string(),
        Value::Number(outcome.upserted_count as f64),
    );
    map.insert(
        "upsertedId".to_string(),
        match outcome.upserted_id {
            Some(id) => Value::Str(id),
            None => Value::Null,
        },
    );
    if let Some(ids) = outcome.upserted_ids {
        map.insert(
            "upsertedIds".to_string(),
            Value::array(ids.into_iter().map(Value::Str).collect()),
        );
    }
    Value::object(map)
}

// ----------------------------------------------------------------------
// Operation chains
// ----------------------------------------------------------------------

/// Member access on an operation chain. The chain's own members win;
/// anything else falls through to the wrapped result, so `(col ? f).name`
/// reads the found document.
pub(crate) fn chain_member(
    interp: &mut Interpreter,
    chain: &Rc<OperationChain>,
    name: &str,
) -> EvalResult {
    match name {
        "value" => Ok(chain.last_result.borrow().clone()),
        "collection" => Ok(chain.collection.clone()),

        "unwrap" | "valueOf" => {
            let chain = chain.clone();
            Ok(Value::NativeFn(NativeFnData::new(name, move |_, _, args| {
                if !args.is_empty() {
                    return Err(crate::evaluator::throw_message(
                        "unwrap() takes no arguments",
                    ));
                }
                Ok(chain.last_result.borrow().clone())
            })))
        }

        "toJSON" => {
            let chain = chain.clone();
            Ok(Value::NativeFn(NativeFnData::new(name, move |_, _, args| {
                if !args.is_empty() {
                    return Err(crate::evaluator::throw_message(
                        "toJSON() takes no arguments",
                    ));
                }
                crate::output::to_json(&chain.last_result.borrow())
                    .map(Value::Str)
                    .map_err(crate::evaluator::throw_message)
            })))
        }

        "thenInsert" => chain_continuation(chain, name, |col, mut args| {
            perform_insert(col, &args.remove(0))
        }),
        "thenInsertMany" => chain_continuation(chain, name, |col, mut args| {
            let docs = args.remove(0);
            if !matches!(docs, Value::Array(_)) {
                return Err(dsl_error("thenInsertMany expects an array of documents"));
            }
            perform_insert(col, &docs)
        }),
        "thenDelete" => chain_filter_continuation(chain, name, |col, filter| {
            perform_delete(col, &filter, false)
        }),
        "thenDeleteMany" => chain_filter_continuation(chain, name, |col, filter| {
            perform_delete(col, &filter, true)
        }),
        "thenFind" => chain_filter_continuation(chain, name, |col, filter| {
            perform_find_one(col, &filter)
        }),
        "thenFindMany" => chain_filter_continuation(chain, name, |col, filter| {
            perform_find_many(col, &filter)
        }),
        "thenAggregate" => chain_continuation(chain, name, |col, mut args| {
            perform_aggregate(col, &args.remove(0))
        }),
        "thenUpdate" => chain_update_continuation(chain, name, false),
        "thenUpdateMany" => chain_update_continuation(chain, name, true),

        _ => {
            let inner = chain.last_result.borrow().clone();
            interp.get_member(inner, name)
        }
    }
}

fn chain_collection(chain: &OperationChain) -> Result<Rc<CollectionRef>, Signal> {
    expect_collection(&chain.collection, "operation chain collection")
}

/// A continuation taking exactly one argument.
fn chain_continuation(
    chain: &Rc<OperationChain>,
    name: &str,
    run: impl Fn(&Rc<CollectionRef>, Vec<Value>) -> EvalResult + 'static,
) -> EvalResult {
    let chain = chain.clone();
    let label = name.to_string();
    Ok(Value::NativeFn(NativeFnData::new(name, move |_, _, args| {
        if args.len() != 1 {
            return Err(crate::evaluator::throw_message(format!(
                "{}() takes exactly 1 argument, got {}",
                label,
                args.len()
            )));
        }
        let col = chain_collection(&chain)?;
        let args: Vec<Value> = args.into_iter().map(unwrap_chain).collect();
        let result = run(&col, args)?;
        Ok(make_chain(Value::Collection(col), result))
    })))
}

/// A continuation taking an optional filter argument (absent means the
/// empty filter).
fn chain_filter_continuation(
    chain: &Rc<OperationChain>,
    name: &str,
    run: impl Fn(&Rc<CollectionRef>, Value) -> EvalResult + 'static,
) -> EvalResult {
    let chain = chain.clone();
    let label = name.to_string();
    Ok(Value::NativeFn(NativeFnData::new(name, move |_, _, args| {
        if args.len() > 1 {
            return Err(crate::evaluator::throw_message(format!(
                "{}() takes at most 1 argument, got {}",
                label,
                args.len()
            )));
        }
        let filter = args
            .into_iter()
            .next()
            .map(unwrap_chain)
            .unwrap_or(Value::Null);
        let col = chain_collection(&chain)?;
        let result = run(&col, filter)?;
        Ok(make_chain(Value::Collection(col), result))
    })))
}

fn chain_update_continuation(chain: &Rc<OperationChain>, name: &str, many: bool) -> EvalResult {
    let chain = chain.clone();
    let label = name.to_string();
    Ok(Value::NativeFn(NativeFnData::new(name, move |_, _, args| {
        if args.len() < 2 || args.len() > 3 {
            return Err(crate::evaluator::throw_message(format!(
                "{}() takes a filter, an update, and optional options, got {} argument(s)",
                label,
                args.len()
            )));
        }
        let mut args = args.into_iter().map(unwrap_chain);
        let filter = args.next().unwrap();
        let update = args.next().unwrap();
        let options = args.next();
        let col = chain_collection(&chain)?;
        let result = perform_update(&col, &filter, &update, options.as_ref(), many)?;
        Ok(make_chain(Value::Collection(col), result))
    })))
}

// ----------------------------------------------------------------------
// DSL statements
// ----------------------------------------------------------------------

/// `database ident = expr;` — rebinds the active database, dropping any
/// prior database and collection bindings.
pub(crate) fn eval_database_statement(
    interp: &mut Interpreter,
    name: &str,
    value: &Expr,
    env: &Environment,
) -> EvalResult {
    let value = unwrap_chain(interp.eval_expr(value, env)?);
    if !matches!(value, Value::Database(_)) {
        return Err(dsl_error(format!(
            "'database' expects a database handle, got a {}",
            value.type_name()
        )));
    }

    if let Some(previous) = interp.dsl.active_database.take() {
        env.remove_var(&previous);
    }
    let stale: Vec<String> = interp.dsl.collections.drain().collect();
    for binding in stale {
        env.remove_var(&binding);
    }

    env.declare_var(name, value, true)?;
    interp.dsl.active_database = Some(name.to_string());
    Ok(Value::Null)
}

/// `collection ident [= expr];`
pub(crate) fn eval_collection_statement(
    interp: &mut Interpreter,
    name: &str,
    init: Option<&Expr>,
    env: &Environment,
) -> EvalResult {
    let value = match init {
        None => {
            let db = active_database_ref(interp, env)?;
            database_collection(&db, name)
        }
        Some(expr) => match unwrap_chain(interp.eval_expr(expr, env)?) {
            // A string initializer names the collection inside the active
            // database; the binding keeps the declared identifier.
            Value::Str(collection_name) => {
                let db = active_database_ref(interp, env)?;
                database_collection(&db, &collection_name)
            }
            value @ Value::Collection(_) => value,
            Value::Database(db) => database_collection(&db, name),
            other => {
                return Err(dsl_error(format!(
                    "'collection' expects a name, a collection, or a database, got a {}",
                    other.type_name()
                )))
            }
        },
    };

    env.declare_var(name, value, true)?;
    interp.dsl.collections.insert(name.to_string());
    Ok(Value::Null)
}

/// `use collection ident [with opts];`
pub(crate) fn eval_use_collection(
    interp: &mut Interpreter,
    name: &str,
    options: Option<&Expr>,
    env: &Environment,
) -> EvalResult {
    let value = match env.resolve(name) {
        Some(_) => match env.lookup_var(name)? {
            value @ Value::Collection(_) => value,
            other => {
                return Err(dsl_error(format!(
                    "'{}' is bound to a {}, not a collection",
                    name,
                    other.type_name()
                )))
            }
        },
        None => {
            let db = active_database_ref(interp, env)?;
            let value = database_collection(&db, name);
            env.declare_var(name, value.clone(), true)?;
            interp.dsl.collections.insert(name.to_string());
            value
        }
    };

    if let Some(options) = options {
        let options = unwrap_chain(interp.eval_expr(options, env)?);
        apply_find_defaults(&value, &options)?;
    }
    Ok(Value::Null)
}

/// Applies `with { projection, sort, limit, batchSize }` defaults to a
/// collection binding. Projections and sorts must be objects; limits and
/// batch sizes must be finite numbers.
fn apply_find_defaults(collection: &Value, options: &Value) -> Result<(), Signal> {
    let col = expect_collection(collection, "'with' target")?;
    let Value::Object(o) = options else {
        return Err(dsl_error(format!(
            "'with' options must be an object, got a {}",
            options.type_name()
        )));
    };

    let entries: Vec<(String, Value)> = o
        .borrow()
        .properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut defaults = col.defaults.borrow_mut();
    for (key, value) in entries {
        match key.as_str() {
            "projection" | "sort" => {
                if !matches!(value, Value::Object(_)) {
                    return Err(dsl_error(format!(
                        "'{}' default must be an object, got a {}",
                        key,
                        value.type_name()
                    )));
                }
                let plain = document(&value)?;
                if key == "projection" {
                    defaults.projection = Some(plain);
                } else {
                    defaults.sort = Some(plain);
                }
            }
            "limit" | "batchSize" => {
                let Value::Number(n) = value else {
                    return Err(dsl_error(format!(
                        "'{}' default must be a number, got a {}",
                        key,
                        value.type_name()
                    )));
                };
                if !n.is_finite() {
                    return Err(dsl_error(format!("'{}' default must be finite", key)));
                }
                if key == "limit" {
                    defaults.limit = Some(n as i64);
                } else {
                    defaults.batch_size = Some(n as i64);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// `using mongo from uri [database db] [as alias] [with opts] { body }`
///
/// Snapshots the DSL registry, connects, binds the alias as the active
/// database in a child scope, runs the body, and on every exit path closes
/// the connection (ignoring close errors) and restores the snapshot.
pub(crate) fn eval_using_mongo(
    interp: &mut Interpreter,
    using: &UsingMongo,
    env: &Environment,
) -> EvalResult {
    let uri = match unwrap_chain(interp.eval_expr(&using.uri, env)?) {
        Value::Str(uri) => uri,
        other => {
            return Err(dsl_error(format!(
                "'using mongo' uri must be a string, got a {}",
                other.type_name()
            )))
        }
    };
    let db_name = match &using.database {
        Some(expr) => match unwrap_chain(interp.eval_expr(expr, env)?) {
            Value::Str(name) => Some(name),
            other => {
                return Err(dsl_error(format!(
                    "'using mongo' database must be a string, got a {}",
                    other.type_name()
                )))
            }
        },
        None => None,
    };

    let snapshot = interp.dsl.snapshot();
    interp.dsl.clear();

    let handle = match interp.connector.connect(&uri, db_name.as_deref()) {
        Ok(handle) => handle,
        Err(e) => {
            interp.dsl.restore(snapshot);
            return Err(throw_driver(e));
        }
    };

    let db = Rc::new(DatabaseRef {
        name: handle.name(),
        uri: handle.uri(),
        handle,
        collections: RefCell::new(HashMap::new()),
    });

    let result = run_using_body(interp, using, env, &db);

    let _ = db.handle.close();
    interp.dsl.clear();
    interp.dsl.restore(snapshot);
    result
}

fn run_using_body(
    interp: &mut Interpreter,
    using: &UsingMongo,
    env: &Environment,
    db: &Rc<DatabaseRef>,
) -> EvalResult {
    let alias = using.alias.clone().unwrap_or_else(|| "db".to_string());
    let scope = env.child();
    scope.declare_var(&alias, Value::Database(db.clone()), true)?;
    interp.dsl.active_database = Some(alias);

    if let Some(options) = &using.options {
        let options = unwrap_chain(interp.eval_expr(options, &scope)?);
        let Value::Object(o) = &options else {
            return Err(dsl_error(format!(
                "'using mongo' options must be an object, got a {}",
                options.type_name()
            )));
        };

        let collections = o.borrow().properties.get("collections").cloned();
        if let Some(Value::Object(listed)) = collections {
            let entries: Vec<(String, Value)> = listed
                .borrow()
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (name, config) in entries {
                let collection = database_collection(db, &name);
                scope.declare_var(&name, collection.clone(), true)?;
                interp.dsl.collections.insert(name);
                if matches!(config, Value::Object(_)) {
                    apply_find_defaults(&collection, &config)?;
                }
            }
        }
    }

    interp.eval_block_value(&using.body, &scope)
}
