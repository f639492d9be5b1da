//! In-process document store backing the default connector.
//!
//! Every logical operation of [`CollectionHandle`] is implemented against
//! plain `serde_json` documents, including filter matching, update
//! operators, and the common aggregation stages, so scripts run end-to-end
//! without a network driver.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::{json, Map, Value as JsonValue};

use crate::driver::{
    CollectionHandle, Connector, DatabaseHandle, DriverError, FindOptions, UpdateOptions,
    UpdateOutcome,
};

/// Connector for `memory://` URIs (and the default when no scheme is
/// given). Databases are shared per (uri, name) pair within the process.
#[derive(Default)]
pub struct MemoryConnector {
    databases: RefCell<HashMap<(String, String), Rc<MemoryDatabase>>>,
}

impl MemoryConnector {
    pub fn new() -> MemoryConnector {
        MemoryConnector::default()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        uri: &str,
        db_name: Option<&str>,
    ) -> Result<Rc<dyn DatabaseHandle>, DriverError> {
        let name = db_name
            .map(str::to_string)
            .or_else(|| database_from_uri(uri))
            .unwrap_or_else(|| "test".to_string());

        let key = (uri.to_string(), name.clone());
        let mut databases = self.databases.borrow_mut();
        let db = databases
            .entry(key)
            .or_insert_with(|| MemoryDatabase::new(name, uri.to_string()))
            .clone();
        Ok(db)
    }
}

/// The trailing path segment of a URI, when present: `memory://host/mydb`.
fn database_from_uri(uri: &str) -> Option<String> {
    let rest = uri.split_once("://").map(|(_, r)| r).unwrap_or(uri);
    let path = rest.split_once('/').map(|(_, p)| p)?;
    let name = path.split(&['?', '/'][..]).next().unwrap_or("");
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

pub struct MemoryDatabase {
    name: String,
    uri: String,
    weak_self: RefCell<Weak<MemoryDatabase>>,
    collections: RefCell<HashMap<String, Rc<MemoryCollection>>>,
}

impl MemoryDatabase {
    pub fn new(name: String, uri: String) -> Rc<MemoryDatabase> {
        let db = Rc::new(MemoryDatabase {
            name,
            uri,
            weak_self: RefCell::new(Weak::new()),
            collections: RefCell::new(HashMap::new()),
        });
        *db.weak_self.borrow_mut() = Rc::downgrade(&db);
        db
    }

    fn memory_collection(&self, name: &str) -> Rc<MemoryCollection> {
        self.collections
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| {
                Rc::new(MemoryCollection {
                    database: self.weak_self.borrow().clone(),
                    docs: RefCell::new(Vec::new()),
                })
            })
            .clone()
    }
}

impl DatabaseHandle for MemoryDatabase {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn uri(&self) -> String {
        self.uri.clone()
    }

    fn collection(&self, name: &str) -> Rc<dyn CollectionHandle> {
        self.memory_collection(name)
    }

    fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

pub struct MemoryCollection {
    database: Weak<MemoryDatabase>,
    docs: RefCell<Vec<JsonValue>>,
}

fn generated_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..24].to_string()
}

impl CollectionHandle for MemoryCollection {
    fn find_one(
        &self,
        filter: &JsonValue,
        options: &FindOptions,
    ) -> Result<Option<JsonValue>, DriverError> {
        let mut limited = options.clone();
        limited.limit = Some(1);
        Ok(self.find_many(filter, &limited)?.into_iter().next())
    }

    fn find_many(
        &self,
        filter: &JsonValue,
        options: &FindOptions,
    ) -> Result<Vec<JsonValue>, DriverError> {
        let mut results = Vec::new();
        for doc in self.docs.borrow().iter() {
            if matches(doc, filter)? {
                results.push(doc.clone());
            }
        }
        if let Some(sort) = &options.sort {
            sort_docs(&mut results, sort);
        }
        if let Some(limit) = options.limit {
            if limit >= 0 {
                results.truncate(limit as usize);
            }
        }
        if let Some(projection) = &options.projection {
            results = results
                .iter()
                .map(|d| apply_projection(d, projection))
                .collect();
        }
        Ok(results)
    }

    fn insert_one(&self, mut doc: JsonValue) -> Result<String, DriverError> {
        let map = doc
            .as_object_mut()
            .ok_or_else(|| DriverError::OperationFailed("can only insert objects".to_string()))?;
        let id = match map.get("_id") {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                let id = generated_id();
                map.insert("_id".to_string(), JsonValue::String(id.clone()));
                id
            }
        };
        self.docs.borrow_mut().push(doc);
        Ok(id)
    }

    fn insert_many(&self, docs: Vec<JsonValue>) -> Result<Vec<String>, DriverError> {
        docs.into_iter().map(|d| self.insert_one(d)).collect()
    }

    fn update_one(
        &self,
        filter: &JsonValue,
        update: &JsonValue,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, DriverError> {
        self.run_update(filter, update, options, false)
    }

    fn update_many(
        &self,
        filter: &JsonValue,
        update: &JsonValue,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, DriverError> {
        self.run_update(filter, update, options, true)
    }

    fn delete_one(&self, filter: &JsonValue) -> Result<u64, DriverError> {
        let mut docs = self.docs.borrow_mut();
        for (i, doc) in docs.iter().enumerate() {
            if matches(doc, filter)? {
                docs.remove(i);
                return Ok(1);
            }
        }
        Ok(0)
    }

    fn delete_many(&self, filter: &JsonValue) -> Result<u64, DriverError> {
        let mut docs = self.docs.borrow_mut();
        let before = docs.len();
        let mut kept = Vec::with_capacity(before);
        for doc in docs.drain(..) {
            if matches(&doc, filter)? {
                continue;
            }
            kept.push(doc);
        }
        let removed = before - kept.len();
        *docs = kept;
        Ok(removed as u64)
    }

    fn count_documents(&self, filter: &JsonValue) -> Result<u64, DriverError> {
        let mut count = 0;
        for doc in self.docs.borrow().iter() {
            if matches(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn aggregate(&self, pipeline: &[JsonValue]) -> Result<Vec<JsonValue>, DriverError> {
        let mut docs: Vec<JsonValue> = self.docs.borrow().clone();
        for stage in pipeline {
            docs = self.run_stage(docs, stage)?;
        }
        Ok(docs)
    }
}

impl MemoryCollection {
    fn run_update(
        &self,
        filter: &JsonValue,
        update: &JsonValue,
        options: &UpdateOptions,
        many: bool,
    ) -> Result<UpdateOutcome, DriverError> {
        let mut outcome = UpdateOutcome::default();
        let mut docs = self.docs.borrow_mut();

        for doc in docs.iter_mut() {
            if !matches(doc, filter)? {
                continue;
            }
            outcome.matched_count += 1;
            let before = doc.clone();
            apply_update(doc, update)?;
            if *doc != before {
                outcome.modified_count += 1;
            }
            if !many {
                break;
            }
        }

        if outcome.matched_count == 0 && options.upsert {
            let mut doc = upsert_seed(filter);
            apply_update(&mut doc, update)?;
            let map = doc.as_object_mut().expect("upsert seed is an object");
            let id = match map.get("_id") {
                Some(JsonValue::String(s)) => s.clone(),
                _ => {
                    let id = generated_id();
                    map.insert("_id".to_string(), JsonValue::String(id.clone()));
                    id
                }
            };
            docs.push(doc);
            outcome.upserted_count = 1;
            if many {
                outcome.upserted_ids = Some(vec![id]);
            } else {
                outcome.upserted_id = Some(id);
            }
        }

        Ok(outcome)
    }

    fn run_stage(
        &self,
        docs: Vec<JsonValue>,
        stage: &JsonValue,
    ) -> Result<Vec<JsonValue>, DriverError> {
        let obj = stage.as_object().ok_or_else(|| {
            DriverError::OperationFailed("pipeline stages must be objects".to_string())
        })?;
        let (name, payload) = obj.iter().next().ok_or_else(|| {
            DriverError::OperationFailed("empty pipeline stage".to_string())
        })?;

        match name.as_str() {
            "$match" => {
                let mut out = Vec::new();
                for doc in docs {
                    if matches(&doc, payload)? {
                        out.push(doc);
                    }
                }
                Ok(out)
            }
            "$project" => Ok(docs.iter().map(|d| apply_projection(d, payload)).collect()),
            "$sort" => {
                let mut out = docs;
                sort_docs(&mut out, payload);
                Ok(out)
            }
            "$limit" => {
                let n = payload.as_f64().unwrap_or(0.0).max(0.0) as usize;
                let mut out = docs;
                out.truncate(n);
                Ok(out)
            }
            "$skip" => {
                let n = payload.as_f64().unwrap_or(0.0).max(0.0) as usize;
                Ok(docs.into_iter().skip(n).collect())
            }
            "$count" => {
                let field = payload.as_str().unwrap_or("count");
                Ok(vec![json!({ field: docs.len() })])
            }
            "$group" => group_docs(docs, payload),
            "$addFields" => {
                let fields = payload.as_object().ok_or_else(|| {
                    DriverError::OperationFailed("$addFields expects an object".to_string())
                })?;
                let mut out = Vec::new();
                for mut doc in docs {
                    for (k, spec) in fields {
                        let value = eval_ref(&doc, spec);
                        set_path(&mut doc, k, value);
                    }
                    out.push(doc);
                }
                Ok(out)
            }
            "$unwind" => {
                let path = match payload {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Object(o) => o
                        .get("path")
                        .and_then(|p| p.as_str())
                        .map(str::to_string)
                        .ok_or_else(|| {
                            DriverError::OperationFailed("$unwind requires a path".to_string())
                        })?,
                    _ => {
                        return Err(DriverError::OperationFailed(
                            "$unwind expects a path string or an options object".to_string(),
                        ))
                    }
                };
                let path = path.trim_start_matches('$');
                let mut out = Vec::new();
                for doc in docs {
                    match get_path(&doc, path) {
                        Some(JsonValue::Array(items)) => {
                            for item in items.clone() {
                                let mut copy = doc.clone();
                                set_path(&mut copy, path, item);
                                out.push(copy);
                            }
                        }
                        Some(JsonValue::Null) | None => {}
                        Some(_) => out.push(doc),
                    }
                }
                Ok(out)
            }
            "$lookup" => self.lookup_stage(docs, payload),
            other => Err(DriverError::OperationFailed(format!(
                "unsupported pipeline stage '{}'",
                other
            ))),
        }
    }

    fn lookup_stage(
        &self,
        docs: Vec<JsonValue>,
        payload: &JsonValue,
    ) -> Result<Vec<JsonValue>, DriverError> {
        let spec = payload.as_object().ok_or_else(|| {
            DriverError::OperationFailed("$lookup expects an object".to_string())
        })?;
        let field = |key: &str| -> Result<String, DriverError> {
            spec.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    DriverError::OperationFailed(format!("$lookup requires a '{}' string", key))
                })
        };
        let from = field("from")?;
        let local_field = field("localField")?;
        let foreign_field = field("foreignField")?;
        let as_field = field("as")?;

        let database = self.database.upgrade().ok_or_else(|| {
            DriverError::OperationFailed("database handle is gone".to_string())
        })?;
        let foreign = database.memory_collection(&from);
        let foreign_docs = foreign.docs.borrow().clone();

        let mut out = Vec::new();
        for mut doc in docs {
            let local = get_path(&doc, &local_field).cloned().unwrap_or(JsonValue::Null);
            let matched: Vec<JsonValue> = foreign_docs
                .iter()
                .filter(|f| {
                    get_path(f, &foreign_field).cloned().unwrap_or(JsonValue::Null) == local
                })
                .cloned()
                .collect();
            set_path(&mut doc, &as_field, JsonValue::Array(matched));
            out.push(doc);
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------
// Filter matching
// ----------------------------------------------------------------------

/// Whether `doc` satisfies `filter`. Supports implicit field equality,
/// comparator objects, `$and`, and `$or`.
pub fn matches(doc: &JsonValue, filter: &JsonValue) -> Result<bool, DriverError> {
    let conditions = filter
        .as_object()
        .ok_or_else(|| DriverError::OperationFailed("filter must be an object".to_string()))?;

    for (key, cond) in conditions {
        match key.as_str() {
            "$and" => {
                let clauses = cond.as_array().ok_or_else(|| {
                    DriverError::OperationFailed("$and expects an array".to_string())
                })?;
                for clause in clauses {
                    if !matches(doc, clause)? {
                        return Ok(false);
                    }
                }
            }
            "$or" => {
                let clauses = cond.as_array().ok_or_else(|| {
                    DriverError::OperationFailed("$or expects an array".to_string())
                })?;
                let mut any = false;
                for clause in clauses {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                if !any {
                    return Ok(false);
                }
            }
            _ => {
                let field = get_path(doc, key);
                if is_comparator_object(cond) {
                    for (op, operand) in cond.as_object().unwrap() {
                        if !apply_comparator(field, op, operand)? {
                            return Ok(false);
                        }
                    }
                } else {
                    let actual = field.cloned().unwrap_or(JsonValue::Null);
                    if actual != *cond {
                        return Ok(false);
                    }
                }
            }
        }
    }
    Ok(true)
}

/// An object whose keys all start with `$` is a comparator bundle rather
/// than a literal value.
fn is_comparator_object(v: &JsonValue) -> bool {
    match v.as_object() {
        Some(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        None => false,
    }
}

fn apply_comparator(
    field: Option<&JsonValue>,
    op: &str,
    operand: &JsonValue,
) -> Result<bool, DriverError> {
    let actual = field.cloned().unwrap_or(JsonValue::Null);
    match op {
        "$eq" => Ok(actual == *operand),
        "$ne" => Ok(actual != *operand),
        "$lt" => Ok(json_cmp(&actual, operand) == Some(Ordering::Less)),
        "$lte" => Ok(matches!(
            json_cmp(&actual, operand),
            Some(Ordering::Less) | Some(Ordering::Equal)
        )),
        "$gt" => Ok(json_cmp(&actual, operand) == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(
            json_cmp(&actual, operand),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        )),
        "$in" => match operand.as_array() {
            Some(items) => Ok(items.contains(&actual)),
            None => Err(DriverError::OperationFailed(
                "$in expects an array".to_string(),
            )),
        },
        "$nin" => match operand.as_array() {
            Some(items) => Ok(!items.contains(&actual)),
            None => Err(DriverError::OperationFailed(
                "$nin expects an array".to_string(),
            )),
        },
        "$exists" => {
            let wanted = operand.as_bool().unwrap_or(true);
            Ok(field.is_some() == wanted)
        }
        other => Err(DriverError::OperationFailed(format!(
            "unsupported query operator '{}'",
            other
        ))),
    }
}

fn json_cmp(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64())
        }
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Update operators
// ----------------------------------------------------------------------

fn apply_update(doc: &mut JsonValue, update: &JsonValue) -> Result<(), DriverError> {
    let ops = update
        .as_object()
        .ok_or_else(|| DriverError::OperationFailed("update must be an object".to_string()))?;

    for (op, payload) in ops {
        let entries = payload.as_object().ok_or_else(|| {
            DriverError::OperationFailed(format!("{} expects an object", op))
        })?;
        match op.as_str() {
            "$set" => {
                for (path, v) in entries {
                    set_path(doc, path, v.clone());
                }
            }
            "$unset" => {
                for path in entries.keys() {
                    remove_path(doc, path);
                }
            }
            "$inc" | "$mul" => {
                for (path, v) in entries {
                    let delta = v.as_f64().ok_or_else(|| {
                        DriverError::OperationFailed(format!("{} expects numbers", op))
                    })?;
                    let current = get_path(doc, path).and_then(|x| x.as_f64()).unwrap_or(0.0);
                    let next = if op == "$inc" {
                        current + delta
                    } else {
                        current * delta
                    };
                    set_path(doc, path, json!(next));
                }
            }
            "$push" => {
                for (path, v) in entries {
                    let mut items = match get_path(doc, path) {
                        Some(JsonValue::Array(existing)) => existing.clone(),
                        Some(_) => {
                            return Err(DriverError::OperationFailed(format!(
                                "$push target '{}' is not an array",
                                path
                            )))
                        }
                        None => Vec::new(),
                    };
                    items.push(v.clone());
                    set_path(doc, path, JsonValue::Array(items));
                }
            }
            "$pull" => {
                for (path, v) in entries {
                    if let Some(JsonValue::Array(existing)) = get_path(doc, path) {
                        let kept: Vec<JsonValue> = existing
                            .iter()
                            .filter(|item| {
                                if is_comparator_object(v) {
                                    let mut ok = true;
                                    for (op, operand) in v.as_object().unwrap() {
                                        match apply_comparator(Some(item), op, operand) {
                                            Ok(m) => ok = ok && m,
                                            Err(_) => ok = false,
                                        }
                                    }
                                    !ok
                                } else {
                                    *item != v
                                }
                            })
                            .cloned()
                            .collect();
                        set_path(doc, path, JsonValue::Array(kept));
                    }
                }
            }
            "$rename" => {
                for (path, v) in entries {
                    let new_name = v.as_str().ok_or_else(|| {
                        DriverError::OperationFailed("$rename expects string targets".to_string())
                    })?;
                    if let Some(value) = get_path(doc, path).cloned() {
                        remove_path(doc, path);
                        set_path(doc, new_name, value);
                    }
                }
            }
            other => {
                return Err(DriverError::OperationFailed(format!(
                    "unsupported update operator '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// The equality parts of a filter become the seed document of an upsert.
fn upsert_seed(filter: &JsonValue) -> JsonValue {
    let mut seed = Map::new();
    if let Some(conditions) = filter.as_object() {
        for (key, cond) in conditions {
            if key.starts_with('$') {
                continue;
            }
            if is_comparator_object(cond) {
                if let Some(eq) = cond.as_object().unwrap().get("$eq") {
                    seed.insert(key.clone(), eq.clone());
                }
            } else {
                seed.insert(key.clone(), cond.clone());
            }
        }
    }
    JsonValue::Object(seed)
}

// ----------------------------------------------------------------------
// Paths, projections, sorting, grouping
// ----------------------------------------------------------------------

fn get_path<'a>(doc: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(doc: &mut JsonValue, path: &str, value: JsonValue) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        if !current.is_object() {
            *current = JsonValue::Object(Map::new());
        }
        let map = current.as_object_mut().unwrap();
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()));
    }
}

fn remove_path(doc: &mut JsonValue, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            map.remove(*segment);
            return;
        }
        match map.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

fn apply_projection(doc: &JsonValue, projection: &JsonValue) -> JsonValue {
    let Some(spec) = projection.as_object() else {
        return doc.clone();
    };
    if spec.is_empty() {
        return doc.clone();
    }

    let inclusion = spec
        .iter()
        .any(|(k, v)| k != "_id" && projection_flag(v));

    let Some(source) = doc.as_object() else {
        return doc.clone();
    };

    let mut out = Map::new();
    if inclusion {
        let id_excluded = spec.get("_id").map(|v| !projection_flag(v)).unwrap_or(false);
        if !id_excluded {
            if let Some(id) = source.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (key, flag) in spec {
            if key == "_id" || !projection_flag(flag) {
                continue;
            }
            if let Some(value) = get_path(doc, key) {
                out.insert(key.clone(), value.clone());
            }
        }
    } else {
        for (key, value) in source {
            if spec.contains_key(key) {
                continue;
            }
            out.insert(key.clone(), value.clone());
        }
    }
    JsonValue::Object(out)
}

fn projection_flag(v: &JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => false,
    }
}

fn sort_docs(docs: &mut [JsonValue], sort: &JsonValue) {
    let Some(spec) = sort.as_object() else {
        return;
    };
    let keys: Vec<(String, bool)> = spec
        .iter()
        .map(|(k, v)| (k.clone(), v.as_f64().unwrap_or(1.0) >= 0.0))
        .collect();

    docs.sort_by(|a, b| {
        for (key, ascending) in &keys {
            let left = get_path(a, key).cloned().unwrap_or(JsonValue::Null);
            let right = get_path(b, key).cloned().unwrap_or(JsonValue::Null);
            let ord = json_cmp(&left, &right).unwrap_or(Ordering::Equal);
            if ord != Ordering::Equal {
                return if *ascending { ord } else { ord.reverse() };
            }
        }
        Ordering::Equal
    });
}

/// A `"$field"` string reads from the document; anything else is a literal.
fn eval_ref(doc: &JsonValue, spec: &JsonValue) -> JsonValue {
    match spec {
        JsonValue::String(s) if s.starts_with('$') => get_path(doc, &s[1..])
            .cloned()
            .unwrap_or(JsonValue::Null),
        other => other.clone(),
    }
}

fn group_docs(docs: Vec<JsonValue>, payload: &JsonValue) -> Result<Vec<JsonValue>, DriverError> {
    let spec = payload
        .as_object()
        .ok_or_else(|| DriverError::OperationFailed("$group expects an object".to_string()))?;
    let id_spec = spec
        .get("_id")
        .ok_or_else(|| DriverError::OperationFailed("$group requires an _id".to_string()))?;

    // Bucket docs by their serialized group key, keeping first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, (JsonValue, Vec<JsonValue>)> = HashMap::new();
    for doc in docs {
        let id = match id_spec {
            JsonValue::Object(parts) => {
                let mut key = Map::new();
                for (k, part) in parts {
                    key.insert(k.clone(), eval_ref(&doc, part));
                }
                JsonValue::Object(key)
            }
            other => eval_ref(&doc, other),
        };
        let serialized = id.to_string();
        if !buckets.contains_key(&serialized) {
            order.push(serialized.clone());
            buckets.insert(serialized.clone(), (id, Vec::new()));
        }
        buckets.get_mut(&serialized).unwrap().1.push(doc);
    }

    let mut out = Vec::new();
    for key in order {
        let (id, members) = buckets.remove(&key).unwrap();
        let mut result = Map::new();
        result.insert("_id".to_string(), id);

        for (field, acc) in spec {
            if field == "_id" {
                continue;
            }
            let acc_obj = acc.as_object().ok_or_else(|| {
                DriverError::OperationFailed(format!(
                    "accumulator for '{}' must be an object",
                    field
                ))
            })?;
            let (op, operand) = acc_obj.iter().next().ok_or_else(|| {
                DriverError::OperationFailed(format!("empty accumulator for '{}'", field))
            })?;

            let value = match op.as_str() {
                "$sum" => {
                    let mut total = 0.0;
                    for m in &members {
                        total += eval_ref(m, operand).as_f64().unwrap_or(0.0);
                    }
                    json!(total)
                }
                "$avg" => {
                    if members.is_empty() {
                        JsonValue::Null
                    } else {
                        let mut total = 0.0;
                        for m in &members {
                            total += eval_ref(m, operand).as_f64().unwrap_or(0.0);
                        }
                        json!(total / members.len() as f64)
                    }
                }
                "$min" | "$max" => {
                    let mut best: Option<JsonValue> = None;
                    for m in &members {
                        let v = eval_ref(m, operand);
                        best = match best {
                            None => Some(v),
                            Some(b) => {
                                let keep_new = match json_cmp(&v, &b) {
                                    Some(Ordering::Less) => op == "$min",
                                    Some(Ordering::Greater) => op == "$max",
                                    _ => false,
                                };
                                Some(if keep_new { v } else { b })
                            }
                        };
                    }
                    best.unwrap_or(JsonValue::Null)
                }
                "$push" => {
                    JsonValue::Array(members.iter().map(|m| eval_ref(m, operand)).collect())
                }
                "$first" => members
                    .first()
                    .map(|m| eval_ref(m, operand))
                    .unwrap_or(JsonValue::Null),
                "$last" => members
                    .last()
                    .map(|m| eval_ref(m, operand))
                    .unwrap_or(JsonValue::Null),
                other => {
                    return Err(DriverError::OperationFailed(format!(
                        "unsupported accumulator '{}'",
                        other
                    )))
                }
            };
            result.insert(field.clone(), value);
        }
        out.push(JsonValue::Object(result));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> Rc<MemoryCollection> {
        let db = MemoryDatabase::new("test".into(), "memory://".into());
        db.memory_collection("things")
    }

    #[test]
    fn insert_assigns_hex_ids() {
        let col = collection();
        let id = col.insert_one(json!({ "a": 1 })).unwrap();
        assert_eq!(id.len(), 24);
        assert_eq!(col.count_documents(&json!({})).unwrap(), 1);
    }

    #[test]
    fn comparator_filters() {
        let col = collection();
        col.insert_many(vec![json!({"n": 1}), json!({"n": 5}), json!({"n": 9})])
            .unwrap();
        let found = col
            .find_many(&json!({"n": {"$gt": 1, "$lt": 9}}), &FindOptions::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["n"], json!(5));
    }

    #[test]
    fn update_with_set_and_inc() {
        let col = collection();
        col.insert_one(json!({"name": "a", "hits": 1})).unwrap();
        let outcome = col
            .update_one(
                &json!({"name": "a"}),
                &json!({"$set": {"tag": "x"}, "$inc": {"hits": 2}}),
                &UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(outcome.matched_count, 1);
        assert_eq!(outcome.modified_count, 1);
        let doc = col
            .find_one(&json!({"name": "a"}), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(doc["hits"], json!(3.0));
        assert_eq!(doc["tag"], json!("x"));
    }

    #[test]
    fn upsert_creates_from_filter() {
        let col = collection();
        let outcome = col
            .update_one(
                &json!({"name": "ghost"}),
                &json!({"$set": {"seen": true}}),
                &UpdateOptions { upsert: true },
            )
            .unwrap();
        assert_eq!(outcome.upserted_count, 1);
        assert!(outcome.upserted_id.is_some());
        let doc = col
            .find_one(&json!({"name": "ghost"}), &FindOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(doc["seen"], json!(true));
    }

    #[test]
    fn group_and_sort_stages() {
        let col = collection();
        col.insert_many(vec![
            json!({"city": "oslo", "pop": 2}),
            json!({"city": "oslo", "pop": 3}),
            json!({"city": "bergen", "pop": 1}),
        ])
        .unwrap();
        let result = col
            .aggregate(&[
                json!({"$group": {"_id": "$city", "total": {"$sum": "$pop"}}}),
                json!({"$sort": {"total": -1}}),
            ])
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["_id"], json!("oslo"));
        assert_eq!(result[0]["total"], json!(5.0));
    }

    #[test]
    fn unwind_and_lookup() {
        let db = MemoryDatabase::new("test".into(), "memory://".into());
        let orders = db.memory_collection("orders");
        let users = db.memory_collection("users");
        users.insert_one(json!({"uid": 7, "name": "ada"})).unwrap();
        orders
            .insert_one(json!({"uid": 7, "items": ["a", "b"]}))
            .unwrap();

        let result = orders
            .aggregate(&[
                json!({"$unwind": "$items"}),
                json!({"$lookup": {
                    "from": "users",
                    "localField": "uid",
                    "foreignField": "uid",
                    "as": "user"
                }}),
            ])
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0]["items"], json!("a"));
        assert_eq!(result[0]["user"][0]["name"], json!("ada"));
    }
}
