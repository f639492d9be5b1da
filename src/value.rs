use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use linked_hash_map::LinkedHashMap;
use serde_json::Value as JsonValue;

use crate::ast::{FieldDecl, MethodDecl, Param, Stmt};
use crate::driver::{CollectionHandle, DatabaseHandle};
use crate::environment::Environment;
use crate::evaluator::{EvalResult, Interpreter};

/// A runtime value.
///
/// Scalars (`Null`, `Number`, `Boolean`, `Str`) compare by value; everything
/// else carries reference identity through a shared `Rc`, so cloning a
/// `Value` never copies compound data.
#[derive(Clone)]
pub enum Value {
    Null,
    Number(f64),
    Boolean(bool),
    Str(String),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<ObjectData>>),
    Function(Rc<FunctionData>),
    NativeFn(Rc<NativeFnData>),
    Class(Rc<ClassData>),
    Promise(Rc<RefCell<PromiseState>>),
    /// Driver-supplied database handle
    Database(Rc<DatabaseRef>),
    /// Driver-supplied collection handle plus per-binding query defaults
    Collection(Rc<CollectionRef>),
    /// Chainable result of a document-store operation
    Operation(Rc<OperationChain>),
}

/// Property storage of a runtime object. Insertion order is observable, so
/// the map is order-preserving.
pub struct ObjectData {
    pub properties: LinkedHashMap<String, Value>,
    /// Set when the object is an instance of a declared schema.
    pub schema_name: Option<String>,
}

pub struct FunctionData {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Rc<Vec<Stmt>>,
    /// Environment the function was declared in; calls scope onto this.
    pub env: Environment,
}

/// The calling convention shared by all built-in callables: current
/// interpreter context, the caller's environment, and the argument values.
pub type NativeCallback = Box<dyn Fn(&mut Interpreter, &Environment, Vec<Value>) -> EvalResult>;

pub struct NativeFnData {
    pub name: String,
    pub func: NativeCallback,
}

impl NativeFnData {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut Interpreter, &Environment, Vec<Value>) -> EvalResult + 'static,
    ) -> Rc<NativeFnData> {
        Rc::new(NativeFnData {
            name: name.into(),
            func: Box::new(func),
        })
    }
}

/// A declared schema. Fields, methods, and constructor parameters are
/// already combined with the base class's at declaration time.
pub struct ClassData {
    pub name: String,
    pub base: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<Rc<MethodDecl>>,
    pub constructor: Option<Vec<Param>>,
    pub env: Environment,
}

impl ClassData {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&Rc<MethodDecl>> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// State of a deferred value. The evaluator is single-threaded and
/// cooperative: a timer promise settles when an `await` drives the scheduler
/// past its deadline.
pub enum PromiseState {
    Resolved(Value),
    Timer { due: Instant, value: Value },
}

pub struct DatabaseRef {
    pub name: String,
    pub uri: String,
    pub handle: Rc<dyn DatabaseHandle>,
    /// Collection handles already derived from this database, by name.
    pub collections: RefCell<HashMap<String, Value>>,
}

/// Per-binding query defaults set via `use collection ... with { ... }`.
#[derive(Default, Clone)]
pub struct FindDefaults {
    pub projection: Option<JsonValue>,
    pub sort: Option<JsonValue>,
    pub limit: Option<i64>,
    pub batch_size: Option<i64>,
}

pub struct CollectionRef {
    pub name: String,
    pub handle: Rc<dyn CollectionHandle>,
    pub defaults: RefCell<FindDefaults>,
}

/// The chainable wrapper every document-store operation returns. `value` is
/// the raw result of the last operation; the `then*` members run follow-up
/// operations against the same collection.
pub struct OperationChain {
    pub collection: Value,
    pub last_result: RefCell<Value>,
}

impl Value {
    pub fn object(properties: LinkedHashMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(ObjectData {
            properties,
            schema_name: None,
        })))
    }

    pub fn empty_object() -> Value {
        Value::object(LinkedHashMap::new())
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn resolved_promise(value: Value) -> Value {
        Value::Promise(Rc::new(RefCell::new(PromiseState::Resolved(value))))
    }

    /// The value-type tag used by `typeOf` and diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::NativeFn(_) => "function",
            Value::Class(_) => "class",
            Value::Promise(_) => "promise",
            Value::Database(_) => "database",
            Value::Collection(_) => "collection",
            Value::Operation(_) => "operation",
        }
    }

    /// Truthiness: `null`, `false`, `0`, the empty string, the empty array,
    /// and the empty object are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Object(o) => !o.borrow().properties.is_empty(),
            Value::Operation(chain) => chain.last_result.borrow().is_truthy(),
            _ => true,
        }
    }

    /// Language equality: nulls are equal, scalars compare by value, and
    /// compound values compare by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFn(a), Value::NativeFn(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            (Value::Database(a), Value::Database(b)) => Rc::ptr_eq(a, b),
            (Value::Collection(a), Value::Collection(b)) => Rc::ptr_eq(a, b),
            (Value::Operation(a), Value::Operation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Best-effort stringification used by `print` and string concatenation.
    /// `inspect`/`toJSON` are the stable forms.
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::Str(s) => s.clone(),
            Value::Array(a) => {
                let items: Vec<String> = a.borrow().iter().map(render_element).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Object(o) => {
                let data = o.borrow();
                let entries: Vec<String> = data
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, render_element(v)))
                    .collect();
                match &data.schema_name {
                    Some(name) => format!("{} {{ {} }}", name, entries.join(", ")),
                    None => format!("{{ {} }}", entries.join(", ")),
                }
            }
            Value::Function(f) => format!("<func {}>", f.name),
            Value::NativeFn(n) => format!("<native {}>", n.name),
            Value::Class(c) => format!("<class {}>", c.name),
            Value::Promise(_) => "<promise>".to_string(),
            Value::Database(d) => format!("<database {}>", d.name),
            Value::Collection(c) => format!("<collection {}>", c.name),
            Value::Operation(chain) => chain.last_result.borrow().stringify(),
        }
    }
}

/// Nested strings are quoted when rendering compound values, top-level ones
/// are not.
fn render_element(v: &Value) -> String {
    match v {
        Value::Str(s) => format!("\"{}\"", s),
        other => other.stringify(),
    }
}

/// Deterministic number rendering: integral floats print without a
/// fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stringify())
    }
}

impl fmt::Debug for NativeFnData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

/// Deep copy that preserves sharing and cycles: revisiting an array or
/// object yields the clone made on first visit.
pub fn deep_clone(value: &Value) -> Value {
    let mut visited: HashMap<usize, Value> = HashMap::new();
    deep_clone_inner(value, &mut visited)
}

fn deep_clone_inner(value: &Value, visited: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::Array(a) => {
            let key = Rc::as_ptr(a) as usize;
            if let Some(existing) = visited.get(&key) {
                return existing.clone();
            }
            let clone = Value::array(Vec::new());
            visited.insert(key, clone.clone());
            let elements: Vec<Value> = a
                .borrow()
                .iter()
                .map(|v| deep_clone_inner(v, visited))
                .collect();
            if let Value::Array(target) = &clone {
                *target.borrow_mut() = elements;
            }
            clone
        }
        Value::Object(o) => {
            let key = Rc::as_ptr(o) as usize;
            if let Some(existing) = visited.get(&key) {
                return existing.clone();
            }
            let clone = Value::empty_object();
            visited.insert(key, clone.clone());
            let source = o.borrow();
            let mut properties = LinkedHashMap::new();
            for (k, v) in source.properties.iter() {
                properties.insert(k.clone(), deep_clone_inner(v, visited));
            }
            if let Value::Object(target) = &clone {
                let mut data = target.borrow_mut();
                data.properties = properties;
                data.schema_name = source.schema_name.clone();
            }
            clone
        }
        other => other.clone(),
    }
}

/// Shallow copy of arrays and objects; all other values pass through.
pub fn shallow_clone(value: &Value) -> Value {
    match value {
        Value::Array(a) => Value::array(a.borrow().clone()),
        Value::Object(o) => {
            let source = o.borrow();
            Value::Object(Rc::new(RefCell::new(ObjectData {
                properties: source.properties.clone(),
                schema_name: source.schema_name.clone(),
            })))
        }
        other => other.clone(),
    }
}
