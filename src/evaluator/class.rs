//! Schema machinery: declaration, instantiation, annotation checks, and
//! method binding.

use std::cell::RefCell;
use std::rc::Rc;

use linked_hash_map::LinkedHashMap;

use crate::ast::{ClassDecl, ClassMember, FieldDecl, MethodDecl, TypeAnnotation};
use crate::convert::{plain_to_runtime, runtime_to_plain};
use crate::environment::Environment;
use crate::evaluator::{throw_message, EvalResult, Interpreter, RuntimeError, Signal};
use crate::value::{ClassData, NativeFnData, ObjectData, Value};

impl Interpreter {
    /// Declares a class, combining fields, methods, and constructor
    /// parameters with the base class's. Same-name members override;
    /// same-name constructor parameters replace positionally.
    pub(crate) fn eval_class_declaration(
        &mut self,
        decl: &ClassDecl,
        env: &Environment,
    ) -> EvalResult {
        let base = match &decl.base {
            Some(base_name) => {
                let value = env.lookup_var(base_name)?;
                match value {
                    Value::Class(base) => Some(base),
                    other => {
                        return Err(Signal::Fail(RuntimeError::TypeError(format!(
                            "'{}' cannot extend '{}': it is a {}, not a class",
                            decl.name,
                            base_name,
                            other.type_name()
                        ))))
                    }
                }
            }
            None => None,
        };

        let mut fields: Vec<FieldDecl> = base
            .as_ref()
            .map(|b| b.fields.clone())
            .unwrap_or_default();
        let mut methods: Vec<Rc<MethodDecl>> = base
            .as_ref()
            .map(|b| b.methods.clone())
            .unwrap_or_default();
        let mut constructor = base.as_ref().and_then(|b| b.constructor.clone());

        for member in &decl.members {
            match member {
                ClassMember::Field(field) => {
                    match fields.iter_mut().find(|f| f.name == field.name) {
                        Some(existing) => *existing = field.clone(),
                        None => fields.push(field.clone()),
                    }
                }
                ClassMember::Method(method) => {
                    let method = Rc::new(method.clone());
                    match methods.iter_mut().find(|m| m.name == method.name) {
                        Some(existing) => *existing = method,
                        None => methods.push(method),
                    }
                }
            }
        }

        if let Some(params) = &decl.constructor {
            match constructor.as_mut() {
                Some(combined) => {
                    for param in params {
                        match combined.iter().position(|p| p.name == param.name) {
                            Some(index) => combined[index] = param.clone(),
                            None => combined.push(param.clone()),
                        }
                    }
                }
                None => constructor = Some(params.clone()),
            }
        }

        let class = Value::Class(Rc::new(ClassData {
            name: decl.name.clone(),
            base: decl.base.clone(),
            fields,
            methods,
            constructor,
            env: env.clone(),
        }));
        env.declare_var(&decl.name, class, false)?;
        Ok(Value::Null)
    }

    /// Instantiates a class: resolves arguments (a single object is a
    /// named-argument map, otherwise positional over the constructor
    /// signature or the field order), settles each field in declaration
    /// order, type-checks it, then attaches method thunks.
    pub(crate) fn instantiate_class(
        &mut self,
        class: &Rc<ClassData>,
        args: Vec<Value>,
    ) -> EvalResult {
        let mut provided: LinkedHashMap<String, Value> = LinkedHashMap::new();

        let named = matches!(args.as_slice(), [Value::Object(_)]);
        if named {
            let Value::Object(map) = &args[0] else {
                unreachable!()
            };
            for (key, value) in map.borrow().properties.iter() {
                if class.field(key).is_none() {
                    return Err(Signal::Fail(RuntimeError::TypeError(format!(
                        "schema '{}' has no field '{}'",
                        class.name, key
                    ))));
                }
                provided.insert(key.clone(), value.clone());
            }
        } else {
            let order: Vec<String> = match &class.constructor {
                Some(params) => params.iter().map(|p| p.name.clone()).collect(),
                None => class.fields.iter().map(|f| f.name.clone()).collect(),
            };
            if args.len() > order.len() {
                return Err(Signal::Fail(RuntimeError::TypeError(format!(
                    "schema '{}' takes at most {} argument(s), got {}",
                    class.name,
                    order.len(),
                    args.len()
                ))));
            }
            for (name, value) in order.into_iter().zip(args) {
                provided.insert(name, value);
            }
        }

        let instance = Rc::new(RefCell::new(ObjectData {
            properties: LinkedHashMap::new(),
            schema_name: Some(class.name.clone()),
        }));
        let instance_value = Value::Object(instance.clone());

        // Field initializers run in a scope where `this` and every field
        // settled so far are visible.
        let init_env = class.env.child();
        init_env.declare_var("this", instance_value.clone(), false)?;
        for field in &class.fields {
            init_env.declare_var(&field.name, Value::Null, false)?;
        }

        for field in &class.fields {
            let value = match provided.get(&field.name) {
                Some(value) => value.clone(),
                None => match &field.init {
                    Some(init) => self.eval_expr(init, &init_env)?,
                    None if field.required => {
                        return Err(Signal::Fail(RuntimeError::TypeError(format!(
                            "schema '{}' is missing required field '{}'",
                            class.name, field.name
                        ))))
                    }
                    None => Value::Null,
                },
            };

            check_field(class, field, &value)?;
            init_env.assign_var(&field.name, value.clone())?;
            instance.borrow_mut().properties.insert(field.name.clone(), value);
        }

        for method in &class.methods {
            let thunk = method_thunk(class.clone(), method.clone(), instance.clone());
            instance
                .borrow_mut()
                .properties
                .insert(method.name.clone(), thunk);
        }

        if class.method("save").is_none() {
            let save = default_save_thunk(class.clone(), instance.clone());
            instance.borrow_mut().properties.insert("save".to_string(), save);
        }

        Ok(instance_value)
    }
}

fn check_field(class: &ClassData, field: &FieldDecl, value: &Value) -> Result<(), Signal> {
    if let Some(annotation) = &field.annotation {
        check_annotation(value, annotation, field.required).map_err(|msg| {
            Signal::Fail(RuntimeError::TypeError(format!(
                "schema '{}': field '{}' {}",
                class.name, field.name, msg
            )))
        })?;
    }
    Ok(())
}

/// Structural annotation check. `any` matches everything; non-required
/// slots accept null; `base[]...` recurses over array elements; scalar
/// bases match by type tag; any other base matches tagged instances of that
/// schema (case-insensitive).
pub(crate) fn check_annotation(
    value: &Value,
    annotation: &TypeAnnotation,
    required: bool,
) -> Result<(), String> {
    if annotation.base.eq_ignore_ascii_case("any") {
        return Ok(());
    }
    if !required && matches!(value, Value::Null) {
        return Ok(());
    }

    if annotation.array_depth > 0 {
        let Value::Array(items) = value else {
            return Err(format!(
                "expects {}, got {}",
                annotation.describe(),
                actual_type(value)
            ));
        };
        let element_annotation = TypeAnnotation {
            base: annotation.base.clone(),
            array_depth: annotation.array_depth - 1,
        };
        for item in items.borrow().iter() {
            check_annotation(item, &element_annotation, true).map_err(|_| {
                format!(
                    "expects {}, got an array containing {}",
                    annotation.describe(),
                    actual_type(item)
                )
            })?;
        }
        return Ok(());
    }

    let base = annotation.base.to_ascii_lowercase();
    let matches = match base.as_str() {
        "string" | "number" | "boolean" | "null" | "array" | "object" => value.type_name() == base,
        _ => match value {
            Value::Object(o) => o
                .borrow()
                .schema_name
                .as_deref()
                .map(|tag| tag.eq_ignore_ascii_case(&annotation.base))
                .unwrap_or(false),
            _ => false,
        },
    };

    if matches {
        Ok(())
    } else {
        Err(format!(
            "expects {}, got {}",
            annotation.describe(),
            actual_type(value)
        ))
    }
}

/// Prefer the schema tag over the bare "object" tag in messages.
fn actual_type(value: &Value) -> String {
    if let Value::Object(o) = value {
        if let Some(tag) = &o.borrow().schema_name {
            return tag.clone();
        }
    }
    value.type_name().to_string()
}

/// Builds the per-instance native thunk for a method.
///
/// Invocation scopes onto the class's declaration environment, declares
/// `this`, then declares every field as a local initialized to the
/// instance's current value. Parameters bind afterwards, so a parameter
/// sharing a field's name overwrites that local. On normal completion or
/// `return`, every field local is written back to the instance and
/// re-type-checked.
fn method_thunk(
    class: Rc<ClassData>,
    method: Rc<MethodDecl>,
    instance: Rc<RefCell<ObjectData>>,
) -> Value {
    let name = format!("{}.{}", class.name, method.name);
    Value::NativeFn(NativeFnData::new(name, move |interp, _caller_env, args| {
        let env = class.env.child();
        env.declare_var("this", Value::Object(instance.clone()), false)?;
        for field in &class.fields {
            let current = instance
                .borrow()
                .properties
                .get(&field.name)
                .cloned()
                .unwrap_or(Value::Null);
            env.declare_var(&field.name, current, false)?;
        }

        let context = format!("method '{}.{}'", class.name, method.name);
        interp.bind_params(&env, &method.params, args, &context)?;

        let outcome = interp.eval_block_value(&method.body, &env);
        let result = match outcome {
            Ok(_) => Value::Null,
            Err(Signal::Return(value)) => value,
            Err(Signal::Break) => {
                return Err(Signal::Fail(RuntimeError::LoopControlOutside("break")))
            }
            Err(Signal::Continue) => {
                return Err(Signal::Fail(RuntimeError::LoopControlOutside("continue")))
            }
            // Exceptions and fatal errors propagate without write-back.
            Err(other) => return Err(other),
        };

        for field in &class.fields {
            let value = env.lookup_var(&field.name)?;
            check_field(&class, field, &value)?;
            instance
                .borrow_mut()
                .properties
                .insert(field.name.clone(), value);
        }

        Ok(result)
    }))
}

/// The implicit `save` method: a payload object tagging the schema name and
/// carrying every field normalized through the document conversion.
fn default_save_thunk(class: Rc<ClassData>, instance: Rc<RefCell<ObjectData>>) -> Value {
    let name = format!("{}.save", class.name);
    Value::NativeFn(NativeFnData::new(name, move |_interp, _env, args| {
        if !args.is_empty() {
            return Err(throw_message("save() takes no arguments"));
        }
        let mut payload = LinkedHashMap::new();
        payload.insert("__schema".to_string(), Value::Str(class.name.clone()));
        for field in &class.fields {
            let value = instance
                .borrow()
                .properties
                .get(&field.name)
                .cloned()
                .unwrap_or(Value::Null);
            let plain = runtime_to_plain(&value).map_err(throw_message)?;
            payload.insert(field.name.clone(), plain_to_runtime(&plain));
        }
        Ok(Value::object(payload))
    }))
}

/// The object `schemaInfo` returns for a class (and, with `values`, for an
/// instance).
pub(crate) fn class_info(class: &ClassData, instance: Option<&Rc<RefCell<ObjectData>>>) -> Value {
    let mut info = LinkedHashMap::new();
    info.insert(
        "kind".to_string(),
        Value::Str(if instance.is_some() { "instance" } else { "schema" }.to_string()),
    );
    info.insert("name".to_string(), Value::Str(class.name.clone()));
    info.insert(
        "extends".to_string(),
        match &class.base {
            Some(base) => Value::Str(base.clone()),
            None => Value::Null,
        },
    );

    let fields: Vec<Value> = class
        .fields
        .iter()
        .map(|field| {
            let mut entry = LinkedHashMap::new();
            entry.insert("name".to_string(), Value::Str(field.name.clone()));
            entry.insert("required".to_string(), Value::Boolean(field.required));
            entry.insert(
                "type".to_string(),
                match &field.annotation {
                    Some(annotation) => Value::Str(annotation.describe()),
                    None => Value::Str("any".to_string()),
                },
            );
            entry.insert(
                "hasDefault".to_string(),
                Value::Boolean(field.init.is_some()),
            );
            Value::object(entry)
        })
        .collect();
    info.insert("fields".to_string(), Value::array(fields));

    let methods: Vec<Value> = class
        .methods
        .iter()
        .map(|m| Value::Str(m.name.clone()))
        .collect();
    info.insert("methods".to_string(), Value::array(methods));

    let constructor: Vec<Value> = class
        .constructor
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(|param| {
            let mut entry = LinkedHashMap::new();
            entry.insert("name".to_string(), Value::Str(param.name.clone()));
            entry.insert(
                "type".to_string(),
                match &param.annotation {
                    Some(annotation) => Value::Str(annotation.describe()),
                    None => Value::Str("any".to_string()),
                },
            );
            Value::object(entry)
        })
        .collect();
    info.insert("constructor".to_string(), Value::array(constructor));

    if let Some(instance) = instance {
        let mut values = LinkedHashMap::new();
        for field in &class.fields {
            let value = instance
                .borrow()
                .properties
                .get(&field.name)
                .cloned()
                .unwrap_or(Value::Null);
            values.insert(field.name.clone(), value);
        }
        info.insert("values".to_string(), Value::object(values));
    }

    Value::object(info)
}
