//! Expression evaluation.

use linked_hash_map::LinkedHashMap;

use crate::ast::{BinOp, Expr, MemberKey, UnaryOp};
use crate::environment::Environment;
use crate::evaluator::dsl::{self, unwrap_chain};
use crate::evaluator::{EvalResult, Interpreter, RuntimeError, Signal};
use crate::value::{format_number, Value};

impl Interpreter {
    pub(crate) fn eval_expr(&mut self, expr: &Expr, env: &Environment) -> EvalResult {
        match expr {
            Expr::NumericLiteral(n) => Ok(Value::Number(*n)),
            Expr::StringLiteral(s) => Ok(Value::Str(s.clone())),
            Expr::BooleanLiteral(b) => Ok(Value::Boolean(*b)),
            Expr::NullLiteral => Ok(Value::Null),

            Expr::Identifier(name) => Ok(env.lookup_var(name)?),

            Expr::ObjectLiteral(properties) => {
                let mut map = LinkedHashMap::new();
                for property in properties {
                    let value = match &property.value {
                        Some(expr) => self.eval_expr(expr, env)?,
                        // Shorthand { x } resolves the key as a variable.
                        None => env.lookup_var(&property.key)?,
                    };
                    map.insert(property.key.clone(), value);
                }
                Ok(Value::object(map))
            }

            Expr::ArrayLiteral(elements) => {
                let mut items = Vec::new();
                for element in elements {
                    items.push(self.eval_expr(element, env)?);
                }
                Ok(Value::array(items))
            }

            Expr::AssignmentExpr { target, value } => {
                let name = match target.as_ref() {
                    Expr::Identifier(name) => name,
                    other => {
                        return Err(Signal::Fail(RuntimeError::TypeError(format!(
                            "invalid assignment target: {:?}",
                            other
                        ))))
                    }
                };
                let value = self.eval_expr(value, env)?;
                Ok(env.assign_var(name, value)?)
            }

            Expr::BinaryExpr { op, left, right } => self.eval_binary(*op, left, right, env),

            Expr::UnaryExpr { op, operand } => {
                let value = unwrap_chain(self.eval_expr(operand, env)?);
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Negate => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        other => Err(Signal::Fail(RuntimeError::TypeError(format!(
                            "cannot negate a {}",
                            other.type_name()
                        )))),
                    },
                }
            }

            Expr::AwaitExpr(operand) => {
                let value = self.eval_expr(operand, env)?;
                self.await_value(value)
            }

            Expr::CallExpr { callee, args } => {
                let callee = self.eval_expr(callee, env)?;
                let mut values = Vec::new();
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.call_value(callee, values, env)
            }

            Expr::MemberExpr { object, property } => {
                let object = self.eval_expr(object, env)?;
                match property {
                    MemberKey::Dot(name) => self.get_member(object, name),
                    MemberKey::Computed(key_expr) => {
                        let key = self.eval_expr(key_expr, env)?;
                        self.get_computed_member(object, key)
                    }
                }
            }

            Expr::MongoOperationExpr {
                op,
                target,
                operand,
            } => dsl::eval_mongo_operation(self, *op, target, operand, env),

            Expr::MongoQueryExpr(conditions) => {
                let mut lowered = Vec::new();
                for condition in conditions {
                    let value = unwrap_chain(self.eval_expr(&condition.value, env)?);
                    lowered.push((condition.field.clone(), condition.op, value));
                }
                Ok(crate::dsl::query::lower_query(lowered))
            }

            Expr::MongoUpdateExpr {
                target,
                filter,
                update,
                options,
                many,
            } => dsl::eval_mongo_update(self, target, filter, update, options.as_deref(), *many, env),
        }
    }

    fn eval_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        env: &Environment,
    ) -> EvalResult {
        // && and || short-circuit and return the coerced truthiness.
        match op {
            BinOp::And => {
                let left = unwrap_chain(self.eval_expr(left, env)?);
                if !left.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                let right = unwrap_chain(self.eval_expr(right, env)?);
                return Ok(Value::Boolean(right.is_truthy()));
            }
            BinOp::Or => {
                let left = unwrap_chain(self.eval_expr(left, env)?);
                if left.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                let right = unwrap_chain(self.eval_expr(right, env)?);
                return Ok(Value::Boolean(right.is_truthy()));
            }
            _ => {}
        }

        let left = unwrap_chain(self.eval_expr(left, env)?);
        let right = unwrap_chain(self.eval_expr(right, env)?);
        apply_binop(op, &left, &right)
    }

    /// Dot member access, shared with the computed form for string keys.
    pub(crate) fn get_member(&mut self, object: Value, name: &str) -> EvalResult {
        match object {
            Value::Object(o) => Ok(o
                .borrow()
                .properties
                .get(name)
                .cloned()
                .unwrap_or(Value::Null)),

            Value::Array(items) => {
                if name == "length" {
                    Ok(Value::Number(items.borrow().len() as f64))
                } else {
                    Err(Signal::Fail(RuntimeError::AccessError(format!(
                        "arrays have no property '{}'",
                        name
                    ))))
                }
            }

            // A property on a database handle names a collection; the
            // handle is created on first access and cached.
            Value::Database(db) => Ok(dsl::database_collection(&db, name)),

            Value::Operation(chain) => dsl::chain_member(self, &chain, name),

            other => Err(Signal::Fail(RuntimeError::AccessError(format!(
                "cannot read property '{}' of a {}",
                name,
                other.type_name()
            )))),
        }
    }

    fn get_computed_member(&mut self, object: Value, key: Value) -> EvalResult {
        if let Value::Array(items) = &object {
            return match key {
                Value::Number(n) => {
                    // Indices truncate toward zero and are bounds-checked.
                    let index = n.trunc();
                    let len = items.borrow().len();
                    if index < 0.0 || index >= len as f64 {
                        return Err(Signal::Fail(RuntimeError::AccessError(format!(
                            "array index {} out of bounds (length {})",
                            format_number(index),
                            len
                        ))));
                    }
                    Ok(items.borrow()[index as usize].clone())
                }
                // Non-numeric keys on arrays act as string properties.
                other => self.get_member(object.clone(), &member_key_string(&other)?),
            };
        }

        let name = member_key_string(&key)?;
        self.get_member(object, &name)
    }
}

fn member_key_string(key: &Value) -> Result<String, Signal> {
    match key {
        Value::Str(s) => Ok(s.clone()),
        Value::Number(n) => Ok(format_number(*n)),
        Value::Boolean(b) => Ok(b.to_string()),
        other => Err(Signal::Fail(RuntimeError::AccessError(format!(
            "a {} cannot be used as a property key",
            other.type_name()
        )))),
    }
}

/// Non-short-circuiting binary operators over settled values.
pub(crate) fn apply_binop(op: BinOp, left: &Value, right: &Value) -> EvalResult {
    match op {
        BinOp::Add => match (left, right) {
            // + promotes to string concatenation when either side is one.
            (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!(
                "{}{}",
                left.stringify(),
                right.stringify()
            ))),
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (a, b) => Err(type_error(format!(
                "cannot add {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        },

        BinOp::Subtract | BinOp::Multiply | BinOp::Divide | BinOp::Modulo => {
            let (a, b) = match (left, right) {
                (Value::Number(a), Value::Number(b)) => (*a, *b),
                (a, b) => {
                    return Err(type_error(format!(
                        "'{}' expects numbers, got {} and {}",
                        binop_symbol(op),
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            match op {
                BinOp::Subtract => Ok(Value::Number(a - b)),
                BinOp::Multiply => Ok(Value::Number(a * b)),
                BinOp::Divide => {
                    if b == 0.0 {
                        Err(Signal::Fail(RuntimeError::DivisionByZero))
                    } else {
                        Ok(Value::Number(a / b))
                    }
                }
                BinOp::Modulo => {
                    if b == 0.0 {
                        Err(Signal::Fail(RuntimeError::DivisionByZero))
                    } else {
                        Ok(Value::Number(a % b))
                    }
                }
                _ => unreachable!(),
            }
        }

        BinOp::Equal => Ok(Value::Boolean(left.equals(right))),
        BinOp::NotEqual => Ok(Value::Boolean(!left.equals(right))),

        BinOp::LessThan | BinOp::LessEqual | BinOp::GreaterThan | BinOp::GreaterEqual => {
            let ordering = match (left, right) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                (a, b) => {
                    return Err(type_error(format!(
                        "'{}' expects two numbers or two strings, got {} and {}",
                        binop_symbol(op),
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            let holds = match ordering {
                Some(ord) => match op {
                    BinOp::LessThan => ord.is_lt(),
                    BinOp::LessEqual => ord.is_le(),
                    BinOp::GreaterThan => ord.is_gt(),
                    BinOp::GreaterEqual => ord.is_ge(),
                    _ => unreachable!(),
                },
                None => false,
            };
            Ok(Value::Boolean(holds))
        }

        BinOp::And | BinOp::Or => unreachable!("handled by eval_binary"),
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Subtract => "-",
        BinOp::Multiply => "*",
        BinOp::Divide => "/",
        BinOp::Modulo => "%",
        BinOp::Equal => "==",
        BinOp::NotEqual => "!=",
        BinOp::LessThan => "<",
        BinOp::LessEqual => "<=",
        BinOp::GreaterThan => ">",
        BinOp::GreaterEqual => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

fn type_error(msg: String) -> Signal {
    Signal::Fail(RuntimeError::TypeError(msg))
}
