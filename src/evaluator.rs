//! The tree-walking evaluator.
//!
//! Control flow is modeled as signals: `return`, `break`, and `continue`
//! unwind through `Result::Err` until the construct that owns them catches
//! them, user exceptions unwind until a `try/catch`, and fatal errors unwind
//! all the way out. The interpreter itself is a context object carrying the
//! module caches, the DSL registry, the scheduler, and the driver connector,
//! so no state is process-global.

pub mod class;
pub mod dsl;
pub mod expr;
pub mod modules;

use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;

use crate::ast::{Param, Program, Stmt};
use crate::driver::memory::MemoryConnector;
use crate::driver::Connector;
use crate::dsl::DslState;
use crate::environment::Environment;
use crate::parser::parse_source;
use crate::scheduler::Scheduler;
use crate::value::{FunctionData, PromiseState, Value};

/// Fatal evaluation errors. User code cannot catch these; they terminate
/// the program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("variable '{0}' is already declared in this scope")]
    Redeclaration(String),

    #[error("cannot reassign constant '{0}'")]
    ConstReassignment(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("access error: {0}")]
    AccessError(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("'return' outside of a function")]
    ReturnOutsideFunction,

    #[error("'{0}' outside of a loop")]
    LoopControlOutside(&'static str),

    #[error("circular import detected: {0}")]
    CircularImport(String),

    #[error("import error: {0}")]
    ImportError(String),

    #[error("uncaught exception: {0}")]
    UncaughtException(String),

    #[error("{0}")]
    DslError(String),
}

/// Non-local control transfer raised during evaluation and caught by the
/// enclosing construct.
#[derive(Debug)]
pub enum Signal {
    /// Caught by the innermost function or method invocation.
    Return(Value),
    /// Caught by the innermost loop.
    Break,
    Continue,
    /// A thrown value; caught only by `try/catch`.
    Throw(Value),
    /// Fatal; unwinds out of the program.
    Fail(RuntimeError),
}

impl From<RuntimeError> for Signal {
    fn from(e: RuntimeError) -> Signal {
        Signal::Fail(e)
    }
}

/// Raises a catchable runtime exception carrying a string message.
pub fn throw_message(msg: impl Into<String>) -> Signal {
    Signal::Throw(Value::Str(msg.into()))
}

pub type EvalResult = Result<Value, Signal>;

/// Callback receiving everything `print` and the log natives emit.
pub type OutputSink = Rc<dyn Fn(&str)>;

pub struct Interpreter {
    pub(crate) globals: Environment,
    pub(crate) modules: modules::ModuleRegistry,
    pub(crate) dsl: DslState,
    pub(crate) scheduler: Scheduler,
    pub(crate) connector: Rc<dyn Connector>,
    pub(crate) sink: OutputSink,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        let globals = Environment::new();
        crate::stdlib::install(&globals);
        Interpreter {
            globals,
            modules: modules::ModuleRegistry::default(),
            dsl: DslState::default(),
            scheduler: Scheduler::new(),
            connector: Rc::new(MemoryConnector::new()),
            sink: Rc::new(|text| print!("{}", text)),
        }
    }

    /// Replaces the driver connector.
    pub fn with_connector(mut self, connector: Rc<dyn Connector>) -> Interpreter {
        self.connector = connector;
        self
    }

    /// Redirects `print` and the log natives, e.g. into a test buffer.
    pub fn with_output(mut self, sink: impl Fn(&str) + 'static) -> Interpreter {
        self.sink = Rc::new(sink);
        self
    }

    pub fn globals(&self) -> &Environment {
        &self.globals
    }

    /// Parses and runs a source string against a fresh program scope.
    pub fn run_source(&mut self, source: &str) -> Result<Value, crate::Error> {
        let program = parse_source(source)?;
        self.run_program(&program).map_err(crate::Error::Runtime)
    }

    /// Runs a file, making its directory the base for relative imports.
    pub fn run_file(&mut self, path: &Path) -> Result<Value, crate::Error> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Io(format!("cannot read {}: {}", path.display(), e)))?;
        let program = parse_source(&source)?;

        self.modules.context_stack.push(path.to_path_buf());
        let result = self.run_program(&program);
        self.modules.context_stack.pop();
        result.map_err(crate::Error::Runtime)
    }

    /// Evaluates a program in a fresh scope under the globals. Control-flow
    /// signals escaping the top level are fatal; the scheduler is drained
    /// before a successful run returns.
    pub fn run_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let env = self.globals.module_scope();
        let result = self.eval_block_value(&program.body, &env);
        match result {
            Ok(value) => {
                self.drain_scheduler().map_err(signal_to_error)?;
                Ok(value)
            }
            Err(signal) => Err(signal_to_error(signal)),
        }
    }

    /// Evaluates statements in sequence, yielding the last statement's
    /// value (or null for an empty block).
    pub(crate) fn eval_block_value(&mut self, body: &[Stmt], env: &Environment) -> EvalResult {
        let mut last = Value::Null;
        for stmt in body {
            last = self.eval_statement(stmt, env)?;
        }
        Ok(last)
    }

    pub(crate) fn eval_statement(&mut self, stmt: &Stmt, env: &Environment) -> EvalResult {
        match stmt {
            Stmt::VarDeclaration {
                name,
                constant,
                init,
            } => {
                let value = match init {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                env.declare_var(name, value, *constant)?;
                Ok(Value::Null)
            }

            Stmt::FunctionDeclaration(decl) => {
                let func = Value::Function(Rc::new(FunctionData {
                    name: decl.name.clone(),
                    params: decl.params.clone(),
                    body: Rc::new(decl.body.clone()),
                    env: env.clone(),
                }));
                env.declare_var(&decl.name, func, false)?;
                Ok(Value::Null)
            }

            Stmt::ClassDeclaration(decl) => self.eval_class_declaration(decl, env),

            Stmt::IfStatement {
                condition,
                consequent,
                alternate,
            } => {
                let test = self.eval_expr(condition, env)?;
                if test.is_truthy() {
                    self.eval_block_value(consequent, &env.child())
                } else if let Some(alternate) = alternate {
                    self.eval_block_value(alternate, &env.child())
                } else {
                    Ok(Value::Null)
                }
            }

            Stmt::WhileStatement { condition, body } => {
                loop {
                    let test = self.eval_expr(condition, env)?;
                    if !test.is_truthy() {
                        break;
                    }
                    match self.eval_block_value(body, &env.child()) {
                        Ok(_) => {}
                        Err(Signal::Break) => break,
                        Err(Signal::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Null)
            }

            Stmt::ReturnStatement(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Value::Null,
                };
                Err(Signal::Return(value))
            }

            Stmt::BreakStatement => Err(Signal::Break),
            Stmt::ContinueStatement => Err(Signal::Continue),

            Stmt::TryCatchStatement {
                try_block,
                param,
                catch_block,
            } => match self.eval_block_value(try_block, &env.child()) {
                Err(Signal::Throw(thrown)) => {
                    let catch_env = env.child();
                    if let Some(name) = param {
                        catch_env.declare_var(name, thrown, false)?;
                    }
                    self.eval_block_value(catch_block, &catch_env)
                }
                other => other,
            },

            Stmt::ThrowStatement(expr) => {
                let value = self.eval_expr(expr, env)?;
                Err(Signal::Throw(value))
            }

            Stmt::ImportStatement(import) => self.eval_import(import, env),
            Stmt::ExportDeclaration(export) => self.eval_export(export, env),

            Stmt::DatabaseStatement { name, value } => {
                dsl::eval_database_statement(self, name, value, env)
            }
            Stmt::CollectionStatement { name, init } => {
                dsl::eval_collection_statement(self, name, init.as_ref(), env)
            }
            Stmt::UseCollectionStatement { name, options } => {
                dsl::eval_use_collection(self, name, options.as_ref(), env)
            }
            Stmt::UsingStatement(using) => dsl::eval_using_mongo(self, using, env),

            Stmt::Expression(expr) => self.eval_expr(expr, env),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Invokes any callable value. A class callee instantiates.
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        env: &Environment,
    ) -> EvalResult {
        match callee {
            Value::Class(class) => self.instantiate_class(&class, args),
            Value::Function(func) => self.call_function(&func, args),
            Value::NativeFn(native) => (native.func)(self, env, args),
            other => Err(Signal::Fail(RuntimeError::TypeError(format!(
                "cannot call a {}",
                other.type_name()
            )))),
        }
    }

    pub(crate) fn call_function(&mut self, func: &Rc<FunctionData>, args: Vec<Value>) -> EvalResult {
        let fenv = func.env.child();
        let context = format!("function '{}'", func.name);
        self.bind_params(&fenv, &func.params, args, &context)?;
        match self.eval_block_value(&func.body, &fenv) {
            Ok(_) => Ok(Value::Null),
            Err(Signal::Return(value)) => Ok(value),
            Err(other) => Err(other),
        }
    }

    /// Binds arguments to parameters: missing arguments fall back to
    /// defaults (evaluated in the call scope), extra arguments are fatal,
    /// and annotated parameters are type-checked. A parameter whose name is
    /// already bound in the call scope is assigned rather than redeclared,
    /// which is how method parameters overwrite field locals.
    pub(crate) fn bind_params(
        &mut self,
        env: &Environment,
        params: &[Param],
        args: Vec<Value>,
        context: &str,
    ) -> Result<(), Signal> {
        if args.len() > params.len() {
            return Err(Signal::Fail(RuntimeError::TypeError(format!(
                "{} takes at most {} argument(s), got {}",
                context,
                params.len(),
                args.len()
            ))));
        }

        let mut args = args.into_iter();
        for param in params {
            let value = match args.next() {
                Some(value) => value,
                None => match &param.default {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => {
                        return Err(Signal::Fail(RuntimeError::TypeError(format!(
                            "{} is missing an argument for '{}'",
                            context, param.name
                        ))))
                    }
                },
            };

            if let Some(annotation) = &param.annotation {
                class::check_annotation(&value, annotation, true).map_err(|msg| {
                    Signal::Fail(RuntimeError::TypeError(format!(
                        "{}: parameter '{}' {}",
                        context, param.name, msg
                    )))
                })?;
            }

            if env.has_own_binding(&param.name) {
                env.assign_var(&param.name, value)?;
            } else {
                env.declare_var(&param.name, value, false)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cooperative suspension
    // ------------------------------------------------------------------

    /// Suspends on a promise until it settles; non-promises pass through.
    /// Scheduled tasks that come due before the promise's deadline run
    /// first, in order.
    pub(crate) fn await_value(&mut self, value: Value) -> EvalResult {
        let promise = match value {
            Value::Promise(p) => p,
            other => return Ok(other),
        };

        let (due, resolved) = match &*promise.borrow() {
            PromiseState::Resolved(v) => return Ok(v.clone()),
            PromiseState::Timer { due, value } => (*due, value.clone()),
        };

        self.run_tasks_until(due)?;
        let now = Instant::now();
        if now < due {
            std::thread::sleep(due - now);
        }
        *promise.borrow_mut() = PromiseState::Resolved(resolved.clone());
        Ok(resolved)
    }

    /// Runs every scheduled task whose deadline is at or before `deadline`.
    fn run_tasks_until(&mut self, deadline: Instant) -> Result<(), Signal> {
        loop {
            let next = match self.scheduler.next_due() {
                Some(next) if next <= deadline => next,
                _ => return Ok(()),
            };
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
            for task in self.scheduler.take_due(Instant::now()) {
                let globals = self.globals.clone();
                self.call_value(task.callee, task.args, &globals)?;
            }
        }
    }

    /// Runs the queue dry before the program exits.
    fn drain_scheduler(&mut self) -> Result<(), Signal> {
        while let Some(next) = self.scheduler.next_due() {
            self.run_tasks_until(next)?;
        }
        Ok(())
    }

    pub(crate) fn emit(&self, text: &str) {
        (self.sink)(text);
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

/// Maps a signal escaping the top level to its fatal error.
fn signal_to_error(signal: Signal) -> RuntimeError {
    match signal {
        Signal::Return(_) => RuntimeError::ReturnOutsideFunction,
        Signal::Break => RuntimeError::LoopControlOutside("break"),
        Signal::Continue => RuntimeError::LoopControlOutside("continue"),
        Signal::Throw(value) => RuntimeError::UncaughtException(value.stringify()),
        Signal::Fail(error) => error,
    }
}
