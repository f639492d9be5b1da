//! Module loading: path resolution, caching, cycle detection, and the
//! import/export statements.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use crate::ast::{ExportDecl, ImportStmt, Program, Stmt};
use crate::environment::Environment;
use crate::evaluator::{EvalResult, Interpreter, RuntimeError, Signal};
use crate::parser::parse_source;
use crate::value::Value;

/// The default source-file extension, appended when an import specifier
/// carries none.
pub const SOURCE_EXTENSION: &str = "ds";

#[derive(Default)]
pub struct ModuleRegistry {
    /// Memoized parses, by canonical path.
    pub(crate) programs: HashMap<PathBuf, Rc<Program>>,
    /// Evaluated module namespaces, by canonical path.
    pub(crate) results: HashMap<PathBuf, Value>,
    /// Paths currently evaluating; re-entrance is a circular import.
    pub(crate) in_progress: HashSet<PathBuf>,
    /// The chain of modules currently loading; the top resolves relative
    /// specifiers.
    pub(crate) context_stack: Vec<PathBuf>,
}

impl Interpreter {
    /// Resolves an import specifier: absolute paths stand, relative paths
    /// resolve against the importing module's directory (or the working
    /// directory at the root), the default extension is appended when
    /// missing, and `.`/`..` segments collapse.
    pub(crate) fn resolve_import_path(&self, specifier: &str) -> PathBuf {
        let mut path = PathBuf::from(specifier);
        if !path.is_absolute() {
            let base = self
                .modules
                .context_stack
                .last()
                .and_then(|p| p.parent().map(Path::to_path_buf))
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_default();
            path = base.join(path);
        }
        if path.extension().is_none() {
            path.set_extension(SOURCE_EXTENSION);
        }
        normalize(&path)
    }

    /// Memoized parse of a module file.
    fn module_program(&mut self, path: &Path) -> Result<Rc<Program>, Signal> {
        if let Some(program) = self.modules.programs.get(path) {
            return Ok(program.clone());
        }
        let source = std::fs::read_to_string(path).map_err(|e| {
            Signal::Fail(RuntimeError::ImportError(format!(
                "cannot read module '{}': {}",
                path.display(),
                e
            )))
        })?;
        let program = parse_source(&source).map_err(|e| {
            Signal::Fail(RuntimeError::ImportError(format!(
                "cannot parse module '{}': {}",
                path.display(),
                e
            )))
        })?;
        let program = Rc::new(program);
        self.modules.programs.insert(path.to_path_buf(), program.clone());
        Ok(program)
    }

    /// Loads a module and returns its namespace value. Every import of the
    /// same path yields the same namespace identity.
    fn load_module(&mut self, path: &Path) -> EvalResult {
        if let Some(namespace) = self.modules.results.get(path) {
            return Ok(namespace.clone());
        }
        if self.modules.in_progress.contains(path) {
            return Err(Signal::Fail(RuntimeError::CircularImport(
                path.display().to_string(),
            )));
        }

        self.modules.in_progress.insert(path.to_path_buf());
        self.modules.context_stack.push(path.to_path_buf());

        let result = (|| -> EvalResult {
            let program = self.module_program(path)?;
            let module_env = self.globals.module_scope();
            self.eval_block_value(&program.body, &module_env)?;

            let exports = module_env
                .module_exports()
                .expect("module scope owns an export table");
            let namespace = Value::object(exports);
            self.modules
                .results
                .insert(path.to_path_buf(), namespace.clone());
            Ok(namespace)
        })();

        self.modules.context_stack.pop();
        self.modules.in_progress.remove(path);
        if result.is_err() {
            // Never leave a partial namespace behind.
            self.modules.results.remove(path);
        }
        result
    }

    pub(crate) fn eval_import(&mut self, import: &ImportStmt, env: &Environment) -> EvalResult {
        let path = self.resolve_import_path(&import.specifier);
        let namespace = self.load_module(&path)?;

        if let Some(name) = &import.namespace {
            env.declare_var(name, namespace.clone(), false)?;
        }

        for exposed in &import.exposing {
            let value = namespace_member(&namespace, exposed).ok_or_else(|| {
                Signal::Fail(RuntimeError::ImportError(format!(
                    "module '{}' has no export '{}'",
                    import.specifier, exposed
                )))
            })?;
            env.declare_var(exposed, value, false)?;
        }

        if let Some(name) = &import.default_binding {
            let value = namespace_member(&namespace, "default").ok_or_else(|| {
                Signal::Fail(RuntimeError::ImportError(format!(
                    "module '{}' has no default export",
                    import.specifier
                )))
            })?;
            env.declare_var(name, value, false)?;
        }

        Ok(Value::Null)
    }

    pub(crate) fn eval_export(&mut self, export: &ExportDecl, env: &Environment) -> EvalResult {
        match export {
            ExportDecl::Declaration(stmt) => {
                self.eval_statement(stmt, env)?;
                for name in declared_names(stmt) {
                    let value = env.lookup_var(&name)?;
                    env.set_module_export(&name, value)?;
                }
                Ok(Value::Null)
            }

            ExportDecl::Specifiers(names) => {
                for name in names {
                    let value = env.lookup_var(name)?;
                    env.set_module_export(name, value)?;
                }
                Ok(Value::Null)
            }

            ExportDecl::Default(stmt) => {
                let value = match stmt.as_ref() {
                    Stmt::Expression(expr) => self.eval_expr(expr, env)?,
                    declaration => {
                        self.eval_statement(declaration, env)?;
                        match declared_names(declaration).first() {
                            Some(name) => env.lookup_var(name)?,
                            None => Value::Null,
                        }
                    }
                };
                env.set_module_export("default", value)?;
                Ok(Value::Null)
            }
        }
    }
}

fn namespace_member(namespace: &Value, name: &str) -> Option<Value> {
    match namespace {
        Value::Object(o) => o.borrow().properties.get(name).cloned(),
        _ => None,
    }
}

/// The names a declaration statement introduces, for re-export.
fn declared_names(stmt: &Stmt) -> Vec<String> {
    match stmt {
        Stmt::VarDeclaration { name, .. } => vec![name.clone()],
        Stmt::FunctionDeclaration(decl) => vec![decl.name.clone()],
        Stmt::ClassDeclaration(decl) => vec![decl.name.clone()],
        _ => Vec::new(),
    }
}

/// Logical path normalization: folds `.` and `..` without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
