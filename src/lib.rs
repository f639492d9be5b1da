//! Datascript is a small dynamically-typed scripting language with optional
//! type annotations, first-class schemas, lexical modules, structured
//! exception handling, cooperative asynchrony, and an embedded DSL for
//! document-store operations.
//!
//! This crate is the language core: lexer, recursive-descent parser,
//! tree-walking evaluator, lexical environments, module loader, schema
//! machinery, and the semantic layer of the document-store DSL. The
//! bundled in-memory driver makes the DSL runnable out of the box; a real
//! driver plugs in through the traits in [`driver`].
//!
//! ```
//! use datascript::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let result = interp.run_source("declare x = 2 + 3 * 4; x;").unwrap();
//! assert_eq!(result, datascript::Value::Number(14.0));
//! ```

pub mod ast;
pub mod convert;
pub mod driver;
pub mod dsl;
pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod scheduler;
pub mod stdlib;
pub mod value;

use thiserror::Error;

pub use environment::Environment;
pub use evaluator::{Interpreter, RuntimeError};
pub use lexer::{LexError, Lexer};
pub use output::{inspect, to_json, to_json_pretty};
pub use parser::{parse_source, ParseError, Parser};
pub use value::Value;

/// Any fatal failure of a run: lexing, parsing, evaluation, or file I/O.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Io(String),
}
