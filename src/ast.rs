//! Abstract syntax tree for the Datascript language.
//!
//! The AST is produced by the parser and walked directly by the evaluator.
//! It is organized into focused submodules:
//!
//! - **[tokens]** - lexical tokens produced by the lexer
//! - **[expressions]** - expression nodes
//! - **[operators]** - binary, unary, and document-store operators
//! - **[statements]** - statement nodes, declarations, and the program root
//! - **[query]** - document-store DSL nodes (`query { ... }`, `using mongo`)

pub mod expressions;
pub mod operators;
pub mod query;
pub mod statements;
pub mod tokens;

pub use expressions::{Expr, MemberKey, ObjectProperty};
pub use operators::{BinOp, CompareOp, MongoOp, UnaryOp};
pub use query::{QueryCondition, UsingMongo};
pub use statements::{
    ClassDecl, ClassMember, ExportDecl, FieldDecl, FunctionDecl, ImportStmt, MethodDecl, Param,
    Program, Stmt, TypeAnnotation,
};
pub use tokens::{Keyword, Token, TokenKind};
