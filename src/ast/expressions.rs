use crate::ast::operators::{BinOp, MongoOp, UnaryOp};
use crate::ast::query::QueryCondition;

/// Expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal
    NumericLiteral(f64),

    /// String literal
    StringLiteral(String),

    /// `true` / `false`
    BooleanLiteral(bool),

    /// `null`
    NullLiteral,

    /// Variable reference
    Identifier(String),

    /// Object literal. Properties keep their source order; a property with
    /// no value is shorthand and resolves the key as a variable.
    ///
    /// # Example
    /// ```text
    /// { name: "ada", age, "full name": name }
    /// ```
    ObjectLiteral(Vec<ObjectProperty>),

    /// Array literal
    ArrayLiteral(Vec<Expr>),

    /// Assignment; the target must be an identifier.
    AssignmentExpr {
        target: Box<Expr>,
        value: Box<Expr>,
    },

    /// Binary operation
    BinaryExpr {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Unary operation (`!x`, `-x`)
    UnaryExpr { op: UnaryOp, operand: Box<Expr> },

    /// `await expr`
    AwaitExpr(Box<Expr>),

    /// Function, native, or class-constructor call
    CallExpr {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },

    /// Member access, `a.b` or `a[b]`
    MemberExpr {
        object: Box<Expr>,
        property: MemberKey,
    },

    /// Infix document-store operation, e.g. `users <- doc`, `users ?? filter`
    MongoOperationExpr {
        op: MongoOp,
        target: Box<Expr>,
        operand: Box<Expr>,
    },

    /// `query { field op value, ... }`
    MongoQueryExpr(Vec<QueryCondition>),

    /// `target update [many] where <filter> set <update> [with <options>]`
    MongoUpdateExpr {
        target: Box<Expr>,
        filter: Box<Expr>,
        update: Box<Expr>,
        options: Option<Box<Expr>>,
        many: bool,
    },
}

/// A single entry of an object literal.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectProperty {
    pub key: String,
    /// `None` for shorthand `{ x }`
    pub value: Option<Expr>,
}

/// The property of a member expression.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberKey {
    /// `a.name`
    Dot(String),
    /// `a[expr]`
    Computed(Box<Expr>),
}
