use crate::ast::expressions::Expr;
use crate::ast::operators::CompareOp;
use crate::ast::statements::Stmt;

/// One condition of a `query { ... }` block.
///
/// # Example
/// ```text
/// query { age > 18, status == "active" }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    pub field: String,
    pub op: CompareOp,
    pub value: Expr,
}

/// `using mongo from uri [database db] [as alias] [with opts] { body }`
///
/// The optional clauses may appear in any order after `from`.
#[derive(Debug, Clone, PartialEq)]
pub struct UsingMongo {
    pub uri: Expr,
    pub database: Option<Expr>,
    pub alias: Option<String>,
    pub options: Option<Expr>,
    pub body: Vec<Stmt>,
}
