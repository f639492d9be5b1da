/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    /// Addition or string concatenation (`+`)
    Add,
    /// Subtraction (`-`)
    Subtract,
    /// Multiplication (`*`)
    Multiply,
    /// Division (`/`)
    Divide,
    /// Modulo (`%`)
    Modulo,

    // Comparison
    /// Equal (`==`)
    Equal,
    /// Not equal (`!=`)
    NotEqual,
    /// Less than (`<`)
    LessThan,
    /// Less than or equal (`<=`)
    LessEqual,
    /// Greater than (`>`)
    GreaterThan,
    /// Greater than or equal (`>=`)
    GreaterEqual,

    // Logical (short-circuiting)
    /// Logical AND (`&&`)
    And,
    /// Logical OR (`||`)
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation (`!`)
    Not,
    /// Arithmetic negation (`-`)
    Negate,
}

/// Infix document-store operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MongoOp {
    /// `<-` insert one document or many
    Insert,
    /// `!` delete the first matching document
    DeleteOne,
    /// `!!` delete all matching documents
    DeleteMany,
    /// `?` find the first matching document
    FindOne,
    /// `??` find all matching documents
    FindMany,
    /// `|>` run an aggregation pipeline
    Aggregate,
}

impl MongoOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            MongoOp::Insert => "<-",
            MongoOp::DeleteOne => "!",
            MongoOp::DeleteMany => "!!",
            MongoOp::FindOne => "?",
            MongoOp::FindMany => "??",
            MongoOp::Aggregate => "|>",
        }
    }
}

/// Comparison operators allowed inside a `query { ... }` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// The document-store comparator this operator lowers to.
    ///
    /// Equality has no dedicated key at the top level; `$eq` is only used
    /// when merging into an existing comparator object.
    pub fn mongo_key(&self) -> &'static str {
        match self {
            CompareOp::Eq => "$eq",
            CompareOp::Ne => "$ne",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}
