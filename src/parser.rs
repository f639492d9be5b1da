use thiserror::Error;

use crate::ast::{
    BinOp, ClassDecl, ClassMember, CompareOp, ExportDecl, Expr, FieldDecl, FunctionDecl,
    ImportStmt, Keyword, MemberKey, MethodDecl, MongoOp, ObjectProperty, Param, Program,
    QueryCondition, Stmt, Token, TokenKind, TypeAnnotation, UnaryOp, UsingMongo,
};
use crate::lexer::{LexError, Lexer};

/// Errors that can occur during parsing. A parse error is fatal; there is no
/// recovery.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("{0}")]
    Lex(#[from] LexError),

    #[error("unexpected token {found}: expected {expected}")]
    UnexpectedToken { expected: String, found: String },

    #[error("{0}")]
    InvalidSyntax(String),
}

/// Recursive-descent parser with one token of lookahead.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

/// Parses a complete source string into a [`Program`].
pub fn parse_source(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    Parser::new(tokens).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    fn at(&self) -> &Token {
        self.tokens
            .get(self.position)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with EOF"))
    }

    /// Consumes and returns the current token.
    fn eat(&mut self) -> Token {
        let token = self.at().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    /// Consumes the current token, failing unless its kind matches `expected`.
    fn expect(&mut self, expected: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if std::mem::discriminant(&self.at().kind) == std::mem::discriminant(expected) {
            Ok(self.eat())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.at().kind) == std::mem::discriminant(kind)
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(self.at().kind, TokenKind::Keyword(k) if k == kw)
    }

    /// Consumes the current token if it is the given keyword.
    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.eat();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword, what: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.at().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.eat();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        self.expect(&TokenKind::Semicolon, "';'")?;
        Ok(())
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.at().to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.at().is_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match &self.at().kind {
            TokenKind::Keyword(kw) => match kw {
                Keyword::Declare => self.parse_var_declaration(),
                Keyword::Func => Ok(Stmt::FunctionDeclaration(self.parse_function()?)),
                Keyword::Class | Keyword::Schema => self.parse_class_declaration(),
                Keyword::If => self.parse_if(),
                Keyword::While => self.parse_while(),
                Keyword::Return => self.parse_return(),
                Keyword::Break => {
                    self.eat();
                    self.expect_semicolon()?;
                    Ok(Stmt::BreakStatement)
                }
                Keyword::Continue => {
                    self.eat();
                    self.expect_semicolon()?;
                    Ok(Stmt::ContinueStatement)
                }
                Keyword::Try => self.parse_try_catch(),
                Keyword::Throw => {
                    self.eat();
                    let value = self.parse_expression()?;
                    self.expect_semicolon()?;
                    Ok(Stmt::ThrowStatement(value))
                }
                Keyword::Import => self.parse_import(),
                Keyword::Export => self.parse_export(),
                Keyword::Database => self.parse_database(),
                Keyword::Collection => self.parse_collection(),
                Keyword::Use => self.parse_use_collection(),
                Keyword::Using => self.parse_using_mongo(),
                _ => self.parse_expression_statement(),
            },
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.parse_expression()?;
        // Trailing semicolon is optional on expression statements.
        if self.check(&TokenKind::Semicolon) {
            self.eat();
        }
        Ok(Stmt::Expression(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at().is_eof() {
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(body)
    }

    fn parse_var_declaration(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // declare
        let constant = self.eat_keyword(Keyword::Const);
        let name = self.expect_ident("variable name")?;

        let init = if self.check(&TokenKind::Assign) {
            self.eat();
            Some(self.parse_expression()?)
        } else {
            None
        };

        if constant && init.is_none() {
            return Err(ParseError::InvalidSyntax(format!(
                "constant '{}' must be initialized",
                name
            )));
        }

        self.expect_semicolon()?;
        Ok(Stmt::VarDeclaration {
            name,
            constant,
            init,
        })
    }

    fn parse_function(&mut self) -> Result<FunctionDecl, ParseError> {
        self.eat(); // func
        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let params = self.parse_params()?;
        let body = self.parse_block()?;
        Ok(FunctionDecl { name, params, body })
    }

    /// Parses a comma-separated parameter list up to and including the
    /// closing parenthesis.
    fn parse_params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let name = self.expect_ident("parameter name")?;
            let annotation = if self.check(&TokenKind::Colon) {
                self.eat();
                Some(self.parse_type_annotation()?)
            } else {
                None
            };
            let default = if self.check(&TokenKind::Assign) {
                self.eat();
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name,
                annotation,
                default,
            });
            if !self.check(&TokenKind::RParen) {
                self.expect(&TokenKind::Comma, "','")?;
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    /// `identifier ('[' ']')*` — the bracket-pair count is the array depth.
    fn parse_type_annotation(&mut self) -> Result<TypeAnnotation, ParseError> {
        let base = match &self.at().kind {
            TokenKind::Ident(name) => name.clone(),
            // `null` is a keyword but a legal annotation base.
            TokenKind::Keyword(Keyword::Null) => "null".to_string(),
            _ => return Err(self.unexpected("type name")),
        };
        self.eat();
        let mut array_depth = 0;
        while self.check(&TokenKind::LBracket) {
            self.eat();
            self.expect(&TokenKind::RBracket, "']'")?;
            array_depth += 1;
        }
        Ok(TypeAnnotation { base, array_depth })
    }

    fn parse_class_declaration(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // class | schema
        let name = self.expect_ident("class name")?;

        let base = if self.eat_keyword(Keyword::Extends) {
            Some(self.expect_ident("base class name")?)
        } else {
            None
        };

        let constructor = if self.eat_keyword(Keyword::Create) {
            self.expect(&TokenKind::LParen, "'('")?;
            Some(self.parse_params()?)
        } else {
            None
        };

        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut members = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at().is_eof() {
            members.push(self.parse_class_member()?);
        }
        self.expect(&TokenKind::RBrace, "'}'")?;

        Ok(Stmt::ClassDeclaration(ClassDecl {
            name,
            base,
            constructor,
            members,
        }))
    }

    fn parse_class_member(&mut self) -> Result<ClassMember, ParseError> {
        // A leading `required`/`optional` forces the field's flag; otherwise
        // a field is required exactly when it has no initializer.
        let forced = if self.eat_keyword(Keyword::Required) {
            Some(true)
        } else if self.eat_keyword(Keyword::Optional) {
            Some(false)
        } else {
            None
        };

        let name = self.expect_ident("member name")?;

        if self.check(&TokenKind::LParen) {
            if forced.is_some() {
                return Err(ParseError::InvalidSyntax(format!(
                    "'{}' is a method; required/optional apply to fields only",
                    name
                )));
            }
            self.eat();
            let params = self.parse_params()?;
            let body = self.parse_block()?;
            return Ok(ClassMember::Method(MethodDecl { name, params, body }));
        }

        let annotation = if self.check(&TokenKind::Colon) {
            self.eat();
            Some(self.parse_type_annotation()?)
        } else {
            None
        };
        let init = if self.check(&TokenKind::Assign) {
            self.eat();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon()?;

        let required = forced.unwrap_or(init.is_none());
        Ok(ClassMember::Field(FieldDecl {
            name,
            annotation,
            required,
            init,
        }))
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // if
        self.expect(&TokenKind::LParen, "'('")?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let consequent = self.parse_block()?;

        let alternate = if self.eat_keyword(Keyword::Else) {
            if self.check_keyword(Keyword::If) {
                Some(vec![self.parse_if()?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Ok(Stmt::IfStatement {
            condition,
            consequent,
            alternate,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // while
        self.expect(&TokenKind::LParen, "'('")?;
        let condition = self.parse_expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(Stmt::WhileStatement { condition, body })
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // return
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_semicolon()?;
        Ok(Stmt::ReturnStatement(value))
    }

    fn parse_try_catch(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // try
        let try_block = self.parse_block()?;
        self.expect_keyword(Keyword::Catch, "'catch'")?;

        let param = if self.check(&TokenKind::LParen) {
            self.eat();
            let name = self.expect_ident("catch parameter")?;
            self.expect(&TokenKind::RParen, "')'")?;
            Some(name)
        } else {
            None
        };

        let catch_block = self.parse_block()?;
        Ok(Stmt::TryCatchStatement {
            try_block,
            param,
            catch_block,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // import
        let specifier = match &self.at().kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.eat();
                s
            }
            _ => return Err(self.unexpected("module path string")),
        };

        let namespace = if self.eat_keyword(Keyword::As) {
            Some(self.expect_ident("namespace binding name")?)
        } else {
            None
        };

        let mut exposing = Vec::new();
        if self.eat_keyword(Keyword::Exposing) {
            self.expect(&TokenKind::LBrace, "'{'")?;
            while !self.check(&TokenKind::RBrace) {
                exposing.push(self.expect_ident("export name")?);
                if !self.check(&TokenKind::RBrace) {
                    self.expect(&TokenKind::Comma, "','")?;
                }
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
        }

        let default_binding = if self.eat_keyword(Keyword::Default) {
            Some(self.expect_ident("default binding name")?)
        } else {
            None
        };

        self.expect_semicolon()?;
        Ok(Stmt::ImportStatement(ImportStmt {
            specifier,
            namespace,
            exposing,
            default_binding,
        }))
    }

    fn parse_export(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // export

        if self.eat_keyword(Keyword::Default) {
            let inner = match &self.at().kind {
                TokenKind::Keyword(Keyword::Func) => {
                    Stmt::FunctionDeclaration(self.parse_function()?)
                }
                TokenKind::Keyword(Keyword::Class) | TokenKind::Keyword(Keyword::Schema) => {
                    self.parse_class_declaration()?
                }
                TokenKind::Keyword(Keyword::Declare) => self.parse_var_declaration()?,
                _ => {
                    let expr = self.parse_expression()?;
                    self.expect_semicolon()?;
                    Stmt::Expression(expr)
                }
            };
            return Ok(Stmt::ExportDeclaration(ExportDecl::Default(Box::new(
                inner,
            ))));
        }

        if self.check(&TokenKind::LBrace) {
            self.eat();
            let mut names = Vec::new();
            while !self.check(&TokenKind::RBrace) {
                names.push(self.expect_ident("export name")?);
                if !self.check(&TokenKind::RBrace) {
                    self.expect(&TokenKind::Comma, "','")?;
                }
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            self.expect_semicolon()?;
            return Ok(Stmt::ExportDeclaration(ExportDecl::Specifiers(names)));
        }

        match &self.at().kind {
            TokenKind::Keyword(Keyword::Declare)
            | TokenKind::Keyword(Keyword::Func)
            | TokenKind::Keyword(Keyword::Class)
            | TokenKind::Keyword(Keyword::Schema) => {
                let decl = self.parse_statement()?;
                Ok(Stmt::ExportDeclaration(ExportDecl::Declaration(Box::new(
                    decl,
                ))))
            }
            _ => Err(self.unexpected("'default', '{', or a declaration after 'export'")),
        }
    }

    fn parse_database(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // database
        let name = self.expect_ident("database binding name")?;
        self.expect(&TokenKind::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect_semicolon()?;
        Ok(Stmt::DatabaseStatement { name, value })
    }

    fn parse_collection(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // collection
        let name = self.expect_ident("collection binding name")?;
        let init = if self.check(&TokenKind::Assign) {
            self.eat();
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon()?;
        Ok(Stmt::CollectionStatement { name, init })
    }

    fn parse_use_collection(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // use
        self.expect_keyword(Keyword::Collection, "'collection'")?;
        let name = self.expect_ident("collection binding name")?;
        let options = if self.eat_keyword(Keyword::With) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect_semicolon()?;
        Ok(Stmt::UseCollectionStatement { name, options })
    }

    /// `using mongo from uri [database db] [as alias] [with opts] { body }`
    /// — the optional clauses may appear in any order.
    fn parse_using_mongo(&mut self) -> Result<Stmt, ParseError> {
        self.eat(); // using
        self.expect_keyword(Keyword::Mongo, "'mongo'")?;

        let mut uri = None;
        let mut database = None;
        let mut alias = None;
        let mut options = None;

        loop {
            if self.eat_keyword(Keyword::From) {
                uri = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::Database) {
                database = Some(self.parse_expression()?);
            } else if self.eat_keyword(Keyword::As) {
                alias = Some(self.expect_ident("database alias")?);
            } else if self.eat_keyword(Keyword::With) {
                options = Some(self.parse_expression()?);
            } else {
                break;
            }
        }

        let uri = uri.ok_or_else(|| {
            ParseError::InvalidSyntax("'using mongo' requires a 'from <uri>' clause".to_string())
        })?;
        let body = self.parse_block()?;

        Ok(Stmt::UsingStatement(UsingMongo {
            uri,
            database,
            alias,
            options,
            body,
        }))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_dsl_expr()?;
        if self.check(&TokenKind::Assign) {
            self.eat();
            let value = self.parse_assignment()?;
            return Ok(Expr::AssignmentExpr {
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    /// The document-store operator layer: `<- ! !! ? ?? |>` infix operators
    /// and the `update ... where ... set ...` clause, all left-associative.
    fn parse_dsl_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_or()?;

        loop {
            let op = match self.at().kind {
                TokenKind::LArrow => Some(MongoOp::Insert),
                TokenKind::Bang => Some(MongoOp::DeleteOne),
                TokenKind::DoubleBang => Some(MongoOp::DeleteMany),
                TokenKind::Question => Some(MongoOp::FindOne),
                TokenKind::DoubleQuestion => Some(MongoOp::FindMany),
                TokenKind::PipeGt => Some(MongoOp::Aggregate),
                _ => None,
            };

            if let Some(op) = op {
                self.eat();
                let operand = self.parse_logical_or()?;
                left = Expr::MongoOperationExpr {
                    op,
                    target: Box::new(left),
                    operand: Box::new(operand),
                };
                continue;
            }

            if self.check_keyword(Keyword::Update) {
                self.eat();
                let many = self.eat_keyword(Keyword::Many);
                self.expect_keyword(Keyword::Where, "'where'")?;
                let filter = self.parse_logical_or()?;
                self.expect_keyword(Keyword::Set, "'set'")?;
                let update = self.parse_logical_or()?;
                let options = if self.eat_keyword(Keyword::With) {
                    Some(Box::new(self.parse_logical_or()?))
                } else {
                    None
                };
                left = Expr::MongoUpdateExpr {
                    target: Box::new(left),
                    filter: Box::new(filter),
                    update: Box::new(update),
                    options,
                    many,
                };
                continue;
            }

            break;
        }

        Ok(left)
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_logical_and()?;
        while self.check(&TokenKind::OrOr) {
            self.eat();
            let right = self.parse_logical_and()?;
            left = Expr::BinaryExpr {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::AndAnd) {
            self.eat();
            let right = self.parse_equality()?;
            left = Expr::BinaryExpr {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.at().kind {
                TokenKind::EqEq => BinOp::Equal,
                TokenKind::NotEq => BinOp::NotEqual,
                _ => break,
            };
            self.eat();
            let right = self.parse_relational()?;
            left = Expr::BinaryExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.at().kind {
                TokenKind::Lt => BinOp::LessThan,
                TokenKind::LtEq => BinOp::LessEqual,
                TokenKind::Gt => BinOp::GreaterThan,
                TokenKind::GtEq => BinOp::GreaterEqual,
                _ => break,
            };
            self.eat();
            let right = self.parse_additive()?;
            left = Expr::BinaryExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.at().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Subtract,
                _ => break,
            };
            self.eat();
            let right = self.parse_multiplicative()?;
            left = Expr::BinaryExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.at().kind {
                TokenKind::Star => BinOp::Multiply,
                TokenKind::Slash => BinOp::Divide,
                TokenKind::Percent => BinOp::Modulo,
                _ => break,
            };
            self.eat();
            let right = self.parse_unary()?;
            left = Expr::BinaryExpr {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.at().kind {
            TokenKind::Bang => {
                self.eat();
                let operand = self.parse_unary()?;
                Ok(Expr::UnaryExpr {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Minus => {
                self.eat();
                let operand = self.parse_unary()?;
                Ok(Expr::UnaryExpr {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Keyword(Keyword::Await) => {
                self.eat();
                let operand = self.parse_unary()?;
                Ok(Expr::AwaitExpr(Box::new(operand)))
            }
            _ => self.parse_call_member(),
        }
    }

    fn parse_call_member(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(&TokenKind::LParen) {
                self.eat();
                let mut args = Vec::new();
                while !self.check(&TokenKind::RParen) {
                    args.push(self.parse_expression()?);
                    if !self.check(&TokenKind::RParen) {
                        self.expect(&TokenKind::Comma, "','")?;
                    }
                }
                self.expect(&TokenKind::RParen, "')'")?;
                expr = Expr::CallExpr {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.check(&TokenKind::Dot) {
                self.eat();
                // Keywords are allowed as property names after a dot, so
                // collections named e.g. `from` stay reachable.
                let name = match &self.at().kind {
                    TokenKind::Ident(name) => name.clone(),
                    TokenKind::Keyword(_) => self.at().lexeme.clone(),
                    _ => return Err(self.unexpected("property name after '.'")),
                };
                self.eat();
                expr = Expr::MemberExpr {
                    object: Box::new(expr),
                    property: MemberKey::Dot(name),
                };
            } else if self.check(&TokenKind::LBracket) {
                self.eat();
                let key = self.parse_expression()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::MemberExpr {
                    object: Box::new(expr),
                    property: MemberKey::Computed(Box::new(key)),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.at().kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.eat();
                Ok(Expr::NumericLiteral(n))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.eat();
                Ok(Expr::StringLiteral(s))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.eat();
                Ok(Expr::BooleanLiteral(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.eat();
                Ok(Expr::BooleanLiteral(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.eat();
                Ok(Expr::NullLiteral)
            }
            TokenKind::Keyword(Keyword::Query) => self.parse_query_literal(),
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.eat();
                Ok(Expr::Identifier(name))
            }
            TokenKind::LParen => {
                self.eat();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::LBracket => self.parse_array_literal(),
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut properties = Vec::new();

        while !self.check(&TokenKind::RBrace) {
            // Keys may be identifiers, strings, or keywords (`from`, `as`,
            // ... appear as plain keys in stage payloads).
            let key = match &self.at().kind {
                TokenKind::Ident(name) => name.clone(),
                TokenKind::Str(s) => s.clone(),
                TokenKind::Keyword(_) => self.at().lexeme.clone(),
                _ => return Err(self.unexpected("object key")),
            };
            self.eat();

            let value = if self.check(&TokenKind::Colon) {
                self.eat();
                Some(self.parse_expression()?)
            } else {
                None // shorthand { x }
            };
            properties.push(ObjectProperty { key, value });

            if !self.check(&TokenKind::RBrace) {
                self.expect(&TokenKind::Comma, "','")?;
            }
        }

        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::ObjectLiteral(properties))
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect(&TokenKind::LBracket, "'['")?;
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            elements.push(self.parse_expression()?);
            if !self.check(&TokenKind::RBracket) {
                self.expect(&TokenKind::Comma, "','")?;
            }
        }
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::ArrayLiteral(elements))
    }

    /// `query { field op value, ... }`
    fn parse_query_literal(&mut self) -> Result<Expr, ParseError> {
        self.eat(); // query
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut conditions = Vec::new();

        while !self.check(&TokenKind::RBrace) {
            let field = match &self.at().kind {
                TokenKind::Ident(name) => name.clone(),
                TokenKind::Str(s) => s.clone(),
                _ => return Err(self.unexpected("field name")),
            };
            self.eat();

            let op = match self.at().kind {
                TokenKind::EqEq => CompareOp::Eq,
                TokenKind::NotEq => CompareOp::Ne,
                TokenKind::Lt => CompareOp::Lt,
                TokenKind::LtEq => CompareOp::Lte,
                TokenKind::Gt => CompareOp::Gt,
                TokenKind::GtEq => CompareOp::Gte,
                _ => return Err(self.unexpected("a comparison operator (==, !=, <, <=, >, >=)")),
            };
            self.eat();

            let value = self.parse_logical_or()?;
            conditions.push(QueryCondition { field, op, value });

            if !self.check(&TokenKind::RBrace) {
                self.expect(&TokenKind::Comma, "','")?;
            }
        }

        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::MongoQueryExpr(conditions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_source(src).unwrap()
    }

    #[test]
    fn precedence_of_arithmetic() {
        let program = parse("2 + 3 * 4;");
        match &program.body[0] {
            Stmt::Expression(Expr::BinaryExpr { op, right, .. }) => {
                assert_eq!(*op, BinOp::Add);
                assert!(matches!(
                    **right,
                    Expr::BinaryExpr {
                        op: BinOp::Multiply,
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn const_requires_initializer() {
        assert!(matches!(
            parse_source("declare const x;"),
            Err(ParseError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn dsl_operators_bind_below_logic() {
        let program = parse("users ? query { age > 18 };");
        match &program.body[0] {
            Stmt::Expression(Expr::MongoOperationExpr { op, operand, .. }) => {
                assert_eq!(*op, MongoOp::FindOne);
                assert!(matches!(**operand, Expr::MongoQueryExpr(_)));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn update_clause() {
        let program = parse(r#"users update many where query { a == 1 } set { b: 2 } with { upsert: true };"#);
        match &program.body[0] {
            Stmt::Expression(Expr::MongoUpdateExpr { many, options, .. }) => {
                assert!(many);
                assert!(options.is_some());
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn class_members() {
        let program = parse("schema A extends B create(x) { required name: string; age = 3; greet() { return name; } }");
        match &program.body[0] {
            Stmt::ClassDeclaration(decl) => {
                assert_eq!(decl.base.as_deref(), Some("B"));
                assert_eq!(decl.constructor.as_ref().unwrap().len(), 1);
                assert_eq!(decl.members.len(), 3);
                match &decl.members[1] {
                    ClassMember::Field(f) => assert!(!f.required),
                    other => panic!("expected field, got {:?}", other),
                }
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }
}
