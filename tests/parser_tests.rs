// tests/parser_tests.rs

use datascript::ast::{
    BinOp, ClassMember, CompareOp, ExportDecl, Expr, MemberKey, MongoOp, Stmt, UnaryOp,
};
use datascript::parser::{parse_source, ParseError};

fn parse(src: &str) -> Vec<Stmt> {
    parse_source(src).unwrap().body
}

fn parse_expr(src: &str) -> Expr {
    match parse(src).remove(0) {
        Stmt::Expression(expr) => expr,
        other => panic!("expected expression statement, got {:?}", other),
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[test]
fn test_precedence_additive_vs_multiplicative() {
    match parse_expr("2 + 3 * 4") {
        Expr::BinaryExpr { op, left, right } => {
            assert_eq!(op, BinOp::Add);
            assert!(matches!(*left, Expr::NumericLiteral(_)));
            assert!(matches!(
                *right,
                Expr::BinaryExpr {
                    op: BinOp::Multiply,
                    ..
                }
            ));
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_logic_binds_above_dsl() {
    // `a ? b && c` parses as a ? (b && c)
    match parse_expr("a ? b && c") {
        Expr::MongoOperationExpr { op, operand, .. } => {
            assert_eq!(op, MongoOp::FindOne);
            assert!(matches!(
                *operand,
                Expr::BinaryExpr { op: BinOp::And, .. }
            ));
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_unary_and_await() {
    assert!(matches!(
        parse_expr("!x"),
        Expr::UnaryExpr {
            op: UnaryOp::Not,
            ..
        }
    ));
    assert!(matches!(
        parse_expr("-x"),
        Expr::UnaryExpr {
            op: UnaryOp::Negate,
            ..
        }
    ));
    assert!(matches!(parse_expr("await p"), Expr::AwaitExpr(_)));
}

#[test]
fn test_member_chain() {
    match parse_expr("a.b[0].c(1)") {
        Expr::CallExpr { callee, args } => {
            assert_eq!(args.len(), 1);
            assert!(matches!(
                *callee,
                Expr::MemberExpr {
                    property: MemberKey::Dot(_),
                    ..
                }
            ));
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_object_literal_with_shorthand_and_keyword_keys() {
    match parse_expr(r#"{ a: 1, b, from: "users", "quoted key": 2 }"#) {
        Expr::ObjectLiteral(props) => {
            assert_eq!(props.len(), 4);
            assert_eq!(props[0].key, "a");
            assert!(props[1].value.is_none());
            assert_eq!(props[2].key, "from");
            assert_eq!(props[3].key, "quoted key");
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_assignment_is_right_associative() {
    match parse_expr("a = b = 1") {
        Expr::AssignmentExpr { value, .. } => {
            assert!(matches!(*value, Expr::AssignmentExpr { .. }));
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

// ============================================================================
// Statements
// ============================================================================

#[test]
fn test_declare_forms() {
    let body = parse("declare a; declare b = 1; declare const c = 2;");
    assert!(matches!(
        &body[0],
        Stmt::VarDeclaration {
            constant: false,
            init: None,
            ..
        }
    ));
    assert!(matches!(
        &body[2],
        Stmt::VarDeclaration { constant: true, .. }
    ));
}

#[test]
fn test_const_without_initializer_is_fatal() {
    assert!(matches!(
        parse_source("declare const c;"),
        Err(ParseError::InvalidSyntax(_))
    ));
}

#[test]
fn test_function_with_annotations_and_defaults() {
    match &parse("func f(a: number, b: string[] = [], c = 3) { return a; }")[0] {
        Stmt::FunctionDeclaration(decl) => {
            assert_eq!(decl.params.len(), 3);
            assert_eq!(decl.params[0].annotation.as_ref().unwrap().base, "number");
            assert_eq!(decl.params[1].annotation.as_ref().unwrap().array_depth, 1);
            assert!(decl.params[1].default.is_some());
            assert!(decl.params[2].annotation.is_none());
        }
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn test_class_with_members() {
    let src = r#"
        schema Person extends Entity create(name, age) {
            required name: string;
            optional nick: string;
            age: number = 0;
            tags: string[];
            greet(prefix = "hi") { return prefix + name; }
        }
    "#;
    match &parse(src)[0] {
        Stmt::ClassDeclaration(decl) => {
            assert_eq!(decl.name, "Person");
            assert_eq!(decl.base.as_deref(), Some("Entity"));
            assert_eq!(decl.constructor.as_ref().unwrap().len(), 2);
            assert_eq!(decl.members.len(), 5);

            let required: Vec<bool> = decl
                .members
                .iter()
                .filter_map(|m| match m {
                    ClassMember::Field(f) => Some(f.required),
                    ClassMember::Method(_) => None,
                })
                .collect();
            // forced required, forced optional, defaulted, no-initializer
            assert_eq!(required, vec![true, false, false, true]);
        }
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn test_try_catch_with_and_without_param() {
    let body = parse("try { x; } catch (e) { y; } try { x; } catch { y; }");
    assert!(matches!(
        &body[0],
        Stmt::TryCatchStatement { param: Some(_), .. }
    ));
    assert!(matches!(
        &body[1],
        Stmt::TryCatchStatement { param: None, .. }
    ));
}

#[test]
fn test_catch_is_mandatory() {
    assert!(parse_source("try { x; }").is_err());
}

#[test]
fn test_import_clauses() {
    match &parse(r#"import "./m.ds" as m exposing { a, b } default dft;"#)[0] {
        Stmt::ImportStatement(import) => {
            assert_eq!(import.specifier, "./m.ds");
            assert_eq!(import.namespace.as_deref(), Some("m"));
            assert_eq!(import.exposing, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(import.default_binding.as_deref(), Some("dft"));
        }
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn test_export_forms() {
    let body = parse(
        "export func f() { return 1; } export { a, b }; export default 42; export declare v = 1;",
    );
    assert!(matches!(
        &body[0],
        Stmt::ExportDeclaration(ExportDecl::Declaration(_))
    ));
    assert!(matches!(
        &body[1],
        Stmt::ExportDeclaration(ExportDecl::Specifiers(names)) if names.len() == 2
    ));
    assert!(matches!(
        &body[2],
        Stmt::ExportDeclaration(ExportDecl::Default(_))
    ));
    assert!(matches!(
        &body[3],
        Stmt::ExportDeclaration(ExportDecl::Declaration(_))
    ));
}

// ============================================================================
// Document-store DSL
// ============================================================================

#[test]
fn test_all_dsl_operators() {
    let cases = vec![
        ("c <- d", MongoOp::Insert),
        ("c ! d", MongoOp::DeleteOne),
        ("c !! d", MongoOp::DeleteMany),
        ("c ? d", MongoOp::FindOne),
        ("c ?? d", MongoOp::FindMany),
        ("c |> d", MongoOp::Aggregate),
    ];
    for (src, expected) in cases {
        match parse_expr(src) {
            Expr::MongoOperationExpr { op, .. } => assert_eq!(op, expected, "for {}", src),
            other => panic!("unexpected expression for {}: {:?}", src, other),
        }
    }
}

#[test]
fn test_query_literal() {
    match parse_expr(r#"query { age > 18, name == "ada", "raw key" <= 5 }"#) {
        Expr::MongoQueryExpr(conditions) => {
            assert_eq!(conditions.len(), 3);
            assert_eq!(conditions[0].field, "age");
            assert_eq!(conditions[0].op, CompareOp::Gt);
            assert_eq!(conditions[2].field, "raw key");
            assert_eq!(conditions[2].op, CompareOp::Lte);
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_query_rejects_non_comparison_operators() {
    assert!(parse_source("query { a <- 1 };").is_err());
}

#[test]
fn test_update_clause_shapes() {
    match parse_expr("users update where query { a == 1 } set { b: 2 }") {
        Expr::MongoUpdateExpr { many, options, .. } => {
            assert!(!many);
            assert!(options.is_none());
        }
        other => panic!("unexpected expression: {:?}", other),
    }

    match parse_expr("users update many where f set u with { upsert: true }") {
        Expr::MongoUpdateExpr { many, options, .. } => {
            assert!(many);
            assert!(options.is_some());
        }
        other => panic!("unexpected expression: {:?}", other),
    }
}

#[test]
fn test_dsl_statements() {
    let src = r#"
        database db = handle;
        collection users;
        collection posts = "blog_posts";
        use collection users with { limit: 10 };
    "#;
    let body = parse(src);
    assert!(matches!(&body[0], Stmt::DatabaseStatement { .. }));
    assert!(matches!(
        &body[1],
        Stmt::CollectionStatement { init: None, .. }
    ));
    assert!(matches!(
        &body[2],
        Stmt::CollectionStatement { init: Some(_), .. }
    ));
    assert!(matches!(
        &body[3],
        Stmt::UseCollectionStatement {
            options: Some(_),
            ..
        }
    ));
}

#[test]
fn test_using_mongo_clause_order_is_free() {
    let src = r#"using mongo as store from "memory://x" with { a: 1 } database "app" { print(1); }"#;
    match &parse(src)[0] {
        Stmt::UsingStatement(using) => {
            assert_eq!(using.alias.as_deref(), Some("store"));
            assert!(using.database.is_some());
            assert!(using.options.is_some());
            assert_eq!(using.body.len(), 1);
        }
        other => panic!("unexpected statement: {:?}", other),
    }
}

#[test]
fn test_using_mongo_requires_from() {
    assert!(matches!(
        parse_source("using mongo as x { }"),
        Err(ParseError::InvalidSyntax(_))
    ));
}

#[test]
fn test_parse_error_names_the_token() {
    let err = parse_source("declare = 1;").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'='"), "got: {}", message);
    assert!(message.contains("variable name"), "got: {}", message);
}
