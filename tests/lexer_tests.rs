// tests/lexer_tests.rs

use datascript::ast::{Keyword, TokenKind};
use datascript::lexer::{LexError, Lexer};

// ============================================================================
// Token kinds
// ============================================================================

#[test]
fn test_single_char_tokens() {
    let test_cases = vec![
        ("+", TokenKind::Plus),
        ("-", TokenKind::Minus),
        ("*", TokenKind::Star),
        ("/", TokenKind::Slash),
        ("%", TokenKind::Percent),
        ("<", TokenKind::Lt),
        (">", TokenKind::Gt),
        ("!", TokenKind::Bang),
        ("?", TokenKind::Question),
        ("=", TokenKind::Assign),
        (";", TokenKind::Semicolon),
        (",", TokenKind::Comma),
        (".", TokenKind::Dot),
        (":", TokenKind::Colon),
        ("(", TokenKind::LParen),
        (")", TokenKind::RParen),
        ("{", TokenKind::LBrace),
        ("}", TokenKind::RBrace),
        ("[", TokenKind::LBracket),
        ("]", TokenKind::RBracket),
    ];

    for (input, expected) in test_cases {
        let tokens = Lexer::tokenize(input).unwrap();
        assert_eq!(tokens[0].kind, expected, "failed for input: {}", input);
        assert_eq!(tokens[1].kind, TokenKind::Eof);
    }
}

#[test]
fn test_two_char_tokens() {
    let test_cases = vec![
        ("==", TokenKind::EqEq),
        ("!=", TokenKind::NotEq),
        ("!!", TokenKind::DoubleBang),
        ("<=", TokenKind::LtEq),
        (">=", TokenKind::GtEq),
        ("<-", TokenKind::LArrow),
        ("&&", TokenKind::AndAnd),
        ("||", TokenKind::OrOr),
        ("|>", TokenKind::PipeGt),
        ("??", TokenKind::DoubleQuestion),
    ];

    for (input, expected) in test_cases {
        let tokens = Lexer::tokenize(input).unwrap();
        assert_eq!(tokens.len(), 2, "failed for input: {}", input);
        assert_eq!(tokens[0].kind, expected, "failed for input: {}", input);
    }
}

#[test]
fn test_keywords_and_identifiers() {
    let tokens = Lexer::tokenize("declare const schema extends frobnicate _private x1").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Declare));
    assert_eq!(tokens[1].kind, TokenKind::Keyword(Keyword::Const));
    assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::Schema));
    assert_eq!(tokens[3].kind, TokenKind::Keyword(Keyword::Extends));
    assert_eq!(tokens[4].kind, TokenKind::Ident("frobnicate".to_string()));
    assert_eq!(tokens[5].kind, TokenKind::Ident("_private".to_string()));
    assert_eq!(tokens[6].kind, TokenKind::Ident("x1".to_string()));
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_numbers() {
    let tokens = Lexer::tokenize("42 3.25 .5 0").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Number(42.0));
    assert_eq!(tokens[1].kind, TokenKind::Number(3.25));
    assert_eq!(tokens[2].kind, TokenKind::Number(0.5));
    assert_eq!(tokens[3].kind, TokenKind::Number(0.0));
}

#[test]
fn test_trailing_dot_is_fatal() {
    assert!(matches!(
        Lexer::tokenize("declare x = 1.;"),
        Err(LexError::TrailingDot(_))
    ));
}

#[test]
fn test_string_escapes() {
    let tokens = Lexer::tokenize(r#""a\nb\t\"c\"\\d""#).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Str("a\nb\t\"c\"\\d".to_string()));
}

#[test]
fn test_unknown_escape_keeps_character() {
    let tokens = Lexer::tokenize(r#""\x\y""#).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Str("xy".to_string()));
}

#[test]
fn test_unterminated_string_is_fatal() {
    assert!(matches!(
        Lexer::tokenize("\"oops"),
        Err(LexError::UnterminatedString)
    ));
}

// ============================================================================
// Comments, whitespace, determinism
// ============================================================================

#[test]
fn test_comments_are_discarded() {
    let tokens = Lexer::tokenize("1 // ignored to the end\n2").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Number(1.0));
    assert_eq!(tokens[1].kind, TokenKind::Number(2.0));
    assert_eq!(tokens[2].kind, TokenKind::Eof);
}

#[test]
fn test_lexemes_reconstruct_the_stripped_source() {
    let source = "declare x = 2 + 3.5; print(\"v=\" + x); users ?? query { a >= 1 }";
    let tokens = Lexer::tokenize(source).unwrap();

    let stripped: String = source.split_whitespace().collect();
    let joined: String = tokens.iter().map(|t| t.lexeme.as_str()).collect();
    assert_eq!(joined, stripped);
}

#[test]
fn test_tokenization_is_deterministic() {
    let source = "func f(a, b) { return a <- b; }";
    let first = Lexer::tokenize(source).unwrap();
    let second = Lexer::tokenize(source).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_character_is_fatal() {
    assert!(matches!(
        Lexer::tokenize("declare x = 1 # 2;"),
        Err(LexError::UnexpectedChar { ch: '#', .. })
    ));
}

#[test]
fn test_lone_ampersand_is_fatal() {
    assert!(matches!(
        Lexer::tokenize("a & b"),
        Err(LexError::UnexpectedChar { ch: '&', .. })
    ));
}
