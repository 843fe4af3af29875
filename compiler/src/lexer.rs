// Lexer for .pnet network description files.
//
// Tokenizes a network description into keywords, punctuation, literals, and
// raw C body blocks. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters and unterminated `%{` blocks produce
//                `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// .pnet token types.
///
/// Keywords and symbols are matched as fixed strings. Literals carry parsed
/// values. Identifiers carry no value — use the span to retrieve the text
/// from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("network")]
    Network,
    #[token("fun")]
    Fun,
    #[token("map")]
    Map,
    #[token("zipwith")]
    ZipWith,
    #[token("parallelmap")]
    ParallelMap,
    #[token("copy")]
    Copy,
    #[token("zipx")]
    Zipx,
    #[token("unzipx")]
    Unzipx,
    #[token("delay")]
    Delay,
    #[token("init")]
    Init,
    #[token("connect")]
    Connect,
    #[token("inputs")]
    Inputs,
    #[token("outputs")]
    Outputs,
    #[token("const")]
    Const,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token("<-")]
    LeftArrow,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("=")]
    Equals,
    #[token("*")]
    Star,

    // ── Literals ──
    /// Unsigned integer literal (arities, counts, array sizes).
    #[regex(r"[0-9]+", parse_int)]
    Int(u64),

    /// String literal with `\"` and `\\` escapes (delay initial values).
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    /// Raw C body block `%{ ... }%`, stored without the delimiters.
    /// Matched by a callback because the content is free-form (logos has no
    /// non-greedy repetition).
    #[token("%{", parse_body)]
    Body(String),

    // ── Identifier ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `map` matches Map, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Network => write!(f, "network"),
            Token::Fun => write!(f, "fun"),
            Token::Map => write!(f, "map"),
            Token::ZipWith => write!(f, "zipwith"),
            Token::ParallelMap => write!(f, "parallelmap"),
            Token::Copy => write!(f, "copy"),
            Token::Zipx => write!(f, "zipx"),
            Token::Unzipx => write!(f, "unzipx"),
            Token::Delay => write!(f, "delay"),
            Token::Init => write!(f, "init"),
            Token::Connect => write!(f, "connect"),
            Token::Inputs => write!(f, "inputs"),
            Token::Outputs => write!(f, "outputs"),
            Token::Const => write!(f, "const"),
            Token::Arrow => write!(f, "->"),
            Token::LeftArrow => write!(f, "<-"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Equals => write!(f, "="),
            Token::Star => write!(f, "*"),
            Token::Int(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Body(_) => write!(f, "%{{...}}%"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<u64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => {
                    // Only \" and \\ are supported. Reject unknown escapes.
                    return None;
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

/// Scan forward from `%{` to the matching `}%` and capture everything in
/// between verbatim.
fn parse_body(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let rest = lex.remainder();
    let end = rest.find("}%")?;
    let body = rest[..end].to_string();
    lex.bump(end + 2);
    Some(body)
}

// ── Public API ──

/// Lex a .pnet source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised input. Lexing is non-fatal: errors are collected and the
/// lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                let slice = &source[span.start..span.end];
                let message = if slice.starts_with("%{") {
                    "unterminated function body (missing `}%`)".to_string()
                } else {
                    format!("unexpected character: {:?}", slice)
                };
                errors.push(LexError { span, message });
            }
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    /// Helper: lex and return (tokens, errors).
    fn lex_all(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let result = lex(source);
        let tokens = result.tokens.into_iter().map(|(t, _)| t).collect();
        (tokens, result.errors)
    }

    // ── Keywords ──

    #[test]
    fn keywords() {
        let tokens = lex_ok(
            "network fun map zipwith parallelmap copy zipx unzipx delay init \
             connect inputs outputs const",
        );
        assert_eq!(
            tokens,
            vec![
                Token::Network,
                Token::Fun,
                Token::Map,
                Token::ZipWith,
                Token::ParallelMap,
                Token::Copy,
                Token::Zipx,
                Token::Unzipx,
                Token::Delay,
                Token::Init,
                Token::Connect,
                Token::Inputs,
                Token::Outputs,
                Token::Const,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `mapper` is an identifier, not keyword `map` + `per`
        let tokens = lex_ok("map mapper");
        assert_eq!(tokens, vec![Token::Map, Token::Ident]);
    }

    #[test]
    fn zipx_vs_zipwith() {
        let tokens = lex_ok("zipx zipwith zipxy");
        assert_eq!(tokens, vec![Token::Zipx, Token::ZipWith, Token::Ident]);
    }

    // ── Symbols ──

    #[test]
    fn symbols() {
        let tokens = lex_ok("-> <- ( ) { } [ ] , ; : . = *");
        assert_eq!(
            tokens,
            vec![
                Token::Arrow,
                Token::LeftArrow,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::Comma,
                Token::Semicolon,
                Token::Colon,
                Token::Dot,
                Token::Equals,
                Token::Star,
            ]
        );
    }

    // ── Integer literals ──

    #[test]
    fn int_literal() {
        let tokens = lex_ok("42 0 1024");
        assert_eq!(
            tokens,
            vec![Token::Int(42), Token::Int(0), Token::Int(1024)]
        );
    }

    // ── String literals ──

    #[test]
    fn string_simple() {
        let tokens = lex_ok(r#""0.0f""#);
        assert_eq!(tokens, vec![Token::StringLit("0.0f".into())]);
    }

    #[test]
    fn string_escape_quote() {
        let tokens = lex_ok(r#""say \"hi\"""#);
        assert_eq!(tokens, vec![Token::StringLit(r#"say "hi""#.into())]);
    }

    #[test]
    fn string_escape_backslash() {
        let tokens = lex_ok(r#""a\\b""#);
        assert_eq!(tokens, vec![Token::StringLit(r"a\b".into())]);
    }

    // ── Body blocks ──

    #[test]
    fn body_block_simple() {
        let tokens = lex_ok("%{ return x * 2; }%");
        assert_eq!(tokens, vec![Token::Body(" return x * 2; ".into())]);
    }

    #[test]
    fn body_block_multiline() {
        let tokens = lex_ok("%{\n    int y = x + 1;\n    return y;\n}%");
        assert_eq!(
            tokens,
            vec![Token::Body("\n    int y = x + 1;\n    return y;\n".into())]
        );
    }

    #[test]
    fn body_block_contains_braces() {
        // `{` and `}` inside the body are content, not tokens
        let tokens = lex_ok("%{ if (x > 0) { return x; } return 0; }%");
        assert_eq!(
            tokens,
            vec![Token::Body(" if (x > 0) { return x; } return 0; ".into())]
        );
    }

    #[test]
    fn body_block_unterminated() {
        let (tokens, errors) = lex_all("%{ return x;");
        assert!(tokens.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("unterminated"));
    }

    // ── Identifiers ──

    #[test]
    fn identifiers() {
        let tokens = lex_ok("foo _bar baz_123");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    // ── Comments and whitespace ──

    #[test]
    fn comment_skipped() {
        let tokens = lex_ok("foo // this is a comment\nbar");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
    }

    #[test]
    fn comment_only_line() {
        let tokens = lex_ok("// full line comment");
        assert!(tokens.is_empty());
    }

    #[test]
    fn newlines_insignificant() {
        let tokens = lex_ok("a\n\nb");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
    }

    // ── Spans ──

    #[test]
    fn spans_correct() {
        let result = lex("map foo");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 3 });
        assert_eq!(result.tokens[1].1, Span { start: 4, end: 7 });
    }

    #[test]
    fn body_span_covers_delimiters() {
        let result = lex("%{ x }%");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 7 });
    }

    // ── Error recovery ──

    #[test]
    fn error_recovery() {
        let (tokens, errors) = lex_all("foo ~ bar");
        // `~` is not a valid token
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span { start: 4, end: 5 });
    }

    // ── Full declaration snippets ──

    #[test]
    fn fun_declaration() {
        let tokens = lex_ok("fun double(x: int) -> int %{ return x * 2; }%");
        assert_eq!(
            tokens,
            vec![
                Token::Fun,
                Token::Ident, // double
                Token::LParen,
                Token::Ident, // x
                Token::Colon,
                Token::Ident, // int
                Token::RParen,
                Token::Arrow,
                Token::Ident, // int
                Token::Body(" return x * 2; ".into()),
            ]
        );
    }

    #[test]
    fn proc_and_connect_declarations() {
        let source = "map m1 = double;\nconnect c1.out1 -> m1.in;\nzipx zx <- 3;";
        let tokens = lex_ok(source);
        assert_eq!(
            tokens,
            vec![
                Token::Map,
                Token::Ident, // m1
                Token::Equals,
                Token::Ident, // double
                Token::Semicolon,
                Token::Connect,
                Token::Ident, // c1
                Token::Dot,
                Token::Ident, // out1
                Token::Arrow,
                Token::Ident, // m1
                Token::Dot,
                Token::Ident, // in
                Token::Semicolon,
                Token::Zipx,
                Token::Ident, // zx
                Token::LeftArrow,
                Token::Int(3),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn delay_declaration() {
        let tokens = lex_ok(r#"delay d1 init "0";"#);
        assert_eq!(
            tokens,
            vec![
                Token::Delay,
                Token::Ident, // d1
                Token::Init,
                Token::StringLit("0".into()),
                Token::Semicolon,
            ]
        );
    }

    #[test]
    fn parallelmap_declaration() {
        let tokens = lex_ok("parallelmap pm = 4 * double;");
        assert_eq!(
            tokens,
            vec![
                Token::ParallelMap,
                Token::Ident, // pm
                Token::Equals,
                Token::Int(4),
                Token::Star,
                Token::Ident, // double
                Token::Semicolon,
            ]
        );
    }
}
