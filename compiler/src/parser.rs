// Parser for .pnet network description files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators over the lexer's token/span pairs.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; the AST is absent
//                when the description cannot be parsed as a whole.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub network: Option<NetworkDecl>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a .pnet source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = network_parser(source);
    let (network, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        network,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `network_parser` so that the `source`
// reference is captured once and shared by all combinators. This avoids
// complex lifetime annotations on per-rule helper functions.

fn network_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, NetworkDecl, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // ── Literals with spans ──

    let int = select! {
        Token::Int(n) = e => (n, e.span()),
    };

    let string = select! {
        Token::StringLit(s) = e => (s, e.span()),
    };

    let body = select! {
        Token::Body(b) = e => (b, e.span()),
    };

    // ── port_path: IDENT '.' IDENT ──

    let port_path = ident
        .clone()
        .then_ignore(just(Token::Dot))
        .then(ident.clone())
        .map_with(|(process, port), e| PortPath {
            process,
            port,
            span: e.span(),
        });

    // ── type_ann: 'const'? base_word+ ('[' INT? ']')? ──
    //
    // Base type spellings can span several words (`unsigned long int`); the
    // run of identifiers ends at the first non-identifier token.

    let type_ann = just(Token::Const)
        .or_not()
        .then(ident.clone().repeated().at_least(1).collect::<Vec<_>>())
        .then(
            just(Token::LBracket)
                .ignore_then(select! { Token::Int(n) => n }.or_not())
                .then_ignore(just(Token::RBracket))
                .or_not(),
        )
        .map_with(|((konst, words), array), e| {
            let base = words
                .iter()
                .map(|w| w.name.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            TypeAnn {
                is_const: konst.is_some(),
                base,
                array: match array {
                    None => ArrayAnn::Scalar,
                    Some(None) => ArrayAnn::Unsized,
                    Some(Some(n)) => ArrayAnn::Sized(n),
                },
                span: e.span(),
            }
        });

    // ── fun_decl: 'fun' IDENT '(' params? ')' '->' type_ann BODY ──

    let param = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(type_ann.clone())
        .map(|(name, ty)| ParamDecl { name, ty });

    let fun_decl = just(Token::Fun)
        .ignore_then(ident.clone())
        .then(
            param
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Arrow))
        .then(type_ann.clone())
        .then(body)
        .map(|(((name, params), return_ty), (body, body_span))| {
            ItemKind::Fun(FunDecl {
                name,
                params,
                return_ty,
                body,
                body_span,
            })
        });

    // ── proc_decls ──

    let map_decl = just(Token::Map)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|(name, function)| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::Map { function },
            })
        });

    let zipwith_decl = just(Token::ZipWith)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(ident.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|(name, function)| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::ZipWith { function },
            })
        });

    let parallelmap_decl = just(Token::ParallelMap)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(int)
        .then_ignore(just(Token::Star))
        .then(ident.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|((name, (count, count_span)), function)| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::ParallelMap {
                    count,
                    count_span,
                    function,
                },
            })
        });

    let copy_decl = just(Token::Copy)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Arrow))
        .then(int)
        .then_ignore(just(Token::Semicolon))
        .map(|(name, (outs, arity_span))| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::Copy { outs, arity_span },
            })
        });

    let zipx_decl = just(Token::Zipx)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::LeftArrow))
        .then(int)
        .then_ignore(just(Token::Semicolon))
        .map(|(name, (ins, arity_span))| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::Zipx { ins, arity_span },
            })
        });

    let unzipx_decl = just(Token::Unzipx)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Arrow))
        .then(int)
        .then_ignore(just(Token::Semicolon))
        .map(|(name, (outs, arity_span))| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::Unzipx { outs, arity_span },
            })
        });

    let delay_decl = just(Token::Delay)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Init))
        .then(string)
        .then_ignore(just(Token::Semicolon))
        .map(|(name, (init, init_span))| {
            ItemKind::Proc(ProcDecl {
                name,
                kind: ProcKindDecl::Delay { init, init_span },
            })
        });

    // ── connect_decl: 'connect' port_path '->' port_path ';' ──

    let connect_decl = just(Token::Connect)
        .ignore_then(port_path.clone())
        .then_ignore(just(Token::Arrow))
        .then(port_path.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|(from, to)| ItemKind::Connect(ConnectDecl { from, to }));

    // ── inputs/outputs ──

    let io_list = port_path
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>();

    let inputs_decl = just(Token::Inputs)
        .ignore_then(io_list.clone())
        .then_ignore(just(Token::Semicolon))
        .map(|ports| ItemKind::Inputs(IoDecl { ports }));

    let outputs_decl = just(Token::Outputs)
        .ignore_then(io_list)
        .then_ignore(just(Token::Semicolon))
        .map(|ports| ItemKind::Outputs(IoDecl { ports }));

    // ── Item dispatch ──

    let item = choice((
        fun_decl,
        map_decl,
        zipwith_decl,
        parallelmap_decl,
        copy_decl,
        zipx_decl,
        unzipx_decl,
        delay_decl,
        connect_decl,
        inputs_decl,
        outputs_decl,
    ))
    .map_with(|kind, e| Item {
        kind,
        span: e.span(),
    });

    // ── Network ──

    just(Token::Network)
        .ignore_then(ident)
        .then(
            item.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(name, items), e| NetworkDecl {
            name,
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> NetworkDecl {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected parse errors: {:?}",
            result.errors
        );
        result.network.expect("no network produced")
    }

    fn parse_all(source: &str) -> (Option<NetworkDecl>, usize) {
        let result = parse(source);
        (result.network, result.errors.len())
    }

    fn only_item(source: &str) -> ItemKind {
        let net = parse_ok(source);
        assert_eq!(net.items.len(), 1, "expected exactly one item");
        net.items.into_iter().next().unwrap().kind
    }

    // ── Network shell ──

    #[test]
    fn empty_network() {
        let net = parse_ok("network n { }");
        assert_eq!(net.name.name, "n");
        assert!(net.items.is_empty());
    }

    #[test]
    fn network_keyword_required() {
        let (net, errors) = parse_all("module n { }");
        assert!(net.is_none());
        assert!(errors > 0);
    }

    // ── Functions ──

    #[test]
    fn fun_decl_scalar() {
        let kind = only_item("network n { fun double(x: int) -> int %{ return x * 2; }% }");
        let ItemKind::Fun(f) = kind else {
            panic!("expected Fun, got {:?}", kind);
        };
        assert_eq!(f.name.name, "double");
        assert_eq!(f.params.len(), 1);
        assert_eq!(f.params[0].name.name, "x");
        assert_eq!(f.params[0].ty.base, "int");
        assert_eq!(f.params[0].ty.array, ArrayAnn::Scalar);
        assert!(!f.params[0].ty.is_const);
        assert_eq!(f.return_ty.base, "int");
        assert_eq!(f.body, " return x * 2; ");
    }

    #[test]
    fn fun_decl_const_array_param() {
        let kind = only_item(
            "network n { fun sum(xs: const float[8]) -> float %{ return xs[0]; }% }",
        );
        let ItemKind::Fun(f) = kind else {
            panic!("expected Fun");
        };
        assert!(f.params[0].ty.is_const);
        assert_eq!(f.params[0].ty.base, "float");
        assert_eq!(f.params[0].ty.array, ArrayAnn::Sized(8));
    }

    #[test]
    fn fun_decl_unsized_array_return() {
        let kind =
            only_item("network n { fun widen(x: int) -> double[] %{ /* fill */ }% }");
        let ItemKind::Fun(f) = kind else {
            panic!("expected Fun");
        };
        assert_eq!(f.return_ty.array, ArrayAnn::Unsized);
    }

    #[test]
    fn fun_decl_multiword_type() {
        let kind = only_item(
            "network n { fun widen(x: unsigned long int) -> unsigned long int %{ return x; }% }",
        );
        let ItemKind::Fun(f) = kind else {
            panic!("expected Fun");
        };
        assert_eq!(f.params[0].ty.base, "unsigned long int");
        assert_eq!(f.return_ty.base, "unsigned long int");
    }

    #[test]
    fn fun_decl_two_params() {
        let kind = only_item(
            "network n { fun add(a: float, b: float) -> float %{ return a + b; }% }",
        );
        let ItemKind::Fun(f) = kind else {
            panic!("expected Fun");
        };
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].name.name, "b");
    }

    // ── Processes ──

    #[test]
    fn map_decl() {
        let kind = only_item("network n { map m1 = double; }");
        let ItemKind::Proc(p) = kind else {
            panic!("expected Proc");
        };
        assert_eq!(p.name.name, "m1");
        assert!(matches!(&p.kind, ProcKindDecl::Map { function } if function.name == "double"));
    }

    #[test]
    fn zipwith_decl() {
        let kind = only_item("network n { zipwith z = add; }");
        let ItemKind::Proc(p) = kind else {
            panic!("expected Proc");
        };
        assert!(matches!(&p.kind, ProcKindDecl::ZipWith { function } if function.name == "add"));
    }

    #[test]
    fn parallelmap_decl() {
        let kind = only_item("network n { parallelmap pm = 4 * double; }");
        let ItemKind::Proc(p) = kind else {
            panic!("expected Proc");
        };
        assert!(matches!(
            &p.kind,
            ProcKindDecl::ParallelMap { count: 4, function, .. } if function.name == "double"
        ));
    }

    #[test]
    fn copy_decl() {
        let kind = only_item("network n { copy c1 -> 2; }");
        let ItemKind::Proc(p) = kind else {
            panic!("expected Proc");
        };
        assert!(matches!(&p.kind, ProcKindDecl::Copy { outs: 2, .. }));
    }

    #[test]
    fn zipx_and_unzipx_decls() {
        let net = parse_ok("network n { zipx zx <- 3; unzipx uz -> 3; }");
        assert_eq!(net.items.len(), 2);
        let ItemKind::Proc(zx) = &net.items[0].kind else {
            panic!("expected Proc");
        };
        assert!(matches!(&zx.kind, ProcKindDecl::Zipx { ins: 3, .. }));
        let ItemKind::Proc(uz) = &net.items[1].kind else {
            panic!("expected Proc");
        };
        assert!(matches!(&uz.kind, ProcKindDecl::Unzipx { outs: 3, .. }));
    }

    #[test]
    fn delay_decl() {
        let kind = only_item(r#"network n { delay d1 init "0"; }"#);
        let ItemKind::Proc(p) = kind else {
            panic!("expected Proc");
        };
        assert!(matches!(&p.kind, ProcKindDecl::Delay { init, .. } if init == "0"));
    }

    // ── Connections and boundaries ──

    #[test]
    fn connect_decl() {
        let kind = only_item("network n { connect c1.out1 -> m1.in; }");
        let ItemKind::Connect(c) = kind else {
            panic!("expected Connect");
        };
        assert_eq!(c.from.process.name, "c1");
        assert_eq!(c.from.port.name, "out1");
        assert_eq!(c.to.process.name, "m1");
        assert_eq!(c.to.port.name, "in");
    }

    #[test]
    fn inputs_and_outputs() {
        let net = parse_ok("network n { inputs a.in, b.in1; outputs z.out; }");
        let ItemKind::Inputs(ins) = &net.items[0].kind else {
            panic!("expected Inputs");
        };
        assert_eq!(ins.ports.len(), 2);
        assert_eq!(ins.ports[1].process.name, "b");
        assert_eq!(ins.ports[1].port.name, "in1");
        let ItemKind::Outputs(outs) = &net.items[1].kind else {
            panic!("expected Outputs");
        };
        assert_eq!(outs.ports.len(), 1);
    }

    // ── Errors ──

    #[test]
    fn missing_semicolon_is_error() {
        let (_, errors) = parse_all("network n { map m1 = double }");
        assert!(errors > 0);
    }

    #[test]
    fn lex_error_surfaces_in_parse_result() {
        let result = parse("network n { map m1 ~ double; }");
        assert!(!result.errors.is_empty());
    }

    // ── Spans ──

    #[test]
    fn network_span_covers_source() {
        let source = "network n { map m1 = f; }";
        let net = parse_ok(source);
        assert_eq!(net.span.start, 0);
        assert_eq!(net.span.end, source.len());
    }

    // ── Whole description ──

    #[test]
    fn complete_network() {
        let source = r#"
network example {
  fun double(x: int) -> int %{ return x * 2; }%

  map m1 = double;
  map m2 = double;
  copy c1 -> 2;
  zipx zx <- 2;
  delay d1 init "0";

  connect c1.out1 -> m1.in;
  connect c1.out2 -> m2.in;
  connect m1.out -> zx.in1;
  connect m2.out -> d1.in;
  connect d1.out -> zx.in2;

  inputs c1.in;
  outputs zx.out;
}
"#;
        let net = parse_ok(source);
        assert_eq!(net.name.name, "example");
        let funs = net
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Fun(_)))
            .count();
        let procs = net
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Proc(_)))
            .count();
        let connects = net
            .items
            .iter()
            .filter(|i| matches!(i.kind, ItemKind::Connect(_)))
            .count();
        assert_eq!(funs, 1);
        assert_eq!(procs, 5);
        assert_eq!(connects, 5);
    }
}
