// AST node types for .pnet network description files.
//
// One file describes one process network: its C functions, its processes,
// the connections between their ports, and the network boundary lists.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete network description: `network IDENT { item* }`.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDecl {
    pub name: Ident,
    pub items: Vec<Item>,
    pub span: Span,
}

// ── Items ──

/// A declaration inside the network block, with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    Fun(FunDecl),
    Proc(ProcDecl),
    Connect(ConnectDecl),
    Inputs(IoDecl),
    Outputs(IoDecl),
}

// ── fun_decl: 'fun' IDENT '(' params? ')' '->' type_ann BODY ──

/// A C function: typed parameters, return type, and a raw body block
/// (`%{ ... }%`, stored without the delimiters).
#[derive(Debug, Clone, PartialEq)]
pub struct FunDecl {
    pub name: Ident,
    pub params: Vec<ParamDecl>,
    pub return_ty: TypeAnn,
    pub body: String,
    pub body_span: Span,
}

/// `IDENT ':' type_ann`
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    pub name: Ident,
    pub ty: TypeAnn,
}

// ── type_ann: 'const'? base_word+ array_suffix? ──

/// A C type annotation: optional `const`, a (possibly multi-word) base type
/// spelling, and an optional array suffix `[N]` or `[]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAnn {
    pub is_const: bool,
    pub base: String,
    pub array: ArrayAnn,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayAnn {
    Scalar,
    /// `[]` — size resolved later by propagation.
    Unsized,
    /// `[N]`
    Sized(u64),
}

// ── proc_decl ──

/// A process declaration. The port set is implied by the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcDecl {
    pub name: Ident,
    pub kind: ProcKindDecl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcKindDecl {
    /// `map IDENT = IDENT ;`
    Map { function: Ident },
    /// `zipwith IDENT = IDENT ;` — in-arity taken from the function.
    ZipWith { function: Ident },
    /// `parallelmap IDENT = INT '*' IDENT ;`
    ParallelMap {
        count: u64,
        count_span: Span,
        function: Ident,
    },
    /// `copy IDENT '->' INT ;`
    Copy { outs: u64, arity_span: Span },
    /// `zipx IDENT '<-' INT ;`
    Zipx { ins: u64, arity_span: Span },
    /// `unzipx IDENT '->' INT ;`
    Unzipx { outs: u64, arity_span: Span },
    /// `delay IDENT 'init' STRING ;`
    Delay { init: String, init_span: Span },
}

// ── connect_decl: 'connect' port_path '->' port_path ';' ──

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectDecl {
    pub from: PortPath,
    pub to: PortPath,
}

// ── inputs/outputs: 'inputs' port_path (',' port_path)* ';' ──

#[derive(Debug, Clone, PartialEq)]
pub struct IoDecl {
    pub ports: Vec<PortPath>,
}

/// `IDENT '.' IDENT` — a process port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortPath {
    pub process: Ident,
    pub port: Ident,
    pub span: Span,
}

// ── Identifier ──

/// An identifier with its source text and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
