// pn2c — process network to C compiler
//
// Library root. Phases run in pipeline order: parser/frontend build the
// model, rewrite normalizes and fuses it, schedule orders it, synth and
// codegen turn it into C. dot and dump are inspection surfaces.

pub mod ast;
pub mod codegen;
pub mod ctype;
pub mod diag;
pub mod dot;
pub mod dump;
pub mod frontend;
pub mod id;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod rewrite;
pub mod schedule;
pub mod synth;
