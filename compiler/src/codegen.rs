// codegen.rs — C rendering of a synthesized process network
//
// Transforms a `SynthesizedProgram` into compilable C source: a header with
// the entry-point prototype and a doc comment, and an implementation with the
// function definitions, signal and delay variable declarations, and the
// three-phase driver body. Rendering is pure formatting; everything was typed,
// sized, and checked during synthesis.
//
// Preconditions: `program` came out of `synth::synthesize` without errors.
// Postconditions: returns `GeneratedCode`; a fixed program yields
//                 byte-identical output.
// Failure modes: none (pure string formatting).
// Side effects: none. File writing happens in `main`.

use std::fmt::Write as _;

use crate::synth::{BoundaryPort, Step, SynthesizedProgram, INDENT};

// ── Public types ────────────────────────────────────────────────────────────

/// The rendered C output: one header file, one implementation file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    pub header: String,
    pub implementation: String,
}

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    /// File name the implementation's `#include` line refers to.
    pub header_file: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        CodegenOptions {
            header_file: "network.h".to_string(),
        }
    }
}

/// The fixed name of the generated entry function.
pub const ENTRY_FUNCTION: &str = "executeProcessNetwork";

// ── Public entry point ──────────────────────────────────────────────────────

/// Render a synthesized program as C header and implementation text.
pub fn generate(program: &SynthesizedProgram, options: &CodegenOptions) -> GeneratedCode {
    GeneratedCode {
        header: render_header(program),
        implementation: render_implementation(program, options),
    }
}

// ── Header ──────────────────────────────────────────────────────────────────

fn render_header(program: &SynthesizedProgram) -> String {
    let guard = include_guard(&program.network_name);
    let mut buf = String::new();
    writeln!(buf, "{}", banner(program)).unwrap();
    writeln!(buf, "#ifndef {}", guard).unwrap();
    writeln!(buf, "#define {}", guard).unwrap();
    writeln!(buf).unwrap();
    writeln!(buf, "{}", entry_doc_comment(program)).unwrap();
    writeln!(buf, "{};", entry_signature(program)).unwrap();
    writeln!(buf).unwrap();
    writeln!(buf, "#endif").unwrap();
    buf
}

fn banner(program: &SynthesizedProgram) -> String {
    format!(
        "/* Generated by pn2c from process network \"{}\". Do not edit. */",
        program.network_name
    )
}

fn include_guard(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PN2C_{}_H", sanitized)
}

fn entry_signature(program: &SynthesizedProgram) -> String {
    let mut s = format!("void {}(", ENTRY_FUNCTION);
    let params: Vec<String> = program
        .inputs
        .iter()
        .chain(program.outputs.iter())
        .map(|b| b.param.param_decl())
        .collect();
    if params.is_empty() {
        s.push_str("void");
    } else {
        s.push_str(&params.join(", "));
    }
    s.push(')');
    s
}

fn entry_doc_comment(program: &SynthesizedProgram) -> String {
    let mut buf = String::new();
    writeln!(buf, "/**").unwrap();
    writeln!(
        buf,
        " * Executes one step of process network \"{}\".",
        program.network_name
    )
    .unwrap();
    writeln!(buf, " *").unwrap();
    for b in &program.inputs {
        writeln!(buf, " * @param {}", b.param.name).unwrap();
        writeln!(buf, " *        Input to process \"{}\"{}.", b.process, extent(b)).unwrap();
    }
    for b in &program.outputs {
        writeln!(buf, " * @param {}", b.param.name).unwrap();
        writeln!(buf, " *        Output of process \"{}\"{}.", b.process, extent(b)).unwrap();
    }
    buf.push_str(" */");
    buf
}

fn extent(port: &BoundaryPort) -> String {
    if port.param.data_type.is_array() {
        match port.param.data_type.size() {
            Some(n) => format!(" ({} elements)", n),
            None => String::new(),
        }
    } else {
        String::new()
    }
}

// ── Implementation ──────────────────────────────────────────────────────────

fn render_implementation(program: &SynthesizedProgram, options: &CodegenOptions) -> String {
    let mut buf = String::new();
    writeln!(buf, "{}", banner(program)).unwrap();
    writeln!(buf, "#include \"{}\"", options.header_file).unwrap();
    writeln!(buf).unwrap();

    for function in &program.functions {
        writeln!(buf, "{}", function.definition()).unwrap();
        writeln!(buf).unwrap();
    }

    writeln!(buf, "{} {{", entry_signature(program)).unwrap();
    render_declarations(&mut buf, program);
    render_driver(&mut buf, program);
    writeln!(buf, "}}").unwrap();
    buf
}

fn render_declarations(buf: &mut String, program: &SynthesizedProgram) {
    let (needs_i, needs_j) = loop_counters(program);
    if needs_i {
        writeln!(buf, "{}int i;", INDENT).unwrap();
    }
    if needs_j {
        writeln!(buf, "{}int j;", INDENT).unwrap();
    }

    // Synthesis guarantees every emitted signal and delay is sized.
    for signal in &program.signals {
        if let Some(decl) = signal.local_decl() {
            writeln!(buf, "{}{};", INDENT, decl).unwrap();
        }
    }
    // Array boundary signals alias their parameter instead of copying.
    for (signal, param) in &program.aliases {
        writeln!(buf, "{}{} = {};", INDENT, signal.pointer_decl(), param).unwrap();
    }
    for delay in &program.delays {
        if let Some(decl) = delay.variable.local_decl() {
            writeln!(buf, "{}static {} = {};", INDENT, decl, delay.initial_value).unwrap();
        }
    }
}

fn render_driver(buf: &mut String, program: &SynthesizedProgram) {
    let phases: [(&str, &[Step]); 5] = [
        ("network inputs", &program.copy_in),
        ("delay outputs", &program.pre_steps),
        ("process execution", &program.steps),
        ("delay updates", &program.post_steps),
        ("network outputs", &program.copy_out),
    ];
    for (label, steps) in phases {
        if steps.is_empty() {
            continue;
        }
        writeln!(buf).unwrap();
        writeln!(buf, "{}/* {} */", INDENT, label).unwrap();
        for step in steps {
            buf.push_str(&step.render());
        }
    }
}

/// Whether the driver body needs the `i` and `j` loop counters.
fn loop_counters(program: &SynthesizedProgram) -> (bool, bool) {
    let mut needs_i = false;
    let mut needs_j = false;
    let all = program
        .copy_in
        .iter()
        .chain(&program.pre_steps)
        .chain(&program.steps)
        .chain(&program.post_steps)
        .chain(&program.copy_out);
    for step in all {
        match step {
            Step::Copy { to, .. } => {
                if to.data_type.is_array() {
                    needs_i = true;
                }
            }
            Step::Gather { from: ends, .. } => {
                if ends.iter().any(|v| v.data_type.is_array()) {
                    needs_i = true;
                    needs_j = true;
                }
            }
            Step::Scatter { to: ends, .. } => {
                if ends.iter().any(|v| v.data_type.is_array()) {
                    needs_i = true;
                    needs_j = true;
                }
            }
            Step::Call { .. } => {}
        }
    }
    (needs_i, needs_j)
}

// ── Tests ──
