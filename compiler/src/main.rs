use clap::Parser;
use std::path::{Path, PathBuf};

use pn2c::codegen::CodegenOptions;
use pn2c::pass::PassId;
use pn2c::pipeline::{compute_provenance, run_pipeline, CompilationState};
use pn2c::rewrite::RewriteOptions;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// C implementation (and header, when writing to files)
    C,
    /// C header only
    Header,
    /// Canonical model JSON after rewriting
    Model,
    /// Graphviz DOT of the rewritten model
    Graph,
    /// Process execution order
    Schedule,
}

#[derive(Parser, Debug)]
#[command(
    name = "pn2c",
    version,
    about = "Process network compiler: synthesizes sequential C from .pnet dataflow models"
)]
struct Cli {
    /// Input .pnet source file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::C)]
    emit: EmitStage,

    /// Skip the fusion passes (chain coalescing, sibling and section fusion)
    #[arg(long)]
    no_coalesce: bool,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn terminal_for(emit: &EmitStage) -> PassId {
    match emit {
        EmitStage::C | EmitStage::Header => PassId::Codegen,
        EmitStage::Model => PassId::Dump,
        EmitStage::Graph => PassId::Dot,
        EmitStage::Schedule => PassId::Schedule,
    }
}

/// The header file name the generated `#include` refers to.
fn header_file_name(cli: &Cli) -> String {
    let base = cli.output.as_deref().unwrap_or(&cli.source);
    base.with_extension("h")
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "network.h".to_string())
}

fn write_file(path: &Path, contents: &str) {
    if let Err(e) = std::fs::write(path, contents) {
        eprintln!("pn2c: error: {}: {}", path.display(), e);
        std::process::exit(2);
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("pn2c: source = {}", cli.source.display());
        eprintln!("pn2c: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("pn2c: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parse_result = pn2c::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("pn2c: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let network = match parse_result.network {
        Some(n) => n,
        None => {
            eprintln!("pn2c: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("pn2c: parsed network \"{}\"", network.name.name);
    }

    // ── Run the pass pipeline ──
    let mut state = CompilationState::new(network);
    let rewrite_options = RewriteOptions {
        coalesce: !cli.no_coalesce,
    };
    let codegen_options = CodegenOptions {
        header_file: header_file_name(&cli),
    };
    let terminal = terminal_for(&cli.emit);
    let _ = run_pipeline(
        &mut state,
        terminal,
        &rewrite_options,
        &codegen_options,
        cli.verbose,
        |_, diags| {
            for diag in diags {
                eprintln!("pn2c: {}", diag);
            }
        },
    );
    if state.has_error {
        std::process::exit(1);
    }

    if let Some(model) = &state.model {
        state.provenance = Some(compute_provenance(&source, model));
    }
    if cli.verbose {
        if let Some(p) = &state.provenance {
            eprintln!("pn2c: source hash {}", p.source_hash_hex());
            eprintln!("pn2c: model fingerprint {}", p.model_fingerprint_hex());
        }
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::C => {
            let generated = state.generated.as_ref().expect("codegen artifact missing");
            match &cli.output {
                Some(path) => {
                    write_file(&path.with_extension("h"), &generated.header);
                    write_file(&path.with_extension("c"), &generated.implementation);
                    if cli.verbose {
                        eprintln!("pn2c: wrote {}", path.with_extension("c").display());
                        eprintln!("pn2c: wrote {}", path.with_extension("h").display());
                    }
                }
                None => print!("{}", generated.implementation),
            }
        }
        EmitStage::Header => {
            let generated = state.generated.as_ref().expect("codegen artifact missing");
            match &cli.output {
                Some(path) => write_file(&path.with_extension("h"), &generated.header),
                None => print!("{}", generated.header),
            }
        }
        EmitStage::Model => {
            let dump = state.dump.as_ref().expect("dump artifact missing");
            match &cli.output {
                Some(path) => write_file(path, dump),
                None => print!("{}", dump),
            }
        }
        EmitStage::Graph => {
            let dot = state.dot.as_ref().expect("dot artifact missing");
            match &cli.output {
                Some(path) => write_file(path, dot),
                None => print!("{}", dot),
            }
        }
        EmitStage::Schedule => {
            let schedule = state.schedule.as_ref().expect("schedule artifact missing");
            let text = schedule.to_string();
            match &cli.output {
                Some(path) => write_file(path, &text),
                None => print!("{}", text),
            }
        }
    }
}
