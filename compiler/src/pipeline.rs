// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts in one struct and runs the minimal set of passes
// for a given terminal PassId.
//
// Preconditions: the network declaration must be set before calling
//   run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//   has_error is set.
// Failure modes: any pass emitting error-level diagnostics; stage cert
//   failure.
// Side effects: calls on_pass_complete callback after each pass for
//   immediate display.

use std::time::Instant;

use crate::ast::NetworkDecl;
use crate::codegen::{CodegenOptions, GeneratedCode};
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::model::Model;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::rewrite::RewriteOptions;
use crate::schedule::Schedule;
use crate::synth::SynthesizedProgram;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.pnet` source text.
/// `model_fingerprint`: SHA-256 of the frontend model's canonical compact
/// JSON from `dump::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub model_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the model fingerprint (64 characters).
    pub fn model_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.model_fingerprint)
    }

    /// Serialize provenance as a JSON string.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"model_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.model_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from source text and the frontend model.
///
/// Uses SHA-256 for both hashes. The model fingerprint is computed from
/// `dump::canonical_json()` (compact JSON, no whitespace) to ensure
/// stability independent of display formatting.
pub fn compute_provenance(source: &str, model: &Model) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        model_fingerprint: sha256(crate::dump::canonical_json(model).as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub network: NetworkDecl,
    /// Model as lowered by the frontend, before rewriting.
    pub model: Option<Model>,
    /// Model after the rewrite battery.
    pub rewritten: Option<Model>,
    pub schedule: Option<Schedule>,
    pub synthesized: Option<SynthesizedProgram>,
    pub generated: Option<GeneratedCode>,
    pub dot: Option<String>,
    pub dump: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(network: NetworkDecl) -> Self {
        Self {
            network,
            model: None,
            rewritten: None,
            schedule: None,
            synthesized: None,
            generated: None,
            dot: None,
            dump: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "pn2c: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Turn a failed stage certificate into an error diagnostic naming the
/// unmet obligations. `None` when every obligation holds.
fn cert_failure(
    cert: &impl StageCert,
    code: DiagCode,
    pass: &'static str,
    stage: &str,
) -> Option<Diagnostic> {
    if cert.all_pass() {
        return None;
    }
    let failed: Vec<&str> = cert
        .obligations()
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| *name)
        .collect();
    Some(
        Diagnostic::error(format!(
            "{} verification failed: {}",
            stage,
            failed.join(", ")
        ))
        .with_code(code)
        .in_pass(pass),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose →
/// error check.
///
/// Preconditions: `state.network` is set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)`
///   are populated, or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; rewrite or
///   schedule cert failure.
/// Side effects: calls `on_pass_complete` after each pass for immediate
///   diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    rewrite_options: &RewriteOptions,
    codegen_options: &CodegenOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);

    for &pass_id in &passes {
        match pass_id {
            PassId::Frontend => {
                let t = Instant::now();
                let result = crate::frontend::lower(&state.network);
                let elapsed = t.elapsed();
                state.model = result.model;
                finish_pass(
                    state,
                    pass_id,
                    result.diagnostics,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Validate => {
                let t = Instant::now();
                let errors = state.model.as_ref().unwrap().validate();
                let elapsed = t.elapsed();
                let diags: Vec<Diagnostic> = errors
                    .into_iter()
                    .map(|e| {
                        let d = Diagnostic::error(e.message)
                            .with_code(codes::E0100)
                            .in_pass("validate");
                        match e.process {
                            Some(p) => d.for_process(&p),
                            None => d,
                        }
                    })
                    .collect();
                finish_pass(
                    state,
                    pass_id,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Rewrite => {
                let t = Instant::now();
                let result = crate::rewrite::rewrite_with_options(
                    state.model.as_ref().unwrap().clone(),
                    rewrite_options,
                );
                let elapsed = t.elapsed();
                let mut diags = result.diagnostics;
                if let Some(d) = cert_failure(&result.cert, codes::E0600, "rewrite", "rewrite") {
                    diags.push(d);
                }
                state.rewritten = Some(result.model);
                finish_pass(
                    state,
                    pass_id,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Schedule => {
                let t = Instant::now();
                let result = crate::schedule::find_schedule(state.rewritten.as_ref().unwrap());
                let elapsed = t.elapsed();
                let mut diags = result.diagnostics;
                if let Some(d) = cert_failure(&result.cert, codes::E0601, "schedule", "schedule") {
                    diags.push(d);
                }
                state.schedule = Some(result.schedule);
                finish_pass(
                    state,
                    pass_id,
                    diags,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Synthesize => {
                let t = Instant::now();
                let result = crate::synth::synthesize(
                    state.rewritten.as_ref().unwrap(),
                    state.schedule.as_ref().unwrap(),
                );
                let elapsed = t.elapsed();
                state.synthesized = result.program;
                finish_pass(
                    state,
                    pass_id,
                    result.diagnostics,
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Codegen => {
                let t = Instant::now();
                let generated = crate::codegen::generate(
                    state.synthesized.as_ref().unwrap(),
                    codegen_options,
                );
                let elapsed = t.elapsed();
                state.generated = Some(generated);
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Dot => {
                let t = Instant::now();
                let dot = crate::dot::emit_dot(state.rewritten.as_ref().unwrap());
                let elapsed = t.elapsed();
                state.dot = Some(dot);
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Dump => {
                let t = Instant::now();
                let dump = crate::dump::emit_dump(state.rewritten.as_ref().unwrap());
                let elapsed = t.elapsed();
                state.dump = Some(dump);
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}
