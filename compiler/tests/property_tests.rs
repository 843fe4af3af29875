// Property-based tests for compiler invariants.
//
// Three categories:
// 1. Rewrite battery: invariant preservation, fixpoint idempotence, and
//    stage-order preservation under coalescing, over generated map chains
// 2. Scheduler: generated networks schedule and verify (S1-S2)
// 3. Synthesis/codegen: duplicate elimination and byte-determinism
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use pn2c::diag::has_errors;
use pn2c::model::{Model, ProcessKind};
use pn2c::pass::StageCert;
use pn2c::rewrite::{rewrite_to_fixpoint, rewrite_with_options, RewriteOptions};
use pn2c::schedule::{find_schedule, verify_schedule};

// ── Network generator ───────────────────────────────────────────────────────

/// The closed op set used for generated map stages. Each op is a distinct
/// function so stage order is observable after fusion.
const OPS: [(&str, &str); 3] = [
    ("inc", "return x + 1;"),
    ("dbl", "return x * 2;"),
    ("dec", "return x - 3;"),
];

/// Source text for a linear chain of map processes applying `ops` in order.
fn chain_source(ops: &[usize]) -> String {
    let mut src = String::from("network generated {\n");
    for (name, body) in &OPS {
        src.push_str(&format!("  fun {}(x: int) -> int %{{ {} }}%\n", name, body));
    }
    for (stage, op) in ops.iter().enumerate() {
        src.push_str(&format!("  map s{} = {};\n", stage, OPS[*op].0));
    }
    for stage in 1..ops.len() {
        src.push_str(&format!(
            "  connect s{}.out -> s{}.in;\n",
            stage - 1,
            stage
        ));
    }
    src.push_str("  inputs s0.in;\n");
    src.push_str(&format!("  outputs s{}.out;\n", ops.len() - 1));
    src.push_str("}\n");
    src
}

fn arb_chain() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0..OPS.len(), 1..=6)
}

fn model_from(source: &str) -> Model {
    let parsed = pn2c::parser::parse(source);
    assert!(
        parsed.errors.is_empty(),
        "parse errors for source:\n{}\nerrors: {:?}",
        source,
        parsed.errors
    );
    let result = pn2c::frontend::lower(&parsed.network.expect("no network parsed"));
    assert!(
        !has_errors(&result.diagnostics),
        "lowering errors for source:\n{}\nerrors: {:?}",
        source,
        result.diagnostics
    );
    result.model.expect("no model produced")
}

// ── 1. Rewrite battery ─────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn rewrite_preserves_invariants(ops in arb_chain()) {
        let source = chain_source(&ops);
        let model = model_from(&source);
        let before = model.num_processes();

        let result = rewrite_to_fixpoint(model);
        prop_assert!(
            !has_errors(&result.diagnostics),
            "rewrite errors for source:\n{}\ndiags: {:?}",
            source,
            result.diagnostics
        );
        prop_assert!(
            result.cert.all_pass(),
            "cert failed for source:\n{}\nobligations: {:?}",
            source,
            result.cert.obligations()
        );
        prop_assert!(result.model.validate().is_empty());
        // Every pass strictly reduces or keeps the process count.
        prop_assert!(result.model.num_processes() <= before);
    }

    #[test]
    fn rewrite_is_idempotent(ops in arb_chain()) {
        let once = rewrite_to_fixpoint(model_from(&chain_source(&ops)));
        prop_assert!(once.cert.all_pass());
        let twice = rewrite_to_fixpoint(once.model.clone());
        prop_assert!(twice.cert.all_pass());
        prop_assert_eq!(
            pn2c::dump::canonical_json(&once.model),
            pn2c::dump::canonical_json(&twice.model)
        );
    }

    #[test]
    fn coalescing_preserves_stage_order(ops in arb_chain()) {
        let result = rewrite_to_fixpoint(model_from(&chain_source(&ops)));
        prop_assert!(result.cert.all_pass());
        if ops.len() == 1 {
            // Nothing to fuse.
            prop_assert_eq!(result.model.num_processes(), 1);
            return Ok(());
        }
        prop_assert_eq!(result.model.num_processes(), 1);
        let fused = result.model.processes().next().unwrap();
        match &fused.kind {
            ProcessKind::CoalescedMap { functions } => {
                let got: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
                let expected: Vec<&str> = ops.iter().map(|op| OPS[*op].0).collect();
                prop_assert_eq!(got, expected, "stage order lost for ops {:?}", ops);
            }
            other => prop_assert!(false, "expected a coalescedmap, got {}", other.name()),
        }
    }
}

// ── 2. Scheduler ───────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn generated_networks_schedule_and_verify(ops in arb_chain(), coalesce in any::<bool>()) {
        let rewritten = rewrite_with_options(
            model_from(&chain_source(&ops)),
            &RewriteOptions { coalesce },
        );
        prop_assert!(rewritten.cert.all_pass());

        let result = find_schedule(&rewritten.model);
        prop_assert!(
            !has_errors(&result.diagnostics),
            "schedule errors: {:?}",
            result.diagnostics
        );
        let cert = verify_schedule(&rewritten.model, &result.schedule);
        prop_assert!(
            cert.all_pass(),
            "schedule cert failed: {:?}",
            cert.obligations()
        );
        // A chain has no unreachable processes; everything is scheduled.
        prop_assert_eq!(result.schedule.len(), rewritten.model.num_processes());
    }
}

// ── 3. Synthesis and codegen ───────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn shared_functions_synthesize_once(n in 2usize..6, op in 0..OPS.len()) {
        // All stages carry the same function; without fusion the duplicate
        // eliminator must leave exactly one definition.
        let ops: Vec<usize> = vec![op; n];
        let rewritten = rewrite_with_options(
            model_from(&chain_source(&ops)),
            &RewriteOptions { coalesce: false },
        );
        prop_assert!(rewritten.cert.all_pass());
        let schedule = find_schedule(&rewritten.model);
        prop_assert!(!has_errors(&schedule.diagnostics));
        let synth = pn2c::synth::synthesize(&rewritten.model, &schedule.schedule);
        prop_assert!(
            !has_errors(&synth.diagnostics),
            "synth errors: {:?}",
            synth.diagnostics
        );
        let program = synth.program.expect("no program produced");
        prop_assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn generated_c_is_deterministic(ops in arb_chain()) {
        let compile = |source: &str| {
            let rewritten = rewrite_to_fixpoint(model_from(source));
            let schedule = find_schedule(&rewritten.model);
            let synth = pn2c::synth::synthesize(&rewritten.model, &schedule.schedule);
            let program = synth.program.expect("no program produced");
            pn2c::codegen::generate(&program, &pn2c::codegen::CodegenOptions::default())
        };
        let source = chain_source(&ops);
        let first = compile(&source);
        let second = compile(&source);
        prop_assert_eq!(first.header, second.header);
        prop_assert_eq!(first.implementation, second.implementation);
    }
}
