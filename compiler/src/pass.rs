// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse excluded — handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Frontend,
    Validate,
    Rewrite,
    Schedule,
    Synthesize,
    Codegen,
    Dot,
    Dump,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Model,       // Model (as lowered from the network description)
    Validated,   // marker: Model passed structural validation
    Rewritten,   // Model after the rewrite battery
    Schedule,    // Schedule
    Synthesized, // SynthesizedProgram
    Generated,   // GeneratedCode
    Dot,         // Graphviz text
    Dump,        // canonical model JSON
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence a pass attaches to its result. Each stage
/// defines its own obligation set; the pipeline fails the compilation when
/// any obligation does not hold.
pub trait StageCert {
    /// True when every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcomes, for diagnostics.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Frontend => PassDescriptor {
            name: "frontend",
            inputs: &[],
            outputs: &[ArtifactId::Model],
            invariants: "every declared process built, all connections applied",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Frontend],
            outputs: &[ArtifactId::Validated],
            invariants: "M1-M4 structural invariants hold",
        },
        PassId::Rewrite => PassDescriptor {
            name: "rewrite",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Rewritten],
            invariants: "V1-V2 obligations verified, fixpoint reached",
        },
        PassId::Schedule => PassDescriptor {
            name: "schedule",
            inputs: &[PassId::Rewrite],
            outputs: &[ArtifactId::Schedule],
            invariants: "S1-S2 obligations verified",
        },
        PassId::Synthesize => PassDescriptor {
            name: "synthesize",
            inputs: &[PassId::Schedule],
            outputs: &[ArtifactId::Synthesized],
            invariants: "every signal typed and sized, driver steps checked",
        },
        PassId::Codegen => PassDescriptor {
            name: "codegen",
            inputs: &[PassId::Synthesize],
            outputs: &[ArtifactId::Generated],
            invariants: "deterministic C header and implementation emitted",
        },
        PassId::Dot => PassDescriptor {
            name: "dot",
            inputs: &[PassId::Rewrite],
            outputs: &[ArtifactId::Dot],
            invariants: "every process and connection rendered",
        },
        PassId::Dump => PassDescriptor {
            name: "dump",
            inputs: &[PassId::Rewrite],
            outputs: &[ArtifactId::Dump],
            invariants: "canonical field order, processes sorted by id",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 8 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 8] = [
    PassId::Frontend,
    PassId::Validate,
    PassId::Rewrite,
    PassId::Schedule,
    PassId::Synthesize,
    PassId::Codegen,
    PassId::Dot,
    PassId::Dump,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_dump_skips_schedule_and_synth() {
        let passes = required_passes(PassId::Dump);
        assert_eq!(
            passes,
            vec![
                PassId::Frontend,
                PassId::Validate,
                PassId::Rewrite,
                PassId::Dump
            ]
        );
        assert!(!passes.contains(&PassId::Schedule));
        assert!(!passes.contains(&PassId::Synthesize));
    }

    #[test]
    fn required_passes_codegen_is_the_full_chain() {
        let passes = required_passes(PassId::Codegen);
        assert_eq!(
            passes,
            vec![
                PassId::Frontend,
                PassId::Validate,
                PassId::Rewrite,
                PassId::Schedule,
                PassId::Synthesize,
                PassId::Codegen,
            ]
        );
    }

    #[test]
    fn required_passes_frontend_is_minimal() {
        let passes = required_passes(PassId::Frontend);
        assert_eq!(passes, vec![PassId::Frontend]);
    }

    #[test]
    fn no_parse_in_pass_id() {
        // Parse is handled outside the runner; PassId has no Parse variant.
        for pass in &ALL_PASSES {
            assert_ne!(descriptor(*pass).name, "parse");
        }
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            for dep in desc.inputs {
                // Dependency must come before this pass in topological order
                let dep_passes = required_passes(*pass);
                let dep_pos = dep_passes.iter().position(|p| p == dep);
                let self_pos = dep_passes.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
