// dot.rs — Graphviz DOT output for process network models
//
// Transforms a Model into DOT format suitable for rendering with `dot`,
// `neato`, or other Graphviz layout engines.
//
// Preconditions: `model` is a fully constructed Model.
// Postconditions: returns a valid DOT string representing the network.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::model::{Model, ProcessKind};

/// Emit the model as a Graphviz DOT string.
pub fn emit_dot(model: &Model) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph {} {{", sanitize(&model.name)).unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    // Process nodes, in id order (the model map gives deterministic iteration).
    writeln!(buf).unwrap();
    for process in model.processes() {
        let id = node_id(process.id.as_str());
        writeln!(
            buf,
            "    {} [{}];",
            id,
            node_attrs(&process.kind, process.id.as_str())
        )
        .unwrap();
    }

    // Connections, drawn once from the out-port side.
    writeln!(buf).unwrap();
    for process in model.processes() {
        for port in &process.out_ports {
            let Some(target) = &port.connection else {
                continue;
            };
            writeln!(
                buf,
                "    {} -> {} [label=\"{} -> {}\"];",
                node_id(process.id.as_str()),
                node_id(target.process.as_str()),
                port.id,
                target.port,
            )
            .unwrap();
        }
    }

    // Network boundary, as plain markers outside the dataflow.
    if !model.inputs.is_empty() || !model.outputs.is_empty() {
        writeln!(buf).unwrap();
    }
    for (index, r) in model.inputs.iter().enumerate() {
        let marker = format!("input{}", index + 1);
        writeln!(buf, "    {} [shape=plaintext, label=\"{}\"];", marker, marker).unwrap();
        writeln!(
            buf,
            "    {} -> {} [label=\"{}\", style=dotted];",
            marker,
            node_id(r.process.as_str()),
            r.port,
        )
        .unwrap();
    }
    for (index, r) in model.outputs.iter().enumerate() {
        let marker = format!("output{}", index + 1);
        writeln!(buf, "    {} [shape=plaintext, label=\"{}\"];", marker, marker).unwrap();
        writeln!(
            buf,
            "    {} -> {} [label=\"{}\", style=dotted];",
            node_id(r.process.as_str()),
            marker,
            r.port,
        )
        .unwrap();
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "network".to_string()
    } else {
        cleaned
    }
}

/// Process node IDs get a prefix so they cannot collide with the
/// `input<N>`/`output<N>` boundary markers.
fn node_id(process: &str) -> String {
    format!("p_{}", sanitize(process))
}

/// Return the node label for a process kind.
fn node_label(kind: &ProcessKind, id: &str) -> String {
    match kind {
        ProcessKind::Map { function } => format!("{}\\nmap {}", id, function.name),
        ProcessKind::ZipWithN { function } => format!("{}\\nzipwith {}", id, function.name),
        ProcessKind::ParallelMap { count, functions } => {
            let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
            format!("{}\\nparallelmap x{} [{}]", id, count, names.join(", "))
        }
        ProcessKind::CoalescedMap { functions } => {
            let names: Vec<&str> = functions.iter().map(|f| f.name.as_str()).collect();
            format!("{}\\ncoalescedmap [{}]", id, names.join(", "))
        }
        ProcessKind::Copy => format!("{}\\ncopy", id),
        ProcessKind::Delay { initial_value } => format!("{}\\ndelay init {}", id, initial_value),
        ProcessKind::Zipx => format!("{}\\nzipx", id),
        ProcessKind::Unzipx => format!("{}\\nunzipx", id),
    }
}

/// Return DOT attributes string for a process kind.
fn node_attrs(kind: &ProcessKind, id: &str) -> String {
    let (shape, color) = match kind {
        ProcessKind::Map { .. } => ("box", "lightblue"),
        ProcessKind::ZipWithN { .. } => ("box", "lightblue"),
        ProcessKind::ParallelMap { .. } => ("box3d", "lightsteelblue"),
        ProcessKind::CoalescedMap { .. } => ("box3d", "lightsteelblue"),
        ProcessKind::Copy => ("diamond", "lightyellow"),
        ProcessKind::Delay { .. } => ("cylinder", "lightsalmon"),
        ProcessKind::Zipx => ("invtrapezium", "lightgreen"),
        ProcessKind::Unzipx => ("trapezium", "lightgreen"),
    };
    let label = node_label(kind, id);
    format!("shape={shape}, style=filled, fillcolor={color}, label=\"{label}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::has_errors;

    fn build_and_emit(source: &str) -> String {
        let parsed = crate::parser::parse(source);
        assert!(
            parsed.errors.is_empty(),
            "parse errors: {:?}",
            parsed.errors
        );
        let net = parsed.network.expect("parse failed");
        let result = crate::frontend::lower(&net);
        assert!(
            !has_errors(&result.diagnostics),
            "lowering errors: {:?}",
            result.diagnostics
        );
        emit_dot(&result.model.expect("no model"))
    }

    const CHAIN: &str = r#"
network chain {
  fun inc(x: int) -> int %{ return x + 1; }%
  map a = inc;
  map b = inc;
  connect a.out -> b.in;
  inputs a.in;
  outputs b.out;
}
"#;

    #[test]
    fn valid_dot_structure() {
        let dot = build_and_emit(CHAIN);
        assert!(dot.starts_with("digraph chain {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("rankdir=LR;"));
    }

    #[test]
    fn nodes_carry_kind_and_function() {
        let dot = build_and_emit(CHAIN);
        assert!(dot.contains("p_a [shape=box"));
        assert!(dot.contains("label=\"a\\nmap inc\""));
        assert!(dot.contains("label=\"b\\nmap inc\""));
    }

    #[test]
    fn connections_are_labelled_with_ports() {
        let dot = build_and_emit(CHAIN);
        assert!(dot.contains("p_a -> p_b [label=\"out -> in\"];"));
    }

    #[test]
    fn boundary_markers_present() {
        let dot = build_and_emit(CHAIN);
        assert!(dot.contains("input1 [shape=plaintext"));
        assert!(dot.contains("input1 -> p_a [label=\"in\", style=dotted];"));
        assert!(dot.contains("p_b -> output1 [label=\"out\", style=dotted];"));
    }

    #[test]
    fn delay_gets_cylinder_shape() {
        let dot = build_and_emit(
            r#"
network loop {
  fun step(s: int, x: int) -> int %{ return s + x; }%
  zipwith acc = step;
  delay d init "0";
  connect acc.out -> d.in;
  connect d.out -> acc.in1;
  inputs acc.in2;
  outputs acc.out;
}
"#,
        );
        assert!(dot.contains("shape=cylinder"));
        assert!(dot.contains("delay init 0"));
    }

    #[test]
    fn deterministic_output() {
        let dot1 = build_and_emit(CHAIN);
        let dot2 = build_and_emit(CHAIN);
        assert_eq!(dot1, dot2, "DOT output is not deterministic");
    }
}
