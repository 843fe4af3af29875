// dump.rs — canonical JSON serialization of a model
//
// Serializes a Model for `--emit model` and for the provenance fingerprint.
// Process ids live in an ordered map, so a given model always serializes to
// the same bytes.
//
// Preconditions: `model` is a fully constructed Model.
// Postconditions: returns valid JSON; a fixed model yields byte-identical
//                 output.
// Failure modes: none (serialization of plain data cannot fail).
// Side effects: none.

use crate::model::Model;

/// Serialize the model as pretty-printed JSON, for `--emit model`.
pub fn emit_dump(model: &Model) -> String {
    let mut out = serde_json::to_string_pretty(model).unwrap_or_default();
    out.push('\n');
    out
}

/// Serialize the model as compact JSON with a stable field and key order.
/// This is the byte stream the provenance fingerprint hashes.
pub fn canonical_json(model: &Model) -> String {
    serde_json::to_string(model).unwrap_or_default()
}
