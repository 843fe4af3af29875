// id.rs — Process and port identifiers
//
// Ids are opaque string keys: unique within a model for processes, unique
// within a process for ports. Rewrite passes mint fresh process ids through
// `Model::unique_id`, which appends a counter to a pass-specific prefix.
//
// Preconditions: none.
// Postconditions: none.
// Failure modes: none (data-only module).
// Side effects: none.

use serde::Serialize;
use std::fmt;

/// An opaque string identifier. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Id(String);

impl Id {
    pub fn new(s: impl Into<String>) -> Self {
        Id(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id(s)
    }
}

/// A fully-qualified port key: which process, which port on it.
///
/// All non-owning links in the model (port connections, network boundary
/// lists) are stored as `PortRef`s and resolved through the model arena.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortRef {
    pub process: Id,
    pub port: Id,
}

impl PortRef {
    pub fn new(process: impl Into<Id>, port: impl Into<Id>) -> Self {
        PortRef {
            process: process.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.process, self.port)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_roundtrip() {
        let id = Id::from("m1");
        assert_eq!(id.as_str(), "m1");
        assert_eq!(id.to_string(), "m1");
    }

    #[test]
    fn id_ordering_is_lexicographic() {
        let mut ids = vec![Id::from("z"), Id::from("a"), Id::from("m")];
        ids.sort();
        assert_eq!(ids, vec![Id::from("a"), Id::from("m"), Id::from("z")]);
    }

    #[test]
    fn port_ref_display() {
        let r = PortRef::new("m1", "out");
        assert_eq!(r.to_string(), "m1.out");
    }

    #[test]
    fn port_refs_equal_by_value() {
        assert_eq!(PortRef::new("a", "in"), PortRef::new("a", "in"));
        assert_ne!(PortRef::new("a", "in"), PortRef::new("a", "out"));
    }
}
