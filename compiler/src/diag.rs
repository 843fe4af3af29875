// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
// Diagnostics carry model context (process id, pass name) instead of source
// spans: after the frontend hands over a model, errors are about processes,
// not source text.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::Id;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different semantic
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes, one per failure kind.
pub mod codes {
    use super::DiagCode;

    /// Source text failed to lex or parse.
    pub const E0001: DiagCode = DiagCode("E0001");
    /// The parsed network could not be built into a consistent model.
    pub const E0002: DiagCode = DiagCode("E0002");
    /// A structural invariant violation was attempted on the model.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Dataflow from a divergence point does not reconverge consistently.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// The model contains a dependency cycle not broken by a delay.
    pub const E0300: DiagCode = DiagCode("E0300");
    /// Producing and consuming sides of a signal disagree on its type.
    pub const E0400: DiagCode = DiagCode("E0400");
    /// An array size remained unknown after a full propagation pass.
    pub const E0401: DiagCode = DiagCode("E0401");
    /// A process kind or arity with no synthesis/rewrite rule.
    pub const E0500: DiagCode = DiagCode("E0500");
    /// Post-rewrite model verification failed.
    pub const E0600: DiagCode = DiagCode("E0600");
    /// Post-schedule verification failed.
    pub const E0601: DiagCode = DiagCode("E0601");

    /// A process is not reachable from any network output.
    pub const W0100: DiagCode = DiagCode("W0100");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    /// The process the diagnostic is about, when one can be named.
    pub process: Option<Id>,
    /// The pass that produced the diagnostic.
    pub pass: Option<&'static str>,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, context, or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            message: message.into(),
            process: None,
            pass: None,
            hint: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Name the process the diagnostic is about.
    pub fn for_process(mut self, id: &Id) -> Self {
        self.process = Some(id.clone());
        self
    }

    /// Name the pass that produced the diagnostic.
    pub fn in_pass(mut self, pass: &'static str) -> Self {
        self.pass = Some(pass);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        match (&self.process, self.pass) {
            (Some(p), Some(pass)) => write!(f, " (process \"{}\", pass {})", p, pass)?,
            (Some(p), None) => write!(f, " (process \"{}\")", p)?,
            (None, Some(pass)) => write!(f, " (pass {})", pass)?,
            (None, None) => {}
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error("something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code_and_context() {
        let d = Diagnostic::error("port already connected")
            .with_code(codes::E0100)
            .for_process(&Id::from("m1"))
            .in_pass("connect");
        assert_eq!(
            format!("{d}"),
            "error[E0100]: port already connected (process \"m1\", pass connect)"
        );
    }

    #[test]
    fn display_with_hint() {
        let d = Diagnostic::warning("process unreachable from outputs")
            .with_code(codes::W0100)
            .with_hint("connect it to an output or remove it");
        assert_eq!(
            format!("{d}"),
            "warning[W0100]: process unreachable from outputs\n  hint: connect it to an output or remove it"
        );
    }

    #[test]
    fn has_errors_ignores_warnings() {
        let diags = vec![Diagnostic::warning("w")];
        assert!(!has_errors(&diags));
        let diags = vec![Diagnostic::warning("w"), Diagnostic::error("e")];
        assert!(has_errors(&diags));
    }
}
