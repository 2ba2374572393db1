// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used across all generation phases. Diagnostics are
// accumulated, never thrown: a phase reports everything it found and the
// pipeline decides whether error-level entries abort the run.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any phase.
///
/// EMG inputs are JSON documents rather than source text, so instead of a
/// byte-offset span each diagnostic carries an optional `context`: the full
/// identifier of the interface, process, or action it concerns.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagLevel,
    pub message: String,
    pub context: Option<String>,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no context or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            context: None,
            hint: None,
        }
    }

    /// Shorthand for an error-level diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    /// Shorthand for a warning-level diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach the identifier the diagnostic concerns.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
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
        if let Some(context) = &self.context {
            write!(f, "{}: {}: {}", level, context, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
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
    fn display_without_context() {
        let d = Diagnostic::error("something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_context() {
        let d = Diagnostic::warning("nobody can send it").with_context("usb.probe_ret");
        assert_eq!(format!("{d}"), "warning: usb.probe_ret: nobody can send it");
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error("category has no matching template")
            .with_context("usb")
            .with_hint("set 'ignore missed callbacks' to skip the category");
        assert_eq!(d.context.as_deref(), Some("usb"));
        assert!(d.hint.is_some());
    }

    #[test]
    fn error_detection() {
        let diags = vec![Diagnostic::warning("w"), Diagnostic::error("e")];
        assert!(has_errors(&diags));
        assert!(!has_errors(&diags[..1]));
    }
}
