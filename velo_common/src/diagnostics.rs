//! Diagnostic message handling for the Velo engine
//!
//! Diagnostics accumulate in a sink owned by the compilation context; stages
//! keep going after recoverable problems and the embedder reads the full list
//! at the end. Messages are formatted through a syntax-mode-aware pass so the
//! same internal names render as `$name`/`->` in php mode and `name`/`.` in
//! go mode.

use crate::{Span, SyntaxMode, VeloError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for diagnostic messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A diagnostic message with location, severity, and an optional suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
    pub suggestion: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Error, message: message.into(), span, suggestion: None }
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Warning, message: message.into(), span, suggestion: None }
    }

    pub fn note(message: impl Into<String>, span: Span) -> Self {
        Self { severity: Severity::Note, message: message.into(), span, suggestion: None }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} at {}", self.severity, self.message, self.span)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Collection of diagnostic messages for one compilation.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub messages: Vec<Diagnostic>,
    aborted: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.messages.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::error(message, span));
    }

    pub fn warning(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::warning(message, span));
    }

    pub fn note(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::note(message, span));
    }

    /// Record a fatal condition after which parsing cannot proceed.
    pub fn abort(&mut self, message: impl Into<String>, span: Span) {
        self.add(Diagnostic::error(message, span));
        self.aborted = true;
    }

    /// True when a fatal error ended the current stage early.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.messages.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.aborted |= other.aborted;
        self.messages.extend(other.messages);
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.messages.iter().filter(|d| d.severity == Severity::Error)
    }

    /// Render every message through the mode-aware formatter.
    pub fn render(&self, mode: SyntaxMode) -> Vec<String> {
        self.messages.iter().map(|d| format_message(&d.to_string(), mode)).collect()
    }
}

impl From<VeloError> for Diagnostic {
    fn from(error: VeloError) -> Self {
        Diagnostic::error(error.to_string(), Span::default())
    }
}

/// Rewrite a message for the active surface syntax.
///
/// In go mode, `$name` references lose the sigil and `->` member arrows
/// become `.`; in php mode the text passes through untouched. Only `$`
/// immediately followed by an identifier start is treated as a variable
/// sigil, so literal dollar amounts in messages survive.
pub fn format_message(message: &str, mode: SyntaxMode) -> String {
    if mode == SyntaxMode::Php {
        return message.to_string();
    }
    let chars: Vec<char> = message.chars().collect();
    let mut out = String::with_capacity(message.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$'
            && i + 1 < chars.len()
            && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_')
        {
            i += 1;
            continue;
        }
        if chars[i] == '-' && i + 1 < chars.len() && chars[i + 1] == '>' {
            out.push('.');
            i += 2;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;

    #[test]
    fn test_mode_aware_formatting() {
        let msg = "undefined variable $count in $obj->total";
        assert_eq!(format_message(msg, SyntaxMode::Php), msg);
        assert_eq!(format_message(msg, SyntaxMode::Go), "undefined variable count in obj.total");
    }

    #[test]
    fn test_dollar_amounts_survive_go_mode() {
        assert_eq!(format_message("expected $5", SyntaxMode::Go), "expected $5");
    }

    #[test]
    fn test_abort_marks_sink() {
        let mut diags = Diagnostics::new();
        diags.error("recoverable", Span::default());
        assert!(!diags.is_aborted());
        diags.abort("fatal", Span::default());
        assert!(diags.is_aborted());
        assert_eq!(diags.error_count(), 2);
    }
}
