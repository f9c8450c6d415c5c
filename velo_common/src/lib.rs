//! Shared utilities and error types for the Velo engine
//!
//! This crate provides common functionality used across all engine components:
//! - Source location tracking
//! - The process-wide string pool
//! - Diagnostic message handling with syntax-mode-aware formatting
//! - Error types and handling utilities

pub mod diagnostics;
pub mod error;
pub mod intern;
pub mod span;

pub use diagnostics::*;
pub use error::*;
pub use intern::*;
pub use span::*;

use serde::{Deserialize, Serialize};

/// Surface syntax accepted by the frontend.
///
/// Both syntaxes produce the same AST; the flag is threaded through the lexer
/// and parser and consulted when formatting user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyntaxMode {
    /// Classic `$variable` / `->` syntax.
    #[default]
    Php,
    /// Bare identifiers and `.` member access.
    Go,
}

impl SyntaxMode {
    /// Detect a `// @syntax: php|go` directive on the leading line of a source
    /// buffer. Returns `None` when the directive is absent or malformed.
    pub fn from_directive(source: &str) -> Option<SyntaxMode> {
        let first_line = source.lines().next()?;
        let rest = first_line.trim_start().strip_prefix("//")?;
        let rest = rest.trim_start().strip_prefix("@syntax:")?;
        match rest.trim() {
            "php" => Some(SyntaxMode::Php),
            "go" => Some(SyntaxMode::Go),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_directive_detection() {
        assert_eq!(SyntaxMode::from_directive("// @syntax: go\n<?php x = 1;"), Some(SyntaxMode::Go));
        assert_eq!(SyntaxMode::from_directive("// @syntax: php\n<?php $x = 1;"), Some(SyntaxMode::Php));
        assert_eq!(SyntaxMode::from_directive("<?php $x = 1;"), None);
        assert_eq!(SyntaxMode::from_directive("// @syntax: ruby"), None);
    }
}
