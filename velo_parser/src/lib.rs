//! Syntax analysis for the Velo language
//!
//! The parser consumes the dual-mode token stream and produces one canonical
//! AST: the same program written in either surface syntax yields structurally
//! equivalent nodes. A reflection index over class declarations is built as a
//! side table after parsing.

pub mod ast;
pub mod parser;
pub mod precedence;
pub mod reflect;

pub use ast::*;
pub use parser::Parser;
pub use precedence::Precedence;
pub use reflect::{ClassInfo, ReflectionIndex};

use velo_common::{Diagnostics, SyntaxMode};

/// Convenience entry point: lex and parse a source buffer.
pub fn parse_source(source: &str, file_id: u32, syntax: SyntaxMode) -> (Ast, Diagnostics) {
    let mut lexer = velo_lexer::Lexer::new(source, file_id, syntax);
    let tokens = lexer.tokenize();
    let mode = lexer.syntax_mode();
    let mut diagnostics = lexer.take_diagnostics();
    let mut parser = Parser::new(tokens, mode);
    let ast = parser.parse_program();
    diagnostics.extend(parser.take_diagnostics());
    (ast, diagnostics)
}
