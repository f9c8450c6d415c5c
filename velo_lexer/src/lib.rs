//! Lexical analysis for the Velo language
//!
//! One lexer serves both surface syntaxes. The active [`SyntaxMode`] only
//! changes how bare identifiers are presented to the parser; every other
//! token is shared between the two syntaxes.

pub mod lexer;
pub mod token;

pub use lexer::{Lexer, LexerMode};
pub use token::{Token, TokenKind};

pub use velo_common::SyntaxMode;
