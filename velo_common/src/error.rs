//! Error handling utilities for the Velo engine

use thiserror::Error;

/// The main error type for the Velo engine.
///
/// Diagnostics that can be reported and recovered from travel through
/// [`crate::Diagnostics`]; this type is for conditions a stage cannot
/// continue past.
#[derive(Error, Debug, Clone)]
pub enum VeloError {
    #[error("Lexical error: {message}")]
    LexError { message: String },

    #[error("Parse error: {message}")]
    ParseError { message: String },

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Code generation error: {message}")]
    CodegenError { message: String },

    #[error("Invalid IR: {message}")]
    InvalidIr { message: String },

    #[error("Runtime error: {message}")]
    RuntimeError { message: String },

    #[error("Stack overflow: {message}")]
    StackOverflow { message: String },

    #[error("Uncaught exception: {message}")]
    UncaughtException { message: String },
}

/// Result type alias for engine operations.
pub type VeloResult<T> = Result<T, VeloError>;

impl VeloError {
    pub fn lex(message: impl Into<String>) -> Self {
        Self::LexError { message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::TypeError { message: message.into() }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::CodegenError { message: message.into() }
    }

    pub fn invalid_ir(message: impl Into<String>) -> Self {
        Self::InvalidIr { message: message.into() }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::RuntimeError { message: message.into() }
    }

    pub fn stack_overflow(message: impl Into<String>) -> Self {
        Self::StackOverflow { message: message.into() }
    }

    pub fn uncaught(message: impl Into<String>) -> Self {
        Self::UncaughtException { message: message.into() }
    }
}
