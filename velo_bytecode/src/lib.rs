//! Bytecode layer of the Velo engine
//!
//! Fixed-width 32-bit instructions over a closed opcode set, per-function
//! constant pools with line and exception tables, and the code generator
//! that compiles the AST straight to executable programs.

pub mod codegen;
pub mod function;
pub mod opcode;

pub use codegen::CodeGenerator;
pub use function::{
    ClassSpec, CompiledFunction, CompiledProgram, Constant, ExceptionEntry, FunctionFlags,
    MethodSpec, ParamSpec, PropertySpec,
};
pub use opcode::{Instr, Opcode};
