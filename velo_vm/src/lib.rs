//! The Velo bytecode virtual machine
//!
//! Executes compiled programs against the runtime value model: frame stack,
//! shared evaluation stack, inline caches on member sites, type feedback on
//! generic numeric sites, exception-table unwinding, and a cooperative GC
//! step between opcodes. [`Engine`] is the embedder's entry point.

pub mod builtins;
pub mod engine;
pub mod vm;

pub use builtins::BuiltinRegistry;
pub use engine::{Engine, EvalOutcome, EvalValue};
pub use vm::{Vm, VmConfig};
