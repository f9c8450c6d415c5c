//! Mid-level intermediate representation for the Velo engine
//!
//! The IR is an SSA-style instruction stream under a module/function/block
//! structure. The AST lowers into it through [`lower`], the optimizer runs
//! over it, and an ahead-of-time backend may consume the optimized module.
//! The interpreter path does not go through the IR; it compiles the AST to
//! bytecode directly.

pub mod builder;
pub mod ir;
pub mod lower;
pub mod optimizer;

pub use builder::FunctionBuilder;
pub use ir::*;
pub use lower::lower_program;
pub use optimizer::{OptLevel, Optimizer, OptimizerConfig, OptimizerStats};
