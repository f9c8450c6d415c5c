//! Embedding facade
//!
//! `Engine` ties the pipeline together: lex, parse, build the reflection
//! index, compile to bytecode, and run on a fresh VM. Diagnostics from
//! every stage accumulate and render through the syntax-aware formatter.

use crate::vm::{Vm, VmConfig};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use velo_bytecode::{CodeGenerator, CompiledProgram};
use velo_common::{format_message, Diagnostics, LineMap, SyntaxMode};
use velo_parser::{parse_source, ReflectionIndex};
use velo_runtime::Value;

/// Result value rendered for the embedder, heap references resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EvalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Arrays, objects, callables: the display rendering.
    Other(String),
}

/// Outcome of a script run: the final value plus everything echoed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalOutcome {
    pub value: EvalValue,
    pub output: String,
}

/// The embedder's entry point.
pub struct Engine {
    syntax: SyntaxMode,
    vm_config: VmConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self { syntax: SyntaxMode::Php, vm_config: VmConfig::default() }
    }

    /// Select the surface syntax used when the source carries no
    /// `// @syntax:` directive.
    pub fn with_syntax(mut self, syntax: SyntaxMode) -> Self {
        self.syntax = syntax;
        self.vm_config.syntax = syntax;
        self
    }

    pub fn with_vm_config(mut self, config: VmConfig) -> Self {
        self.vm_config = config;
        self
    }

    /// Compile a source buffer to an in-memory bytecode program. The
    /// reflection index is built and validated as a side effect; fatal
    /// diagnostics abort.
    pub fn compile(&self, source: &str) -> Result<(CompiledProgram, Diagnostics)> {
        let syntax = SyntaxMode::from_directive(source).unwrap_or(self.syntax);
        let (ast, mut diagnostics) = parse_source(source, 0, syntax);
        let (_, index_diagnostics) = ReflectionIndex::build(&ast);
        diagnostics.extend(index_diagnostics);

        let line_map = LineMap::new(source);
        let (program, codegen_diagnostics) = CodeGenerator::new(&ast, &line_map).compile();
        diagnostics.extend(codegen_diagnostics);

        if diagnostics.has_errors() {
            let rendered = diagnostics.render(syntax).join("\n");
            bail!("compilation failed:\n{}", rendered);
        }
        Ok((program, diagnostics))
    }

    /// Compile and execute, returning the script value and output.
    pub fn run_source(&self, source: &str) -> Result<EvalOutcome> {
        let syntax = SyntaxMode::from_directive(source).unwrap_or(self.syntax);
        let (program, _) = self.compile(source)?;
        let mut config = self.vm_config.clone();
        config.syntax = syntax;
        let mut vm = Vm::with_config(program, config);
        let value = vm
            .run()
            .map_err(|e| anyhow::anyhow!(format_message(&e.to_string(), syntax)))
            .context("execution failed")?;
        Ok(EvalOutcome { value: render(&vm, value), output: vm.take_output() })
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn render(vm: &Vm, value: Value) -> EvalValue {
    match value {
        Value::Null => EvalValue::Null,
        Value::Bool(b) => EvalValue::Bool(b),
        Value::Int(i) => EvalValue::Int(i),
        Value::Float(f) => EvalValue::Float(f),
        _ if value.is_string() => {
            EvalValue::Str(vm.heap.string_content(value).unwrap_or_default())
        }
        other => EvalValue::Other(vm.heap.to_display_string(other)),
    }
}
