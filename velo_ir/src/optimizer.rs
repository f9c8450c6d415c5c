//! IR optimization passes
//!
//! One entry point over a module; internally a fixed-point driver runs the
//! enabled passes in order until nothing changes or the iteration bound is
//! hit. Soundness rests on the side-effect table in [`Op::is_pure`] and on
//! the SSA single-definition invariant, which is validated before the first
//! pass runs.

use crate::ir::{BinOp, Block, BlockId, Function, Instruction, IrType, Module, Op, Register, Terminator, UnOp};
use std::collections::{HashMap, HashSet};
use velo_common::{StringId, VeloResult};

/// Optimization level selecting the pass configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    None,
    #[default]
    Basic,
    Aggressive,
    Size,
}

/// Which passes run and how hard the driver iterates.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub dce: bool,
    pub constant_propagation: bool,
    pub cse: bool,
    pub inlining: bool,
    pub type_specialization: bool,
    pub strength_reduction: bool,
    pub max_iterations: u32,
    /// Callees above this instruction count never inline.
    pub inline_instruction_threshold: usize,
}

impl OptimizerConfig {
    pub fn for_level(level: OptLevel) -> Self {
        match level {
            OptLevel::None => Self {
                dce: false,
                constant_propagation: false,
                cse: false,
                inlining: false,
                type_specialization: false,
                strength_reduction: false,
                max_iterations: 1,
                inline_instruction_threshold: 0,
            },
            OptLevel::Basic => Self {
                dce: true,
                constant_propagation: true,
                cse: false,
                inlining: false,
                type_specialization: false,
                strength_reduction: false,
                max_iterations: 2,
                inline_instruction_threshold: 0,
            },
            OptLevel::Aggressive => Self {
                dce: true,
                constant_propagation: true,
                cse: true,
                inlining: true,
                type_specialization: true,
                strength_reduction: true,
                max_iterations: 5,
                inline_instruction_threshold: 20,
            },
            OptLevel::Size => Self {
                dce: true,
                constant_propagation: true,
                cse: true,
                inlining: false,
                type_specialization: false,
                strength_reduction: false,
                max_iterations: 2,
                inline_instruction_threshold: 0,
            },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::for_level(OptLevel::Basic)
    }
}

/// Counters updated by every pass; diagnostics only, no effect on output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizerStats {
    pub dead_instructions_removed: usize,
    pub dead_blocks_removed: usize,
    pub constants_propagated: usize,
    pub functions_inlined: usize,
    pub type_specializations: usize,
    pub cse_eliminations: usize,
    pub strength_reductions: usize,
    pub passes_run: usize,
}

/// Constant lattice values tracked by propagation and strength reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConstValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StringId),
}

/// The pass-based module optimizer.
pub struct Optimizer {
    config: OptimizerConfig,
    stats: OptimizerStats,
}

impl Optimizer {
    pub fn new(level: OptLevel) -> Self {
        Self::with_config(OptimizerConfig::for_level(level))
    }

    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config, stats: OptimizerStats::default() }
    }

    pub fn stats(&self) -> &OptimizerStats {
        &self.stats
    }

    /// Optimize a module in place. Structural IR violations abort with
    /// `invalid-ir` before any pass mutates the module.
    pub fn optimize(&mut self, module: &mut Module) -> VeloResult<()> {
        module.validate()?;

        for iteration in 0..self.config.max_iterations {
            let mut changed = false;

            if self.config.constant_propagation {
                for function in &mut module.functions {
                    changed |= self.constant_propagation(function);
                }
                self.stats.passes_run += 1;
            }
            if self.config.type_specialization {
                for function in &mut module.functions {
                    changed |= self.type_specialization(function);
                }
                self.stats.passes_run += 1;
            }
            if self.config.strength_reduction {
                for function in &mut module.functions {
                    changed |= self.strength_reduction(function);
                }
                self.stats.passes_run += 1;
            }
            if self.config.cse {
                for function in &mut module.functions {
                    changed |= self.common_subexpression_elimination(function);
                }
                self.stats.passes_run += 1;
            }
            if self.config.inlining {
                changed |= self.inline_functions(module);
                self.stats.passes_run += 1;
            }
            if self.config.dce {
                for function in &mut module.functions {
                    changed |= self.dead_code_elimination(function);
                }
                self.stats.passes_run += 1;
            }

            log::debug!(
                "optimizer iteration {} finished, changed = {}, stats = {:?}",
                iteration,
                changed,
                self.stats
            );
            if !changed {
                break;
            }
        }

        module.validate()
    }

    // ---- Constant propagation and folding -----------------------------

    fn constant_propagation(&mut self, function: &mut Function) -> bool {
        let mut table: HashMap<u32, ConstValue> = HashMap::new();
        let mut changed = false;

        for block in &mut function.blocks {
            for instruction in &mut block.instructions {
                if let Some(result) = instruction.result {
                    if let Some(value) = const_of(&instruction.op) {
                        table.insert(result.id, value);
                        continue;
                    }
                }
                let folded = match &instruction.op {
                    Op::Binary { op, lhs, rhs } => {
                        match (table.get(&lhs.id), table.get(&rhs.id)) {
                            (Some(&l), Some(&r)) => fold_binary(*op, l, r),
                            _ => None,
                        }
                    }
                    Op::Unary { op, operand } => {
                        table.get(&operand.id).and_then(|&v| fold_unary(*op, v))
                    }
                    _ => None,
                };
                if let Some(value) = folded {
                    instruction.op = const_op(value);
                    if let Some(result) = instruction.result {
                        table.insert(result.id, value);
                    }
                    self.stats.constants_propagated += 1;
                    changed = true;
                }
            }
        }

        changed
    }

    // ---- Type specialization ------------------------------------------

    fn type_specialization(&mut self, function: &mut Function) -> bool {
        // Known types per register id, seeded by type-defining ops.
        let mut known: HashMap<u32, IrType> = HashMap::new();
        for block in &function.blocks {
            for instruction in &block.instructions {
                let Some(result) = instruction.result else { continue };
                let ty = match &instruction.op {
                    Op::ConstBool(_) => Some(IrType::Bool),
                    Op::ConstInt(_) => Some(IrType::I64),
                    Op::ConstFloat(_) => Some(IrType::F64),
                    Op::ConstStr(_) => Some(IrType::Str),
                    Op::ArrayNew => Some(IrType::Array),
                    Op::New { .. } => Some(IrType::Object),
                    _ => None,
                };
                if let Some(ty) = ty {
                    known.insert(result.id, ty);
                } else if result.ty != IrType::Value {
                    known.insert(result.id, result.ty);
                }
            }
        }

        let mut narrowed: HashMap<u32, IrType> = HashMap::new();
        for block in &mut function.blocks {
            for instruction in &mut block.instructions {
                let Some(result) = instruction.result else { continue };
                if result.ty != IrType::Value {
                    continue;
                }
                let new_ty = match &instruction.op {
                    Op::Binary { op, lhs, rhs } => {
                        if op.is_comparison() || op.is_logical() {
                            Some(IrType::Bool)
                        } else if *op == BinOp::Div {
                            // Division always produces a float in this
                            // language, whatever the operand shapes.
                            match (known.get(&lhs.id), known.get(&rhs.id)) {
                                (Some(IrType::I64 | IrType::F64), Some(IrType::I64 | IrType::F64)) => {
                                    Some(IrType::F64)
                                }
                                _ => None,
                            }
                        } else if *op == BinOp::Concat {
                            Some(IrType::Str)
                        } else {
                            match (known.get(&lhs.id), known.get(&rhs.id)) {
                                (Some(IrType::I64), Some(IrType::I64)) => Some(IrType::I64),
                                (Some(IrType::F64), Some(IrType::I64 | IrType::F64))
                                | (Some(IrType::I64 | IrType::F64), Some(IrType::F64)) => {
                                    Some(IrType::F64)
                                }
                                _ => None,
                            }
                        }
                    }
                    Op::Unary { op: UnOp::Not, .. } => Some(IrType::Bool),
                    Op::Unary { op: UnOp::Neg, operand } => match known.get(&operand.id) {
                        Some(IrType::I64) => Some(IrType::I64),
                        Some(IrType::F64) => Some(IrType::F64),
                        _ => None,
                    },
                    Op::StrLen { .. } | Op::ArrayCount { .. } => Some(IrType::I64),
                    Op::TypeCheck { .. } | Op::Instanceof { .. } | Op::ArrayHas { .. } => {
                        Some(IrType::Bool)
                    }
                    _ => None,
                };
                if let Some(ty) = new_ty {
                    instruction.result = Some(Register::new(result.id, ty));
                    known.insert(result.id, ty);
                    narrowed.insert(result.id, ty);
                    self.stats.type_specializations += 1;
                }
            }
        }

        if narrowed.is_empty() {
            return false;
        }

        // Propagate the narrowed types into every use site.
        rewrite_registers(function, &|reg: Register| match narrowed.get(&reg.id) {
            Some(&ty) => Register::new(reg.id, ty),
            None => reg,
        });
        true
    }

    // ---- Strength reduction -------------------------------------------

    fn strength_reduction(&mut self, function: &mut Function) -> bool {
        let mut consts: HashMap<u32, i64> = HashMap::new();
        for block in &function.blocks {
            for instruction in &block.instructions {
                if let (Some(result), Op::ConstInt(value)) = (instruction.result, &instruction.op) {
                    consts.insert(result.id, *value);
                }
            }
        }

        let mut next_register = function.register_count;
        let mut changed = false;
        for block in &mut function.blocks {
            let mut rewritten = Vec::with_capacity(block.instructions.len());
            for mut instruction in block.instructions.drain(..) {
                let replacement = match &instruction.op {
                    Op::Binary { op, lhs, rhs }
                        if lhs.ty == IrType::I64
                            && matches!(op, BinOp::Mul | BinOp::Div | BinOp::Mod) =>
                    {
                        consts.get(&rhs.id).copied().and_then(|c| {
                            if c > 0 && (c & (c - 1)) == 0 {
                                Some((*op, *lhs, c))
                            } else {
                                None
                            }
                        })
                    }
                    _ => None,
                };
                if let Some((op, lhs, c)) = replacement {
                    // Synthesize the shift amount or mask constant.
                    let (new_op, synthesized) = match op {
                        BinOp::Mul => (BinOp::Shl, c.trailing_zeros() as i64),
                        BinOp::Div => (BinOp::Shr, c.trailing_zeros() as i64),
                        BinOp::Mod => (BinOp::BitAnd, c - 1),
                        _ => unreachable!(),
                    };
                    let const_reg = Register::new(next_register, IrType::I64);
                    next_register += 1;
                    rewritten.push(Instruction {
                        result: Some(const_reg),
                        op: Op::ConstInt(synthesized),
                        span: instruction.span,
                    });
                    instruction.op = Op::Binary { op: new_op, lhs, rhs: const_reg };
                    self.stats.strength_reductions += 1;
                    changed = true;
                }
                rewritten.push(instruction);
            }
            block.instructions = rewritten;
        }
        function.register_count = next_register;

        changed
    }

    // ---- Common-subexpression elimination -----------------------------

    fn common_subexpression_elimination(&mut self, function: &mut Function) -> bool {
        let mut replacements: HashMap<u32, Register> = HashMap::new();
        let mut changed = false;

        // Within one block the first occurrence dominates any repeat, so
        // value numbering stays sound without a dominator tree.
        for block in &mut function.blocks {
            let mut seen: HashMap<String, Register> = HashMap::new();
            let mut kept = Vec::with_capacity(block.instructions.len());
            for instruction in block.instructions.drain(..) {
                let Some(result) = instruction.result else {
                    kept.push(instruction);
                    continue;
                };
                let Some(key) = expression_key(&instruction.op) else {
                    kept.push(instruction);
                    continue;
                };
                match seen.get(&key) {
                    Some(&original) => {
                        replacements.insert(result.id, original);
                        self.stats.cse_eliminations += 1;
                        changed = true;
                    }
                    None => {
                        seen.insert(key, result);
                        kept.push(instruction);
                    }
                }
            }
            block.instructions = kept;
        }

        if !replacements.is_empty() {
            rewrite_registers(function, &|reg: Register| {
                let mut current = reg;
                while let Some(&next) = replacements.get(&current.id) {
                    current = next;
                }
                current
            });
        }

        changed
    }

    // ---- Inlining -----------------------------------------------------

    fn inline_functions(&mut self, module: &mut Module) -> bool {
        // Call-graph summary: per function size and recursion, plus global
        // call-site counts per callee.
        let mut call_sites: HashMap<StringId, usize> = HashMap::new();
        for function in &module.functions {
            for block in &function.blocks {
                for instruction in &block.instructions {
                    if let Op::Call { callee, .. } = &instruction.op {
                        *call_sites.entry(*callee).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut inlineable: HashMap<StringId, Function> = HashMap::new();
        for function in &module.functions {
            let recursive = function.blocks.iter().any(|b| {
                b.instructions
                    .iter()
                    .any(|i| matches!(&i.op, Op::Call { callee, .. } if *callee == function.name))
            });
            let entry = function.block(function.entry);
            let single_exit_entry = matches!(entry.terminator, Some(Terminator::Ret(_)));
            if !recursive
                && function.instruction_count() <= self.config.inline_instruction_threshold
                && function.blocks.len() <= 3
                && single_exit_entry
                && call_sites.get(&function.name).copied().unwrap_or(0) <= 3
            {
                inlineable.insert(function.name, function.clone());
            }
        }

        let mut changed = false;
        for function in &mut module.functions {
            let caller_name = function.name;
            let mut replacements: HashMap<u32, Register> = HashMap::new();
            let mut next_register = function.register_count;

            for block in &mut function.blocks {
                let mut rewritten = Vec::with_capacity(block.instructions.len());
                for instruction in block.instructions.drain(..) {
                    let inline_target = match &instruction.op {
                        Op::Call { callee, args } if *callee != caller_name => {
                            inlineable.get(callee).map(|f| (f.clone(), args.clone()))
                        }
                        _ => None,
                    };
                    let Some((callee, args)) = inline_target else {
                        rewritten.push(instruction);
                        continue;
                    };

                    // Remap callee registers: parameters to the call's
                    // arguments, everything else to fresh registers.
                    let mut remap: HashMap<u32, Register> = HashMap::new();
                    for (param, arg) in callee.params.iter().zip(args.iter()) {
                        remap.insert(param.id, *arg);
                    }
                    let entry = callee.block(callee.entry);
                    for cloned in &entry.instructions {
                        let mut op = cloned.op.clone();
                        op.map_operands(&|reg: Register| {
                            remap.get(&reg.id).copied().unwrap_or(reg)
                        });
                        let result = cloned.result.map(|reg| {
                            let fresh = Register::new(next_register, reg.ty);
                            next_register += 1;
                            remap.insert(reg.id, fresh);
                            fresh
                        });
                        rewritten.push(Instruction { result, op, span: instruction.span });
                    }

                    // The call result becomes the callee's returned value.
                    let returned = match &entry.terminator {
                        Some(Terminator::Ret(Some(value))) => {
                            remap.get(&value.id).copied().unwrap_or(*value)
                        }
                        _ => {
                            let null = Register::new(next_register, IrType::Value);
                            next_register += 1;
                            rewritten.push(Instruction {
                                result: Some(null),
                                op: Op::ConstNull,
                                span: instruction.span,
                            });
                            null
                        }
                    };
                    if let Some(result) = instruction.result {
                        replacements.insert(result.id, returned);
                    }
                    self.stats.functions_inlined += 1;
                    changed = true;
                }
                block.instructions = rewritten;
            }

            function.register_count = next_register;
            if !replacements.is_empty() {
                rewrite_registers(function, &|reg: Register| {
                    let mut current = reg;
                    while let Some(&next) = replacements.get(&current.id) {
                        current = next;
                    }
                    current
                });
            }
        }

        changed
    }

    // ---- Dead-code elimination ----------------------------------------

    fn dead_code_elimination(&mut self, function: &mut Function) -> bool {
        let mut changed = false;

        // Phase a: live registers are those read anywhere.
        let mut live: HashSet<u32> = HashSet::new();
        for block in &function.blocks {
            for instruction in &block.instructions {
                for operand in instruction.op.operands() {
                    live.insert(operand.id);
                }
            }
            if let Some(terminator) = &block.terminator {
                for operand in terminator.operands() {
                    live.insert(operand.id);
                }
            }
        }

        // Phase b: drop pure instructions with dead results.
        for block in &mut function.blocks {
            let before = block.instructions.len();
            block.instructions.retain(|instruction| {
                let removable = instruction.op.is_pure()
                    && instruction
                        .result
                        .map_or(true, |result| !live.contains(&result.id));
                !removable
            });
            let removed = before - block.instructions.len();
            self.stats.dead_instructions_removed += removed;
            changed |= removed > 0;
        }

        // Final phase: blocks unreachable from the entry. Exception handler
        // edges from `try_begin` count as reachable.
        let mut reachable: HashSet<BlockId> = HashSet::new();
        let mut worklist = vec![function.entry];
        while let Some(block_id) = worklist.pop() {
            if !reachable.insert(block_id) {
                continue;
            }
            let block = function.block(block_id);
            for instruction in &block.instructions {
                if let Op::TryBegin { handler } = &instruction.op {
                    worklist.push(*handler);
                }
            }
            if let Some(terminator) = &block.terminator {
                worklist.extend(terminator.successors());
            }
        }
        for block in &mut function.blocks {
            if !reachable.contains(&block.id) && !is_already_dead(block) {
                block.instructions.clear();
                block.terminator = Some(Terminator::Unreachable);
                self.stats.dead_blocks_removed += 1;
                changed = true;
            }
        }

        changed
    }
}

fn is_already_dead(block: &Block) -> bool {
    block.instructions.is_empty() && matches!(block.terminator, Some(Terminator::Unreachable))
}

/// Hash key for pure expressions; impure operations produce no key and are
/// never merged.
fn expression_key(op: &Op) -> Option<String> {
    if !op.is_pure() {
        return None;
    }
    let key = match op {
        Op::Binary { op, lhs, rhs } => format!("bin:{}:{}:{}", op, lhs.id, rhs.id),
        Op::Unary { op, operand } => format!("un:{}:{}", op, operand.id),
        Op::ConstNull => "null".to_string(),
        Op::ConstBool(v) => format!("cb:{}", v),
        Op::ConstInt(v) => format!("ci:{}", v),
        Op::ConstFloat(v) => format!("cf:{}", v.to_bits()),
        Op::ConstStr(v) => format!("cs:{}", v.0),
        Op::StrLen { value } => format!("strlen:{}", value.id),
        Op::ArrayCount { array } => format!("count:{}", array.id),
        Op::Cast { value, target } => format!("cast:{}:{}", value.id, target),
        Op::TypeCheck { value, target } => format!("tc:{}:{}", value.id, target),
        Op::GetType { value } => format!("ty:{}", value.id),
        // Loads, phis, selects, and allocas depend on position or control
        // flow and are left alone.
        _ => return None,
    };
    Some(key)
}

fn rewrite_registers(function: &mut Function, map: &dyn Fn(Register) -> Register) {
    for block in &mut function.blocks {
        for instruction in &mut block.instructions {
            instruction.op.map_operands(map);
        }
        if let Some(terminator) = &mut block.terminator {
            match terminator {
                Terminator::Ret(Some(value)) => *value = map(*value),
                Terminator::CondBr { cond, .. } => *cond = map(*cond),
                Terminator::Switch { value, .. } => *value = map(*value),
                Terminator::Throw(value) => *value = map(*value),
                Terminator::Ret(None) | Terminator::Br(_) | Terminator::Unreachable => {}
            }
        }
    }
}

fn const_of(op: &Op) -> Option<ConstValue> {
    match op {
        Op::ConstNull => Some(ConstValue::Null),
        Op::ConstBool(v) => Some(ConstValue::Bool(*v)),
        Op::ConstInt(v) => Some(ConstValue::Int(*v)),
        Op::ConstFloat(v) => Some(ConstValue::Float(*v)),
        Op::ConstStr(v) => Some(ConstValue::Str(*v)),
        _ => None,
    }
}

fn const_op(value: ConstValue) -> Op {
    match value {
        ConstValue::Null => Op::ConstNull,
        ConstValue::Bool(v) => Op::ConstBool(v),
        ConstValue::Int(v) => Op::ConstInt(v),
        ConstValue::Float(v) => Op::ConstFloat(v),
        ConstValue::Str(v) => Op::ConstStr(v),
    }
}

fn fold_binary(op: BinOp, l: ConstValue, r: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (l, r) {
        (Int(a), Int(b)) => fold_int(op, a, b),
        (Float(a), Float(b)) => fold_float(op, a, b),
        (Int(a), Float(b)) => fold_float(op, a as f64, b),
        (Float(a), Int(b)) => fold_float(op, a, b as f64),
        (Bool(a), Bool(b)) => match op {
            BinOp::And => Some(Bool(a && b)),
            BinOp::Or => Some(Bool(a || b)),
            BinOp::Eq | BinOp::Identical => Some(Bool(a == b)),
            BinOp::Ne | BinOp::NotIdentical => Some(Bool(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_int(op: BinOp, a: i64, b: i64) -> Option<ConstValue> {
    use ConstValue::*;
    let value = match op {
        BinOp::Add => Int(a.wrapping_add(b)),
        BinOp::Sub => Int(a.wrapping_sub(b)),
        BinOp::Mul => Int(a.wrapping_mul(b)),
        // Division produces a float; zero divisors leave the instruction
        // unchanged for the runtime to raise.
        BinOp::Div => {
            if b == 0 {
                return None;
            }
            Float(a as f64 / b as f64)
        }
        BinOp::Mod => {
            if b == 0 {
                return None;
            }
            Int(a.wrapping_rem(b))
        }
        BinOp::BitAnd => Int(a & b),
        BinOp::BitOr => Int(a | b),
        BinOp::BitXor => Int(a ^ b),
        BinOp::Shl => Int(a.wrapping_shl(b as u32)),
        BinOp::Shr => Int(a.wrapping_shr(b as u32)),
        BinOp::Eq | BinOp::Identical => Bool(a == b),
        BinOp::Ne | BinOp::NotIdentical => Bool(a != b),
        BinOp::Lt => Bool(a < b),
        BinOp::Le => Bool(a <= b),
        BinOp::Gt => Bool(a > b),
        BinOp::Ge => Bool(a >= b),
        BinOp::Spaceship => Int((a.cmp(&b) as i32) as i64),
        BinOp::And | BinOp::Or | BinOp::Concat => return None,
    };
    Some(value)
}

fn fold_float(op: BinOp, a: f64, b: f64) -> Option<ConstValue> {
    use ConstValue::*;
    let value = match op {
        BinOp::Add => Float(a + b),
        BinOp::Sub => Float(a - b),
        BinOp::Mul => Float(a * b),
        BinOp::Div => {
            if b == 0.0 {
                return None;
            }
            Float(a / b)
        }
        BinOp::Mod => {
            if b == 0.0 {
                return None;
            }
            Float(a % b)
        }
        BinOp::Eq | BinOp::Identical => Bool(a == b),
        BinOp::Ne | BinOp::NotIdentical => Bool(a != b),
        BinOp::Lt => Bool(a < b),
        BinOp::Le => Bool(a <= b),
        BinOp::Gt => Bool(a > b),
        BinOp::Ge => Bool(a >= b),
        _ => return None,
    };
    Some(value)
}

fn fold_unary(op: UnOp, v: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (op, v) {
        (UnOp::Neg, Int(a)) => Some(Int(a.wrapping_neg())),
        (UnOp::Neg, Float(a)) => Some(Float(-a)),
        (UnOp::Not, Bool(a)) => Some(Bool(!a)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use pretty_assertions::assert_eq;
    use velo_common::{intern, Span};

    fn single_function_module(function: Function) -> Module {
        Module { functions: vec![function] }
    }

    #[test]
    fn test_constant_folding_add() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(5), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(3), IrType::I64, Span::default());
        let sum = builder.emit(
            Op::Binary { op: BinOp::Add, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(sum)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::new(OptLevel::Basic);
        optimizer.optimize(&mut module).unwrap();

        let f = &module.functions[0];
        let folded = f
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.result.map(|r| r.id) == Some(sum.id))
            .expect("folded instruction should remain");
        assert_eq!(folded.op, Op::ConstInt(8));
        assert!(optimizer.stats().constants_propagated >= 1);
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(5), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(0), IrType::I64, Span::default());
        let q = builder.emit(
            Op::Binary { op: BinOp::Div, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(q)));
        let mut module = single_function_module(builder.finish());

        Optimizer::new(OptLevel::Basic).optimize(&mut module).unwrap();
        let f = &module.functions[0];
        assert!(f
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .any(|i| matches!(i.op, Op::Binary { op: BinOp::Div, .. })));
    }

    #[test]
    fn test_dce_removes_dead_pure_instruction() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let used = builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let _dead = builder.emit(Op::ConstInt(99), IrType::I64, Span::default());
        builder.terminate(Terminator::Ret(Some(used)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            constant_propagation: false,
            ..OptimizerConfig::for_level(OptLevel::Basic)
        });
        optimizer.optimize(&mut module).unwrap();

        assert_eq!(module.functions[0].instruction_count(), 1);
        assert_eq!(optimizer.stats().dead_instructions_removed, 1);
    }

    #[test]
    fn test_dce_keeps_side_effecting_instructions() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let value = builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        builder.emit_void(Op::DebugPrint { value }, Span::default());
        builder.terminate(Terminator::Ret(None));
        let mut module = single_function_module(builder.finish());

        Optimizer::new(OptLevel::Basic).optimize(&mut module).unwrap();
        assert_eq!(module.functions[0].instruction_count(), 2);
    }

    #[test]
    fn test_dce_marks_unreachable_blocks() {
        let mut builder = FunctionBuilder::new(intern("f"));
        builder.terminate(Terminator::Ret(None));
        let orphan = builder.new_block();
        builder.switch_to(orphan);
        builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        builder.terminate(Terminator::Ret(None));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::new(OptLevel::Basic);
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().dead_blocks_removed, 1);
        assert!(matches!(
            module.functions[0].block(orphan).terminator,
            Some(Terminator::Unreachable)
        ));
    }

    #[test]
    fn test_cse_merges_repeated_pure_expression() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(2), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(3), IrType::I64, Span::default());
        let first = builder.emit(
            Op::Binary { op: BinOp::Lt, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        let second = builder.emit(
            Op::Binary { op: BinOp::Lt, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.emit_void(Op::DebugPrint { value: first }, Span::default());
        builder.emit_void(Op::DebugPrint { value: second }, Span::default());
        builder.terminate(Terminator::Ret(None));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            cse: true,
            constant_propagation: false,
            dce: false,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().cse_eliminations, 1);

        // Both prints now read the surviving register.
        let prints: Vec<u32> = module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .filter_map(|i| match &i.op {
                Op::DebugPrint { value } => Some(value.id),
                _ => None,
            })
            .collect();
        assert_eq!(prints, vec![first.id, first.id]);
    }

    #[test]
    fn test_strength_reduction_multiply_by_eight() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let x = builder.fresh(IrType::I64);
        let c = builder.emit(Op::ConstInt(8), IrType::I64, Span::default());
        let product = builder.emit(
            Op::Binary { op: BinOp::Mul, lhs: x, rhs: c },
            IrType::I64,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(product)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            strength_reduction: true,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().strength_reductions, 1);

        let shifted = module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| matches!(i.op, Op::Binary { op: BinOp::Shl, .. }))
            .expect("multiply should become a shift");
        if let Op::Binary { rhs, .. } = &shifted.op {
            let shift = module.functions[0]
                .blocks
                .iter()
                .flat_map(|b| b.instructions.iter())
                .find(|i| i.result.map(|r| r.id) == Some(rhs.id))
                .unwrap();
            assert_eq!(shift.op, Op::ConstInt(3));
        }
    }

    #[test]
    fn test_type_specialization_narrows_int_arithmetic() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(2), IrType::I64, Span::default());
        let sum = builder.emit(
            Op::Binary { op: BinOp::Add, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(sum)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            type_specialization: true,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().type_specializations, 1);

        let narrowed = module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.result.map(|r| r.id) == Some(sum.id))
            .unwrap();
        assert_eq!(narrowed.result.unwrap().ty, IrType::I64);
    }

    #[test]
    fn test_division_specializes_to_float() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(2), IrType::I64, Span::default());
        let q = builder.emit(
            Op::Binary { op: BinOp::Div, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(q)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            type_specialization: true,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        let narrowed = module.functions[0]
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .find(|i| i.result.map(|r| r.id) == Some(q.id))
            .unwrap();
        assert_eq!(narrowed.result.unwrap().ty, IrType::F64);
    }

    #[test]
    fn test_inlining_small_leaf_function() {
        // Callee: one block returning arg + 1.
        let mut callee = FunctionBuilder::new(intern("inc"));
        let param = callee.add_param();
        let one = callee.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let sum = callee.emit(
            Op::Binary { op: BinOp::Add, lhs: param, rhs: one },
            IrType::Value,
            Span::default(),
        );
        callee.terminate(Terminator::Ret(Some(sum)));

        // Caller: print inc(41).
        let mut caller = FunctionBuilder::new(intern("main"));
        let arg = caller.emit(Op::ConstInt(41), IrType::I64, Span::default());
        let result = caller.emit(
            Op::Call { callee: intern("inc"), args: vec![arg] },
            IrType::Value,
            Span::default(),
        );
        caller.emit_void(Op::DebugPrint { value: result }, Span::default());
        caller.terminate(Terminator::Ret(None));

        let mut module = Module { functions: vec![caller.finish(), callee.finish()] };
        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            inlining: true,
            inline_instruction_threshold: 20,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().functions_inlined, 1);

        let main = module.function(intern("main")).unwrap();
        assert!(!main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .any(|i| matches!(i.op, Op::Call { .. })));
        // The add survived the inline and feeds the print.
        assert!(main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .any(|i| matches!(i.op, Op::Binary { op: BinOp::Add, .. })));
    }

    #[test]
    fn test_recursive_function_is_not_inlined() {
        let fib = intern("fib");
        let mut builder = FunctionBuilder::new(fib);
        let param = builder.add_param();
        let rec = builder.emit(
            Op::Call { callee: fib, args: vec![param] },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(rec)));
        let mut module = single_function_module(builder.finish());

        let mut optimizer = Optimizer::with_config(OptimizerConfig {
            inlining: true,
            inline_instruction_threshold: 20,
            ..OptimizerConfig::for_level(OptLevel::None)
        });
        optimizer.optimize(&mut module).unwrap();
        assert_eq!(optimizer.stats().functions_inlined, 0);
    }

    #[test]
    fn test_level_none_changes_nothing() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let a = builder.emit(Op::ConstInt(5), IrType::I64, Span::default());
        let b = builder.emit(Op::ConstInt(3), IrType::I64, Span::default());
        let sum = builder.emit(
            Op::Binary { op: BinOp::Add, lhs: a, rhs: b },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(sum)));
        let mut module = single_function_module(builder.finish());
        let before = module.clone();

        Optimizer::new(OptLevel::None).optimize(&mut module).unwrap();
        assert_eq!(module, before);
    }
}
