//! IR data model: types, registers, instructions, blocks, functions, modules
//!
//! The operation set is a closed sum type so every pass can match
//! exhaustively; the side-effect table in [`Op::is_pure`] is what makes
//! dead-code elimination and CSE sound.

use serde::{Deserialize, Serialize};
use std::fmt;
use velo_common::{resolve, Span, StringId, VeloError, VeloResult};

/// The closed set of IR value types. `Value` is the dynamic any-type; the
/// optimizer narrows registers away from it where it can prove shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    Void,
    Bool,
    I64,
    F64,
    Ptr,
    Str,
    Array,
    Object,
    Value,
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IrType::Void => "void",
            IrType::Bool => "bool",
            IrType::I64 => "i64",
            IrType::F64 => "f64",
            IrType::Ptr => "ptr",
            IrType::Str => "str",
            IrType::Array => "array",
            IrType::Object => "object",
            IrType::Value => "value",
        };
        write!(f, "{}", name)
    }
}

/// An SSA register: unique id plus its known type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    pub id: u32,
    pub ty: IrType,
}

impl Register {
    pub fn new(id: u32, ty: IrType) -> Self {
        Self { id, ty }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}:{}", self.id, self.ty)
    }
}

/// Basic block id within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Identical,
    NotIdentical,
    Spaceship,
    And,
    Or,
    Concat,
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq
                | BinOp::Ne
                | BinOp::Lt
                | BinOp::Le
                | BinOp::Gt
                | BinOp::Ge
                | BinOp::Identical
                | BinOp::NotIdentical
                | BinOp::Spaceship
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::BitAnd => "band",
            BinOp::BitOr => "bor",
            BinOp::BitXor => "bxor",
            BinOp::Shl => "shl",
            BinOp::Shr => "shr",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::Identical => "ideq",
            BinOp::NotIdentical => "idne",
            BinOp::Spaceship => "cmp",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Concat => "concat",
        };
        write!(f, "{}", name)
    }
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "neg"),
            UnOp::Not => write!(f, "not"),
        }
    }
}

/// The closed operation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // Constants
    ConstNull,
    ConstBool(bool),
    ConstInt(i64),
    ConstFloat(f64),
    ConstStr(StringId),

    // Arithmetic / comparison / logical
    Binary { op: BinOp, lhs: Register, rhs: Register },
    Unary { op: UnOp, operand: Register },

    // Memory: one alloca per local slot, loads and stores against it.
    Alloca { name: StringId },
    Load { slot: Register },
    Store { slot: Register, value: Register },

    // Calls
    Call { callee: StringId, args: Vec<Register> },
    CallIndirect { callee: Register, args: Vec<Register> },
    /// `go` spawn intent. The core runtime executes it synchronously.
    Spawn { callee: StringId, args: Vec<Register> },

    // Type operations
    Cast { value: Register, target: IrType },
    TypeCheck { value: Register, target: IrType },
    GetType { value: Register },
    Box { value: Register },
    Unbox { value: Register, target: IrType },

    // Strings and arrays
    StrLen { value: Register },
    ArrayNew,
    ArrayGet { array: Register, key: Register },
    ArraySet { array: Register, key: Register, value: Register },
    ArrayPush { array: Register, value: Register },
    ArrayHas { array: Register, key: Register },
    ArrayUnset { array: Register, key: Register },
    ArrayCount { array: Register },

    // Objects
    New { class: StringId, args: Vec<Register> },
    PropertyGet { object: Register, name: StringId },
    PropertySet { object: Register, name: StringId, value: Register },
    MethodCall { object: Register, name: StringId, args: Vec<Register> },
    Instanceof { object: Register, class: StringId },

    // Control data flow
    Phi { incoming: Vec<(BlockId, Register)> },
    Select { cond: Register, then_value: Register, else_value: Register },

    // Exceptions
    TryBegin { handler: BlockId },
    TryEnd,
    GetException,
    ClearException,

    // Refcount hooks
    Retain { value: Register },
    Release { value: Register },

    // Mutex primitives
    MutexLock { value: Register },
    MutexUnlock { value: Register },

    // Debug
    DebugPrint { value: Register },
}

impl Op {
    /// The side-effect table. A pure op with a dead result may be removed.
    pub fn is_pure(&self) -> bool {
        match self {
            Op::ConstNull
            | Op::ConstBool(_)
            | Op::ConstInt(_)
            | Op::ConstFloat(_)
            | Op::ConstStr(_)
            | Op::Unary { .. }
            | Op::Alloca { .. }
            | Op::Load { .. }
            | Op::Cast { .. }
            | Op::TypeCheck { .. }
            | Op::GetType { .. }
            | Op::Box { .. }
            | Op::Unbox { .. }
            | Op::StrLen { .. }
            | Op::ArrayCount { .. }
            | Op::ArrayHas { .. }
            | Op::Instanceof { .. }
            | Op::Phi { .. }
            | Op::Select { .. } => true,
            // Concat allocates and interpolation observes conversion hooks.
            Op::Binary { op, .. } => *op != BinOp::Concat,
            Op::Store { .. }
            | Op::Call { .. }
            | Op::CallIndirect { .. }
            | Op::Spawn { .. }
            | Op::ArrayNew
            | Op::ArrayGet { .. }
            | Op::ArraySet { .. }
            | Op::ArrayPush { .. }
            | Op::ArrayUnset { .. }
            | Op::New { .. }
            | Op::PropertyGet { .. }
            | Op::PropertySet { .. }
            | Op::MethodCall { .. }
            | Op::TryBegin { .. }
            | Op::TryEnd
            | Op::GetException
            | Op::ClearException
            | Op::Retain { .. }
            | Op::Release { .. }
            | Op::MutexLock { .. }
            | Op::MutexUnlock { .. }
            | Op::DebugPrint { .. } => false,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Op::ConstNull | Op::ConstBool(_) | Op::ConstInt(_) | Op::ConstFloat(_) | Op::ConstStr(_)
        )
    }

    /// Registers read by this operation.
    pub fn operands(&self) -> Vec<Register> {
        match self {
            Op::ConstNull
            | Op::ConstBool(_)
            | Op::ConstInt(_)
            | Op::ConstFloat(_)
            | Op::ConstStr(_)
            | Op::Alloca { .. }
            | Op::ArrayNew
            | Op::TryBegin { .. }
            | Op::TryEnd
            | Op::GetException
            | Op::ClearException => Vec::new(),
            Op::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Unary { operand, .. } => vec![*operand],
            Op::Load { slot } => vec![*slot],
            Op::Store { slot, value } => vec![*slot, *value],
            Op::Call { args, .. } | Op::Spawn { args, .. } | Op::New { args, .. } => args.clone(),
            Op::CallIndirect { callee, args } => {
                let mut out = vec![*callee];
                out.extend_from_slice(args);
                out
            }
            Op::Cast { value, .. }
            | Op::TypeCheck { value, .. }
            | Op::GetType { value }
            | Op::Box { value }
            | Op::Unbox { value, .. }
            | Op::StrLen { value }
            | Op::Retain { value }
            | Op::Release { value }
            | Op::MutexLock { value }
            | Op::MutexUnlock { value }
            | Op::DebugPrint { value } => vec![*value],
            Op::ArrayGet { array, key } | Op::ArrayHas { array, key } | Op::ArrayUnset { array, key } => {
                vec![*array, *key]
            }
            Op::ArraySet { array, key, value } => vec![*array, *key, *value],
            Op::ArrayPush { array, value } => vec![*array, *value],
            Op::ArrayCount { array } => vec![*array],
            Op::PropertyGet { object, .. } | Op::Instanceof { object, .. } => vec![*object],
            Op::PropertySet { object, value, .. } => vec![*object, *value],
            Op::MethodCall { object, args, .. } => {
                let mut out = vec![*object];
                out.extend_from_slice(args);
                out
            }
            Op::Phi { incoming } => incoming.iter().map(|(_, r)| *r).collect(),
            Op::Select { cond, then_value, else_value } => vec![*cond, *then_value, *else_value],
        }
    }

    /// Rewrite every operand through `map`.
    pub fn map_operands(&mut self, map: &dyn Fn(Register) -> Register) {
        match self {
            Op::ConstNull
            | Op::ConstBool(_)
            | Op::ConstInt(_)
            | Op::ConstFloat(_)
            | Op::ConstStr(_)
            | Op::Alloca { .. }
            | Op::ArrayNew
            | Op::TryBegin { .. }
            | Op::TryEnd
            | Op::GetException
            | Op::ClearException => {}
            Op::Binary { lhs, rhs, .. } => {
                *lhs = map(*lhs);
                *rhs = map(*rhs);
            }
            Op::Unary { operand, .. } => *operand = map(*operand),
            Op::Load { slot } => *slot = map(*slot),
            Op::Store { slot, value } => {
                *slot = map(*slot);
                *value = map(*value);
            }
            Op::Call { args, .. } | Op::Spawn { args, .. } | Op::New { args, .. } => {
                for arg in args {
                    *arg = map(*arg);
                }
            }
            Op::CallIndirect { callee, args } => {
                *callee = map(*callee);
                for arg in args {
                    *arg = map(*arg);
                }
            }
            Op::Cast { value, .. }
            | Op::TypeCheck { value, .. }
            | Op::GetType { value }
            | Op::Box { value }
            | Op::Unbox { value, .. }
            | Op::StrLen { value }
            | Op::Retain { value }
            | Op::Release { value }
            | Op::MutexLock { value }
            | Op::MutexUnlock { value }
            | Op::DebugPrint { value } => *value = map(*value),
            Op::ArrayGet { array, key }
            | Op::ArrayHas { array, key }
            | Op::ArrayUnset { array, key } => {
                *array = map(*array);
                *key = map(*key);
            }
            Op::ArraySet { array, key, value } => {
                *array = map(*array);
                *key = map(*key);
                *value = map(*value);
            }
            Op::ArrayPush { array, value } => {
                *array = map(*array);
                *value = map(*value);
            }
            Op::ArrayCount { array } => *array = map(*array),
            Op::PropertyGet { object, .. } | Op::Instanceof { object, .. } => {
                *object = map(*object)
            }
            Op::PropertySet { object, value, .. } => {
                *object = map(*object);
                *value = map(*value);
            }
            Op::MethodCall { object, args, .. } => {
                *object = map(*object);
                for arg in args {
                    *arg = map(*arg);
                }
            }
            Op::Phi { incoming } => {
                for (_, reg) in incoming {
                    *reg = map(*reg);
                }
            }
            Op::Select { cond, then_value, else_value } => {
                *cond = map(*cond);
                *then_value = map(*then_value);
                *else_value = map(*else_value);
            }
        }
    }
}

/// One instruction: optional result register, operation, source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub result: Option<Register>,
    pub op: Op,
    pub span: Span,
}

/// Block terminators. Exactly one per block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Ret(Option<Register>),
    Br(BlockId),
    CondBr { cond: Register, then_block: BlockId, else_block: BlockId },
    Switch { value: Register, cases: Vec<(i64, BlockId)>, default: BlockId },
    Throw(Register),
    Unreachable,
}

impl Terminator {
    pub fn operands(&self) -> Vec<Register> {
        match self {
            Terminator::Ret(Some(value)) => vec![*value],
            Terminator::Ret(None) | Terminator::Br(_) | Terminator::Unreachable => Vec::new(),
            Terminator::CondBr { cond, .. } => vec![*cond],
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Throw(value) => vec![*value],
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Ret(_) | Terminator::Throw(_) | Terminator::Unreachable => Vec::new(),
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr { then_block, else_block, .. } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
        }
    }
}

/// A basic block: straight-line instructions plus a terminator. The
/// terminator is optional only while the builder is filling the block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self { id, instructions: Vec::new(), terminator: None }
    }
}

/// An IR function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: StringId,
    pub params: Vec<Register>,
    pub blocks: Vec<Block>,
    pub entry: BlockId,
    pub register_count: u32,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Structural invariants: every block terminated, every register defined
    /// exactly once, phi only at block entry. Violations are engine bugs and
    /// abort optimization.
    pub fn validate(&self) -> VeloResult<()> {
        let mut defined = std::collections::HashSet::new();
        for block in &self.blocks {
            if block.terminator.is_none() {
                return Err(VeloError::invalid_ir(format!(
                    "block {} of '{}' has no terminator",
                    block.id,
                    resolve(self.name)
                )));
            }
            let mut past_entry_phis = false;
            for instruction in &block.instructions {
                match instruction.op {
                    Op::Phi { .. } => {
                        if past_entry_phis {
                            return Err(VeloError::invalid_ir(format!(
                                "phi after non-phi in block {} of '{}'",
                                block.id,
                                resolve(self.name)
                            )));
                        }
                    }
                    _ => past_entry_phis = true,
                }
                if let Some(result) = instruction.result {
                    if !defined.insert(result.id) {
                        return Err(VeloError::invalid_ir(format!(
                            "register %{} defined twice in '{}'",
                            result.id,
                            resolve(self.name)
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", resolve(self.name))?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        writeln!(f, ") {{")?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.id)?;
            for instruction in &block.instructions {
                match instruction.result {
                    Some(result) => writeln!(f, "  {} = {:?}", result, instruction.op)?,
                    None => writeln!(f, "  {:?}", instruction.op)?,
                }
            }
            match &block.terminator {
                Some(term) => writeln!(f, "  {:?}", term)?,
                None => writeln!(f, "  <unterminated>")?,
            }
        }
        writeln!(f, "}}")
    }
}

/// An IR module: an ordered list of functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: StringId) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn validate(&self) -> VeloResult<()> {
        for function in &self.functions {
            function.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for function in &self.functions {
            writeln!(f, "{}", function)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::intern;

    #[test]
    fn test_side_effect_table() {
        let r = Register::new(0, IrType::I64);
        assert!(Op::ConstInt(1).is_pure());
        assert!(Op::Binary { op: BinOp::Add, lhs: r, rhs: r }.is_pure());
        assert!(Op::Load { slot: r }.is_pure());
        assert!(Op::StrLen { value: r }.is_pure());
        assert!(!Op::Binary { op: BinOp::Concat, lhs: r, rhs: r }.is_pure());
        assert!(!Op::Store { slot: r, value: r }.is_pure());
        assert!(!Op::Call { callee: intern("f"), args: vec![] }.is_pure());
        assert!(!Op::DebugPrint { value: r }.is_pure());
    }

    #[test]
    fn test_validate_rejects_unterminated_block() {
        let function = Function {
            name: intern("broken"),
            params: vec![],
            blocks: vec![Block::new(BlockId(0))],
            entry: BlockId(0),
            register_count: 0,
        };
        assert!(function.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_double_definition() {
        let r = Register::new(0, IrType::I64);
        let mut block = Block::new(BlockId(0));
        block.instructions.push(Instruction { result: Some(r), op: Op::ConstInt(1), span: Span::default() });
        block.instructions.push(Instruction { result: Some(r), op: Op::ConstInt(2), span: Span::default() });
        block.terminator = Some(Terminator::Ret(None));
        let function = Function {
            name: intern("dup"),
            params: vec![],
            blocks: vec![block],
            entry: BlockId(0),
            register_count: 1,
        };
        assert!(function.validate().is_err());
    }

    #[test]
    fn test_terminator_successors() {
        let r = Register::new(0, IrType::Bool);
        let cond = Terminator::CondBr { cond: r, then_block: BlockId(1), else_block: BlockId(2) };
        assert_eq!(cond.successors(), vec![BlockId(1), BlockId(2)]);
        assert!(Terminator::Ret(None).successors().is_empty());
    }
}
