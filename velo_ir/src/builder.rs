//! Instruction builder
//!
//! The builder tracks the current function, the current block, and a
//! monotonically increasing register counter. Lowering emits into it and
//! never touches block internals directly.

use crate::ir::{Block, BlockId, Function, Instruction, IrType, Op, Register, Terminator};
use velo_common::{Span, StringId};

/// Builds one [`Function`] block by block.
pub struct FunctionBuilder {
    name: StringId,
    params: Vec<Register>,
    blocks: Vec<Block>,
    current: BlockId,
    next_register: u32,
}

impl FunctionBuilder {
    pub fn new(name: StringId) -> Self {
        let entry = Block::new(BlockId(0));
        Self { name, params: Vec::new(), blocks: vec![entry], current: BlockId(0), next_register: 0 }
    }

    /// Declare a parameter register of the dynamic type.
    pub fn add_param(&mut self) -> Register {
        let register = self.fresh(IrType::Value);
        self.params.push(register);
        register
    }

    pub fn fresh(&mut self, ty: IrType) -> Register {
        let register = Register::new(self.next_register, ty);
        self.next_register += 1;
        register
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::new(id));
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// True when the current block already ends in a terminator; emission
    /// into it would be dead and is skipped.
    pub fn is_terminated(&self) -> bool {
        self.blocks[self.current.0 as usize].terminator.is_some()
    }

    /// Emit an instruction producing a result of type `ty`.
    pub fn emit(&mut self, op: Op, ty: IrType, span: Span) -> Register {
        let result = self.fresh(ty);
        if !self.is_terminated() {
            self.blocks[self.current.0 as usize].instructions.push(Instruction {
                result: Some(result),
                op,
                span,
            });
        }
        result
    }

    /// Emit a side-effecting instruction with no result.
    pub fn emit_void(&mut self, op: Op, span: Span) {
        if !self.is_terminated() {
            self.blocks[self.current.0 as usize]
                .instructions
                .push(Instruction { result: None, op, span });
        }
    }

    /// Terminate the current block. A second terminator is ignored so that
    /// lowering of `return; more();` stays well-formed.
    pub fn terminate(&mut self, terminator: Terminator) {
        let block = &mut self.blocks[self.current.0 as usize];
        if block.terminator.is_none() {
            block.terminator = Some(terminator);
        }
    }

    /// Finish the function, sealing unterminated blocks with `ret null`.
    pub fn finish(mut self) -> Function {
        for block in &mut self.blocks {
            if block.terminator.is_none() {
                block.terminator = Some(Terminator::Ret(None));
            }
        }
        Function {
            name: self.name,
            params: std::mem::take(&mut self.params),
            blocks: self.blocks,
            entry: BlockId(0),
            register_count: self.next_register,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::intern;

    #[test]
    fn test_builder_produces_valid_function() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let one = builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let two = builder.emit(Op::ConstInt(2), IrType::I64, Span::default());
        let sum = builder.emit(
            Op::Binary { op: crate::ir::BinOp::Add, lhs: one, rhs: two },
            IrType::Value,
            Span::default(),
        );
        builder.terminate(Terminator::Ret(Some(sum)));
        let function = builder.finish();
        assert!(function.validate().is_ok());
        assert_eq!(function.instruction_count(), 3);
        assert_eq!(function.register_count, 3);
    }

    #[test]
    fn test_emission_after_terminator_is_dropped() {
        let mut builder = FunctionBuilder::new(intern("f"));
        builder.terminate(Terminator::Ret(None));
        builder.emit(Op::ConstInt(1), IrType::I64, Span::default());
        let function = builder.finish();
        assert_eq!(function.instruction_count(), 0);
    }

    #[test]
    fn test_unterminated_blocks_sealed_on_finish() {
        let mut builder = FunctionBuilder::new(intern("f"));
        let extra = builder.new_block();
        builder.switch_to(extra);
        let function = builder.finish();
        assert!(function.validate().is_ok());
        assert!(matches!(
            function.block(BlockId(0)).terminator,
            Some(Terminator::Ret(None))
        ));
    }
}
