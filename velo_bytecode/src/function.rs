//! Compiled functions, constant pools, and program containers

use crate::opcode::{Instr, Opcode};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use velo_common::{resolve, StringId};

/// A typed constant-pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(StringId),
    /// A class reference by name.
    Class(StringId),
    /// A function reference by name.
    Function(StringId),
    /// Pre-shaped array literal: `(key, value)` pairs, keyless entries
    /// append with the next integer key.
    ArrayTemplate(Vec<(Option<Constant>, Constant)>),
}

bitflags! {
    /// Flags on a compiled function.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct FunctionFlags: u8 {
        const METHOD   = 1 << 0;
        const STATIC   = 1 << 1;
        const VARIADIC = 1 << 2;
        /// Property-hook body.
        const HOOK     = 1 << 3;
        /// The synthetic script entry function.
        const SCRIPT   = 1 << 4;
    }
}

/// Formal parameter of a compiled function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: StringId,
    /// Constant index of the default value, when one exists.
    pub default: Option<u16>,
    pub variadic: bool,
}

/// One covered range in the exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    /// Constant index of the caught class name.
    pub caught_type: u16,
}

/// An executable function: bytecode plus everything the VM needs around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    pub name: StringId,
    pub bytecode: Vec<Instr>,
    pub constants: Vec<Constant>,
    pub params: Vec<ParamSpec>,
    pub local_count: u16,
    pub arg_count: u16,
    pub max_stack: u16,
    pub flags: FunctionFlags,
    /// `(pc, source line)` pairs sorted by pc.
    pub line_table: Vec<(u32, u32)>,
    pub exception_table: Vec<ExceptionEntry>,
    /// Member names per inline-cache slot; the VM owns the cache state.
    pub cache_sites: Vec<StringId>,
    /// Number of type-feedback cells referenced by generic numeric ops.
    pub feedback_count: u16,
}

impl CompiledFunction {
    pub fn new(name: StringId) -> Self {
        Self {
            name,
            bytecode: Vec::new(),
            constants: Vec::new(),
            params: Vec::new(),
            local_count: 0,
            arg_count: 0,
            max_stack: 0,
            flags: FunctionFlags::empty(),
            line_table: Vec::new(),
            exception_table: Vec::new(),
            cache_sites: Vec::new(),
            feedback_count: 0,
        }
    }

    /// Source line for a pc, from the sorted line table.
    pub fn line_for_pc(&self, pc: u32) -> Option<u32> {
        match self.line_table.binary_search_by_key(&pc, |&(entry_pc, _)| entry_pc) {
            Ok(i) => Some(self.line_table[i].1),
            Err(0) => None,
            Err(i) => Some(self.line_table[i - 1].1),
        }
    }

    /// Human-readable listing for debugging and golden tests.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "fn {} (args={}, locals={}, stack={})\n",
            resolve(self.name),
            self.arg_count,
            self.local_count,
            self.max_stack
        ));
        for (pc, instr) in self.bytecode.iter().enumerate() {
            let line = self
                .line_for_pc(pc as u32)
                .map(|l| format!("{:>4}", l))
                .unwrap_or_else(|| "    ".to_string());
            out.push_str(&format!("{} {:04}: {}\n", line, pc, instr));
        }
        for entry in &self.exception_table {
            out.push_str(&format!(
                "  catch [{}, {}) -> {} type={}\n",
                entry.start_pc, entry.end_pc, entry.handler_pc, entry.caught_type
            ));
        }
        out
    }
}

impl fmt::Display for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.disassemble())
    }
}

/// A property in a class definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: StringId,
    /// Index into the program's function list for each present hook body.
    pub get_hook: Option<u32>,
    pub set_hook: Option<u32>,
    /// Constant index of the default value within the class's defaults pool.
    pub default: Option<Constant>,
    pub modifiers: velo_parser::Modifiers,
    pub attributes: Vec<StringId>,
}

/// A method entry in a class definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: StringId,
    /// Index into the program's function list.
    pub function: u32,
    pub modifiers: velo_parser::Modifiers,
    pub attributes: Vec<StringId>,
}

/// A class shape produced by the code generator and instantiated by the VM
/// at program load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: StringId,
    pub parent: Option<StringId>,
    pub interfaces: Vec<StringId>,
    pub properties: Vec<PropertySpec>,
    pub methods: Vec<MethodSpec>,
    pub attributes: Vec<StringId>,
    pub is_final: bool,
    pub is_abstract: bool,
}

/// An in-memory bytecode module: functions, classes, and the entry index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub functions: Vec<CompiledFunction>,
    pub classes: Vec<ClassSpec>,
    /// Index of the synthetic script function in `functions`.
    pub entry: u32,
}

impl CompiledProgram {
    pub fn function_named(&self, name: StringId) -> Option<(u32, &CompiledFunction)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (i as u32, f))
    }

    pub fn entry_function(&self) -> &CompiledFunction {
        &self.functions[self.entry as usize]
    }
}

/// Stack-depth delta of one instruction; `a` disambiguates calls.
pub fn stack_effect(instr: &Instr) -> i32 {
    let argc = instr.a as i32;
    match instr.op {
        Opcode::PushNull
        | Opcode::PushTrue
        | Opcode::PushFalse
        | Opcode::PushInt0
        | Opcode::PushInt1
        | Opcode::PushConst
        | Opcode::Dup
        | Opcode::LoadLocal
        | Opcode::LoadGlobal
        | Opcode::ArrayNew => 1,
        Opcode::Pop
        | Opcode::StoreLocal
        | Opcode::StoreGlobal
        | Opcode::DefineGlobal
        | Opcode::Jz
        | Opcode::Jnz
        | Opcode::Throw
        | Opcode::Ret => -1,
        Opcode::Swap
        | Opcode::Jmp
        | Opcode::RetNull
        | Opcode::BeginTry
        | Opcode::EndTry
        | Opcode::NegInt
        | Opcode::NegFloat
        | Opcode::Neg
        | Opcode::LogicNot
        | Opcode::BitNot
        | Opcode::ToInt
        | Opcode::ToFloat
        | Opcode::ToBool
        | Opcode::ToStr
        | Opcode::IsNull
        | Opcode::IsInt
        | Opcode::IsFloat
        | Opcode::IsStr
        | Opcode::IsArray
        | Opcode::IsObject
        | Opcode::Instanceof
        | Opcode::GetType
        | Opcode::StrLen
        | Opcode::ArrayCount
        | Opcode::PropertyGet => 0,
        Opcode::AddInt
        | Opcode::SubInt
        | Opcode::MulInt
        | Opcode::DivInt
        | Opcode::ModInt
        | Opcode::AddFloat
        | Opcode::SubFloat
        | Opcode::MulFloat
        | Opcode::DivFloat
        | Opcode::ModFloat
        | Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::Div
        | Opcode::Mod
        | Opcode::Eq
        | Opcode::Ne
        | Opcode::Lt
        | Opcode::Le
        | Opcode::Gt
        | Opcode::Ge
        | Opcode::Identical
        | Opcode::NotIdentical
        | Opcode::Spaceship
        | Opcode::LtInt
        | Opcode::LeInt
        | Opcode::GtInt
        | Opcode::GeInt
        | Opcode::LogicAnd
        | Opcode::LogicOr
        | Opcode::BitAnd
        | Opcode::BitOr
        | Opcode::BitXor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Concat
        | Opcode::ArrayGet
        | Opcode::ArrayHas => -1,
        Opcode::ArrayUnset => -2,
        Opcode::ArraySet => -3,
        Opcode::ArrayPush => -2,
        Opcode::PropertySet => -2,
        // argc arguments replaced by one result.
        Opcode::Call | Opcode::Spawn => 1 - argc,
        // callee + argc arguments replaced by one result.
        Opcode::CallIndirect => -argc,
        // receiver + argc arguments replaced by one result.
        Opcode::MethodCall => -argc,
        // argc constructor arguments replaced by the new object.
        Opcode::NewObject => 1 - argc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::intern;

    #[test]
    fn test_line_table_lookup() {
        let mut function = CompiledFunction::new(intern("f"));
        function.line_table = vec![(0, 1), (4, 2), (9, 5)];
        assert_eq!(function.line_for_pc(0), Some(1));
        assert_eq!(function.line_for_pc(3), Some(1));
        assert_eq!(function.line_for_pc(4), Some(2));
        assert_eq!(function.line_for_pc(100), Some(5));
    }

    #[test]
    fn test_stack_effect_of_calls() {
        assert_eq!(stack_effect(&Instr::with_ab(Opcode::Call, 2, 0)), -1);
        assert_eq!(stack_effect(&Instr::with_ab(Opcode::MethodCall, 2, 0)), -2);
        assert_eq!(stack_effect(&Instr::with_ab(Opcode::NewObject, 0, 0)), 1);
    }

    #[test]
    fn test_disassembly_contains_mnemonics() {
        let mut function = CompiledFunction::new(intern("f"));
        function.bytecode.push(Instr::with_b(Opcode::PushConst, 0));
        function.bytecode.push(Instr::new(Opcode::RetNull));
        let listing = function.disassemble();
        assert!(listing.contains("PushConst"));
        assert!(listing.contains("RetNull"));
    }
}
