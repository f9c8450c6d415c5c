//! The closed opcode set and the 32-bit instruction word
//!
//! An instruction packs as `opcode:u8 | a:u8 | b:u16`. Jumps store a signed
//! offset relative to the next instruction in `b`; calls carry the argument
//! count in `a`; property and method sites carry their inline-cache slot in
//! `b`.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every opcode the VM dispatches on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Opcode {
    // Stack
    PushNull = 0,
    PushTrue,
    PushFalse,
    PushInt0,
    PushInt1,
    /// b = constant index.
    PushConst,
    Pop,
    Dup,
    Swap,

    // Locals and globals
    /// a = slot.
    LoadLocal,
    /// a = slot.
    StoreLocal,
    /// b = name constant.
    LoadGlobal,
    /// b = name constant.
    StoreGlobal,
    /// b = name constant.
    DefineGlobal,

    // Integer arithmetic (specialized)
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    NegInt,

    // Float arithmetic (specialized)
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    ModFloat,
    NegFloat,

    // Generic arithmetic; b = type-feedback slot.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Identical,
    NotIdentical,
    Spaceship,
    LtInt,
    LeInt,
    GtInt,
    GeInt,

    // Logical / bitwise
    LogicAnd,
    LogicOr,
    LogicNot,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Shl,
    Shr,

    // Type and conversion
    ToInt,
    ToFloat,
    ToBool,
    ToStr,
    IsNull,
    IsInt,
    IsFloat,
    IsStr,
    IsArray,
    IsObject,
    /// b = class-name constant.
    Instanceof,
    GetType,

    // Strings and arrays
    Concat,
    StrLen,
    ArrayNew,
    ArrayGet,
    ArraySet,
    ArrayPush,
    ArrayHas,
    ArrayUnset,
    ArrayCount,

    // Objects; b = inline-cache slot on member sites.
    /// a = argc, b = class-name constant.
    NewObject,
    PropertyGet,
    PropertySet,
    /// a = argc, b = inline-cache slot.
    MethodCall,

    // Control flow; b = signed offset from the next instruction.
    Jmp,
    Jz,
    Jnz,
    /// a = argc, b = function-reference constant.
    Call,
    /// a = argc; callee is under the arguments on the stack.
    CallIndirect,
    Ret,
    RetNull,

    // Exceptions
    Throw,
    /// b = exception-table entry index.
    BeginTry,
    EndTry,

    /// a = argc, b = function-reference constant. Spawn intent of `go`;
    /// the core VM runs the call synchronously.
    Spawn,
}

/// One fixed-width instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Opcode,
    pub a: u8,
    pub b: u16,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Self { op, a: 0, b: 0 }
    }

    pub fn with_a(op: Opcode, a: u8) -> Self {
        Self { op, a, b: 0 }
    }

    pub fn with_b(op: Opcode, b: u16) -> Self {
        Self { op, a: 0, b }
    }

    pub fn with_ab(op: Opcode, a: u8, b: u16) -> Self {
        Self { op, a, b }
    }

    /// The signed jump offset stored in `b`.
    pub fn offset(&self) -> i16 {
        self.b as i16
    }

    pub fn encode(&self) -> u32 {
        (u8::from(self.op) as u32) | ((self.a as u32) << 8) | ((self.b as u32) << 16)
    }

    pub fn decode(word: u32) -> Option<Instr> {
        let op = Opcode::try_from((word & 0xFF) as u8).ok()?;
        Some(Instr { op, a: ((word >> 8) & 0xFF) as u8, b: (word >> 16) as u16 })
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} a={} b={}", self.op, self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let instr = Instr::with_ab(Opcode::Call, 3, 17);
        let decoded = Instr::decode(instr.encode()).unwrap();
        assert_eq!(decoded, instr);
    }

    #[test]
    fn test_negative_jump_offset() {
        let instr = Instr::with_b(Opcode::Jmp, (-5i16) as u16);
        assert_eq!(instr.offset(), -5);
        assert_eq!(Instr::decode(instr.encode()).unwrap().offset(), -5);
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        assert!(Instr::decode(0xFF).is_none());
    }
}
