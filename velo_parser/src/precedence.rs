//! Operator precedence table for the expression parser

use crate::ast::BinaryOp;
use velo_lexer::TokenKind;

/// Binding powers, low to high. Assignment is right-associative, comparisons
/// do not chain, everything else is left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precedence {
    None = 0,
    Assignment = 1,
    LogicalOr = 2,
    LogicalAnd = 3,
    Pipe = 4,
    Equality = 5,
    Relational = 6,
    Additive = 7,
    Multiplicative = 8,
    Unary = 9,
    Postfix = 10,
}

/// Binary operator info for a lookahead token, when it can continue an
/// expression: `(op, precedence, right_associative, non_chaining)`.
pub fn binary_op(token: &TokenKind) -> Option<(BinaryOp, Precedence, bool, bool)> {
    let info = match token {
        TokenKind::OrOr => (BinaryOp::Or, Precedence::LogicalOr, false, false),
        TokenKind::AndAnd => (BinaryOp::And, Precedence::LogicalAnd, false, false),
        TokenKind::PipeGreater => (BinaryOp::Pipe, Precedence::Pipe, false, false),
        TokenKind::Equal => (BinaryOp::Eq, Precedence::Equality, false, true),
        TokenKind::NotEqual => (BinaryOp::NotEq, Precedence::Equality, false, true),
        TokenKind::Identical => (BinaryOp::Identical, Precedence::Equality, false, true),
        TokenKind::NotIdentical => (BinaryOp::NotIdentical, Precedence::Equality, false, true),
        TokenKind::Less => (BinaryOp::Lt, Precedence::Relational, false, true),
        TokenKind::LessEqual => (BinaryOp::Le, Precedence::Relational, false, true),
        TokenKind::Greater => (BinaryOp::Gt, Precedence::Relational, false, true),
        TokenKind::GreaterEqual => (BinaryOp::Ge, Precedence::Relational, false, true),
        TokenKind::Spaceship => (BinaryOp::Spaceship, Precedence::Relational, false, true),
        TokenKind::Plus => (BinaryOp::Add, Precedence::Additive, false, false),
        TokenKind::Minus => (BinaryOp::Sub, Precedence::Additive, false, false),
        TokenKind::Dot => (BinaryOp::Concat, Precedence::Additive, false, false),
        TokenKind::Star => (BinaryOp::Mul, Precedence::Multiplicative, false, false),
        TokenKind::Slash => (BinaryOp::Div, Precedence::Multiplicative, false, false),
        TokenKind::Percent => (BinaryOp::Mod, Precedence::Multiplicative, false, false),
        _ => return None,
    };
    Some(info)
}

/// Compound-assignment operator for a lookahead token.
pub fn compound_assign_op(token: &TokenKind) -> Option<BinaryOp> {
    let op = match token {
        TokenKind::PlusAssign => BinaryOp::Add,
        TokenKind::MinusAssign => BinaryOp::Sub,
        TokenKind::StarAssign => BinaryOp::Mul,
        TokenKind::SlashAssign => BinaryOp::Div,
        TokenKind::PercentAssign => BinaryOp::Mod,
        TokenKind::ConcatAssign => BinaryOp::Concat,
        _ => return None,
    };
    Some(op)
}
