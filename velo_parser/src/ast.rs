//! Abstract syntax tree for the Velo language
//!
//! Nodes live in one flat, append-only vector and reference each other by
//! 32-bit [`NodeId`]. Child lists are ranges into a shared arena vector, so
//! traversal stays cache-friendly and the whole tree frees in two
//! deallocations. A `NodeId` is only meaningful against the [`Ast`] that
//! produced it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use velo_common::{Span, StringId, SyntaxMode};

/// Index of a node within its owning [`Ast`].
pub type NodeId = u32;

/// A contiguous run of child ids in the AST's extra arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeList {
    pub start: u32,
    pub len: u32,
}

impl NodeList {
    pub const EMPTY: NodeList = NodeList { start: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }
}

bitflags! {
    /// Modifier set on class members and declarations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Modifiers: u16 {
        const PUBLIC    = 1 << 0;
        const PROTECTED = 1 << 1;
        const PRIVATE   = 1 << 2;
        const STATIC    = 1 << 3;
        const READONLY  = 1 << 4;
        const FINAL     = 1 << 5;
        const ABSTRACT  = 1 << 6;
    }
}

impl Modifiers {
    /// The default visibility when none was written.
    pub fn visibility(&self) -> Modifiers {
        let vis = *self & (Modifiers::PUBLIC | Modifiers::PROTECTED | Modifiers::PRIVATE);
        if vis.is_empty() {
            Modifiers::PUBLIC
        } else {
            vis
        }
    }
}

/// Which declaration family a class-like node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    Trait,
    Enum,
    Struct,
}

/// Binary operators surviving into the AST.
///
/// `Concat` covers both the `.` operator and go-mode `+` over string-typed
/// operands; `Pipe` is `|>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Le,
    Gt,
    Ge,
    Spaceship,
    And,
    Or,
    Pipe,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Identical
                | BinaryOp::NotIdentical
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Spaceship
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Property hook kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookKind {
    Get,
    Set,
}

/// Tagged node payload. The tag set is closed; every later stage matches
/// exhaustively on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The program root; always node 0 once parsing finishes.
    Root { statements: NodeList },
    /// Placeholder produced by error recovery.
    ParseError,

    // Statements
    ExprStmt { expr: NodeId },
    Block { statements: NodeList },
    Echo { args: NodeList },
    If { condition: NodeId, then_branch: NodeId, else_branch: Option<NodeId> },
    While { condition: NodeId, body: NodeId },
    For { init: Option<NodeId>, condition: Option<NodeId>, step: Option<NodeId>, body: NodeId },
    Foreach { subject: NodeId, key_var: Option<NodeId>, value_var: NodeId, body: NodeId },
    Return { value: Option<NodeId> },
    Break,
    Continue,
    Global { vars: NodeList },
    ConstDecl { name: StringId, value: NodeId },
    /// `go expr;` records spawn intent; the core runtime runs it eagerly.
    GoStmt { call: NodeId },
    Throw { value: NodeId },
    Try { body: NodeId, catches: NodeList, finally: Option<NodeId> },
    CatchClause { class_name: StringId, var: Option<StringId>, body: NodeId },
    Namespace { name: StringId },
    UseNamespace { path: StringId },
    InlineHtml { text: StringId },

    // Declarations
    FunctionDecl {
        name: StringId,
        params: NodeList,
        body: NodeId,
        attributes: NodeList,
        modifiers: Modifiers,
    },
    Param { name: StringId, default: Option<NodeId>, by_ref: bool, variadic: bool },
    ClassDecl {
        name: StringId,
        kind: ClassKind,
        parent: Option<StringId>,
        implements: NodeList,
        members: NodeList,
        attributes: NodeList,
        modifiers: Modifiers,
    },
    PropertyDecl {
        name: StringId,
        default: Option<NodeId>,
        hooks: NodeList,
        attributes: NodeList,
        modifiers: Modifiers,
    },
    PropertyHook { kind: HookKind, body: NodeId, is_expr: bool },
    UseTrait { names: NodeList },
    Attribute { name: StringId, args: NodeList },
    /// Bare name reference: implements lists, trait uses, constants.
    Name { name: StringId },

    // Expressions
    NullLit,
    BoolLit(bool),
    IntLit(i64),
    FloatLit(f64),
    StringLit(StringId),
    /// Double-quoted/heredoc body with embedded expressions.
    Interpolation { parts: NodeList },
    Variable { name: StringId },
    ArrayLit { entries: NodeList },
    ArrayEntry { key: Option<NodeId>, value: NodeId },
    Binary { op: BinaryOp, lhs: NodeId, rhs: NodeId },
    Unary { op: UnaryOp, operand: NodeId },
    Assign { target: NodeId, value: NodeId },
    CompoundAssign { op: BinaryOp, target: NodeId, value: NodeId },
    Call { callee: NodeId, args: NodeList },
    New { class_name: StringId, args: NodeList },
    MethodCall { receiver: NodeId, method: StringId, args: NodeList },
    PropertyAccess { receiver: NodeId, property: StringId },
    StaticCall { class_name: StringId, method: StringId, args: NodeList },
    ClassConst { class_name: StringId, name: StringId },
    Index { array: NodeId, index: Option<NodeId> },
    Match { subject: NodeId, arms: NodeList },
    MatchArm { conditions: NodeList, body: NodeId },
    Clone { operand: NodeId },
}

/// One AST node: a tag plus the primary token span for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
}

/// The flat tree. Owns every node and every child list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ast {
    nodes: Vec<Node>,
    extra: Vec<NodeId>,
    pub syntax: SyntaxMode,
}

impl Ast {
    pub fn new(syntax: SyntaxMode) -> Self {
        Self { nodes: Vec::new(), extra: Vec::new(), syntax }
    }

    pub fn push(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node { kind, span });
        id
    }

    /// Move a collected child list into the extra arena.
    pub fn push_list(&mut self, children: &[NodeId]) -> NodeList {
        let start = self.extra.len() as u32;
        self.extra.extend_from_slice(children);
        NodeList { start, len: children.len() as u32 }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id as usize].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id as usize].span
    }

    pub fn list(&self, list: NodeList) -> &[NodeId] {
        &self.extra[list.start as usize..(list.start + list.len) as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node's statement list. Empty when parsing produced nothing.
    pub fn root_statements(&self) -> &[NodeId] {
        match self.nodes.first().map(|n| &n.kind) {
            Some(NodeKind::Root { statements }) => self.list(*statements),
            _ => &[],
        }
    }

    /// Structural equality ignoring spans; the basis of the dual-syntax
    /// equivalence guarantee.
    pub fn structurally_equal(&self, other: &Ast) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.extra == other.extra
            && self
                .nodes
                .iter()
                .zip(other.nodes.iter())
                .all(|(a, b)| a.kind == b.kind)
    }

    /// True when a node syntactically produces a string: literals,
    /// interpolations, and concatenations. Drives the go-mode `+` rewrite.
    pub fn is_stringish(&self, id: NodeId) -> bool {
        matches!(
            self.kind(id),
            NodeKind::StringLit(_)
                | NodeKind::Interpolation { .. }
                | NodeKind::Binary { op: BinaryOp::Concat, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::intern;

    #[test]
    fn test_flat_storage_and_lists() {
        let mut ast = Ast::new(SyntaxMode::Php);
        let a = ast.push(NodeKind::IntLit(1), Span::default());
        let b = ast.push(NodeKind::IntLit(2), Span::default());
        let list = ast.push_list(&[a, b]);
        let root = ast.push(NodeKind::Root { statements: list }, Span::default());
        assert_eq!(ast.list(list), &[a, b]);
        assert_eq!(ast.len(), 3);
        assert!(matches!(ast.kind(root), NodeKind::Root { .. }));
    }

    #[test]
    fn test_structural_equality_ignores_spans() {
        let mut a = Ast::new(SyntaxMode::Php);
        let mut b = Ast::new(SyntaxMode::Go);
        let name = intern("$x");
        a.push(NodeKind::Variable { name }, Span::new(0, 0, 2));
        b.push(NodeKind::Variable { name }, Span::new(0, 10, 11));
        assert!(a.structurally_equal(&b));
    }

    #[test]
    fn test_modifier_default_visibility() {
        assert_eq!(Modifiers::empty().visibility(), Modifiers::PUBLIC);
        assert_eq!(
            (Modifiers::PRIVATE | Modifiers::STATIC).visibility(),
            Modifiers::PRIVATE
        );
    }
}
