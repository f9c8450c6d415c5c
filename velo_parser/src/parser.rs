//! Parser implementation
//!
//! Recursive descent for statements and declarations, precedence climbing for
//! expressions, one token of lookahead. On an unexpected token the parser
//! records a diagnostic and advances to the next synchronization point; a
//! failed production becomes a `ParseError` node rather than abandoning the
//! tree.

use crate::ast::*;
use crate::precedence::{binary_op, compound_assign_op, Precedence};
use velo_common::{intern, resolve, Diagnostics, Span, StringId, SyntaxMode};
use velo_lexer::{Token, TokenKind};

/// Parser for the Velo language.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    ast: Ast,
    syntax: SyntaxMode,
    diagnostics: Diagnostics,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>, syntax: SyntaxMode) -> Self {
        if tokens.is_empty() {
            tokens.push(velo_lexer::token::token(TokenKind::Eof, Span::default()));
        }
        Self {
            tokens,
            pos: 0,
            ast: Ast::new(syntax),
            syntax,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Parse the whole token stream into an AST. The root node is created
    /// first so it always receives id 0.
    pub fn parse_program(&mut self) -> Ast {
        let root_span = self.current_span();
        let root = self.ast.push(NodeKind::Root { statements: NodeList::EMPTY }, root_span);
        debug_assert_eq!(root, 0);

        let mut statements = Vec::new();
        while !self.at_eof() {
            match self.current_kind() {
                TokenKind::OpenTag | TokenKind::CloseTag => {
                    self.advance();
                }
                TokenKind::InlineHtml(text) => {
                    let span = self.current_span();
                    self.advance();
                    statements.push(self.ast.push(NodeKind::InlineHtml { text }, span));
                }
                _ => statements.push(self.parse_statement()),
            }
        }

        let list = self.ast.push_list(&statements);
        if let NodeKind::Root { statements } = &mut self.ast.node_mut(root).kind {
            *statements = list;
        }
        std::mem::take(&mut self.ast)
    }

    // ---- Statements ---------------------------------------------------

    fn parse_statement(&mut self) -> NodeId {
        let attributes = self.parse_attribute_list();

        match self.current_kind() {
            TokenKind::KwFunction | TokenKind::KwFn => self.parse_function(attributes, Modifiers::empty()),
            TokenKind::KwClass | TokenKind::KwInterface | TokenKind::KwTrait | TokenKind::KwEnum
            | TokenKind::KwStruct => self.parse_class_like(attributes, Modifiers::empty()),
            TokenKind::KwAbstract | TokenKind::KwFinal => {
                let modifiers = self.parse_modifiers();
                match self.current_kind() {
                    TokenKind::KwClass | TokenKind::KwStruct => {
                        self.parse_class_like(attributes, modifiers)
                    }
                    _ => self.unexpected("expected 'class' after modifier"),
                }
            }
            TokenKind::LeftBrace => self.parse_block(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for(),
            TokenKind::KwForeach => self.parse_foreach(),
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwBreak => {
                let span = self.current_span();
                self.advance();
                self.expect_semicolon();
                self.ast.push(NodeKind::Break, span)
            }
            TokenKind::KwContinue => {
                let span = self.current_span();
                self.advance();
                self.expect_semicolon();
                self.ast.push(NodeKind::Continue, span)
            }
            TokenKind::KwEcho => self.parse_echo(),
            TokenKind::KwGlobal => self.parse_global(),
            TokenKind::KwConst => self.parse_const(),
            TokenKind::KwGo => self.parse_go(),
            TokenKind::KwThrow => self.parse_throw(),
            TokenKind::KwTry => self.parse_try(),
            TokenKind::KwNamespace => self.parse_namespace(),
            TokenKind::KwUse => self.parse_use(),
            TokenKind::Semicolon => {
                // Stray semicolons are harmless.
                let span = self.current_span();
                self.advance();
                self.ast.push(NodeKind::Block { statements: NodeList::EMPTY }, span)
            }
            _ => {
                let span = self.current_span();
                let expr = self.parse_expression();
                self.expect_semicolon();
                self.ast.push(NodeKind::ExprStmt { expr }, span)
            }
        }
    }

    fn parse_block(&mut self) -> NodeId {
        let span = self.current_span();
        self.expect(TokenKind::LeftBrace, "expected '{'");
        let mut statements = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightBrace {
            statements.push(self.parse_statement());
        }
        self.expect(TokenKind::RightBrace, "expected '}'");
        let list = self.ast.push_list(&statements);
        self.ast.push(NodeKind::Block { statements: list }, span)
    }

    fn parse_if(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance(); // if
        self.expect(TokenKind::LeftParen, "expected '(' after 'if'");
        let condition = self.parse_expression();
        self.expect(TokenKind::RightParen, "expected ')' after condition");
        let then_branch = self.parse_block_or_statement();

        let else_branch = match self.current_kind() {
            TokenKind::KwElseif => Some(self.parse_if_from_elseif()),
            TokenKind::KwElse => {
                self.advance();
                if self.current_kind() == TokenKind::KwIf {
                    Some(self.parse_if())
                } else {
                    Some(self.parse_block_or_statement())
                }
            }
            _ => None,
        };

        self.ast.push(NodeKind::If { condition, then_branch, else_branch }, span)
    }

    /// `elseif` continues the chain exactly like `else if`.
    fn parse_if_from_elseif(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance(); // elseif
        self.expect(TokenKind::LeftParen, "expected '(' after 'elseif'");
        let condition = self.parse_expression();
        self.expect(TokenKind::RightParen, "expected ')' after condition");
        let then_branch = self.parse_block_or_statement();
        let else_branch = match self.current_kind() {
            TokenKind::KwElseif => Some(self.parse_if_from_elseif()),
            TokenKind::KwElse => {
                self.advance();
                Some(self.parse_block_or_statement())
            }
            _ => None,
        };
        self.ast.push(NodeKind::If { condition, then_branch, else_branch }, span)
    }

    fn parse_block_or_statement(&mut self) -> NodeId {
        if self.current_kind() == TokenKind::LeftBrace {
            self.parse_block()
        } else {
            self.parse_statement()
        }
    }

    fn parse_while(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        self.expect(TokenKind::LeftParen, "expected '(' after 'while'");
        let condition = self.parse_expression();
        self.expect(TokenKind::RightParen, "expected ')' after condition");
        let body = self.parse_block_or_statement();
        self.ast.push(NodeKind::While { condition, body }, span)
    }

    fn parse_for(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        self.expect(TokenKind::LeftParen, "expected '(' after 'for'");
        let init = if self.current_kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(TokenKind::Semicolon, "expected ';' in for header");
        let condition = if self.current_kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(TokenKind::Semicolon, "expected ';' in for header");
        let step = if self.current_kind() == TokenKind::RightParen {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect(TokenKind::RightParen, "expected ')' after for header");
        let body = self.parse_block_or_statement();
        self.ast.push(NodeKind::For { init, condition, step, body }, span)
    }

    fn parse_foreach(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        self.expect(TokenKind::LeftParen, "expected '(' after 'foreach'");
        let subject = self.parse_expression();
        self.expect(TokenKind::KwAs, "expected 'as' in foreach");
        let first = self.parse_foreach_binding();
        let (key_var, value_var) = if self.eat(TokenKind::FatArrow) {
            let value = self.parse_foreach_binding();
            (Some(first), value)
        } else {
            (None, first)
        };
        self.expect(TokenKind::RightParen, "expected ')' after foreach");
        let body = self.parse_block_or_statement();
        self.ast.push(NodeKind::Foreach { subject, key_var, value_var, body }, span)
    }

    fn parse_foreach_binding(&mut self) -> NodeId {
        let span = self.current_span();
        match self.current_kind() {
            TokenKind::Variable(name) => {
                self.advance();
                self.ast.push(NodeKind::Variable { name }, span)
            }
            _ => self.unexpected("expected variable in foreach binding"),
        }
    }

    fn parse_return(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let value = if self.current_kind() == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expression())
        };
        self.expect_semicolon();
        self.ast.push(NodeKind::Return { value }, span)
    }

    fn parse_echo(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let mut args = vec![self.parse_expression()];
        while self.eat(TokenKind::Comma) {
            args.push(self.parse_expression());
        }
        self.expect_semicolon();
        let list = self.ast.push_list(&args);
        self.ast.push(NodeKind::Echo { args: list }, span)
    }

    fn parse_global(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let mut vars = Vec::new();
        loop {
            let var_span = self.current_span();
            match self.current_kind() {
                TokenKind::Variable(name) => {
                    self.advance();
                    vars.push(self.ast.push(NodeKind::Variable { name }, var_span));
                }
                _ => {
                    vars.push(self.unexpected("expected variable after 'global'"));
                    break;
                }
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect_semicolon();
        let list = self.ast.push_list(&vars);
        self.ast.push(NodeKind::Global { vars: list }, span)
    }

    fn parse_const(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let name = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => {
                return self.unexpected("expected constant name after 'const'");
            }
        };
        self.expect(TokenKind::Assign, "expected '=' in const declaration");
        let value = self.parse_expression();
        self.expect_semicolon();
        self.ast.push(NodeKind::ConstDecl { name, value }, span)
    }

    fn parse_go(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let call = self.parse_expression();
        if !matches!(
            self.ast.kind(call),
            NodeKind::Call { .. } | NodeKind::MethodCall { .. } | NodeKind::StaticCall { .. }
        ) {
            self.diagnostics.error("'go' expects a call expression", self.ast.span(call));
        }
        self.expect_semicolon();
        self.ast.push(NodeKind::GoStmt { call }, span)
    }

    fn parse_throw(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let value = self.parse_expression();
        self.expect_semicolon();
        self.ast.push(NodeKind::Throw { value }, span)
    }

    fn parse_try(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let body = self.parse_block();
        let mut catches = Vec::new();
        while self.current_kind() == TokenKind::KwCatch {
            catches.push(self.parse_catch());
        }
        let finally = if self.eat(TokenKind::KwFinally) {
            Some(self.parse_block())
        } else {
            None
        };
        if catches.is_empty() && finally.is_none() {
            self.diagnostics.error("'try' needs at least one catch or finally", span);
        }
        let list = self.ast.push_list(&catches);
        self.ast.push(NodeKind::Try { body, catches: list, finally }, span)
    }

    fn parse_catch(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance(); // catch
        self.expect(TokenKind::LeftParen, "expected '(' after 'catch'");
        let class_name = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => {
                let node = self.unexpected("expected exception class in catch");
                return node;
            }
        };
        let var = match self.current_kind() {
            TokenKind::Variable(name) => {
                self.advance();
                Some(name)
            }
            _ => None,
        };
        self.expect(TokenKind::RightParen, "expected ')' after catch clause");
        let body = self.parse_block();
        self.ast.push(NodeKind::CatchClause { class_name, var, body }, span)
    }

    fn parse_namespace(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let name = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => return self.unexpected("expected namespace name"),
        };
        self.expect_semicolon();
        self.ast.push(NodeKind::Namespace { name }, span)
    }

    fn parse_use(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance();
        let path = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => return self.unexpected("expected name after 'use'"),
        };
        self.expect_semicolon();
        self.ast.push(NodeKind::UseNamespace { path }, span)
    }

    // ---- Declarations -------------------------------------------------

    fn parse_attribute_list(&mut self) -> NodeList {
        let mut attributes = Vec::new();
        while self.current_kind() == TokenKind::AttributeStart {
            self.advance();
            loop {
                let attr_span = self.current_span();
                let name = match self.current_kind() {
                    TokenKind::Identifier(id) => {
                        self.advance();
                        id
                    }
                    _ => {
                        self.diagnostics.error("expected attribute name", attr_span);
                        break;
                    }
                };
                let args = if self.eat(TokenKind::LeftParen) {
                    let args = self.parse_argument_list();
                    self.expect(TokenKind::RightParen, "expected ')' after attribute arguments");
                    args
                } else {
                    NodeList::EMPTY
                };
                attributes.push(self.ast.push(NodeKind::Attribute { name, args }, attr_span));
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::RightBracket, "expected ']' after attribute");
        }
        self.ast.push_list(&attributes)
    }

    fn parse_modifiers(&mut self) -> Modifiers {
        let mut modifiers = Modifiers::empty();
        loop {
            let flag = match self.current_kind() {
                TokenKind::KwPublic => Modifiers::PUBLIC,
                TokenKind::KwProtected => Modifiers::PROTECTED,
                TokenKind::KwPrivate => Modifiers::PRIVATE,
                TokenKind::KwStatic => Modifiers::STATIC,
                TokenKind::KwReadonly => Modifiers::READONLY,
                TokenKind::KwFinal => Modifiers::FINAL,
                TokenKind::KwAbstract => Modifiers::ABSTRACT,
                _ => break,
            };
            if modifiers.contains(flag) {
                self.diagnostics.warning("duplicate modifier", self.current_span());
            }
            modifiers |= flag;
            self.advance();
        }
        modifiers
    }

    fn parse_function(&mut self, attributes: NodeList, modifiers: Modifiers) -> NodeId {
        let span = self.current_span();
        self.advance(); // function | fn
        let name = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => return self.unexpected("expected function name"),
        };
        let params = self.parse_parameter_list();
        let body = if modifiers.contains(Modifiers::ABSTRACT) {
            self.expect_semicolon();
            let empty = self.ast.push_list(&[]);
            self.ast.push(NodeKind::Block { statements: empty }, span)
        } else {
            self.parse_block()
        };
        self.ast.push(NodeKind::FunctionDecl { name, params, body, attributes, modifiers }, span)
    }

    fn parse_parameter_list(&mut self) -> NodeList {
        self.expect(TokenKind::LeftParen, "expected '(' before parameters");
        let mut params = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightParen {
            let span = self.current_span();
            let by_ref = self.eat(TokenKind::Ampersand);
            let variadic = self.eat(TokenKind::Ellipsis);
            let name = match self.current_kind() {
                TokenKind::Variable(name) => {
                    self.advance();
                    name
                }
                _ => {
                    params.push(self.unexpected("expected parameter name"));
                    break;
                }
            };
            let default = if self.eat(TokenKind::Assign) {
                Some(self.parse_expression())
            } else {
                None
            };
            params.push(self.ast.push(NodeKind::Param { name, default, by_ref, variadic }, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "expected ')' after parameters");
        self.ast.push_list(&params)
    }

    fn parse_class_like(&mut self, attributes: NodeList, modifiers: Modifiers) -> NodeId {
        let span = self.current_span();
        let kind = match self.current_kind() {
            TokenKind::KwClass => ClassKind::Class,
            TokenKind::KwInterface => ClassKind::Interface,
            TokenKind::KwTrait => ClassKind::Trait,
            TokenKind::KwEnum => ClassKind::Enum,
            TokenKind::KwStruct => ClassKind::Struct,
            _ => return self.unexpected("expected class-like keyword"),
        };
        self.advance();

        let name = match self.current_kind() {
            TokenKind::Identifier(id) => {
                self.advance();
                id
            }
            _ => return self.unexpected("expected class name"),
        };

        let parent = if self.eat(TokenKind::KwExtends) {
            match self.current_kind() {
                TokenKind::Identifier(id) => {
                    self.advance();
                    Some(id)
                }
                _ => {
                    self.diagnostics.error("expected parent class name", self.current_span());
                    None
                }
            }
        } else {
            None
        };

        let mut implements = Vec::new();
        if self.eat(TokenKind::KwImplements) {
            loop {
                let iface_span = self.current_span();
                match self.current_kind() {
                    TokenKind::Identifier(id) => {
                        self.advance();
                        implements.push(self.ast.push(NodeKind::Name { name: id }, iface_span));
                    }
                    _ => {
                        self.diagnostics.error("expected interface name", iface_span);
                        break;
                    }
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let implements = self.ast.push_list(&implements);

        self.expect(TokenKind::LeftBrace, "expected '{' before class body");
        let mut members = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightBrace {
            members.push(self.parse_class_member());
        }
        self.expect(TokenKind::RightBrace, "expected '}' after class body");
        let members = self.ast.push_list(&members);

        self.ast.push(
            NodeKind::ClassDecl { name, kind, parent, implements, members, attributes, modifiers },
            span,
        )
    }

    fn parse_class_member(&mut self) -> NodeId {
        let attributes = self.parse_attribute_list();

        if self.current_kind() == TokenKind::KwUse {
            let span = self.current_span();
            self.advance();
            let mut names = Vec::new();
            loop {
                let name_span = self.current_span();
                match self.current_kind() {
                    TokenKind::Identifier(id) => {
                        self.advance();
                        names.push(self.ast.push(NodeKind::Name { name: id }, name_span));
                    }
                    _ => {
                        self.diagnostics.error("expected trait name after 'use'", name_span);
                        break;
                    }
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect_semicolon();
            let list = self.ast.push_list(&names);
            return self.ast.push(NodeKind::UseTrait { names: list }, span);
        }

        if self.current_kind() == TokenKind::KwConst {
            return self.parse_const();
        }

        let modifiers = self.parse_modifiers();

        match self.current_kind() {
            TokenKind::KwFunction | TokenKind::KwFn => self.parse_function(attributes, modifiers),
            TokenKind::Variable(var_name) => {
                let span = self.current_span();
                self.advance();
                let name = strip_sigil(var_name);
                let default = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expression())
                } else {
                    None
                };
                let hooks = if self.current_kind() == TokenKind::LeftBrace {
                    self.parse_property_hooks()
                } else {
                    self.expect_semicolon();
                    NodeList::EMPTY
                };
                self.ast.push(
                    NodeKind::PropertyDecl { name, default, hooks, attributes, modifiers },
                    span,
                )
            }
            _ => {
                let node = self.unexpected("expected property or method in class body");
                node
            }
        }
    }

    /// `{ get => expr; set { ... } }` after a property declaration.
    fn parse_property_hooks(&mut self) -> NodeList {
        self.expect(TokenKind::LeftBrace, "expected '{' before property hooks");
        let mut hooks = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightBrace {
            let span = self.current_span();
            let kind = match self.current_kind() {
                TokenKind::KwGet => HookKind::Get,
                TokenKind::KwSet => HookKind::Set,
                _ => {
                    self.unexpected("expected 'get' or 'set' in property hooks");
                    break;
                }
            };
            self.advance();
            let (body, is_expr) = if self.eat(TokenKind::FatArrow) {
                let expr = self.parse_expression();
                self.expect_semicolon();
                (expr, true)
            } else {
                (self.parse_block(), false)
            };
            hooks.push(self.ast.push(NodeKind::PropertyHook { kind, body, is_expr }, span));
        }
        self.expect(TokenKind::RightBrace, "expected '}' after property hooks");
        self.ast.push_list(&hooks)
    }

    // ---- Expressions --------------------------------------------------

    pub fn parse_expression(&mut self) -> NodeId {
        self.parse_expr_prec(Precedence::Assignment)
    }

    fn parse_expr_prec(&mut self, min_prec: Precedence) -> NodeId {
        let mut lhs = self.parse_unary();

        loop {
            // Assignment binds loosest and associates to the right.
            if min_prec <= Precedence::Assignment {
                if self.current_kind() == TokenKind::Assign {
                    let span = self.current_span();
                    self.advance();
                    self.check_assign_target(lhs);
                    let value = self.parse_expr_prec(Precedence::Assignment);
                    lhs = self.ast.push(NodeKind::Assign { target: lhs, value }, span);
                    continue;
                }
                if let Some(op) = compound_assign_op(&self.current_kind()) {
                    let span = self.current_span();
                    self.advance();
                    self.check_assign_target(lhs);
                    let value = self.parse_expr_prec(Precedence::Assignment);
                    lhs = self.ast.push(NodeKind::CompoundAssign { op, target: lhs, value }, span);
                    continue;
                }
            }

            let Some((op, prec, right_assoc, non_chaining)) = binary_op(&self.current_kind())
            else {
                break;
            };
            if prec < min_prec {
                break;
            }
            let span = self.current_span();
            self.advance();
            let next_min = if right_assoc { prec } else { bump(prec) };
            let rhs = self.parse_expr_prec(next_min);
            lhs = self.make_binary(op, lhs, rhs, span);
            if non_chaining {
                // Comparisons do not chain: `a < b < c` is rejected, while
                // lower-precedence continuations like `a == b && c` go on.
                if let Some((_, next_prec, _, _)) = binary_op(&self.current_kind()) {
                    if next_prec == prec {
                        self.diagnostics
                            .error("comparison operators do not chain", self.current_span());
                        break;
                    }
                }
            }
        }

        lhs
    }

    fn make_binary(&mut self, op: BinaryOp, lhs: NodeId, rhs: NodeId, span: Span) -> NodeId {
        // In go syntax `+` over operands that are syntactically strings is
        // concatenation; everything else keeps numeric addition and relies
        // on runtime coercion.
        let op = if self.syntax == SyntaxMode::Go
            && op == BinaryOp::Add
            && self.ast.is_stringish(lhs)
            && self.ast.is_stringish(rhs)
        {
            BinaryOp::Concat
        } else {
            op
        };
        self.ast.push(NodeKind::Binary { op, lhs, rhs }, span)
    }

    fn check_assign_target(&mut self, target: NodeId) {
        if !matches!(
            self.ast.kind(target),
            NodeKind::Variable { .. }
                | NodeKind::PropertyAccess { .. }
                | NodeKind::Index { .. }
        ) {
            self.diagnostics.error("invalid assignment target", self.ast.span(target));
        }
    }

    fn parse_unary(&mut self) -> NodeId {
        let span = self.current_span();
        match self.current_kind() {
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary();
                self.ast.push(NodeKind::Unary { op: UnaryOp::Not, operand }, span)
            }
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary();
                self.ast.push(NodeKind::Unary { op: UnaryOp::Neg, operand }, span)
            }
            TokenKind::KwClone => {
                self.advance();
                let operand = self.parse_unary();
                self.ast.push(NodeKind::Clone { operand }, span)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> NodeId {
        let mut expr = self.parse_primary();
        loop {
            match self.current_kind() {
                TokenKind::LeftParen => {
                    let span = self.current_span();
                    self.advance();
                    let args = self.parse_argument_list();
                    self.expect(TokenKind::RightParen, "expected ')' after arguments");
                    expr = self.ast.push(NodeKind::Call { callee: expr, args }, span);
                }
                TokenKind::LeftBracket => {
                    let span = self.current_span();
                    self.advance();
                    let index = if self.current_kind() == TokenKind::RightBracket {
                        None
                    } else {
                        Some(self.parse_expression())
                    };
                    self.expect(TokenKind::RightBracket, "expected ']' after index");
                    expr = self.ast.push(NodeKind::Index { array: expr, index }, span);
                }
                TokenKind::Arrow => {
                    let span = self.current_span();
                    self.advance();
                    expr = self.parse_member(expr, span);
                }
                // In go syntax `.` followed by a member name is member
                // access; otherwise the Pratt loop treats it as concat.
                TokenKind::Dot if self.syntax == SyntaxMode::Go && self.peek_is_member_name() => {
                    let span = self.current_span();
                    self.advance();
                    expr = self.parse_member(expr, span);
                }
                _ => break,
            }
        }
        expr
    }

    fn parse_member(&mut self, receiver: NodeId, span: Span) -> NodeId {
        let Some(name) = self.member_name() else {
            return self.unexpected("expected member name");
        };
        if self.eat(TokenKind::LeftParen) {
            let args = self.parse_argument_list();
            self.expect(TokenKind::RightParen, "expected ')' after arguments");
            self.ast.push(NodeKind::MethodCall { receiver, method: name, args }, span)
        } else {
            self.ast.push(NodeKind::PropertyAccess { receiver, property: name }, span)
        }
    }

    fn parse_argument_list(&mut self) -> NodeList {
        let mut args = Vec::new();
        while !self.at_eof()
            && self.current_kind() != TokenKind::RightParen
            && self.current_kind() != TokenKind::RightBracket
        {
            args.push(self.parse_expression());
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.ast.push_list(&args)
    }

    fn parse_primary(&mut self) -> NodeId {
        let span = self.current_span();
        match self.current_kind() {
            TokenKind::KwNull => {
                self.advance();
                self.ast.push(NodeKind::NullLit, span)
            }
            TokenKind::KwTrue => {
                self.advance();
                self.ast.push(NodeKind::BoolLit(true), span)
            }
            TokenKind::KwFalse => {
                self.advance();
                self.ast.push(NodeKind::BoolLit(false), span)
            }
            TokenKind::IntLiteral(value) => {
                self.advance();
                self.ast.push(NodeKind::IntLit(value), span)
            }
            TokenKind::FloatLiteral(value) => {
                self.advance();
                self.ast.push(NodeKind::FloatLit(value), span)
            }
            TokenKind::StringLiteral(value) => {
                self.advance();
                self.ast.push(NodeKind::StringLit(value), span)
            }
            TokenKind::DoubleQuote => self.parse_interpolation(TokenKind::DoubleQuote),
            TokenKind::HeredocStart(_) => {
                self.advance();
                self.parse_interpolation_until_heredoc_end(span)
            }
            TokenKind::NowdocStart(_) => {
                self.advance();
                self.parse_interpolation_until_heredoc_end(span)
            }
            TokenKind::Variable(name) => {
                self.advance();
                self.ast.push(NodeKind::Variable { name }, span)
            }
            TokenKind::Identifier(id) => {
                self.advance();
                if self.current_kind() == TokenKind::DoubleColon {
                    self.advance();
                    self.parse_static_member(id, span)
                } else {
                    self.ast.push(NodeKind::Name { name: id }, span)
                }
            }
            TokenKind::KwNew => {
                self.advance();
                let class_name = match self.current_kind() {
                    TokenKind::Identifier(id) => {
                        self.advance();
                        id
                    }
                    _ => return self.unexpected("expected class name after 'new'"),
                };
                let args = if self.eat(TokenKind::LeftParen) {
                    let args = self.parse_argument_list();
                    self.expect(TokenKind::RightParen, "expected ')' after constructor arguments");
                    args
                } else {
                    NodeList::EMPTY
                };
                self.ast.push(NodeKind::New { class_name, args }, span)
            }
            TokenKind::KwMatch => self.parse_match(),
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.parse_expression();
                self.expect(TokenKind::RightParen, "expected ')'");
                expr
            }
            TokenKind::LeftBracket => self.parse_array_literal(),
            _ => self.unexpected("expected expression"),
        }
    }

    fn parse_static_member(&mut self, class_name: StringId, span: Span) -> NodeId {
        let Some(name) = self.member_name() else {
            return self.unexpected("expected member name after '::'");
        };
        if self.eat(TokenKind::LeftParen) {
            let args = self.parse_argument_list();
            self.expect(TokenKind::RightParen, "expected ')' after arguments");
            self.ast.push(NodeKind::StaticCall { class_name, method: name, args }, span)
        } else {
            self.ast.push(NodeKind::ClassConst { class_name, name }, span)
        }
    }

    fn parse_array_literal(&mut self) -> NodeId {
        let span = self.current_span();
        self.expect(TokenKind::LeftBracket, "expected '['");
        let mut entries = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightBracket {
            let entry_span = self.current_span();
            let first = self.parse_expression();
            let entry = if self.eat(TokenKind::FatArrow) {
                let value = self.parse_expression();
                NodeKind::ArrayEntry { key: Some(first), value }
            } else {
                NodeKind::ArrayEntry { key: None, value: first }
            };
            entries.push(self.ast.push(entry, entry_span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBracket, "expected ']' after array literal");
        let list = self.ast.push_list(&entries);
        self.ast.push(NodeKind::ArrayLit { entries: list }, span)
    }

    fn parse_match(&mut self) -> NodeId {
        let span = self.current_span();
        self.advance(); // match
        self.expect(TokenKind::LeftParen, "expected '(' after 'match'");
        let subject = self.parse_expression();
        self.expect(TokenKind::RightParen, "expected ')' after match subject");
        self.expect(TokenKind::LeftBrace, "expected '{' before match arms");

        let mut arms = Vec::new();
        while !self.at_eof() && self.current_kind() != TokenKind::RightBrace {
            let arm_span = self.current_span();
            let mut conditions = Vec::new();
            if self.eat(TokenKind::KwDefault) {
                // Default arm: empty condition list.
            } else {
                loop {
                    conditions.push(self.parse_expression());
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                    if self.current_kind() == TokenKind::FatArrow {
                        break;
                    }
                }
            }
            self.expect(TokenKind::FatArrow, "expected '=>' in match arm");
            let body = self.parse_expression();
            let conditions = self.ast.push_list(&conditions);
            arms.push(self.ast.push(NodeKind::MatchArm { conditions, body }, arm_span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightBrace, "expected '}' after match arms");
        let list = self.ast.push_list(&arms);
        self.ast.push(NodeKind::Match { subject, arms: list }, span)
    }

    /// Alternating chunks and escapes until the closing token.
    fn parse_interpolation(&mut self, closing: TokenKind) -> NodeId {
        let span = self.current_span();
        self.advance(); // opening quote
        let mut parts = Vec::new();
        loop {
            let part_span = self.current_span();
            match self.current_kind() {
                kind if kind == closing => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.diagnostics.error("unterminated string", part_span);
                    break;
                }
                TokenKind::EncapsedText(text) => {
                    self.advance();
                    parts.push(self.ast.push(NodeKind::StringLit(text), part_span));
                }
                TokenKind::Variable(name) => {
                    self.advance();
                    parts.push(self.ast.push(NodeKind::Variable { name }, part_span));
                }
                TokenKind::CurlyOpen => {
                    self.advance();
                    parts.push(self.parse_expression());
                    self.expect(TokenKind::RightBrace, "expected '}' after embedded expression");
                }
                TokenKind::DollarOpenCurly => {
                    self.advance();
                    parts.push(self.parse_dollar_curly(part_span));
                }
                _ => {
                    self.unexpected("unexpected token in string interpolation");
                    break;
                }
            }
        }
        self.finish_interpolation(parts, span)
    }

    fn parse_interpolation_until_heredoc_end(&mut self, span: Span) -> NodeId {
        let mut parts = Vec::new();
        loop {
            let part_span = self.current_span();
            match self.current_kind() {
                TokenKind::HeredocEnd => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.diagnostics.error("unterminated heredoc", part_span);
                    break;
                }
                TokenKind::EncapsedText(text) => {
                    self.advance();
                    parts.push(self.ast.push(NodeKind::StringLit(text), part_span));
                }
                TokenKind::Variable(name) => {
                    self.advance();
                    parts.push(self.ast.push(NodeKind::Variable { name }, part_span));
                }
                TokenKind::CurlyOpen => {
                    self.advance();
                    parts.push(self.parse_expression());
                    self.expect(TokenKind::RightBrace, "expected '}' after embedded expression");
                }
                TokenKind::DollarOpenCurly => {
                    self.advance();
                    parts.push(self.parse_dollar_curly(part_span));
                }
                _ => {
                    self.unexpected("unexpected token in heredoc");
                    break;
                }
            }
        }
        self.finish_interpolation(parts, span)
    }

    /// `${name}` names a variable; anything more complex is an expression.
    fn parse_dollar_curly(&mut self, span: Span) -> NodeId {
        if let TokenKind::Identifier(id) = self.current_kind() {
            if self.peek_kind(1) == TokenKind::RightBrace {
                self.advance();
                self.advance();
                let name = intern(&format!("${}", resolve(id)));
                return self.ast.push(NodeKind::Variable { name }, span);
            }
        }
        let expr = self.parse_expression();
        self.expect(TokenKind::RightBrace, "expected '}' after embedded expression");
        expr
    }

    /// A one-chunk interpolation collapses to a plain string literal.
    fn finish_interpolation(&mut self, parts: Vec<NodeId>, span: Span) -> NodeId {
        if parts.is_empty() {
            let empty = intern("");
            return self.ast.push(NodeKind::StringLit(empty), span);
        }
        if parts.len() == 1 {
            if let NodeKind::StringLit(_) = self.ast.kind(parts[0]) {
                return parts[0];
            }
        }
        let list = self.ast.push_list(&parts);
        self.ast.push(NodeKind::Interpolation { parts: list }, span)
    }

    // ---- Token helpers ------------------------------------------------

    fn member_name(&mut self) -> Option<StringId> {
        let id = match self.current_kind() {
            TokenKind::Identifier(id) => id,
            // Contextual keywords double as member names.
            TokenKind::KwGet => intern("get"),
            TokenKind::KwSet => intern("set"),
            TokenKind::KwDefault => intern("default"),
            TokenKind::KwClass => intern("class"),
            _ => return None,
        };
        self.advance();
        Some(id)
    }

    fn peek_is_member_name(&self) -> bool {
        matches!(
            self.peek_kind(1),
            TokenKind::Identifier(_) | TokenKind::KwGet | TokenKind::KwSet | TokenKind::KwDefault
        )
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_kind(&self) -> TokenKind {
        self.current().value
    }

    fn current_span(&self) -> Span {
        self.current().span
    }

    fn peek_kind(&self, ahead: usize) -> TokenKind {
        self.tokens
            .get(self.pos + ahead)
            .map(|t| t.value)
            .unwrap_or(TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.current_kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> bool {
        if self.eat(kind) {
            true
        } else {
            self.diagnostics.error(
                format!("{}, found {}", message, self.current_kind()),
                self.current_span(),
            );
            false
        }
    }

    fn expect_semicolon(&mut self) {
        // The final semicolon is optional before the close tag or the end
        // of the buffer.
        if matches!(self.current_kind(), TokenKind::Eof | TokenKind::CloseTag) {
            return;
        }
        self.expect(TokenKind::Semicolon, "expected ';'");
    }

    /// Record a diagnostic, skip to the next synchronization point, and leave
    /// a `ParseError` node where a real one should have been.
    fn unexpected(&mut self, message: &str) -> NodeId {
        let span = self.current_span();
        self.diagnostics.error(
            format!("{}, found {}", message, self.current_kind()),
            span,
        );
        log::debug!("parser recovering at {:?}: {}", span, message);
        self.synchronize();
        self.ast.push(NodeKind::ParseError, span)
    }

    /// Advance to the next statement keyword, past the next semicolon, or to
    /// a closing brace. Always consumes at least one token so recovery makes
    /// progress.
    fn synchronize(&mut self) {
        // A semicolon is already a boundary; consume it and stop so the next
        // statement survives recovery.
        if self.current_kind() == TokenKind::Semicolon {
            self.advance();
            return;
        }
        if !self.at_eof() {
            self.advance();
        }
        while !self.at_eof() {
            match self.current_kind() {
                TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace => return,
                kind if kind.starts_statement() => return,
                _ => self.advance(),
            }
        }
    }
}

fn strip_sigil(name: StringId) -> StringId {
    let text = resolve(name);
    match text.strip_prefix('$') {
        Some(stripped) => intern(stripped),
        None => name,
    }
}

/// The next-higher binding power, for left-associative recursion.
fn bump(prec: Precedence) -> Precedence {
    match prec {
        Precedence::None => Precedence::Assignment,
        Precedence::Assignment => Precedence::LogicalOr,
        Precedence::LogicalOr => Precedence::LogicalAnd,
        Precedence::LogicalAnd => Precedence::Pipe,
        Precedence::Pipe => Precedence::Equality,
        Precedence::Equality => Precedence::Relational,
        Precedence::Relational => Precedence::Additive,
        Precedence::Additive => Precedence::Multiplicative,
        Precedence::Multiplicative => Precedence::Unary,
        Precedence::Unary | Precedence::Postfix => Precedence::Postfix,
    }
}
