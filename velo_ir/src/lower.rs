//! AST to IR lowering
//!
//! Script-level statements lower into a synthetic `__main__` function;
//! every function declaration becomes its own IR function, and methods
//! lower under a `Class::method` name. Locals get one alloca each; loops
//! push their continue/break targets onto a stack keyed by nesting.

use crate::builder::FunctionBuilder;
use crate::ir::{BinOp, BlockId, IrType, Module, Op, Register, Terminator, UnOp};
use std::collections::{HashMap, HashSet};
use velo_common::{intern, resolve, Diagnostics, Span, StringId};
use velo_parser::{Ast, BinaryOp, NodeId, NodeKind, UnaryOp};

/// Lower a parsed program into an IR module.
pub fn lower_program(ast: &Ast) -> (Module, Diagnostics) {
    let mut module = Module::default();
    let mut diagnostics = Diagnostics::new();

    // Declarations first, script statements into __main__.
    let mut script_statements = Vec::new();
    for &stmt in ast.root_statements() {
        match ast.kind(stmt) {
            NodeKind::FunctionDecl { name, params, body, .. } => {
                let function =
                    lower_function(ast, *name, ast.list(*params), *body, &mut diagnostics);
                module.functions.push(function);
            }
            NodeKind::ClassDecl { name: class_name, members, .. } => {
                for &member in ast.list(*members) {
                    if let NodeKind::FunctionDecl { name, params, body, .. } = ast.kind(member) {
                        let qualified = intern(&format!(
                            "{}::{}",
                            resolve(*class_name),
                            resolve(*name)
                        ));
                        let function = lower_function(
                            ast,
                            qualified,
                            ast.list(*params),
                            *body,
                            &mut diagnostics,
                        );
                        module.functions.push(function);
                    }
                }
            }
            _ => script_statements.push(stmt),
        }
    }

    let mut main = Lowering::new(ast, intern("__main__"), &mut diagnostics);
    for stmt in script_statements {
        main.lower_statement(stmt);
    }
    module.functions.insert(0, main.finish());

    (module, diagnostics)
}

fn lower_function(
    ast: &Ast,
    name: StringId,
    params: &[NodeId],
    body: NodeId,
    diagnostics: &mut Diagnostics,
) -> crate::ir::Function {
    let mut lowering = Lowering::new(ast, name, diagnostics);
    for &param in params {
        if let NodeKind::Param { name, .. } = ast.kind(param) {
            lowering.bind_param(*name, ast.span(param));
        }
    }
    lowering.lower_statement(body);
    lowering.finish()
}

struct Lowering<'a> {
    ast: &'a Ast,
    builder: FunctionBuilder,
    /// Variable name to its alloca register.
    locals: HashMap<StringId, Register>,
    /// Names declared `global` in this function.
    globals: HashSet<StringId>,
    /// `(continue_target, break_target)` per enclosing loop.
    loop_stack: Vec<(BlockId, BlockId)>,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Lowering<'a> {
    fn new(ast: &'a Ast, name: StringId, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            ast,
            builder: FunctionBuilder::new(name),
            locals: HashMap::new(),
            globals: HashSet::new(),
            loop_stack: Vec::new(),
            diagnostics,
        }
    }

    fn finish(self) -> crate::ir::Function {
        self.builder.finish()
    }

    fn bind_param(&mut self, name: StringId, span: Span) {
        let value = self.builder.add_param();
        let slot = self.slot(name, span);
        self.builder.emit_void(Op::Store { slot, value }, span);
    }

    /// The alloca for a local, created on first touch.
    fn slot(&mut self, name: StringId, span: Span) -> Register {
        if let Some(&slot) = self.locals.get(&name) {
            return slot;
        }
        let slot = self.builder.emit(Op::Alloca { name }, IrType::Ptr, span);
        self.locals.insert(name, slot);
        slot
    }

    // ---- Statements ---------------------------------------------------

    fn lower_statement(&mut self, stmt: NodeId) {
        let span = self.ast.span(stmt);
        match self.ast.kind(stmt).clone() {
            NodeKind::Block { statements } => {
                for &inner in self.ast.list(statements) {
                    self.lower_statement(inner);
                }
            }
            NodeKind::ExprStmt { expr } => {
                self.lower_expression(expr);
            }
            NodeKind::Echo { args } => {
                for &arg in self.ast.list(args) {
                    let value = self.lower_expression(arg);
                    self.builder.emit_void(Op::DebugPrint { value }, span);
                }
            }
            NodeKind::If { condition, then_branch, else_branch } => {
                let cond = self.lower_expression(condition);
                let then_block = self.builder.new_block();
                let else_block = self.builder.new_block();
                let join = self.builder.new_block();
                self.builder.terminate(Terminator::CondBr { cond, then_block, else_block });

                self.builder.switch_to(then_block);
                self.lower_statement(then_branch);
                self.builder.terminate(Terminator::Br(join));

                self.builder.switch_to(else_block);
                if let Some(else_branch) = else_branch {
                    self.lower_statement(else_branch);
                }
                self.builder.terminate(Terminator::Br(join));

                self.builder.switch_to(join);
            }
            NodeKind::While { condition, body } => {
                let header = self.builder.new_block();
                let body_block = self.builder.new_block();
                let exit = self.builder.new_block();
                self.builder.terminate(Terminator::Br(header));

                self.builder.switch_to(header);
                let cond = self.lower_expression(condition);
                self.builder.terminate(Terminator::CondBr {
                    cond,
                    then_block: body_block,
                    else_block: exit,
                });

                self.builder.switch_to(body_block);
                self.loop_stack.push((header, exit));
                self.lower_statement(body);
                self.loop_stack.pop();
                self.builder.terminate(Terminator::Br(header));

                self.builder.switch_to(exit);
            }
            NodeKind::For { init, condition, step, body } => {
                if let Some(init) = init {
                    self.lower_expression(init);
                }
                let header = self.builder.new_block();
                let body_block = self.builder.new_block();
                let step_block = self.builder.new_block();
                let exit = self.builder.new_block();
                self.builder.terminate(Terminator::Br(header));

                self.builder.switch_to(header);
                let cond = match condition {
                    Some(condition) => self.lower_expression(condition),
                    None => self.builder.emit(Op::ConstBool(true), IrType::Bool, span),
                };
                self.builder.terminate(Terminator::CondBr {
                    cond,
                    then_block: body_block,
                    else_block: exit,
                });

                self.builder.switch_to(body_block);
                self.loop_stack.push((step_block, exit));
                self.lower_statement(body);
                self.loop_stack.pop();
                self.builder.terminate(Terminator::Br(step_block));

                self.builder.switch_to(step_block);
                if let Some(step) = step {
                    self.lower_expression(step);
                }
                self.builder.terminate(Terminator::Br(header));

                self.builder.switch_to(exit);
            }
            NodeKind::Foreach { subject, key_var, value_var, body } => {
                self.lower_foreach(subject, key_var, value_var, body, span);
            }
            NodeKind::Return { value } => {
                let value = value.map(|v| self.lower_expression(v));
                self.builder.terminate(Terminator::Ret(value));
                let next = self.builder.new_block();
                self.builder.switch_to(next);
            }
            NodeKind::Break => match self.loop_stack.last() {
                Some(&(_, break_target)) => {
                    self.builder.terminate(Terminator::Br(break_target));
                    let next = self.builder.new_block();
                    self.builder.switch_to(next);
                }
                None => self.diagnostics.error("'break' outside of a loop", span),
            },
            NodeKind::Continue => match self.loop_stack.last() {
                Some(&(continue_target, _)) => {
                    self.builder.terminate(Terminator::Br(continue_target));
                    let next = self.builder.new_block();
                    self.builder.switch_to(next);
                }
                None => self.diagnostics.error("'continue' outside of a loop", span),
            },
            NodeKind::Global { vars } => {
                for &var in self.ast.list(vars) {
                    if let NodeKind::Variable { name } = self.ast.kind(var) {
                        self.globals.insert(*name);
                    }
                }
            }
            NodeKind::ConstDecl { name, value } => {
                let name_reg = self.builder.emit(Op::ConstStr(name), IrType::Str, span);
                let value = self.lower_expression(value);
                self.builder.emit_void(
                    Op::Call { callee: intern("__const_define"), args: vec![name_reg, value] },
                    span,
                );
            }
            NodeKind::GoStmt { call } => self.lower_go(call, span),
            NodeKind::Throw { value } => {
                let value = self.lower_expression(value);
                self.builder.terminate(Terminator::Throw(value));
                let next = self.builder.new_block();
                self.builder.switch_to(next);
            }
            NodeKind::Try { body, catches, finally } => {
                self.lower_try(body, self.ast.list(catches).to_vec(), finally, span);
            }
            NodeKind::InlineHtml { text } => {
                let value = self.builder.emit(Op::ConstStr(text), IrType::Str, span);
                self.builder.emit_void(Op::DebugPrint { value }, span);
            }
            NodeKind::Namespace { .. } | NodeKind::UseNamespace { .. } => {}
            NodeKind::ClassDecl { .. } | NodeKind::FunctionDecl { .. } => {
                // Nested declarations register at runtime; the IR path only
                // carries top-level bodies.
            }
            NodeKind::ParseError => {}
            _ => {
                // Expression used in statement position.
                self.lower_expression(stmt);
            }
        }
    }

    fn lower_foreach(
        &mut self,
        subject: NodeId,
        key_var: Option<NodeId>,
        value_var: NodeId,
        body: NodeId,
        span: Span,
    ) {
        // Iterator-object pattern over runtime helpers.
        let subject = self.lower_expression(subject);
        let iter = self.builder.emit(
            Op::Call { callee: intern("__iter_new"), args: vec![subject] },
            IrType::Value,
            span,
        );

        let header = self.builder.new_block();
        let body_block = self.builder.new_block();
        let step_block = self.builder.new_block();
        let exit = self.builder.new_block();
        self.builder.terminate(Terminator::Br(header));

        self.builder.switch_to(header);
        let valid = self.builder.emit(
            Op::Call { callee: intern("__iter_valid"), args: vec![iter] },
            IrType::Value,
            span,
        );
        self.builder.terminate(Terminator::CondBr {
            cond: valid,
            then_block: body_block,
            else_block: exit,
        });

        self.builder.switch_to(body_block);
        if let Some(key_var) = key_var {
            if let NodeKind::Variable { name } = self.ast.kind(key_var) {
                let key = self.builder.emit(
                    Op::Call { callee: intern("__iter_key"), args: vec![iter] },
                    IrType::Value,
                    span,
                );
                let slot = self.slot(*name, span);
                self.builder.emit_void(Op::Store { slot, value: key }, span);
            }
        }
        if let NodeKind::Variable { name } = self.ast.kind(value_var) {
            let value = self.builder.emit(
                Op::Call { callee: intern("__iter_value"), args: vec![iter] },
                IrType::Value,
                span,
            );
            let slot = self.slot(*name, span);
            self.builder.emit_void(Op::Store { slot, value }, span);
        }
        self.loop_stack.push((step_block, exit));
        self.lower_statement(body);
        self.loop_stack.pop();
        self.builder.terminate(Terminator::Br(step_block));

        self.builder.switch_to(step_block);
        self.builder.emit_void(Op::Call { callee: intern("__iter_next"), args: vec![iter] }, span);
        self.builder.terminate(Terminator::Br(header));

        self.builder.switch_to(exit);
    }

    fn lower_go(&mut self, call: NodeId, span: Span) {
        match self.ast.kind(call).clone() {
            NodeKind::Call { callee, args } => {
                let arg_regs: Vec<Register> = self
                    .ast
                    .list(args)
                    .to_vec()
                    .into_iter()
                    .map(|arg| self.lower_expression(arg))
                    .collect();
                if let NodeKind::Name { name } = self.ast.kind(callee) {
                    self.builder.emit_void(Op::Spawn { callee: *name, args: arg_regs }, span);
                } else {
                    let callee = self.lower_expression(callee);
                    self.builder.emit_void(Op::CallIndirect { callee, args: arg_regs }, span);
                }
            }
            _ => {
                // Parser already flagged non-call spawn targets.
                self.lower_expression(call);
            }
        }
    }

    fn lower_try(
        &mut self,
        body: NodeId,
        catches: Vec<NodeId>,
        finally: Option<NodeId>,
        span: Span,
    ) {
        let handler = self.builder.new_block();
        let exit = self.builder.new_block();

        self.builder.emit_void(Op::TryBegin { handler }, span);
        self.lower_statement(body);
        self.builder.emit_void(Op::TryEnd, span);
        self.builder.terminate(Terminator::Br(exit));

        // Handler: test catch clauses in order, rethrow when none match.
        self.builder.switch_to(handler);
        let exception = self.builder.emit(Op::GetException, IrType::Object, span);
        let mut next_test = self.builder.current_block();
        for catch in catches {
            let NodeKind::CatchClause { class_name, var, body } = self.ast.kind(catch).clone()
            else {
                continue;
            };
            self.builder.switch_to(next_test);
            let matches = self.builder.emit(
                Op::Instanceof { object: exception, class: class_name },
                IrType::Bool,
                span,
            );
            let catch_body = self.builder.new_block();
            next_test = self.builder.new_block();
            self.builder.terminate(Terminator::CondBr {
                cond: matches,
                then_block: catch_body,
                else_block: next_test,
            });

            self.builder.switch_to(catch_body);
            self.builder.emit_void(Op::ClearException, span);
            if let Some(var) = var {
                let slot = self.slot(var, span);
                self.builder.emit_void(Op::Store { slot, value: exception }, span);
            }
            self.lower_statement(body);
            self.builder.terminate(Terminator::Br(exit));
        }
        self.builder.switch_to(next_test);
        self.builder.terminate(Terminator::Throw(exception));

        self.builder.switch_to(exit);
        if let Some(finally) = finally {
            self.lower_statement(finally);
        }
    }

    // ---- Expressions --------------------------------------------------

    fn lower_expression(&mut self, expr: NodeId) -> Register {
        let span = self.ast.span(expr);
        match self.ast.kind(expr).clone() {
            NodeKind::NullLit => self.builder.emit(Op::ConstNull, IrType::Value, span),
            NodeKind::BoolLit(value) => self.builder.emit(Op::ConstBool(value), IrType::Bool, span),
            NodeKind::IntLit(value) => self.builder.emit(Op::ConstInt(value), IrType::I64, span),
            NodeKind::FloatLit(value) => {
                self.builder.emit(Op::ConstFloat(value), IrType::F64, span)
            }
            NodeKind::StringLit(value) => self.builder.emit(Op::ConstStr(value), IrType::Str, span),
            NodeKind::Interpolation { parts } => {
                let parts = self.ast.list(parts).to_vec();
                let mut result = None;
                for part in parts {
                    let piece = self.lower_expression(part);
                    result = Some(match result {
                        None => piece,
                        Some(acc) => self.builder.emit(
                            Op::Binary { op: BinOp::Concat, lhs: acc, rhs: piece },
                            IrType::Str,
                            span,
                        ),
                    });
                }
                result.unwrap_or_else(|| self.builder.emit(Op::ConstStr(intern("")), IrType::Str, span))
            }
            NodeKind::Variable { name } => {
                if self.globals.contains(&name) {
                    let name_reg = self.builder.emit(Op::ConstStr(name), IrType::Str, span);
                    self.builder.emit(
                        Op::Call { callee: intern("__global_get"), args: vec![name_reg] },
                        IrType::Value,
                        span,
                    )
                } else {
                    let slot = self.slot(name, span);
                    self.builder.emit(Op::Load { slot }, IrType::Value, span)
                }
            }
            NodeKind::Name { name } => {
                // Bare names in expression position are constant lookups.
                let name_reg = self.builder.emit(Op::ConstStr(name), IrType::Str, span);
                self.builder.emit(
                    Op::Call { callee: intern("__const_get"), args: vec![name_reg] },
                    IrType::Value,
                    span,
                )
            }
            NodeKind::Assign { target, value } => {
                let value = self.lower_expression(value);
                self.lower_store(target, value, span);
                value
            }
            NodeKind::CompoundAssign { op, target, value } => {
                let current = self.lower_expression(target);
                let rhs = self.lower_expression(value);
                let combined = self.builder.emit(
                    Op::Binary { op: lower_binop(op), lhs: current, rhs },
                    IrType::Value,
                    span,
                );
                self.lower_store(target, combined, span);
                combined
            }
            NodeKind::Binary { op: BinaryOp::Pipe, lhs, rhs } => {
                // `x |> f` is call syntax.
                let value = self.lower_expression(lhs);
                if let NodeKind::Name { name } = self.ast.kind(rhs) {
                    self.builder.emit(
                        Op::Call { callee: *name, args: vec![value] },
                        IrType::Value,
                        span,
                    )
                } else {
                    let callee = self.lower_expression(rhs);
                    self.builder.emit(
                        Op::CallIndirect { callee, args: vec![value] },
                        IrType::Value,
                        span,
                    )
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                let lhs = self.lower_expression(lhs);
                let rhs = self.lower_expression(rhs);
                let ty = if op == BinaryOp::Concat { IrType::Str } else { IrType::Value };
                self.builder.emit(Op::Binary { op: lower_binop(op), lhs, rhs }, ty, span)
            }
            NodeKind::Unary { op, operand } => {
                let operand = self.lower_expression(operand);
                let op = match op {
                    UnaryOp::Neg => UnOp::Neg,
                    UnaryOp::Not => UnOp::Not,
                };
                self.builder.emit(Op::Unary { op, operand }, IrType::Value, span)
            }
            NodeKind::Call { callee, args } => {
                let arg_regs = self.lower_arguments(args);
                if let NodeKind::Name { name } = self.ast.kind(callee) {
                    self.builder.emit(
                        Op::Call { callee: *name, args: arg_regs },
                        IrType::Value,
                        span,
                    )
                } else {
                    let callee = self.lower_expression(callee);
                    self.builder.emit(
                        Op::CallIndirect { callee, args: arg_regs },
                        IrType::Value,
                        span,
                    )
                }
            }
            NodeKind::New { class_name, args } => {
                let args = self.lower_arguments(args);
                self.builder.emit(Op::New { class: class_name, args }, IrType::Object, span)
            }
            NodeKind::MethodCall { receiver, method, args } => {
                let object = self.lower_expression(receiver);
                let args = self.lower_arguments(args);
                self.builder.emit(
                    Op::MethodCall { object, name: method, args },
                    IrType::Value,
                    span,
                )
            }
            NodeKind::StaticCall { class_name, method, args } => {
                let args = self.lower_arguments(args);
                let callee = intern(&format!("{}::{}", resolve(class_name), resolve(method)));
                self.builder.emit(Op::Call { callee, args }, IrType::Value, span)
            }
            NodeKind::ClassConst { class_name, name } => {
                let qualified = intern(&format!("{}::{}", resolve(class_name), resolve(name)));
                let name_reg = self.builder.emit(Op::ConstStr(qualified), IrType::Str, span);
                self.builder.emit(
                    Op::Call { callee: intern("__const_get"), args: vec![name_reg] },
                    IrType::Value,
                    span,
                )
            }
            NodeKind::PropertyAccess { receiver, property } => {
                let object = self.lower_expression(receiver);
                self.builder.emit(Op::PropertyGet { object, name: property }, IrType::Value, span)
            }
            NodeKind::Index { array, index } => {
                let array = self.lower_expression(array);
                match index {
                    Some(index) => {
                        let key = self.lower_expression(index);
                        self.builder.emit(Op::ArrayGet { array, key }, IrType::Value, span)
                    }
                    None => {
                        self.diagnostics.error("cannot read from '[]' append form", span);
                        self.builder.emit(Op::ConstNull, IrType::Value, span)
                    }
                }
            }
            NodeKind::ArrayLit { entries } => {
                let array = self.builder.emit(Op::ArrayNew, IrType::Array, span);
                for &entry in self.ast.list(entries).to_vec().iter() {
                    if let NodeKind::ArrayEntry { key, value } = self.ast.kind(entry).clone() {
                        let value = self.lower_expression(value);
                        match key {
                            Some(key) => {
                                let key = self.lower_expression(key);
                                self.builder
                                    .emit_void(Op::ArraySet { array, key, value }, span);
                            }
                            None => {
                                self.builder.emit_void(Op::ArrayPush { array, value }, span)
                            }
                        }
                    }
                }
                array
            }
            NodeKind::Match { subject, arms } => self.lower_match(subject, arms, span),
            NodeKind::Clone { operand } => {
                let value = self.lower_expression(operand);
                self.builder.emit(
                    Op::Call { callee: intern("__clone"), args: vec![value] },
                    IrType::Value,
                    span,
                )
            }
            NodeKind::ParseError => self.builder.emit(Op::ConstNull, IrType::Value, span),
            _ => {
                self.diagnostics.error("node is not an expression", span);
                self.builder.emit(Op::ConstNull, IrType::Value, span)
            }
        }
    }

    fn lower_arguments(&mut self, args: velo_parser::NodeList) -> Vec<Register> {
        self.ast
            .list(args)
            .to_vec()
            .into_iter()
            .map(|arg| self.lower_expression(arg))
            .collect()
    }

    fn lower_store(&mut self, target: NodeId, value: Register, span: Span) {
        match self.ast.kind(target).clone() {
            NodeKind::Variable { name } => {
                if self.globals.contains(&name) {
                    let name_reg = self.builder.emit(Op::ConstStr(name), IrType::Str, span);
                    self.builder.emit_void(
                        Op::Call { callee: intern("__global_set"), args: vec![name_reg, value] },
                        span,
                    );
                } else {
                    let slot = self.slot(name, span);
                    self.builder.emit_void(Op::Store { slot, value }, span);
                }
            }
            NodeKind::PropertyAccess { receiver, property } => {
                let object = self.lower_expression(receiver);
                self.builder.emit_void(Op::PropertySet { object, name: property, value }, span);
            }
            NodeKind::Index { array, index } => {
                let array = self.lower_expression(array);
                match index {
                    Some(index) => {
                        let key = self.lower_expression(index);
                        self.builder.emit_void(Op::ArraySet { array, key, value }, span);
                    }
                    None => self.builder.emit_void(Op::ArrayPush { array, value }, span),
                }
            }
            _ => self.diagnostics.error("invalid assignment target", span),
        }
    }

    fn lower_match(
        &mut self,
        subject: NodeId,
        arms: velo_parser::NodeList,
        span: Span,
    ) -> Register {
        let subject = self.lower_expression(subject);
        let result_slot = self.builder.emit(Op::Alloca { name: intern("$__match") }, IrType::Ptr, span);
        let exit = self.builder.new_block();

        let arms = self.ast.list(arms).to_vec();
        let mut default_body = None;
        let mut next_test = self.builder.current_block();
        for arm in arms {
            let NodeKind::MatchArm { conditions, body } = self.ast.kind(arm).clone() else {
                continue;
            };
            if conditions.is_empty() {
                default_body = Some(body);
                continue;
            }
            for &condition in self.ast.list(conditions).to_vec().iter() {
                self.builder.switch_to(next_test);
                let candidate = self.lower_expression(condition);
                let matches = self.builder.emit(
                    Op::Binary { op: BinOp::Identical, lhs: subject, rhs: candidate },
                    IrType::Bool,
                    span,
                );
                let arm_block = self.builder.new_block();
                next_test = self.builder.new_block();
                self.builder.terminate(Terminator::CondBr {
                    cond: matches,
                    then_block: arm_block,
                    else_block: next_test,
                });
                self.builder.switch_to(arm_block);
                let value = self.lower_expression(body);
                self.builder.emit_void(Op::Store { slot: result_slot, value }, span);
                self.builder.terminate(Terminator::Br(exit));
            }
        }

        self.builder.switch_to(next_test);
        match default_body {
            Some(body) => {
                let value = self.lower_expression(body);
                self.builder.emit_void(Op::Store { slot: result_slot, value }, span);
            }
            None => {
                let null = self.builder.emit(Op::ConstNull, IrType::Value, span);
                self.builder.emit_void(Op::Store { slot: result_slot, value: null }, span);
            }
        }
        self.builder.terminate(Terminator::Br(exit));

        self.builder.switch_to(exit);
        self.builder.emit(Op::Load { slot: result_slot }, IrType::Value, span)
    }
}

fn lower_binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
        BinaryOp::Concat => BinOp::Concat,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::NotEq => BinOp::Ne,
        BinaryOp::Identical => BinOp::Identical,
        BinaryOp::NotIdentical => BinOp::NotIdentical,
        BinaryOp::Lt => BinOp::Lt,
        BinaryOp::Le => BinOp::Le,
        BinaryOp::Gt => BinOp::Gt,
        BinaryOp::Ge => BinOp::Ge,
        BinaryOp::Spaceship => BinOp::Spaceship,
        BinaryOp::And => BinOp::And,
        BinaryOp::Or => BinOp::Or,
        // Pipe rewrites to a call before reaching here.
        BinaryOp::Pipe => BinOp::Or,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velo_common::SyntaxMode;
    use velo_parser::parse_source;

    fn lower(source: &str) -> Module {
        let (ast, diags) = parse_source(source, 0, SyntaxMode::Php);
        assert!(!diags.has_errors(), "{:?}", diags.messages);
        let (module, lower_diags) = lower_program(&ast);
        assert!(!lower_diags.has_errors(), "{:?}", lower_diags.messages);
        module.validate().expect("lowered module should validate");
        module
    }

    #[test]
    fn test_lower_arithmetic() {
        let module = lower("<?php 1 + 2;");
        let main = module.function(intern("__main__")).unwrap();
        let entry = main.block(main.entry);
        assert!(entry
            .instructions
            .iter()
            .any(|i| matches!(i.op, Op::Binary { op: BinOp::Add, .. })));
    }

    #[test]
    fn test_lower_if_creates_diamond() {
        let module = lower("<?php if ($x) { echo 1; } else { echo 2; }");
        let main = module.function(intern("__main__")).unwrap();
        assert!(main.blocks.len() >= 4);
        assert!(matches!(
            main.block(main.entry).terminator,
            Some(Terminator::CondBr { .. })
        ));
    }

    #[test]
    fn test_lower_while_loops_back() {
        let module = lower("<?php while ($x) { $x = $x - 1; }");
        let main = module.function(intern("__main__")).unwrap();
        let back_edges = main
            .blocks
            .iter()
            .filter_map(|b| b.terminator.as_ref())
            .flat_map(|t| t.successors())
            .filter(|target| target.0 <= 1)
            .count();
        assert!(back_edges >= 1);
    }

    #[test]
    fn test_lower_function_and_params() {
        let module = lower("<?php function add($a, $b) { return $a + $b; }");
        let add = module.function(intern("add")).unwrap();
        assert_eq!(add.params.len(), 2);
        assert!(matches!(
            add.blocks.iter().find_map(|b| b.terminator.as_ref()),
            Some(Terminator::Ret(Some(_)))
        ));
    }

    #[test]
    fn test_lower_try_catch_uses_exception_ops() {
        let module =
            lower("<?php try { throw new Exception(\"e\"); } catch (Exception $ex) { echo 1; }");
        let main = module.function(intern("__main__")).unwrap();
        let ops: Vec<&Op> = main.blocks.iter().flat_map(|b| b.instructions.iter().map(|i| &i.op)).collect();
        assert!(ops.iter().any(|op| matches!(op, Op::TryBegin { .. })));
        assert!(ops.iter().any(|op| matches!(op, Op::GetException)));
        assert!(ops.iter().any(|op| matches!(op, Op::Instanceof { .. })));
    }

    #[test]
    fn test_lower_go_spawns() {
        let module = lower("<?php go work(1);");
        let main = module.function(intern("__main__")).unwrap();
        assert!(main
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter())
            .any(|i| matches!(i.op, Op::Spawn { .. })));
    }

    #[test]
    fn test_lower_method_names_are_qualified() {
        let module = lower("<?php class A { public function f() { return 1; } }");
        assert!(module.function(intern("A::f")).is_some());
    }
}
