// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Statement compilation.
//!
//! ## Control Flow Layouts
//!
//! ### While Loop
//!
//! ```text
//! start:
//!   [test]
//!   JumpIfFalse -> end
//!   [body]
//!   Jump -> start
//! end:
//! ```
//!
//! ### For Loop With a Captured `let`
//!
//! ```text
//!   CreateLexicalEnvironment
//!   CreateVariable i
//!   [init]
//!   CopyPerIterationEnvironment
//! start:
//!   [test]
//!   JumpIfFalse -> end
//!   [body]
//! update:
//!   CopyPerIterationEnvironment
//!   [update]
//!   Pop
//!   Jump -> start
//! end:
//!   LeaveLexicalEnvironment
//! ```
//!
//! ### Switch
//!
//! Each matching test jumps to a landing pad that drops the discriminant
//! before entering the case body, so every body starts with the same
//! stack height.
//!
//! ```text
//!   [discriminant]
//!   Dup
//!   [test 0]
//!   StrictEq
//!   JumpIfTrue -> pad0
//!   ...
//!   Pop
//!   Jump -> default body, or end
//! pad0:
//!   Pop
//!   Jump -> body0
//! body0:
//!   ...
//! end:
//! ```
//!
//! ### Try-Catch-Finally
//!
//! ```text
//!   [try block]                      ; handler: catch_entry
//!   EnterFinally R Normal cleanup after
//! catch_entry:
//!   [catch block]                    ; handler: throw_entry
//!   EnterFinally R Normal cleanup after
//! throw_entry:
//!   EnterFinally R Throw cleanup rethrow
//! cleanup:
//!   [finally block]
//!   LeaveFinally R
//! rethrow:
//!   Throw
//! after:
//! ```
//!
//! `LeaveFinally` resumes whichever exit entered the region: the normal
//! exit, a `break`/`continue`/`return` routed through the region by the
//! unwind planner, or the rethrow.

use super::{BindMode, Emitter};
use crate::ast::*;
use crate::compiler::bytecode::{CompletionType, Label, OpCode, Operand};
use crate::compiler::unwind::{FinallyContext, JumpKind, JumpTarget};
use crate::error::{CompileErrorKind, Result};

impl Emitter<'_> {
    pub(super) fn compile_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    pub(super) fn compile_statement(&mut self, stmt: &Statement) -> Result<()> {
        let saved = self.enter_position(stmt.position);
        let result = self.compile_statement_kind(stmt);
        self.builder.set_position(saved);
        result
    }

    fn compile_statement_kind(&mut self, stmt: &Statement) -> Result<()> {
        match &stmt.kind {
            StatementKind::VariableDeclaration(decl) => self.compile_variable_declaration(decl),
            // Instantiated when the enclosing scope is entered
            StatementKind::FunctionDeclaration(_) => Ok(()),
            StatementKind::ClassDeclaration(class) => {
                self.compile_class(class, false)?;
                let name = class
                    .name
                    .as_ref()
                    .ok_or_else(|| self.internal("class declaration without a name"))?;
                let binding = self.binding_operand(&name.name)?;
                self.emit_with(OpCode::InitializeBinding, binding);
                Ok(())
            }
            StatementKind::Expression(expr_stmt) => {
                self.compile_expression(&expr_stmt.expression)?;
                self.emit_op(OpCode::Pop);
                Ok(())
            }
            StatementKind::Block(block) => self.compile_block(block),
            StatementKind::If(if_stmt) => self.compile_if(if_stmt),
            StatementKind::Switch(switch_stmt) => self.compile_switch(switch_stmt, Vec::new()),
            StatementKind::While(while_stmt) => self.compile_while(while_stmt, Vec::new()),
            StatementKind::DoWhile(do_while) => self.compile_do_while(do_while, Vec::new()),
            StatementKind::For(for_stmt) => self.compile_for(for_stmt, Vec::new()),
            StatementKind::Return(ret) => self.compile_return(ret),
            StatementKind::Break(brk) => self.compile_jump(JumpKind::Break, brk.label.as_deref()),
            StatementKind::Continue(cont) => {
                self.compile_jump(JumpKind::Continue, cont.label.as_deref())
            }
            StatementKind::Throw(throw_stmt) => {
                self.compile_expression(&throw_stmt.argument)?;
                self.emit_op(OpCode::Throw);
                Ok(())
            }
            StatementKind::Try(try_stmt) => self.compile_try(try_stmt),
            StatementKind::Labeled(labeled) => self.compile_labeled(labeled),
            StatementKind::Empty => Ok(()),
        }
    }

    fn compile_variable_declaration(&mut self, decl: &VariableDeclaration) -> Result<()> {
        for declarator in &decl.declarations {
            match (decl.kind, &declarator.init) {
                // Created as undefined when the scope was entered
                (VariableKind::Var, None) => {}
                (VariableKind::Var, Some(init)) => {
                    self.compile_expression(init)?;
                    self.bind_target(&declarator.target, BindMode::Assign)?;
                }
                (_, init) => {
                    match init {
                        Some(init) => self.compile_expression(init)?,
                        None => self.emit_op(OpCode::LoadUndefined),
                    }
                    self.bind_target(&declarator.target, BindMode::Initialize)?;
                }
            }
        }
        Ok(())
    }

    pub(super) fn compile_block(&mut self, block: &BlockStatement) -> Result<()> {
        match self.shared.resolution.block_scope(block) {
            Some(scope) => {
                self.enter_environment(scope)?;
                self.initialize_functions(&block.body)?;
                self.compile_statements(&block.body)?;
                self.leave_environment()
            }
            None => self.compile_statements(&block.body),
        }
    }

    fn compile_if(&mut self, if_stmt: &IfStatement) -> Result<()> {
        self.compile_expression(&if_stmt.test)?;
        let else_label = self.make_label();
        self.emit_jump(OpCode::JumpIfFalse, else_label);
        self.compile_statement(&if_stmt.consequent)?;

        match &if_stmt.alternate {
            Some(alternate) => {
                let end_label = self.make_label();
                self.emit_jump(OpCode::Jump, end_label);
                self.bind_label(else_label)?;
                self.compile_statement(alternate)?;
                self.bind_label(end_label)
            }
            None => self.bind_label(else_label),
        }
    }

    // ========================================================================
    // Loops
    // ========================================================================

    fn compile_while(&mut self, while_stmt: &WhileStatement, labels: Vec<String>) -> Result<()> {
        let start = self.make_label();
        let end = self.make_label();

        self.bind_label(start)?;
        self.compile_expression(&while_stmt.test)?;
        self.emit_jump(OpCode::JumpIfFalse, end);

        self.compile_loop_body(&while_stmt.body, end, start, labels)?;
        self.emit_jump(OpCode::Jump, start);
        self.bind_label(end)
    }

    fn compile_do_while(&mut self, do_while: &DoWhileStatement, labels: Vec<String>) -> Result<()> {
        let start = self.make_label();
        let test = self.make_label();
        let end = self.make_label();

        self.bind_label(start)?;
        self.compile_loop_body(&do_while.body, end, test, labels)?;

        self.bind_label(test)?;
        self.compile_expression(&do_while.test)?;
        self.emit_jump(OpCode::JumpIfTrue, start);
        self.bind_label(end)
    }

    fn compile_for(&mut self, for_stmt: &ForStatement, labels: Vec<String>) -> Result<()> {
        let head = self.shared.resolution.for_scope(for_stmt);
        let per_iteration = head.is_some_and(|scope| {
            self.shared
                .resolution
                .tree()
                .scope(scope)
                .bindings
                .iter()
                .any(|binding| binding.captured && binding.mutable)
        });
        if let Some(scope) = head {
            self.enter_environment(scope)?;
        }

        match &for_stmt.init {
            Some(ForInit::Declaration(decl)) => self.compile_variable_declaration(decl)?,
            Some(ForInit::Expression(expr)) => {
                self.compile_expression(expr)?;
                self.emit_op(OpCode::Pop);
            }
            None => {}
        }
        if per_iteration {
            self.emit_op(OpCode::CopyPerIterationEnvironment);
        }

        let start = self.make_label();
        let update = self.make_label();
        let end = self.make_label();

        self.bind_label(start)?;
        if let Some(test) = &for_stmt.test {
            self.compile_expression(test)?;
            self.emit_jump(OpCode::JumpIfFalse, end);
        }

        self.compile_loop_body(&for_stmt.body, end, update, labels)?;

        self.bind_label(update)?;
        if per_iteration {
            self.emit_op(OpCode::CopyPerIterationEnvironment);
        }
        if let Some(expr) = &for_stmt.update {
            self.compile_expression(expr)?;
            self.emit_op(OpCode::Pop);
        }
        self.emit_jump(OpCode::Jump, start);
        self.bind_label(end)?;

        if head.is_some() {
            self.leave_environment()?;
        }
        Ok(())
    }

    fn compile_loop_body(
        &mut self,
        body: &Statement,
        break_label: Label,
        continue_label: Label,
        labels: Vec<String>,
    ) -> Result<()> {
        self.unwind.push_target(JumpTarget {
            break_label,
            continue_label: Some(continue_label),
            labels,
            accepts_unlabeled_break: true,
        });
        self.compile_statement(body)?;
        self.unwind
            .pop_target()
            .map_err(|kind| self.error(kind))?;
        Ok(())
    }

    // ========================================================================
    // Switch and labels
    // ========================================================================

    fn compile_switch(&mut self, switch_stmt: &SwitchStatement, labels: Vec<String>) -> Result<()> {
        self.compile_expression(&switch_stmt.discriminant)?;

        let scope = self.shared.resolution.switch_scope(switch_stmt);
        if let Some(scope) = scope {
            self.enter_environment(scope)?;
            for case in &switch_stmt.cases {
                self.initialize_functions(&case.consequent)?;
            }
        }

        let end = self.make_label();
        let bodies: Vec<Label> = switch_stmt.cases.iter().map(|_| self.make_label()).collect();
        let mut pads = Vec::new();
        let mut default_body = None;

        for (case, body) in switch_stmt.cases.iter().zip(&bodies) {
            match &case.test {
                Some(test) => {
                    self.emit_op(OpCode::Dup);
                    self.compile_expression(test)?;
                    self.emit_op(OpCode::StrictEq);
                    let pad = self.make_label();
                    self.emit_jump(OpCode::JumpIfTrue, pad);
                    pads.push((pad, *body));
                }
                None => default_body = Some(*body),
            }
        }
        self.emit_op(OpCode::Pop);
        self.emit_jump(OpCode::Jump, default_body.unwrap_or(end));

        for (pad, body) in pads {
            self.bind_label(pad)?;
            self.emit_op(OpCode::Pop);
            self.emit_jump(OpCode::Jump, body);
        }

        self.unwind.push_target(JumpTarget {
            break_label: end,
            continue_label: None,
            labels,
            accepts_unlabeled_break: true,
        });
        for (case, body) in switch_stmt.cases.iter().zip(&bodies) {
            self.bind_label(*body)?;
            self.compile_statements(&case.consequent)?;
        }
        self.unwind
            .pop_target()
            .map_err(|kind| self.error(kind))?;
        self.bind_label(end)?;

        if scope.is_some() {
            self.leave_environment()?;
        }
        Ok(())
    }

    fn compile_labeled(&mut self, labeled: &LabeledStatement) -> Result<()> {
        let mut labels = vec![labeled.label.clone()];
        let mut body = &*labeled.body;
        while let StatementKind::Labeled(inner) = &body.kind {
            labels.push(inner.label.clone());
            body = &inner.body;
        }

        let saved = self.enter_position(body.position);
        let result = match &body.kind {
            StatementKind::While(while_stmt) => self.compile_while(while_stmt, labels),
            StatementKind::DoWhile(do_while) => self.compile_do_while(do_while, labels),
            StatementKind::For(for_stmt) => self.compile_for(for_stmt, labels),
            StatementKind::Switch(switch_stmt) => self.compile_switch(switch_stmt, labels),
            _ => {
                let end = self.make_label();
                self.unwind.push_target(JumpTarget {
                    break_label: end,
                    continue_label: None,
                    labels,
                    accepts_unlabeled_break: false,
                });
                self.compile_statement(body)?;
                self.unwind
                    .pop_target()
                    .map_err(|kind| self.error(kind))?;
                self.bind_label(end)
            }
        };
        self.builder.set_position(saved);
        result
    }

    // ========================================================================
    // Non-local exits
    // ========================================================================

    fn compile_jump(&mut self, kind: JumpKind, label: Option<&str>) -> Result<()> {
        let plan = self
            .unwind
            .plan_jump(kind, label)
            .map_err(|kind| self.error(kind))?;
        let completion = match kind {
            JumpKind::Break => CompletionType::Break,
            JumpKind::Continue => CompletionType::Continue,
        };
        self.emit_unwind_plan(plan, completion)
    }

    fn compile_return(&mut self, ret: &ReturnStatement) -> Result<()> {
        if self.context.kind.is_none() {
            return Err(self.error(CompileErrorKind::IllegalReturn));
        }
        match &ret.argument {
            Some(argument) => self.compile_expression(argument)?,
            None => self.emit_op(OpCode::LoadUndefined),
        }
        let plan = self
            .unwind
            .plan_return()
            .map_err(|kind| self.error(kind))?;
        self.emit_unwind_plan(plan, CompletionType::Return)
    }

    fn compile_try(&mut self, try_stmt: &TryStatement) -> Result<()> {
        let after = self.make_label();
        let finally = match &try_stmt.finalizer {
            Some(_) => {
                let cleanup = self.make_label();
                let context = self
                    .unwind
                    .push_finally(cleanup)
                    .map_err(|kind| self.error(kind))?;
                Some(context)
            }
            None => None,
        };
        let depth = self.unwind.environment_depth();
        let throw_entry = finally.map(|_| self.make_label());
        let catch_entry = try_stmt.handler.as_ref().map(|_| self.make_label());
        tracing::trace!(
            finally_depth = self.unwind.finally_depth(),
            environment_depth = depth,
            "compiling try statement"
        );

        let try_start = self.builder.offset();
        self.compile_block(&try_stmt.block)?;
        let try_end = self.builder.offset();
        if let Some(handler) = catch_entry.or(throw_entry) {
            self.builder.add_handler(try_start, try_end, handler, depth);
        }
        self.emit_normal_exit(finally, after);

        if let (Some(handler), Some(catch_entry)) = (&try_stmt.handler, catch_entry) {
            self.bind_label(catch_entry)?;
            let catch_start = self.builder.offset();
            self.compile_catch(handler)?;
            let catch_end = self.builder.offset();
            if let Some(throw_entry) = throw_entry {
                self.builder.add_handler(catch_start, catch_end, throw_entry, depth);
            }
            self.emit_normal_exit(finally, after);
        }

        if let (Some(context), Some(throw_entry), Some(finalizer)) =
            (finally, throw_entry, &try_stmt.finalizer)
        {
            self.unwind
                .pop_finally(context.region)
                .map_err(|kind| self.error(kind))?;

            self.bind_label(throw_entry)?;
            let rethrow = self.make_label();
            self.emit_enter_finally(context.region, CompletionType::Throw, context.cleanup, rethrow);

            self.bind_label(context.cleanup)?;
            self.compile_block(finalizer)?;
            self.emit_with(OpCode::LeaveFinally, Operand::Region(context.region));

            self.bind_label(rethrow)?;
            self.emit_op(OpCode::Throw);
        }

        self.bind_label(after)
    }

    fn emit_normal_exit(&mut self, finally: Option<FinallyContext>, after: Label) {
        match finally {
            Some(context) => {
                self.emit_enter_finally(context.region, CompletionType::Normal, context.cleanup, after)
            }
            None => self.emit_jump(OpCode::Jump, after),
        }
    }

    /// Emits a catch clause. The exception is on top of the stack.
    fn compile_catch(&mut self, handler: &CatchClause) -> Result<()> {
        match self.shared.resolution.catch_scope(handler) {
            Some(scope) => {
                self.enter_environment(scope)?;
                match &handler.param {
                    Some(param) => self.bind_target(param, BindMode::Initialize)?,
                    None => self.emit_op(OpCode::Pop),
                }
                self.initialize_functions(&handler.body.body)?;
                self.compile_statements(&handler.body.body)?;
                self.leave_environment()
            }
            None => {
                self.emit_op(OpCode::Pop);
                self.compile_statements(&handler.body.body)
            }
        }
    }
}
