// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Temporal dead zone analysis.
//!
//! Walks each function in evaluation order while tracking which of its own
//! bindings are definitely initialized. An access is recorded as safe only
//! when its binding is initialized on every path that reaches it; anything
//! not recorded keeps its `ThrowIfTDZ`. Accesses from a nested function
//! always keep their check, since the closure may run at any time.

use rustc_hash::FxHashSet;

use crate::ast::*;
use crate::compiler::scope::{Binding, BindingId, DeclarationKind, Resolution};
use crate::config::CompilerConfig;

/// Identifier occurrences whose TDZ check can be omitted.
#[derive(Debug, Default)]
pub struct TdzDecisions {
    elided: FxHashSet<usize>,
    /// Writes to parameters that are initialized by the time they run.
    parameter_writes: FxHashSet<usize>,
}

impl TdzDecisions {
    /// Whether `identifier` is statically known to be initialized.
    pub fn is_elided(&self, identifier: &Identifier) -> bool {
        self.elided
            .contains(&(identifier as *const Identifier as usize))
    }

    /// Whether an access needs `ThrowIfTDZ`. A write to a parameter skips
    /// it once the parameter list has bound that parameter, whether or not
    /// elision is enabled.
    pub fn needs_check(&self, identifier: &Identifier, binding: &Binding, is_write: bool) -> bool {
        if !binding.tdz_tracked {
            return false;
        }
        if is_write && binding.kind == DeclarationKind::Parameter {
            return !self
                .parameter_writes
                .contains(&(identifier as *const Identifier as usize));
        }
        !self.is_elided(identifier)
    }

    /// Number of accesses proven safe.
    pub fn elided_count(&self) -> usize {
        self.elided.len()
    }
}

/// Decides which identifier accesses can skip their TDZ check.
pub fn analyze(program: &Program, resolution: &Resolution, config: &CompilerConfig) -> TdzDecisions {
    if !config.elide_tdz_checks {
        tracing::debug!("TDZ elision disabled");
    }

    let mut analyzer = Analyzer {
        resolution,
        elide: config.elide_tdz_checks,
        initialized: FxHashSet::default(),
        log: Vec::new(),
        pending_parameters: FxHashSet::default(),
        elided: FxHashSet::default(),
        parameter_writes: FxHashSet::default(),
    };
    analyzer.visit_statements(&program.body);

    tracing::debug!(elided = analyzer.elided.len(), "analyzed TDZ checks");
    TdzDecisions {
        elided: analyzer.elided,
        parameter_writes: analyzer.parameter_writes,
    }
}

struct Analyzer<'r> {
    resolution: &'r Resolution,
    elide: bool,
    initialized: FxHashSet<BindingId>,
    /// Insertion order of `initialized`, for rolling back after branches.
    log: Vec<BindingId>,
    /// Parameters of every enclosing parameter list still being bound.
    /// Survives into nested functions, which may run during the list.
    pending_parameters: FxHashSet<BindingId>,
    elided: FxHashSet<usize>,
    parameter_writes: FxHashSet<usize>,
}

impl Analyzer<'_> {
    fn snapshot(&self) -> usize {
        self.log.len()
    }

    fn restore(&mut self, snapshot: usize) {
        for id in self.log.drain(snapshot..) {
            self.initialized.remove(&id);
        }
    }

    /// Visits `f` and forgets whatever it initialized.
    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        let snapshot = self.snapshot();
        f(self);
        self.restore(snapshot);
    }

    fn mark_initialized(&mut self, identifier: &Identifier) {
        if let Some((id, _)) = self.resolution.binding_of(identifier) {
            self.pending_parameters.remove(&id);
            if self.initialized.insert(id) {
                self.log.push(id);
            }
        }
    }

    fn visit_reference(&mut self, identifier: &Identifier) {
        if !self.elide {
            return;
        }
        let Some((id, binding)) = self.resolution.binding_of(identifier) else {
            return;
        };
        if !binding.tdz_tracked || self.initialized.contains(&id) {
            self.elided.insert(identifier as *const Identifier as usize);
        } else {
            tracing::trace!(name = %identifier.name, position = %identifier.position, "keeping TDZ check");
        }
    }

    /// Records an assignment to `identifier`. Parameter writes are safe
    /// unless they can run before the parameter list binds the parameter.
    fn visit_write(&mut self, identifier: &Identifier) {
        let Some((id, binding)) = self.resolution.binding_of(identifier) else {
            return;
        };
        if binding.kind == DeclarationKind::Parameter && !self.pending_parameters.contains(&id) {
            self.parameter_writes
                .insert(identifier as *const Identifier as usize);
        }
    }

    fn declare_parameters(&mut self, target: &BindingTarget) {
        match target {
            BindingTarget::Identifier(identifier) => {
                if let Some((id, _)) = self.resolution.binding_of(identifier) {
                    self.pending_parameters.insert(id);
                }
            }
            BindingTarget::Pattern(pattern) => {
                for element in pattern.elements.iter().flatten() {
                    self.declare_parameters(&element.target);
                }
                if let Some(rest) = &pattern.rest {
                    self.declare_parameters(rest);
                }
            }
        }
    }

    /// Visits a binding target in destructuring order, initializing each
    /// name as it is bound.
    fn visit_binding_target(&mut self, target: &BindingTarget) {
        match target {
            BindingTarget::Identifier(identifier) => self.mark_initialized(identifier),
            BindingTarget::Pattern(pattern) => {
                for element in pattern.elements.iter().flatten() {
                    if let Some(PropertyKey::Computed(key)) = &element.key {
                        self.visit_expression(key);
                    }
                    if let Some(default) = &element.default {
                        self.visit_expression(default);
                    }
                    self.visit_binding_target(&element.target);
                }
                if let Some(rest) = &pattern.rest {
                    self.visit_binding_target(rest);
                }
            }
        }
    }

    fn visit_function(&mut self, function: &FunctionNode) {
        let initialized = std::mem::take(&mut self.initialized);
        let log = std::mem::take(&mut self.log);

        for param in &function.params {
            self.declare_parameters(&param.target);
        }
        for param in &function.params {
            if let Some(default) = &param.default {
                self.visit_expression(default);
            }
            self.visit_binding_target(&param.target);
        }
        self.visit_statements(&function.body);

        self.initialized = initialized;
        self.log = log;
    }

    fn visit_class(&mut self, class: &ClassNode) {
        if let Some(super_class) = &class.super_class {
            self.visit_expression(super_class);
        }
        if let Some(constructor) = &class.constructor {
            self.visit_function(constructor);
        }
        for method in &class.methods {
            self.visit_function(&method.function);
        }
        if let Some(name) = &class.name {
            self.mark_initialized(name);
        }
    }

    fn visit_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            self.visit_statement(statement);
        }
    }

    fn visit_statement(&mut self, statement: &Statement) {
        match &statement.kind {
            StatementKind::VariableDeclaration(decl) => self.visit_declaration(decl),
            StatementKind::FunctionDeclaration(function) => self.visit_function(function),
            StatementKind::ClassDeclaration(class) => self.visit_class(class),
            StatementKind::Expression(expr) => self.visit_expression(&expr.expression),
            StatementKind::Block(block) => self.scoped(|this| this.visit_statements(&block.body)),
            StatementKind::If(if_stmt) => {
                self.visit_expression(&if_stmt.test);
                self.scoped(|this| this.visit_statement(&if_stmt.consequent));
                if let Some(alternate) = &if_stmt.alternate {
                    self.scoped(|this| this.visit_statement(alternate));
                }
            }
            StatementKind::While(while_stmt) => {
                self.visit_expression(&while_stmt.test);
                self.scoped(|this| this.visit_statement(&while_stmt.body));
            }
            StatementKind::DoWhile(do_while) => {
                self.scoped(|this| this.visit_statement(&do_while.body));
                self.visit_expression(&do_while.test);
            }
            StatementKind::For(for_stmt) => self.scoped(|this| {
                match &for_stmt.init {
                    Some(ForInit::Declaration(decl)) => this.visit_declaration(decl),
                    Some(ForInit::Expression(expr)) => this.visit_expression(expr),
                    None => {}
                }
                if let Some(test) = &for_stmt.test {
                    this.visit_expression(test);
                }
                this.scoped(|this| this.visit_statement(&for_stmt.body));
                if let Some(update) = &for_stmt.update {
                    this.visit_expression(update);
                }
            }),
            StatementKind::Switch(switch_stmt) => {
                self.visit_expression(&switch_stmt.discriminant);
                for case in &switch_stmt.cases {
                    if let Some(test) = &case.test {
                        self.visit_expression(test);
                    }
                }
                // Any case can be entered directly, skipping earlier ones.
                for case in &switch_stmt.cases {
                    self.scoped(|this| this.visit_statements(&case.consequent));
                }
            }
            StatementKind::Return(ret) => {
                if let Some(argument) = &ret.argument {
                    self.visit_expression(argument);
                }
            }
            StatementKind::Throw(throw_stmt) => self.visit_expression(&throw_stmt.argument),
            StatementKind::Try(try_stmt) => {
                self.scoped(|this| this.visit_statements(&try_stmt.block.body));
                if let Some(handler) = &try_stmt.handler {
                    self.scoped(|this| {
                        if let Some(param) = &handler.param {
                            this.visit_binding_target(param);
                        }
                        this.visit_statements(&handler.body.body);
                    });
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    self.scoped(|this| this.visit_statements(&finalizer.body));
                }
            }
            StatementKind::Labeled(labeled) => {
                self.scoped(|this| this.visit_statement(&labeled.body))
            }
            StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Empty => {}
        }
    }

    fn visit_declaration(&mut self, decl: &VariableDeclaration) {
        for declarator in &decl.declarations {
            if let Some(init) = &declarator.init {
                self.visit_expression(init);
            }
            self.visit_binding_target(&declarator.target);
        }
    }

    fn visit_expressions(&mut self, expressions: &[Expression]) {
        for expr in expressions {
            self.visit_expression(expr);
        }
    }

    fn visit_expression(&mut self, expr: &Expression) {
        match &expr.kind {
            ExpressionKind::Identifier(identifier) => self.visit_reference(identifier),
            ExpressionKind::Literal(_) | ExpressionKind::This | ExpressionKind::Super => {}
            ExpressionKind::Array(array) => {
                for element in array.elements.iter().flatten() {
                    self.visit_expression(element);
                }
            }
            ExpressionKind::Object(object) => {
                for property in &object.properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.visit_expression(key);
                    }
                    self.visit_expression(&property.value);
                }
            }
            ExpressionKind::Binary(binary) => {
                self.visit_expression(&binary.left);
                self.visit_expression(&binary.right);
            }
            ExpressionKind::Unary(unary) => self.visit_expression(&unary.argument),
            // Deleting a binding never reads it.
            ExpressionKind::Delete(delete) => {
                if !matches!(delete.argument.kind, ExpressionKind::Identifier(_)) {
                    self.visit_expression(&delete.argument);
                }
            }
            ExpressionKind::Assignment(assignment) => {
                self.visit_expression(&assignment.target);
                self.visit_expression(&assignment.value);
                if let ExpressionKind::Identifier(identifier) = &assignment.target.kind {
                    self.visit_write(identifier);
                }
            }
            ExpressionKind::Call(call) => {
                self.visit_expression(&call.callee);
                self.visit_expressions(&call.arguments);
            }
            ExpressionKind::SuperCall(call) => self.visit_expressions(&call.arguments),
            ExpressionKind::Member(member) => {
                self.visit_expression(&member.object);
                if let MemberProperty::Expression(property) = &member.property {
                    self.visit_expression(property);
                }
            }
            ExpressionKind::Conditional(conditional) => {
                self.visit_expression(&conditional.test);
                self.visit_expression(&conditional.consequent);
                self.visit_expression(&conditional.alternate);
            }
            ExpressionKind::Function(function) | ExpressionKind::Arrow(function) => {
                self.visit_function(function)
            }
            ExpressionKind::Class(class) => self.visit_class(class),
            ExpressionKind::New(new_expr) => {
                self.visit_expression(&new_expr.callee);
                self.visit_expressions(&new_expr.arguments);
            }
            ExpressionKind::Update(update) => {
                self.visit_expression(&update.argument);
                if let ExpressionKind::Identifier(identifier) = &update.argument.kind {
                    self.visit_write(identifier);
                }
            }
            ExpressionKind::Sequence(sequence) => self.visit_expressions(&sequence.expressions),
        }
    }
}
