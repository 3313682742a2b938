// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Code generation from AST to bytecode.
//!
//! An [`Emitter`] produces the executable for one function (or the program
//! body). Nested functions and classes are emitted by child emitters and
//! attached to the parent as blueprints. The emitter consumes the results of
//! scope resolution and TDZ analysis; it never re-derives either.

mod expressions;
mod statements;


use crate::ast::*;
use crate::compiler::builder::{BytecodeBuilder, jump};
use crate::compiler::bytecode::{
    BindingMode, ClassBlueprint, ClassMethodBlueprint, CompletionType, Executable,
    FunctionBlueprint, Instruction, Label, OpCode, Operand,
};
use crate::compiler::scope::{self, DeclarationKind, Reference, Resolution, ScopeId};
use crate::compiler::tdz::TdzDecisions;
use crate::compiler::unwind::{Destination, UnwindPlan, UnwindPlanner, UnwindStep};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind, Result};

/// Read-only inputs shared by every emitter of one compilation unit.
#[derive(Clone, Copy)]
pub(crate) struct Shared<'a> {
    pub config: &'a CompilerConfig,
    pub resolution: &'a Resolution,
    pub tdz: &'a TdzDecisions,
}

/// What the code being emitted is allowed to do.
#[derive(Debug, Clone, Copy)]
struct FunctionContext {
    /// None for the program body
    kind: Option<FunctionKind>,
    super_property: bool,
    super_call: bool,
    strict: bool,
}

impl FunctionContext {
    fn program(strict: bool) -> Self {
        Self {
            kind: None,
            super_property: false,
            super_call: false,
            strict,
        }
    }

    /// Arrows see the `super` of the code around them.
    fn for_function(kind: FunctionKind, outer: FunctionContext, strict: bool) -> Self {
        let (super_property, super_call) = match kind {
            FunctionKind::Arrow => (outer.super_property, outer.super_call),
            FunctionKind::Normal => (false, false),
            FunctionKind::Method | FunctionKind::ClassConstructor => (true, false),
            FunctionKind::DerivedConstructor => (true, true),
        };
        Self {
            kind: Some(kind),
            super_property,
            super_call,
            strict,
        }
    }
}

/// Whether a store creates a binding's first value or replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindMode {
    Initialize,
    Assign,
}

/// Emits the executable for the program body.
pub(crate) fn emit_program(program: &Program, shared: Shared<'_>) -> Result<Executable> {
    let global = shared.resolution.global_scope();
    let strict = shared.resolution.tree().scope(global).strict;
    let mut emitter = Emitter::new(shared, FunctionContext::program(strict));

    emitter.declare_scope(global)?;
    emitter.initialize_functions(&program.body)?;
    emitter.compile_statements(&program.body)?;
    emitter.emit_op(OpCode::Halt);

    emitter.finish(None, 0)
}

/// Bytecode emitter for one function or the program body.
pub(crate) struct Emitter<'a> {
    shared: Shared<'a>,
    builder: BytecodeBuilder,
    unwind: UnwindPlanner,
    context: FunctionContext,
    functions: Vec<FunctionBlueprint>,
    classes: Vec<ClassBlueprint>,
}

impl<'a> Emitter<'a> {
    fn new(shared: Shared<'a>, context: FunctionContext) -> Self {
        Self {
            shared,
            builder: BytecodeBuilder::new(),
            unwind: UnwindPlanner::new(),
            context,
            functions: Vec::new(),
            classes: Vec::new(),
        }
    }

    // ========================================================================
    // Instruction helpers
    // ========================================================================

    fn emit(&mut self, instruction: Instruction) {
        self.builder.emit(instruction);
    }

    fn emit_op(&mut self, opcode: OpCode) {
        self.emit(Instruction::simple(opcode));
    }

    fn emit_with(&mut self, opcode: OpCode, operand: Operand) {
        self.emit(Instruction::with_operand(opcode, operand));
    }

    fn emit_jump(&mut self, opcode: OpCode, label: Label) {
        self.emit(jump(opcode, label));
    }

    fn make_label(&mut self) -> Label {
        self.builder.make_label()
    }

    fn bind_label(&mut self, label: Label) -> Result<()> {
        self.builder.bind_label(label)
    }

    fn binding_operand(&mut self, name: &str) -> Result<Operand> {
        Ok(Operand::Binding(self.builder.add_identifier(name)?))
    }

    fn property_operand(&mut self, name: &str) -> Result<Operand> {
        Ok(Operand::Property(self.builder.add_property(name)?))
    }

    /// Stamps following instructions with `position` and returns the
    /// position to restore. Nodes without a position inherit their parent's.
    fn enter_position(&mut self, position: SourcePosition) -> SourcePosition {
        if position == SourcePosition::default() {
            self.builder.position()
        } else {
            self.builder.set_position(position)
        }
    }

    /// An error located at the construct currently being emitted.
    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(kind, self.builder.position())
    }

    fn internal(&self, message: &str) -> CompileError {
        CompileError::internal(message, self.builder.position())
    }

    // ========================================================================
    // Environments and hoisting
    // ========================================================================

    /// Emits `CreateVariable` for every binding declared in `scope`.
    fn declare_scope(&mut self, scope: ScopeId) -> Result<()> {
        let resolution = self.shared.resolution;
        let tree = resolution.tree();
        for binding in &tree.scope(scope).bindings {
            let name = self.binding_operand(&binding.name)?;
            let mode = BindingMode {
                mutable: binding.mutable,
                lexical: binding.tdz_tracked,
                captured: binding.captured,
            };
            self.emit(Instruction::with_operands(
                OpCode::CreateVariable,
                vec![name, Operand::Mode(mode)],
            ));
        }
        Ok(())
    }

    /// Opens a runtime environment for `scope` and declares its bindings.
    fn enter_environment(&mut self, scope: ScopeId) -> Result<()> {
        let capacity = self.shared.resolution.tree().scope(scope).bindings.len() as u32;
        self.emit_with(OpCode::CreateLexicalEnvironment, Operand::Capacity(capacity));
        self.unwind.push_environment();
        self.declare_scope(scope)
    }

    fn leave_environment(&mut self) -> Result<()> {
        self.emit_op(OpCode::LeaveLexicalEnvironment);
        self.unwind
            .pop_environment()
            .map_err(|kind| self.error(kind))
    }

    /// Instantiates the function declarations of a statement list so they
    /// are callable before their declaration is reached.
    fn initialize_functions(&mut self, statements: &[Statement]) -> Result<()> {
        for function in scope::function_declarations(statements) {
            let saved = self.enter_position(function.position);
            let index = self.compile_function(function)?;
            self.emit_with(OpCode::NewFunction, Operand::Function(index));
            let name = function
                .name
                .as_ref()
                .ok_or_else(|| self.internal("function declaration without a name"))?;
            let binding = self.binding_operand(&name.name)?;
            self.emit_with(OpCode::InitializeBinding, binding);
            self.builder.set_position(saved);
        }
        Ok(())
    }

    // ========================================================================
    // Functions and classes
    // ========================================================================

    /// Emits `function` into its own executable and returns its index in
    /// this executable's function table.
    fn compile_function(&mut self, function: &FunctionNode) -> Result<u16> {
        let scopes = self
            .shared
            .resolution
            .function_scopes(function)
            .ok_or_else(|| self.internal("function was not resolved"))?;
        let strict = self.shared.resolution.tree().scope(scopes.body).strict;
        let context = FunctionContext::for_function(function.kind, self.context, strict);

        let mut emitter = Emitter::new(self.shared, context);
        emitter.builder.set_position(function.position);
        emitter.compile_function_body(function, scopes)?;

        let name = function.name.as_ref().map(|name| name.name.clone());
        let parameter_count = u16::try_from(function.params.iter().filter(|p| !p.is_rest).count())
            .map_err(|_| self.builder.limit_exceeded("parameters"))?;
        let executable = emitter.finish(name, parameter_count)?;

        let index = u16::try_from(self.functions.len())
            .map_err(|_| self.builder.limit_exceeded("functions"))?;
        self.functions.push(FunctionBlueprint {
            kind: function.kind,
            executable,
        });
        Ok(index)
    }

    fn compile_function_body(
        &mut self,
        function: &FunctionNode,
        scopes: scope::FunctionScopes,
    ) -> Result<()> {
        let resolution = self.shared.resolution;
        let tree = resolution.tree();
        match scopes.parameters {
            Some(parameters) => self.enter_environment(parameters)?,
            None => self.declare_scope(scopes.body)?,
        }

        for (index, param) in function.params.iter().enumerate() {
            let argument = u16::try_from(index)
                .map_err(|_| self.builder.limit_exceeded("parameters"))?;
            let opcode = if param.is_rest {
                OpCode::LoadRestArguments
            } else {
                OpCode::LoadArgument
            };
            self.emit_with(opcode, Operand::Argument(argument));
            if let Some(default) = &param.default {
                self.compile_default_value(default)?;
            }
            self.bind_target(&param.target, BindMode::Initialize)?;
        }

        if let Some(parameters) = scopes.parameters {
            // A var that shadows a parameter starts with the parameter's value.
            let copied: Vec<&str> = tree
                .scope(scopes.body)
                .bindings
                .iter()
                .filter(|binding| binding.kind == DeclarationKind::Var)
                .filter(|binding| tree.scope(parameters).find(&binding.name).is_some())
                .map(|binding| binding.name.as_str())
                .collect();
            for name in &copied {
                let binding = self.binding_operand(name)?;
                self.emit_with(OpCode::GetBinding, binding);
            }
            self.enter_environment(scopes.body)?;
            for name in copied.iter().rev() {
                let binding = self.binding_operand(name)?;
                self.emit_with(OpCode::InitializeBinding, binding);
            }
        }

        if let Some(self_binding) = scopes.self_binding {
            let name = &tree.binding(self_binding).name;
            self.emit_op(OpCode::LoadCallee);
            let binding = self.binding_operand(name)?;
            self.emit_with(OpCode::InitializeBinding, binding);
        }

        self.initialize_functions(&function.body)?;
        self.compile_statements(&function.body)?;
        self.emit_op(OpCode::LoadUndefined);
        self.emit_op(OpCode::Return);

        // The frame's environments disappear with the frame.
        if scopes.parameters.is_some() {
            for _ in 0..2 {
                self.unwind
                    .pop_environment()
                    .map_err(|kind| self.error(kind))?;
            }
        }
        Ok(())
    }

    /// Emits a class and leaves the class value on the stack.
    fn compile_class(&mut self, class: &ClassNode, is_expression: bool) -> Result<()> {
        let inner = if is_expression {
            self.shared.resolution.class_scope(class)
        } else {
            None
        };
        if let Some(scope) = inner {
            self.enter_environment(scope)?;
        }

        if let Some(super_class) = &class.super_class {
            self.compile_expression(super_class)?;
        }
        let constructor = class
            .constructor
            .as_ref()
            .map(|constructor| self.compile_function(constructor))
            .transpose()?;
        let methods = class
            .methods
            .iter()
            .map(|method| {
                Ok(ClassMethodBlueprint {
                    key: method.key.clone(),
                    kind: method.kind,
                    is_static: method.is_static,
                    function: self.compile_function(&method.function)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let index = u16::try_from(self.classes.len())
            .map_err(|_| self.builder.limit_exceeded("classes"))?;
        self.classes.push(ClassBlueprint {
            name: class.name.as_ref().map(|name| name.name.clone()),
            constructor,
            methods,
            has_super_class: class.super_class.is_some(),
        });
        self.emit_with(OpCode::NewClass, Operand::Class(index));

        if let (Some(_), Some(name)) = (inner, &class.name) {
            self.emit_op(OpCode::Dup);
            let binding = self.binding_operand(&name.name)?;
            self.emit_with(OpCode::InitializeBinding, binding);
            self.leave_environment()?;
        }
        Ok(())
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Stores the value on top of the stack into a declared target,
    /// consuming it.
    fn bind_target(&mut self, target: &BindingTarget, mode: BindMode) -> Result<()> {
        match target {
            BindingTarget::Identifier(id) => {
                let binding = self.binding_operand(&id.name)?;
                let opcode = match mode {
                    BindMode::Initialize => OpCode::InitializeBinding,
                    BindMode::Assign => OpCode::SetBinding,
                };
                self.emit_with(opcode, binding);
                Ok(())
            }
            BindingTarget::Pattern(pattern) => self.bind_pattern(pattern, mode),
        }
    }

    /// Destructures the value on top of the stack, consuming it. With an
    /// object rest element every extracted key is left below the source so
    /// `ObjectRest` can exclude it.
    fn bind_pattern(&mut self, pattern: &BindingPattern, mode: BindMode) -> Result<()> {
        let keep_keys = pattern.kind == PatternKind::Object && pattern.rest.is_some();
        let mut kept_keys: u16 = 0;
        for (index, element) in pattern.elements.iter().enumerate() {
            let Some(element) = element else {
                continue;
            };
            self.emit_op(OpCode::Dup);
            match (pattern.kind, &element.key) {
                (PatternKind::Object, Some(key)) if keep_keys => {
                    // [key, source, source, key]
                    self.compile_property_key(key)?;
                    self.emit_op(OpCode::Dup);
                    self.emit_with(OpCode::Rotate, Operand::ArgCount(4));
                    self.emit_op(OpCode::GetByValue);
                    kept_keys = kept_keys
                        .checked_add(1)
                        .ok_or_else(|| self.builder.limit_exceeded("pattern elements"))?;
                }
                (PatternKind::Object, Some(PropertyKey::Identifier(name))) => {
                    let property = self.property_operand(name)?;
                    self.emit_with(OpCode::GetById, property);
                }
                (PatternKind::Object, Some(key)) => {
                    self.compile_property_key(key)?;
                    self.emit_op(OpCode::GetByValue);
                }
                (PatternKind::Object, None) => {
                    return Err(self.internal("object pattern element without a key"));
                }
                (PatternKind::Array, _) => {
                    self.compile_literal(&Literal::Number(index as f64))?;
                    self.emit_op(OpCode::GetByValue);
                }
            }
            if let Some(default) = &element.default {
                self.compile_default_value(default)?;
            }
            self.bind_target(&element.target, mode)?;
        }

        match (pattern.kind, &pattern.rest) {
            (PatternKind::Object, Some(rest)) => {
                self.emit_with(OpCode::ObjectRest, Operand::ArgCount(kept_keys));
                self.bind_target(rest, mode)
            }
            (PatternKind::Array, Some(rest)) => {
                let skipped = u16::try_from(pattern.elements.len())
                    .map_err(|_| self.builder.limit_exceeded("pattern elements"))?;
                self.emit_op(OpCode::Dup);
                self.emit_with(OpCode::ArrayRest, Operand::ArgCount(skipped));
                self.bind_target(rest, mode)?;
                self.emit_op(OpCode::Pop);
                Ok(())
            }
            (_, None) => {
                self.emit_op(OpCode::Pop);
                Ok(())
            }
        }
    }

    /// Pushes a property key as a value.
    fn compile_property_key(&mut self, key: &PropertyKey) -> Result<()> {
        match key {
            PropertyKey::Identifier(name) => self.compile_literal(&Literal::String(name.clone())),
            PropertyKey::Number(n) => self.compile_literal(&Literal::Number(*n)),
            PropertyKey::Computed(key) => self.compile_expression(key),
        }
    }

    /// Replaces an undefined value on top of the stack with `default`.
    fn compile_default_value(&mut self, default: &Expression) -> Result<()> {
        let skip = self.make_label();
        self.emit_op(OpCode::Dup);
        self.emit_op(OpCode::LoadUndefined);
        self.emit_op(OpCode::StrictEq);
        self.emit_jump(OpCode::JumpIfFalse, skip);
        self.emit_op(OpCode::Pop);
        self.compile_expression(default)?;
        self.bind_label(skip)
    }

    /// Pushes the value of an identifier reference.
    fn compile_identifier(&mut self, id: &Identifier) -> Result<()> {
        let Shared {
            resolution, tdz, ..
        } = self.shared;
        let reference = resolution
            .reference(id)
            .ok_or_else(|| self.internal("identifier was not resolved"))?;
        match reference {
            Reference::Binding(binding_id) => {
                let binding = resolution.tree().binding(binding_id);
                let operand = self.binding_operand(&id.name)?;
                if tdz.needs_check(id, binding, false) {
                    self.emit_with(OpCode::ThrowIfTDZ, operand);
                }
                self.emit_with(OpCode::GetBinding, operand);
            }
            Reference::Global => {
                let index = self.builder.add_identifier(&id.name)?;
                self.emit_with(OpCode::GetGlobal, Operand::Global(index));
            }
        }
        Ok(())
    }

    /// Stores the value on top of the stack through an identifier
    /// reference, consuming it.
    fn store_identifier(&mut self, id: &Identifier) -> Result<()> {
        let Shared {
            resolution, tdz, ..
        } = self.shared;
        let reference = resolution
            .reference(id)
            .ok_or_else(|| self.internal("identifier was not resolved"))?;
        match reference {
            Reference::Binding(binding_id) => {
                let binding = resolution.tree().binding(binding_id);
                let operand = self.binding_operand(&id.name)?;
                if tdz.needs_check(id, binding, true) {
                    self.emit_with(OpCode::ThrowIfTDZ, operand);
                }
                if binding.mutable {
                    self.emit_with(OpCode::SetBinding, operand);
                } else if binding.kind == DeclarationKind::Function && !self.context.strict {
                    // Sloppy writes to a function expression's own name are ignored.
                    self.emit_op(OpCode::Pop);
                } else {
                    self.emit_with(OpCode::ThrowConstAssignment, operand);
                }
            }
            Reference::Global => {
                let index = self.builder.add_identifier(&id.name)?;
                self.emit_with(OpCode::SetGlobal, Operand::Global(index));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Non-local exits
    // ========================================================================

    /// Emits the steps of an unwind plan followed by its final transfer.
    fn emit_unwind_plan(&mut self, plan: UnwindPlan, completion: CompletionType) -> Result<()> {
        for step in plan.steps {
            match step {
                UnwindStep::LeaveEnvironment => self.emit_op(OpCode::LeaveLexicalEnvironment),
                UnwindStep::RunFinally { region, cleanup } => {
                    let resume = self.make_label();
                    self.emit_enter_finally(region, completion, cleanup, resume);
                    self.bind_label(resume)?;
                }
            }
        }
        match plan.destination {
            Destination::Jump(label) => self.emit_jump(OpCode::Jump, label),
            Destination::Return => self.emit_op(OpCode::Return),
        }
        Ok(())
    }

    fn emit_enter_finally(
        &mut self,
        region: u16,
        completion: CompletionType,
        cleanup: Label,
        resume: Label,
    ) {
        self.emit(Instruction::with_operands(
            OpCode::EnterFinally,
            vec![
                Operand::Region(region),
                Operand::Completion(completion),
                Operand::Label(cleanup),
                Operand::Label(resume),
            ],
        ));
    }

    /// Resolves labels and attaches the nested tables.
    fn finish(self, name: Option<String>, parameter_count: u16) -> Result<Executable> {
        self.unwind
            .finish()
            .map_err(|kind| CompileError::new(kind, self.builder.position()))?;
        let finally_regions = self.unwind.region_count();
        let mut executable = self.builder.finish()?;
        executable.name = name;
        executable.functions = self.functions;
        executable.classes = self.classes;
        executable.finally_regions = finally_regions;
        executable.parameter_count = parameter_count;
        executable.strict = self.context.strict;

        tracing::debug!(
            name = executable.name.as_deref().unwrap_or("<program>"),
            instructions = executable.instructions.len(),
            functions = executable.functions.len(),
            finally_regions,
            "emitted executable"
        );
        Ok(executable)
    }
}
