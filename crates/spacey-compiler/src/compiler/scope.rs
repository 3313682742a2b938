// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Scope management for variable resolution during compilation.
//!
//! The resolver runs once over the whole program before any code is
//! emitted. It builds a tree of [`Scope`]s, decides for every identifier
//! whether it names a declared [`Binding`] or a global, and records which
//! bindings are captured by nested functions. The tree is borrowed
//! immutably for the rest of the compilation, so results are keyed by node
//! address.

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind, Result};

/// Index of a scope in a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(pub(crate) u32);

/// A binding: the scope that owns it plus its slot in that scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId {
    /// Owning scope
    pub scope: ScopeId,
    /// Slot in [`Scope::bindings`]
    pub index: u32,
}

/// What introduced a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The program
    Global,
    /// A function body; receives `var` declarations
    Function,
    /// Parameters of a function whose parameter list can run code
    Parameter,
    /// A block, loop head, switch body or named class expression
    Block,
    /// A catch clause: its parameter plus the catch block's declarations
    Catch,
}

impl ScopeKind {
    /// Whether `var` declarations land in this scope.
    pub fn is_var_scope(self) -> bool {
        matches!(self, ScopeKind::Global | ScopeKind::Function)
    }
}

/// How a name was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
    /// `class`
    Class,
    /// A formal parameter
    Parameter,
    /// A catch clause parameter
    CatchParameter,
    /// A function declaration, or a function expression's own name
    Function,
}

impl DeclarationKind {
    /// Whether the binding has a temporal dead zone.
    pub fn is_lexical(self) -> bool {
        matches!(
            self,
            DeclarationKind::Let | DeclarationKind::Const | DeclarationKind::Class
        )
    }
}

/// A declared name.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// The declared name
    pub name: String,
    /// How it was declared
    pub kind: DeclarationKind,
    /// Whether assignments are allowed
    pub mutable: bool,
    /// Referenced from a function other than the one declaring it
    pub captured: bool,
    /// Starts uninitialized, so reads may need a TDZ check
    pub tdz_tracked: bool,
    /// Position of the parameter that declares it
    pub parameter_index: Option<u32>,
    /// Where it was first declared
    pub position: SourcePosition,
}

/// A lexical scope.
#[derive(Debug, Clone)]
pub struct Scope {
    /// What introduced the scope
    pub kind: ScopeKind,
    /// Enclosing scope; None only for the global scope
    pub parent: Option<ScopeId>,
    /// Outermost scope of the function (or program) this scope belongs to
    pub function: ScopeId,
    /// Whether code in this scope is strict
    pub strict: bool,
    /// Declared names, in declaration order
    pub bindings: Vec<Binding>,
    simple_catch_parameter: bool,
}

impl Scope {
    /// Finds a binding declared directly in this scope.
    pub fn find(&self, name: &str) -> Option<u32> {
        self.bindings
            .iter()
            .position(|binding| binding.name == name)
            .map(|index| index as u32)
    }
}

/// All scopes of a compilation unit.
#[derive(Debug, Default, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    /// Gets a scope.
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    /// Gets a binding.
    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.scope(id.scope).bindings[id.index as usize]
    }

    fn binding_mut(&mut self, id: BindingId) -> &mut Binding {
        &mut self.scopes[id.scope.0 as usize].bindings[id.index as usize]
    }

    /// Resolves `name` from `from`, walking outwards.
    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<BindingId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scope(id);
            if let Some(index) = scope.find(name) {
                return Some(BindingId { scope: id, index });
            }
            current = scope.parent;
        }
        None
    }

    /// Number of scopes.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Iterates over all bindings.
    pub fn bindings(&self) -> impl Iterator<Item = (BindingId, &Binding)> {
        self.scopes.iter().enumerate().flat_map(|(scope, s)| {
            s.bindings.iter().enumerate().map(move |(index, binding)| {
                (
                    BindingId {
                        scope: ScopeId(scope as u32),
                        index: index as u32,
                    },
                    binding,
                )
            })
        })
    }

    fn push(&mut self, kind: ScopeKind, parent: Option<ScopeId>, strict: bool) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let function = match (kind, parent) {
            (ScopeKind::Global | ScopeKind::Parameter, _) | (_, None) => id,
            (ScopeKind::Function, Some(parent)) => {
                if self.scope(parent).kind == ScopeKind::Parameter {
                    parent
                } else {
                    id
                }
            }
            (_, Some(parent)) => self.scope(parent).function,
        };
        self.scopes.push(Scope {
            kind,
            parent,
            function,
            strict,
            bindings: Vec::new(),
            simple_catch_parameter: false,
        });
        id
    }
}

/// What an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// A statically resolved binding
    Binding(BindingId),
    /// A property of the global object
    Global,
}

/// Scopes created for one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionScopes {
    /// Separate parameter scope, present iff the parameter list can run code
    pub parameters: Option<ScopeId>,
    /// The function body scope
    pub body: ScopeId,
    /// A function expression's binding of its own name
    pub self_binding: Option<BindingId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScopeOwner {
    Block,
    For,
    Switch,
    Catch,
    Class,
}

fn node_key<T>(node: &T) -> usize {
    node as *const T as usize
}

/// The resolver's output.
#[derive(Debug, Default)]
pub struct Resolution {
    tree: ScopeTree,
    references: FxHashMap<usize, Reference>,
    scopes: FxHashMap<(ScopeOwner, usize), ScopeId>,
    functions: FxHashMap<usize, FunctionScopes>,
}

impl Resolution {
    /// The scope tree.
    pub fn tree(&self) -> &ScopeTree {
        &self.tree
    }

    /// The program scope.
    pub fn global_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    /// What `identifier` refers to.
    pub fn reference(&self, identifier: &Identifier) -> Option<Reference> {
        self.references.get(&node_key(identifier)).copied()
    }

    /// The binding `identifier` refers to, if it is not a global.
    pub fn binding_of(&self, identifier: &Identifier) -> Option<(BindingId, &Binding)> {
        match self.reference(identifier)? {
            Reference::Binding(id) => Some((id, self.tree.binding(id))),
            Reference::Global => None,
        }
    }

    /// Scope of a block that declares names.
    pub fn block_scope(&self, block: &BlockStatement) -> Option<ScopeId> {
        self.scopes
            .get(&(ScopeOwner::Block, node_key(block)))
            .copied()
    }

    /// Scope of a `for (let ...)` head.
    pub fn for_scope(&self, statement: &ForStatement) -> Option<ScopeId> {
        self.scopes
            .get(&(ScopeOwner::For, node_key(statement)))
            .copied()
    }

    /// Scope of a switch body that declares names.
    pub fn switch_scope(&self, statement: &SwitchStatement) -> Option<ScopeId> {
        self.scopes
            .get(&(ScopeOwner::Switch, node_key(statement)))
            .copied()
    }

    /// Scope of a catch clause.
    pub fn catch_scope(&self, clause: &CatchClause) -> Option<ScopeId> {
        self.scopes
            .get(&(ScopeOwner::Catch, node_key(clause)))
            .copied()
    }

    /// Scope holding a named class expression's inner name.
    pub fn class_scope(&self, class: &ClassNode) -> Option<ScopeId> {
        self.scopes
            .get(&(ScopeOwner::Class, node_key(class)))
            .copied()
    }

    /// Scopes of a function.
    pub fn function_scopes(&self, function: &FunctionNode) -> Option<FunctionScopes> {
        self.functions.get(&node_key(function)).copied()
    }
}

/// Resolves every identifier in `program`.
pub fn resolve(program: &Program, config: &CompilerConfig) -> Result<Resolution> {
    let mut resolver = Resolver {
        config,
        resolution: Resolution::default(),
        current: ScopeId(0),
        allow_duplicate_parameters: false,
    };
    resolver.resolve_program(program)?;

    let resolution = resolver.resolution;
    tracing::debug!(
        scopes = resolution.tree.len(),
        references = resolution.references.len(),
        captured = resolution
            .tree
            .bindings()
            .filter(|(_, binding)| binding.captured)
            .count(),
        "resolved scopes"
    );
    Ok(resolution)
}

/// Follows a chain of labels to the labelled statement.
pub(crate) fn unlabeled(mut statement: &Statement) -> &Statement {
    while let StatementKind::Labeled(labeled) = &statement.kind {
        statement = &labeled.body;
    }
    statement
}

/// Function declarations directly in `statements`.
pub(crate) fn function_declarations(
    statements: &[Statement],
) -> impl Iterator<Item = &FunctionNode> {
    statements
        .iter()
        .filter_map(|statement| match &unlabeled(statement).kind {
            StatementKind::FunctionDeclaration(function) => Some(function),
            _ => None,
        })
}

/// Collects `var` declared names, recursing into nested statements but not
/// into functions.
fn collect_var_names<'a>(statement: &'a Statement, names: &mut Vec<&'a Identifier>) {
    match &statement.kind {
        StatementKind::VariableDeclaration(decl) => {
            if decl.kind == VariableKind::Var {
                for declarator in &decl.declarations {
                    declarator.target.bound_names(names);
                }
            }
        }
        StatementKind::Block(block) => {
            for inner in &block.body {
                collect_var_names(inner, names);
            }
        }
        StatementKind::If(if_stmt) => {
            collect_var_names(&if_stmt.consequent, names);
            if let Some(alternate) = &if_stmt.alternate {
                collect_var_names(alternate, names);
            }
        }
        StatementKind::While(while_stmt) => collect_var_names(&while_stmt.body, names),
        StatementKind::DoWhile(do_while) => collect_var_names(&do_while.body, names),
        StatementKind::For(for_stmt) => {
            if let Some(ForInit::Declaration(decl)) = &for_stmt.init {
                if decl.kind == VariableKind::Var {
                    for declarator in &decl.declarations {
                        declarator.target.bound_names(names);
                    }
                }
            }
            collect_var_names(&for_stmt.body, names);
        }
        StatementKind::Switch(switch_stmt) => {
            for case in &switch_stmt.cases {
                for inner in &case.consequent {
                    collect_var_names(inner, names);
                }
            }
        }
        StatementKind::Try(try_stmt) => {
            for inner in &try_stmt.block.body {
                collect_var_names(inner, names);
            }
            if let Some(handler) = &try_stmt.handler {
                for inner in &handler.body.body {
                    collect_var_names(inner, names);
                }
            }
            if let Some(finalizer) = &try_stmt.finalizer {
                for inner in &finalizer.body {
                    collect_var_names(inner, names);
                }
            }
        }
        StatementKind::Labeled(labeled) => collect_var_names(&labeled.body, names),
        _ => {}
    }
}

/// Lexically scoped declarations directly in `statements`.
fn lexical_declarations(
    statements: &[Statement],
    include_functions: bool,
) -> Vec<(&Identifier, DeclarationKind)> {
    let mut declarations = Vec::new();
    for statement in statements {
        match &unlabeled(statement).kind {
            StatementKind::VariableDeclaration(decl) if decl.kind != VariableKind::Var => {
                let kind = if decl.kind == VariableKind::Const {
                    DeclarationKind::Const
                } else {
                    DeclarationKind::Let
                };
                let mut names = Vec::new();
                for declarator in &decl.declarations {
                    declarator.target.bound_names(&mut names);
                }
                declarations.extend(names.into_iter().map(|name| (name, kind)));
            }
            StatementKind::ClassDeclaration(class) => {
                if let Some(name) = &class.name {
                    declarations.push((name, DeclarationKind::Class));
                }
            }
            StatementKind::FunctionDeclaration(function) if include_functions => {
                if let Some(name) = &function.name {
                    declarations.push((name, DeclarationKind::Function));
                }
            }
            _ => {}
        }
    }
    declarations
}

struct Resolver<'c> {
    config: &'c CompilerConfig,
    resolution: Resolution,
    current: ScopeId,
    allow_duplicate_parameters: bool,
}

impl Resolver<'_> {
    // ========================================================================
    // Scope bookkeeping
    // ========================================================================

    fn tree(&self) -> &ScopeTree {
        &self.resolution.tree
    }

    fn is_strict(&self) -> bool {
        self.tree().scope(self.current).strict
    }

    fn push_scope(&mut self, kind: ScopeKind) -> ScopeId {
        let strict = self.is_strict();
        self.resolution.tree.push(kind, Some(self.current), strict)
    }

    fn with_scope<T>(
        &mut self,
        scope: ScopeId,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = std::mem::replace(&mut self.current, scope);
        let result = f(self);
        self.current = saved;
        result
    }

    /// Declares `name` in `scope`, merging compatible redeclarations.
    fn declare(
        &mut self,
        scope: ScopeId,
        name: &Identifier,
        kind: DeclarationKind,
        parameter_index: Option<u32>,
    ) -> Result<BindingId> {
        let allow_duplicate_parameters = self.allow_duplicate_parameters;
        let target = &mut self.resolution.tree.scopes[scope.0 as usize];
        let scope_kind = target.kind;
        let strict = target.strict;

        if let Some(index) = target.find(&name.name) {
            let existing = &mut target.bindings[index as usize];
            let compatible = match (existing.kind, kind) {
                (a, b) if a.is_lexical() || b.is_lexical() => false,
                (DeclarationKind::Parameter, DeclarationKind::Parameter) => {
                    allow_duplicate_parameters
                }
                (DeclarationKind::CatchParameter, _) | (_, DeclarationKind::CatchParameter) => {
                    false
                }
                (DeclarationKind::Function, DeclarationKind::Function)
                    if !scope_kind.is_var_scope() =>
                {
                    !strict
                }
                _ => scope_kind.is_var_scope(),
            };
            if !compatible {
                return Err(CompileError::new(
                    CompileErrorKind::DuplicateBinding(name.name.clone()),
                    name.position,
                ));
            }
            if kind == DeclarationKind::Function && existing.kind == DeclarationKind::Var {
                existing.kind = DeclarationKind::Function;
            }
            return Ok(BindingId { scope, index });
        }

        let tdz_tracked = kind.is_lexical()
            || (kind == DeclarationKind::Parameter && scope_kind == ScopeKind::Parameter);
        target.bindings.push(Binding {
            name: name.name.clone(),
            kind,
            mutable: kind != DeclarationKind::Const,
            captured: false,
            tdz_tracked,
            parameter_index,
            position: name.position,
        });
        tracing::trace!(name = %name.name, ?kind, scope = scope.0, "declared binding");
        Ok(BindingId {
            scope,
            index: target.bindings.len() as u32 - 1,
        })
    }

    fn declare_lexicals(
        &mut self,
        scope: ScopeId,
        statements: &[Statement],
        include_functions: bool,
    ) -> Result<()> {
        for (name, kind) in lexical_declarations(statements, include_functions) {
            self.declare(scope, name, kind, None)?;
        }
        Ok(())
    }

    fn hoist_vars(&mut self, scope: ScopeId, statements: &[Statement]) -> Result<()> {
        let mut names = Vec::new();
        for statement in statements {
            collect_var_names(statement, &mut names);
        }
        for name in names {
            self.declare(scope, name, DeclarationKind::Var, None)?;
        }
        for function in function_declarations(statements) {
            if let Some(name) = &function.name {
                self.declare(scope, name, DeclarationKind::Function, None)?;
            }
        }
        Ok(())
    }

    /// A `var` may not be hoisted across a lexical declaration of its name.
    fn check_var_hoisting(&self, name: &Identifier) -> Result<()> {
        let tree = self.tree();
        let mut current = self.current;
        loop {
            let scope = tree.scope(current);
            if scope.kind.is_var_scope() {
                return Ok(());
            }
            if let Some(index) = scope.find(&name.name) {
                let binding = &scope.bindings[index as usize];
                let allowed = binding.kind == DeclarationKind::CatchParameter
                    && scope.simple_catch_parameter;
                if !allowed {
                    return Err(CompileError::new(
                        CompileErrorKind::DuplicateBinding(name.name.clone()),
                        name.position,
                    ));
                }
            }
            match scope.parent {
                Some(parent) => current = parent,
                None => return Ok(()),
            }
        }
    }

    // ========================================================================
    // References
    // ========================================================================

    fn resolve_reference(&mut self, identifier: &Identifier) -> Result<()> {
        let current_function = self.tree().scope(self.current).function;
        let reference = match self.tree().lookup(self.current, &identifier.name) {
            Some(id) => {
                if self.tree().scope(id.scope).function != current_function {
                    self.resolution.tree.binding_mut(id).captured = true;
                }
                Reference::Binding(id)
            }
            None if self.config.allow_global_references => Reference::Global,
            None => {
                return Err(CompileError::new(
                    CompileErrorKind::UnresolvableBinding(identifier.name.clone()),
                    identifier.position,
                ));
            }
        };
        self.resolution
            .references
            .insert(node_key(identifier), reference);
        Ok(())
    }

    /// Records the binding a declaring occurrence refers to.
    fn resolve_declared(&mut self, identifier: &Identifier) -> Result<()> {
        match self.tree().lookup(self.current, &identifier.name) {
            Some(id) => {
                self.resolution
                    .references
                    .insert(node_key(identifier), Reference::Binding(id));
                Ok(())
            }
            None => Err(CompileError::internal(
                format!("declaration of '{}' was not hoisted", identifier.name),
                identifier.position,
            )),
        }
    }

    fn resolve_binding_target(&mut self, target: &BindingTarget) -> Result<()> {
        match target {
            BindingTarget::Identifier(identifier) => self.resolve_declared(identifier),
            BindingTarget::Pattern(pattern) => {
                for element in pattern.elements.iter().flatten() {
                    if let Some(PropertyKey::Computed(key)) = &element.key {
                        self.resolve_expression(key)?;
                    }
                    if let Some(default) = &element.default {
                        self.resolve_expression(default)?;
                    }
                    self.resolve_binding_target(&element.target)?;
                }
                if let Some(rest) = &pattern.rest {
                    self.resolve_binding_target(rest)?;
                }
                Ok(())
            }
        }
    }

    // ========================================================================
    // Program and functions
    // ========================================================================

    fn resolve_program(&mut self, program: &Program) -> Result<()> {
        let strict = program.strict || self.config.strict;
        let global = self.resolution.tree.push(ScopeKind::Global, None, strict);
        self.current = global;
        self.hoist_vars(global, &program.body)?;
        self.declare_lexicals(global, &program.body, false)?;
        self.resolve_statements(&program.body)
    }

    fn resolve_function(&mut self, function: &FunctionNode, is_expression: bool) -> Result<()> {
        let outer = self.current;
        let strict = self.is_strict()
            || function.strict
            || !matches!(function.kind, FunctionKind::Normal | FunctionKind::Arrow);

        let parameters = (!function.has_simple_parameter_bindings())
            .then(|| self.resolution.tree.push(ScopeKind::Parameter, Some(outer), strict));
        let body = self.resolution.tree.push(
            ScopeKind::Function,
            Some(parameters.unwrap_or(outer)),
            strict,
        );
        let parameter_scope = parameters.unwrap_or(body);

        self.allow_duplicate_parameters = !strict
            && function.has_simple_parameter_list()
            && function.kind == FunctionKind::Normal;
        for (index, param) in function.params.iter().enumerate() {
            let mut names = Vec::new();
            param.target.bound_names(&mut names);
            for name in names {
                self.declare(
                    parameter_scope,
                    name,
                    DeclarationKind::Parameter,
                    Some(index as u32),
                )?;
            }
        }
        self.allow_duplicate_parameters = false;

        self.hoist_vars(body, &function.body)?;
        self.declare_lexicals(body, &function.body, false)?;
        if let Some(parameters) = parameters {
            for (name, _) in lexical_declarations(&function.body, false) {
                if self.tree().scope(parameters).find(&name.name).is_some() {
                    return Err(CompileError::new(
                        CompileErrorKind::DuplicateBinding(name.name.clone()),
                        name.position,
                    ));
                }
            }
        }

        let mut self_binding = None;
        if is_expression {
            if let Some(name) = &function.name {
                let shadowed = self.tree().lookup(body, &name.name).is_some_and(|id| {
                    id.scope == body || Some(id.scope) == parameters
                });
                if !shadowed {
                    let id = self.declare(body, name, DeclarationKind::Function, None)?;
                    self.resolution.tree.binding_mut(id).mutable = false;
                    self_binding = Some(id);
                }
            }
        }

        self.resolution.functions.insert(
            node_key(function),
            FunctionScopes {
                parameters,
                body,
                self_binding,
            },
        );

        self.with_scope(parameter_scope, |this| {
            for param in &function.params {
                if let Some(default) = &param.default {
                    this.resolve_expression(default)?;
                }
                this.resolve_binding_target(&param.target)?;
            }
            Ok(())
        })?;
        self.with_scope(body, |this| this.resolve_statements(&function.body))
    }

    fn resolve_class(&mut self, class: &ClassNode, is_expression: bool) -> Result<()> {
        let scope = match (&class.name, is_expression) {
            (Some(name), true) => {
                let scope = self.push_scope(ScopeKind::Block);
                let id = self.declare(scope, name, DeclarationKind::Class, None)?;
                self.resolution.tree.binding_mut(id).mutable = false;
                self.resolution
                    .scopes
                    .insert((ScopeOwner::Class, node_key(class)), scope);
                scope
            }
            _ => self.current,
        };

        self.with_scope(scope, |this| {
            if let (Some(name), true) = (&class.name, is_expression) {
                this.resolve_declared(name)?;
            }
            if let Some(super_class) = &class.super_class {
                this.resolve_expression(super_class)?;
            }
            if let Some(constructor) = &class.constructor {
                this.resolve_function(constructor, false)?;
            }
            for method in &class.methods {
                this.resolve_function(&method.function, false)?;
            }
            Ok(())
        })
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn resolve_statements(&mut self, statements: &[Statement]) -> Result<()> {
        for statement in statements {
            self.resolve_statement(statement)?;
        }
        Ok(())
    }

    fn resolve_block(&mut self, block: &BlockStatement) -> Result<()> {
        if lexical_declarations(&block.body, true).is_empty() {
            return self.resolve_statements(&block.body);
        }
        let scope = self.push_scope(ScopeKind::Block);
        self.resolution
            .scopes
            .insert((ScopeOwner::Block, node_key(block)), scope);
        self.declare_lexicals(scope, &block.body, true)?;
        self.with_scope(scope, |this| this.resolve_statements(&block.body))
    }

    fn resolve_variable_declaration(&mut self, decl: &VariableDeclaration) -> Result<()> {
        for declarator in &decl.declarations {
            if let Some(init) = &declarator.init {
                self.resolve_expression(init)?;
            }
            if decl.kind == VariableKind::Var {
                let mut names = Vec::new();
                declarator.target.bound_names(&mut names);
                for name in names {
                    self.check_var_hoisting(name)?;
                }
            }
            self.resolve_binding_target(&declarator.target)?;
        }
        Ok(())
    }

    fn resolve_statement(&mut self, statement: &Statement) -> Result<()> {
        match &statement.kind {
            StatementKind::VariableDeclaration(decl) => self.resolve_variable_declaration(decl),
            StatementKind::FunctionDeclaration(function) => {
                if let Some(name) = &function.name {
                    self.resolve_declared(name)?;
                }
                self.resolve_function(function, false)
            }
            StatementKind::ClassDeclaration(class) => {
                if let Some(name) = &class.name {
                    self.resolve_declared(name)?;
                }
                self.resolve_class(class, false)
            }
            StatementKind::Expression(expr) => self.resolve_expression(&expr.expression),
            StatementKind::Block(block) => self.resolve_block(block),
            StatementKind::If(if_stmt) => {
                self.resolve_expression(&if_stmt.test)?;
                self.resolve_statement(&if_stmt.consequent)?;
                if let Some(alternate) = &if_stmt.alternate {
                    self.resolve_statement(alternate)?;
                }
                Ok(())
            }
            StatementKind::While(while_stmt) => {
                self.resolve_expression(&while_stmt.test)?;
                self.resolve_statement(&while_stmt.body)
            }
            StatementKind::DoWhile(do_while) => {
                self.resolve_statement(&do_while.body)?;
                self.resolve_expression(&do_while.test)
            }
            StatementKind::For(for_stmt) => self.resolve_for(for_stmt),
            StatementKind::Switch(switch_stmt) => self.resolve_switch(switch_stmt),
            StatementKind::Return(ret) => match &ret.argument {
                Some(argument) => self.resolve_expression(argument),
                None => Ok(()),
            },
            StatementKind::Throw(throw_stmt) => self.resolve_expression(&throw_stmt.argument),
            StatementKind::Try(try_stmt) => {
                self.resolve_block(&try_stmt.block)?;
                if let Some(handler) = &try_stmt.handler {
                    self.resolve_catch(handler)?;
                }
                if let Some(finalizer) = &try_stmt.finalizer {
                    self.resolve_block(finalizer)?;
                }
                Ok(())
            }
            StatementKind::Labeled(labeled) => self.resolve_statement(&labeled.body),
            StatementKind::Break(_) | StatementKind::Continue(_) | StatementKind::Empty => Ok(()),
        }
    }

    fn resolve_for(&mut self, for_stmt: &ForStatement) -> Result<()> {
        let head = match &for_stmt.init {
            Some(ForInit::Declaration(decl)) if decl.kind != VariableKind::Var => {
                let scope = self.push_scope(ScopeKind::Block);
                self.resolution
                    .scopes
                    .insert((ScopeOwner::For, node_key(for_stmt)), scope);
                let kind = if decl.kind == VariableKind::Const {
                    DeclarationKind::Const
                } else {
                    DeclarationKind::Let
                };
                let mut names = Vec::new();
                for declarator in &decl.declarations {
                    declarator.target.bound_names(&mut names);
                }
                for name in names {
                    self.declare(scope, name, kind, None)?;
                }
                scope
            }
            _ => self.current,
        };

        self.with_scope(head, |this| {
            match &for_stmt.init {
                Some(ForInit::Declaration(decl)) => this.resolve_variable_declaration(decl)?,
                Some(ForInit::Expression(expr)) => this.resolve_expression(expr)?,
                None => {}
            }
            if let Some(test) = &for_stmt.test {
                this.resolve_expression(test)?;
            }
            if let Some(update) = &for_stmt.update {
                this.resolve_expression(update)?;
            }
            this.resolve_statement(&for_stmt.body)
        })
    }

    fn resolve_switch(&mut self, switch_stmt: &SwitchStatement) -> Result<()> {
        self.resolve_expression(&switch_stmt.discriminant)?;

        let has_declarations = switch_stmt
            .cases
            .iter()
            .any(|case| !lexical_declarations(&case.consequent, true).is_empty());
        let scope = if has_declarations {
            let scope = self.push_scope(ScopeKind::Block);
            self.resolution
                .scopes
                .insert((ScopeOwner::Switch, node_key(switch_stmt)), scope);
            for case in &switch_stmt.cases {
                self.declare_lexicals(scope, &case.consequent, true)?;
            }
            scope
        } else {
            self.current
        };

        self.with_scope(scope, |this| {
            for case in &switch_stmt.cases {
                if let Some(test) = &case.test {
                    this.resolve_expression(test)?;
                }
                this.resolve_statements(&case.consequent)?;
            }
            Ok(())
        })
    }

    fn resolve_catch(&mut self, handler: &CatchClause) -> Result<()> {
        let declarations = lexical_declarations(&handler.body.body, true);
        if handler.param.is_none() && declarations.is_empty() {
            return self.resolve_statements(&handler.body.body);
        }

        let scope = self.push_scope(ScopeKind::Catch);
        self.resolution
            .scopes
            .insert((ScopeOwner::Catch, node_key(handler)), scope);
        if let Some(param) = &handler.param {
            let mut names = Vec::new();
            param.bound_names(&mut names);
            for name in names {
                self.declare(scope, name, DeclarationKind::CatchParameter, None)?;
            }
            self.resolution.tree.scopes[scope.0 as usize].simple_catch_parameter =
                matches!(param, BindingTarget::Identifier(_));
        }
        for (name, kind) in declarations {
            self.declare(scope, name, kind, None)?;
        }

        self.with_scope(scope, |this| {
            if let Some(param) = &handler.param {
                this.resolve_binding_target(param)?;
            }
            this.resolve_statements(&handler.body.body)
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn resolve_arguments(&mut self, arguments: &[Expression]) -> Result<()> {
        for argument in arguments {
            self.resolve_expression(argument)?;
        }
        Ok(())
    }

    fn resolve_expression(&mut self, expr: &Expression) -> Result<()> {
        match &expr.kind {
            ExpressionKind::Identifier(identifier) => self.resolve_reference(identifier),
            ExpressionKind::Literal(_) | ExpressionKind::This | ExpressionKind::Super => Ok(()),
            ExpressionKind::Array(array) => {
                for element in array.elements.iter().flatten() {
                    self.resolve_expression(element)?;
                }
                Ok(())
            }
            ExpressionKind::Object(object) => {
                for property in &object.properties {
                    if let PropertyKey::Computed(key) = &property.key {
                        self.resolve_expression(key)?;
                    }
                    self.resolve_expression(&property.value)?;
                }
                Ok(())
            }
            ExpressionKind::Binary(binary) => {
                self.resolve_expression(&binary.left)?;
                self.resolve_expression(&binary.right)
            }
            ExpressionKind::Unary(unary) => self.resolve_expression(&unary.argument),
            ExpressionKind::Delete(delete) => self.resolve_expression(&delete.argument),
            ExpressionKind::Assignment(assignment) => {
                self.resolve_expression(&assignment.target)?;
                self.resolve_expression(&assignment.value)
            }
            ExpressionKind::Call(call) => {
                self.resolve_expression(&call.callee)?;
                self.resolve_arguments(&call.arguments)
            }
            ExpressionKind::SuperCall(call) => self.resolve_arguments(&call.arguments),
            ExpressionKind::Member(member) => {
                self.resolve_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Expression(property) => self.resolve_expression(property),
                    MemberProperty::Identifier(_) => Ok(()),
                }
            }
            ExpressionKind::Conditional(conditional) => {
                self.resolve_expression(&conditional.test)?;
                self.resolve_expression(&conditional.consequent)?;
                self.resolve_expression(&conditional.alternate)
            }
            ExpressionKind::Function(function) => self.resolve_function(function, true),
            ExpressionKind::Arrow(function) => self.resolve_function(function, false),
            ExpressionKind::Class(class) => self.resolve_class(class, true),
            ExpressionKind::New(new_expr) => {
                self.resolve_expression(&new_expr.callee)?;
                self.resolve_arguments(&new_expr.arguments)
            }
            ExpressionKind::Update(update) => self.resolve_expression(&update.argument),
            ExpressionKind::Sequence(sequence) => self.resolve_arguments(&sequence.expressions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    fn resolve_default(program: &Program) -> Result<Resolution> {
        resolve(program, &CompilerConfig::default())
    }

    fn function_of(program: &Program, index: usize) -> &FunctionNode {
        match &program.body[index].kind {
            StatementKind::FunctionDeclaration(function) => function,
            other => panic!("expected a function declaration, got {:?}", other),
        }
    }

    fn kind_of(error: CompileError) -> CompileErrorKind {
        error.kind
    }

    #[test]
    fn test_simple_parameters_share_the_function_scope() {
        // function f({ a, b }) { return a + b; }
        let program = program(vec![function_decl(
            "f",
            vec![pattern_param(object_pattern(&["a", "b"]))],
            vec![return_stmt(Some(binary(
                BinaryOperator::Add,
                ident("a"),
                ident("b"),
            )))],
        )]);
        let resolution = resolve_default(&program).unwrap();
        let scopes = resolution
            .function_scopes(function_of(&program, 0))
            .unwrap();
        assert_eq!(scopes.parameters, None);

        let body = resolution.tree().scope(scopes.body);
        assert_eq!(body.kind, ScopeKind::Function);
        let names: Vec<_> = body.bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(body.bindings.iter().all(|b| !b.tdz_tracked));
    }

    #[test]
    fn test_parameter_defaults_get_their_own_scope() {
        // function f(a, b = a) { var c; }
        let program = program(vec![function_decl(
            "f",
            vec![param("a"), param_with_default("b", ident("a"))],
            vec![var_decl("c", None)],
        )]);
        let resolution = resolve_default(&program).unwrap();
        let scopes = resolution
            .function_scopes(function_of(&program, 0))
            .unwrap();
        let parameters = scopes.parameters.expect("parameter scope");
        let tree = resolution.tree();

        assert_eq!(tree.scope(parameters).kind, ScopeKind::Parameter);
        assert_eq!(tree.scope(scopes.body).parent, Some(parameters));
        assert_eq!(tree.scope(scopes.body).function, parameters);
        assert!(tree.scope(parameters).bindings.iter().all(|b| b.tdz_tracked));
        assert!(tree.scope(scopes.body).find("c").is_some());
    }

    #[test]
    fn test_duplicate_lexical_declaration() {
        let program = program(vec![
            let_decl("x", None),
            let_decl("x", None).at(2, 5),
        ]);
        let error = resolve_default(&program).unwrap_err();
        assert_eq!(error.kind, CompileErrorKind::DuplicateBinding("x".into()));
    }

    #[test]
    fn test_var_redeclaration_is_allowed() {
        let program = program(vec![var_decl("x", None), var_decl("x", Some(num(1.0)))]);
        let resolution = resolve_default(&program).unwrap();
        let global = resolution.tree().scope(resolution.global_scope());
        assert_eq!(global.bindings.len(), 1);
    }

    #[test]
    fn test_var_conflicts_with_enclosing_let() {
        // { let x; { var x; } }
        let program = program(vec![block(vec![
            let_decl("x", None),
            block(vec![var_decl("x", None)]),
        ])]);
        let error = resolve_default(&program).unwrap_err();
        assert_eq!(kind_of(error), CompileErrorKind::DuplicateBinding("x".into()));
    }

    #[test]
    fn test_var_may_redeclare_simple_catch_parameter() {
        let program = program(vec![try_stmt(
            vec![],
            Some((Some("e"), vec![var_decl("e", Some(num(1.0)))])),
            None,
        )]);
        assert!(resolve_default(&program).is_ok());
    }

    #[test]
    fn test_let_conflicts_with_catch_parameter() {
        let program = program(vec![try_stmt(
            vec![],
            Some((Some("e"), vec![let_decl("e", None)])),
            None,
        )]);
        assert!(resolve_default(&program).is_err());
    }

    #[test]
    fn test_duplicate_parameters() {
        let sloppy = program(vec![function_decl(
            "f",
            vec![param("a"), param("a")],
            vec![],
        )]);
        assert!(resolve_default(&sloppy).is_ok());

        let strict = strict_program(vec![function_decl(
            "f",
            vec![param("a"), param("a")],
            vec![],
        )]);
        assert!(resolve_default(&strict).is_err());

        let arrow_params = program(vec![expr_stmt(arrow(
            vec![param("a"), param("a")],
            vec![],
        ))]);
        assert!(resolve_default(&arrow_params).is_err());
    }

    #[test]
    fn test_let_conflicts_with_parameter() {
        let program = program(vec![function_decl(
            "f",
            vec![param_with_default("a", num(1.0))],
            vec![let_decl("a", None)],
        )]);
        assert!(resolve_default(&program).is_err());
    }

    #[test]
    fn test_closure_marks_binding_captured() {
        // let x = 1; let y = 2; function f() { return x; }
        let program = program(vec![
            let_decl("x", Some(num(1.0))),
            let_decl("y", Some(num(2.0))),
            function_decl("f", vec![], vec![return_stmt(Some(ident("x")))]),
        ]);
        let resolution = resolve_default(&program).unwrap();
        let global = resolution.tree().scope(resolution.global_scope());
        let x = &global.bindings[global.find("x").unwrap() as usize];
        let y = &global.bindings[global.find("y").unwrap() as usize];
        assert!(x.captured);
        assert!(!y.captured);
    }

    #[test]
    fn test_free_identifier_is_global() {
        let program = program(vec![expr_stmt(ident("console"))]);
        let resolution = resolve_default(&program).unwrap();
        let StatementKind::Expression(stmt) = &program.body[0].kind else {
            unreachable!()
        };
        let ExpressionKind::Identifier(identifier) = &stmt.expression.kind else {
            unreachable!()
        };
        assert_eq!(resolution.reference(identifier), Some(Reference::Global));
    }

    #[test]
    fn test_free_identifier_rejected_without_globals() {
        let program = program(vec![expr_stmt(ident("console").at(4, 2))]);
        let config = CompilerConfig::default().with_global_references(false);
        let error = resolve(&program, &config).unwrap_err();
        assert_eq!(
            error.kind,
            CompileErrorKind::UnresolvableBinding("console".into())
        );
    }

    #[test]
    fn test_blocks_without_declarations_have_no_scope() {
        let program = program(vec![
            block(vec![expr_stmt(num(1.0))]),
            block(vec![let_decl("x", None)]),
        ]);
        let resolution = resolve_default(&program).unwrap();
        let scope_of = |index: usize| match &program.body[index].kind {
            StatementKind::Block(block) => resolution.block_scope(block),
            _ => None,
        };
        assert!(scope_of(0).is_none());
        assert!(scope_of(1).is_some());
    }

    #[test]
    fn test_function_expression_name_binding() {
        // (function g() { return g; })
        let program = program(vec![expr_stmt(function_expr(function(
            Some("g"),
            vec![],
            vec![return_stmt(Some(ident("g")))],
        )))]);
        let resolution = resolve_default(&program).unwrap();
        let StatementKind::Expression(stmt) = &program.body[0].kind else {
            unreachable!()
        };
        let ExpressionKind::Function(function) = &stmt.expression.kind else {
            unreachable!()
        };
        let scopes = resolution.function_scopes(function).unwrap();
        let binding = resolution.tree().binding(scopes.self_binding.unwrap());
        assert!(!binding.mutable);
    }

    #[test]
    fn test_hoisted_reference_before_declaration() {
        // function f() { return g(); } function g() {}
        let program = program(vec![
            function_decl(
                "f",
                vec![],
                vec![return_stmt(Some(call(ident("g"), vec![])))],
            ),
            function_decl("g", vec![], vec![]),
        ]);
        let resolution = resolve_default(&program).unwrap();
        let global = resolution.tree().scope(resolution.global_scope());
        let g = &global.bindings[global.find("g").unwrap() as usize];
        assert_eq!(g.kind, DeclarationKind::Function);
        assert!(g.captured);
    }
}
