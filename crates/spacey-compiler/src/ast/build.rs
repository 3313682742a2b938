// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shorthand constructors for building syntax trees in code.
//!
//! The compiler never parses source text, so tests, benchmarks and embedders
//! that do not have a front-end at hand use these helpers instead. Nodes get
//! a default position; use [`Expression::at`] and [`Statement::at`] where a
//! diagnostic position matters.
//!
//! ```
//! use spacey_compiler::ast::build::*;
//!
//! // function f(x) { let y = 1; x = y; return x; }
//! let program = program(vec![function_decl(
//!     "f",
//!     vec![param("x")],
//!     vec![
//!         let_decl("y", Some(num(1.0))),
//!         expr_stmt(assign(ident("x"), ident("y"))),
//!         return_stmt(Some(ident("x"))),
//!     ],
//! )]);
//! assert_eq!(program.body.len(), 1);
//! ```

use super::*;

impl Expression {
    /// Wraps an expression variant with a default position.
    pub fn new(kind: ExpressionKind) -> Self {
        Self {
            kind,
            position: SourcePosition::default(),
        }
    }

    /// Sets the source position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = SourcePosition::new(line, column);
        self
    }
}

impl Statement {
    /// Wraps a statement variant with a default position.
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            position: SourcePosition::default(),
        }
    }

    /// Sets the source position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = SourcePosition::new(line, column);
        self
    }
}

/// A sloppy-mode program.
pub fn program(body: Vec<Statement>) -> Program {
    Program {
        body,
        strict: false,
    }
}

/// A program with a "use strict" directive.
pub fn strict_program(body: Vec<Statement>) -> Program {
    Program { body, strict: true }
}

// ----------------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------------

/// An identifier node (not wrapped in an expression).
pub fn identifier(name: &str) -> Identifier {
    Identifier {
        name: name.to_string(),
        position: SourcePosition::default(),
    }
}

/// `name`
pub fn ident(name: &str) -> Expression {
    Expression::new(ExpressionKind::Identifier(identifier(name)))
}

/// A number literal.
pub fn num(value: f64) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Number(value)))
}

/// A string literal.
pub fn string(value: &str) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::String(value.to_string())))
}

/// A boolean literal.
pub fn boolean(value: bool) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Boolean(value)))
}

/// `null`
pub fn null() -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::Null))
}

/// A BigInt literal, digits without the `n` suffix.
pub fn bigint(digits: &str) -> Expression {
    Expression::new(ExpressionKind::Literal(Literal::BigInt(digits.to_string())))
}

/// `this`
pub fn this() -> Expression {
    Expression::new(ExpressionKind::This)
}

/// `object.name`
pub fn member(object: Expression, name: &str) -> Expression {
    Expression::new(ExpressionKind::Member(MemberExpression {
        object: Box::new(object),
        property: MemberProperty::Identifier(name.to_string()),
    }))
}

/// `object[key]`
pub fn index(object: Expression, key: Expression) -> Expression {
    Expression::new(ExpressionKind::Member(MemberExpression {
        object: Box::new(object),
        property: MemberProperty::Expression(Box::new(key)),
    }))
}

/// `super.name`
pub fn super_member(name: &str) -> Expression {
    member(Expression::new(ExpressionKind::Super), name)
}

/// `super[key]`
pub fn super_index(key: Expression) -> Expression {
    index(Expression::new(ExpressionKind::Super), key)
}

/// `callee(arguments...)`
pub fn call(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::new(ExpressionKind::Call(CallExpression {
        callee: Box::new(callee),
        arguments,
    }))
}

/// `new callee(arguments...)`
pub fn new(callee: Expression, arguments: Vec<Expression>) -> Expression {
    Expression::new(ExpressionKind::New(NewExpression {
        callee: Box::new(callee),
        arguments,
    }))
}

/// `super(arguments...)`
pub fn super_call(arguments: Vec<Expression>) -> Expression {
    Expression::new(ExpressionKind::SuperCall(SuperCallExpression { arguments }))
}

/// `target = value`
pub fn assign(target: Expression, value: Expression) -> Expression {
    assign_op(AssignmentOperator::Assign, target, value)
}

/// `target op= value`
pub fn assign_op(operator: AssignmentOperator, target: Expression, value: Expression) -> Expression {
    Expression::new(ExpressionKind::Assignment(AssignmentExpression {
        operator,
        target: Box::new(target),
        value: Box::new(value),
    }))
}

/// `left op right`
pub fn binary(operator: BinaryOperator, left: Expression, right: Expression) -> Expression {
    Expression::new(ExpressionKind::Binary(BinaryExpression {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    }))
}

/// `op argument`
pub fn unary(operator: UnaryOperator, argument: Expression) -> Expression {
    Expression::new(ExpressionKind::Unary(UnaryExpression {
        operator,
        argument: Box::new(argument),
    }))
}

/// `delete argument`
pub fn delete(argument: Expression) -> Expression {
    Expression::new(ExpressionKind::Delete(DeleteExpression {
        argument: Box::new(argument),
    }))
}

/// `++argument`, `argument--` and friends.
pub fn update(operator: UpdateOperator, prefix: bool, argument: Expression) -> Expression {
    Expression::new(ExpressionKind::Update(UpdateExpression {
        operator,
        prefix,
        argument: Box::new(argument),
    }))
}

/// `test ? consequent : alternate`
pub fn conditional(test: Expression, consequent: Expression, alternate: Expression) -> Expression {
    Expression::new(ExpressionKind::Conditional(ConditionalExpression {
        test: Box::new(test),
        consequent: Box::new(consequent),
        alternate: Box::new(alternate),
    }))
}

/// `[elements...]`
pub fn array(elements: Vec<Expression>) -> Expression {
    Expression::new(ExpressionKind::Array(ArrayExpression {
        elements: elements.into_iter().map(Some).collect(),
    }))
}

/// `{ key: value, ... }`
pub fn object(properties: Vec<(&str, Expression)>) -> Expression {
    Expression::new(ExpressionKind::Object(ObjectExpression {
        properties: properties
            .into_iter()
            .map(|(key, value)| Property {
                key: PropertyKey::Identifier(key.to_string()),
                value,
            })
            .collect(),
    }))
}

/// `(params) => { body }`
pub fn arrow(params: Vec<Parameter>, body: Vec<Statement>) -> Expression {
    Expression::new(ExpressionKind::Arrow(FunctionNode {
        name: None,
        kind: FunctionKind::Arrow,
        params,
        body,
        strict: false,
        position: SourcePosition::default(),
    }))
}

/// `function name(params) { body }` as an expression.
pub fn function_expr(function: FunctionNode) -> Expression {
    Expression::new(ExpressionKind::Function(function))
}

/// A class expression.
pub fn class_expr(class: ClassNode) -> Expression {
    Expression::new(ExpressionKind::Class(class))
}

// ----------------------------------------------------------------------------
// Bindings and functions
// ----------------------------------------------------------------------------

/// A plain identifier parameter.
pub fn param(name: &str) -> Parameter {
    Parameter {
        target: BindingTarget::Identifier(identifier(name)),
        default: None,
        is_rest: false,
    }
}

/// `name = default`
pub fn param_with_default(name: &str, default: Expression) -> Parameter {
    Parameter {
        target: BindingTarget::Identifier(identifier(name)),
        default: Some(default),
        is_rest: false,
    }
}

/// A destructuring parameter.
pub fn pattern_param(pattern: BindingTarget) -> Parameter {
    Parameter {
        target: pattern,
        default: None,
        is_rest: false,
    }
}

/// `{ a, b, c }` with shorthand keys and no defaults.
pub fn object_pattern(names: &[&str]) -> BindingTarget {
    BindingTarget::Pattern(BindingPattern {
        kind: PatternKind::Object,
        elements: names
            .iter()
            .map(|name| {
                Some(BindingElement {
                    key: Some(PropertyKey::Identifier(name.to_string())),
                    target: BindingTarget::Identifier(identifier(name)),
                    default: None,
                })
            })
            .collect(),
        rest: None,
    })
}

/// `[a, b, c]` with no defaults.
pub fn array_pattern(names: &[&str]) -> BindingTarget {
    BindingTarget::Pattern(BindingPattern {
        kind: PatternKind::Array,
        elements: names
            .iter()
            .map(|name| {
                Some(BindingElement {
                    key: None,
                    target: BindingTarget::Identifier(identifier(name)),
                    default: None,
                })
            })
            .collect(),
        rest: None,
    })
}

/// `{ key: name, ... }` with explicit keys of any kind.
pub fn keyed_object_pattern(entries: Vec<(PropertyKey, &str)>) -> BindingTarget {
    BindingTarget::Pattern(BindingPattern {
        kind: PatternKind::Object,
        elements: entries
            .into_iter()
            .map(|(key, name)| {
                Some(BindingElement {
                    key: Some(key),
                    target: BindingTarget::Identifier(identifier(name)),
                    default: None,
                })
            })
            .collect(),
        rest: None,
    })
}

/// Appends `...name` to a pattern.
pub fn with_rest(target: BindingTarget, name: &str) -> BindingTarget {
    match target {
        BindingTarget::Pattern(mut pattern) => {
            pattern.rest = Some(Box::new(BindingTarget::Identifier(identifier(name))));
            BindingTarget::Pattern(pattern)
        }
        identifier => identifier,
    }
}

/// A normal function node.
pub fn function(name: Option<&str>, params: Vec<Parameter>, body: Vec<Statement>) -> FunctionNode {
    FunctionNode {
        name: name.map(identifier),
        kind: FunctionKind::Normal,
        params,
        body,
        strict: false,
        position: SourcePosition::default(),
    }
}

/// `function name(params) { body }`
pub fn function_decl(name: &str, params: Vec<Parameter>, body: Vec<Statement>) -> Statement {
    Statement::new(StatementKind::FunctionDeclaration(function(
        Some(name),
        params,
        body,
    )))
}

/// A class method `name(params) { body }`.
pub fn method(name: &str, params: Vec<Parameter>, body: Vec<Statement>) -> ClassMethod {
    ClassMethod {
        key: name.to_string(),
        kind: MethodKind::Method,
        is_static: false,
        function: FunctionNode {
            name: None,
            kind: FunctionKind::Method,
            params,
            body,
            strict: true,
            position: SourcePosition::default(),
        },
    }
}

/// A class getter `get name() { body }`.
pub fn getter(name: &str, body: Vec<Statement>) -> ClassMethod {
    ClassMethod {
        kind: MethodKind::Getter,
        ..method(name, Vec::new(), body)
    }
}

/// A class node; the constructor kind is derived from `super_class`.
pub fn class(
    name: Option<&str>,
    super_class: Option<Expression>,
    constructor: Option<(Vec<Parameter>, Vec<Statement>)>,
    methods: Vec<ClassMethod>,
) -> ClassNode {
    let kind = if super_class.is_some() {
        FunctionKind::DerivedConstructor
    } else {
        FunctionKind::ClassConstructor
    };
    ClassNode {
        name: name.map(identifier),
        super_class: super_class.map(Box::new),
        constructor: constructor.map(|(params, body)| FunctionNode {
            name: name.map(identifier),
            kind,
            params,
            body,
            strict: true,
            position: SourcePosition::default(),
        }),
        methods,
    }
}

/// `class name extends super_class { methods }`
pub fn class_decl(name: &str, super_class: Option<Expression>, methods: Vec<ClassMethod>) -> Statement {
    Statement::new(StatementKind::ClassDeclaration(class(
        Some(name),
        super_class,
        None,
        methods,
    )))
}

// ----------------------------------------------------------------------------
// Statements
// ----------------------------------------------------------------------------

/// `expression;`
pub fn expr_stmt(expression: Expression) -> Statement {
    let position = expression.position;
    Statement {
        kind: StatementKind::Expression(ExpressionStatement { expression }),
        position,
    }
}

/// A single-declarator declaration of a plain name.
pub fn declaration(kind: VariableKind, name: &str, init: Option<Expression>) -> VariableDeclaration {
    VariableDeclaration {
        kind,
        declarations: vec![VariableDeclarator {
            target: BindingTarget::Identifier(identifier(name)),
            init,
        }],
    }
}

/// `var name = init;`
pub fn var_decl(name: &str, init: Option<Expression>) -> Statement {
    Statement::new(StatementKind::VariableDeclaration(declaration(
        VariableKind::Var,
        name,
        init,
    )))
}

/// `let name = init;`
pub fn let_decl(name: &str, init: Option<Expression>) -> Statement {
    Statement::new(StatementKind::VariableDeclaration(declaration(
        VariableKind::Let,
        name,
        init,
    )))
}

/// `const name = init;`
pub fn const_decl(name: &str, init: Expression) -> Statement {
    Statement::new(StatementKind::VariableDeclaration(declaration(
        VariableKind::Const,
        name,
        Some(init),
    )))
}

/// `let <pattern> = init;`
pub fn let_pattern(target: BindingTarget, init: Expression) -> Statement {
    Statement::new(StatementKind::VariableDeclaration(VariableDeclaration {
        kind: VariableKind::Let,
        declarations: vec![VariableDeclarator {
            target,
            init: Some(init),
        }],
    }))
}

/// `{ body }`
pub fn block(body: Vec<Statement>) -> Statement {
    Statement::new(StatementKind::Block(BlockStatement { body }))
}

/// `if (test) consequent else alternate`
pub fn if_stmt(test: Expression, consequent: Statement, alternate: Option<Statement>) -> Statement {
    Statement::new(StatementKind::If(IfStatement {
        test,
        consequent: Box::new(consequent),
        alternate: alternate.map(Box::new),
    }))
}

/// `while (test) body`
pub fn while_stmt(test: Expression, body: Statement) -> Statement {
    Statement::new(StatementKind::While(WhileStatement {
        test,
        body: Box::new(body),
    }))
}

/// `do body while (test)`
pub fn do_while_stmt(body: Statement, test: Expression) -> Statement {
    Statement::new(StatementKind::DoWhile(DoWhileStatement {
        body: Box::new(body),
        test,
    }))
}

/// `for (init; test; update) body`
pub fn for_stmt(
    init: Option<ForInit>,
    test: Option<Expression>,
    update: Option<Expression>,
    body: Statement,
) -> Statement {
    Statement::new(StatementKind::For(ForStatement {
        init,
        test,
        update,
        body: Box::new(body),
    }))
}

/// `switch (discriminant) { cases }`
pub fn switch_stmt(discriminant: Expression, cases: Vec<SwitchCase>) -> Statement {
    Statement::new(StatementKind::Switch(SwitchStatement {
        discriminant,
        cases,
    }))
}

/// `case test: consequent` (or `default:` when `test` is None)
pub fn case(test: Option<Expression>, consequent: Vec<Statement>) -> SwitchCase {
    SwitchCase { test, consequent }
}

/// `return argument;`
pub fn return_stmt(argument: Option<Expression>) -> Statement {
    Statement::new(StatementKind::Return(ReturnStatement { argument }))
}

/// `throw argument;`
pub fn throw_stmt(argument: Expression) -> Statement {
    Statement::new(StatementKind::Throw(ThrowStatement { argument }))
}

/// `break label;`
pub fn break_stmt(label: Option<&str>) -> Statement {
    Statement::new(StatementKind::Break(BreakStatement {
        label: label.map(str::to_string),
    }))
}

/// `continue label;`
pub fn continue_stmt(label: Option<&str>) -> Statement {
    Statement::new(StatementKind::Continue(ContinueStatement {
        label: label.map(str::to_string),
    }))
}

/// `label: body`
pub fn labeled(label: &str, body: Statement) -> Statement {
    Statement::new(StatementKind::Labeled(LabeledStatement {
        label: label.to_string(),
        body: Box::new(body),
    }))
}

/// `try { block } catch (param) { handler } finally { finalizer }`
pub fn try_stmt(
    block: Vec<Statement>,
    handler: Option<(Option<&str>, Vec<Statement>)>,
    finalizer: Option<Vec<Statement>>,
) -> Statement {
    Statement::new(StatementKind::Try(TryStatement {
        block: BlockStatement { body: block },
        handler: handler.map(|(param, body)| CatchClause {
            param: param.map(|name| BindingTarget::Identifier(identifier(name))),
            body: BlockStatement { body },
        }),
        finalizer: finalizer.map(|body| BlockStatement { body }),
    }))
}
