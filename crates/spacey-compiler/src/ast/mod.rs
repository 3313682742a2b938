// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Abstract Syntax Tree (AST) definitions for JavaScript.
//!
//! These structures are designed to be ESTree-compatible where possible.
//! The tree is produced by an external parser and handed to the compiler
//! read-only; every statement and expression carries the [`SourcePosition`]
//! it was parsed from so that diagnostics and instructions can point back
//! at the source.
//!
//! All node types implement `serde::Deserialize`, which lets a front-end
//! running in another process hand over a tree as JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod build;

/// A line/column position in the original source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    /// 1-based line number
    pub line: u32,
    /// 1-based column number
    pub column: u32,
}

impl SourcePosition {
    /// Creates a new source position.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A complete JavaScript program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// The statements in the program
    pub body: Vec<Statement>,
    /// Whether the program starts with a "use strict" directive
    #[serde(default)]
    pub strict: bool,
}

impl Program {
    /// Deserializes a program from its JSON form.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// An identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    /// The name of the identifier
    pub name: String,
    /// Where the identifier appears
    #[serde(default)]
    pub position: SourcePosition,
}

// ============================================================================
// Statements
// ============================================================================

/// A JavaScript statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// The statement variant
    pub kind: StatementKind,
    /// Where the statement starts
    #[serde(default)]
    pub position: SourcePosition,
}

/// The statement variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatementKind {
    /// Variable declaration (var, let, const)
    VariableDeclaration(VariableDeclaration),
    /// Function declaration
    FunctionDeclaration(FunctionNode),
    /// Class declaration
    ClassDeclaration(ClassNode),
    /// Expression statement
    Expression(ExpressionStatement),
    /// Block statement { ... }
    Block(BlockStatement),
    /// If statement
    If(IfStatement),
    /// Switch statement
    Switch(SwitchStatement),
    /// While statement
    While(WhileStatement),
    /// Do-while statement
    DoWhile(DoWhileStatement),
    /// For statement
    For(ForStatement),
    /// Return statement
    Return(ReturnStatement),
    /// Break statement, optionally labelled
    Break(BreakStatement),
    /// Continue statement, optionally labelled
    Continue(ContinueStatement),
    /// Throw statement
    Throw(ThrowStatement),
    /// Try statement
    Try(TryStatement),
    /// Labeled statement
    Labeled(LabeledStatement),
    /// Empty statement (;)
    Empty,
}

/// Variable declaration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    /// var declaration
    Var,
    /// let declaration
    Let,
    /// const declaration
    Const,
}

/// A variable declaration statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    /// The kind of declaration
    pub kind: VariableKind,
    /// The declarators
    pub declarations: Vec<VariableDeclarator>,
}

/// A single variable declarator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclarator {
    /// The name or pattern being declared
    pub target: BindingTarget,
    /// Optional initializer expression
    pub init: Option<Expression>,
}

/// Something a value can be bound to: a plain name or a destructuring pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BindingTarget {
    /// A plain identifier
    Identifier(Identifier),
    /// An object or array destructuring pattern
    Pattern(BindingPattern),
}

impl BindingTarget {
    /// Returns true if evaluating this target can run user code: a default
    /// value or a computed key anywhere inside a pattern.
    pub fn contains_expression(&self) -> bool {
        match self {
            BindingTarget::Identifier(_) => false,
            BindingTarget::Pattern(pattern) => pattern.contains_expression(),
        }
    }

    /// Collects the bound identifiers in source order.
    pub fn bound_names<'a>(&'a self, names: &mut Vec<&'a Identifier>) {
        match self {
            BindingTarget::Identifier(id) => names.push(id),
            BindingTarget::Pattern(pattern) => {
                for element in &pattern.elements {
                    if let Some(element) = element {
                        element.target.bound_names(names);
                    }
                }
                if let Some(rest) = &pattern.rest {
                    rest.bound_names(names);
                }
            }
        }
    }
}

/// Destructuring pattern kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// `{ a, b: c }`
    Object,
    /// `[a, , b]`
    Array,
}

/// A destructuring pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingPattern {
    /// Object or array pattern
    pub kind: PatternKind,
    /// The elements (None represents an array hole)
    pub elements: Vec<Option<BindingElement>>,
    /// The `...rest` target
    pub rest: Option<Box<BindingTarget>>,
}

impl BindingPattern {
    /// Returns true if any element has a default value or a computed key,
    /// at any nesting depth.
    pub fn contains_expression(&self) -> bool {
        self.elements.iter().flatten().any(|element| {
            element.default.is_some()
                || matches!(element.key, Some(PropertyKey::Computed(_)))
                || element.target.contains_expression()
        }) || self
            .rest
            .as_ref()
            .is_some_and(|rest| rest.contains_expression())
    }
}

/// One element of a destructuring pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingElement {
    /// The property key (object patterns only)
    pub key: Option<PropertyKey>,
    /// Where the extracted value is bound
    pub target: BindingTarget,
    /// Default value used when the extracted value is undefined
    pub default: Option<Expression>,
}

/// An expression statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionStatement {
    /// The expression
    pub expression: Expression,
}

/// A block statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStatement {
    /// The statements in the block
    pub body: Vec<Statement>,
}

/// An if statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfStatement {
    /// The condition
    pub test: Expression,
    /// The then branch
    pub consequent: Box<Statement>,
    /// The optional else branch
    pub alternate: Option<Box<Statement>>,
}

/// A while statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStatement {
    /// The condition
    pub test: Expression,
    /// The loop body
    pub body: Box<Statement>,
}

/// A do-while statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoWhileStatement {
    /// The loop body
    pub body: Box<Statement>,
    /// The condition
    pub test: Expression,
}

/// A for statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStatement {
    /// The initializer
    pub init: Option<ForInit>,
    /// The condition
    pub test: Option<Expression>,
    /// The update expression
    pub update: Option<Expression>,
    /// The loop body
    pub body: Box<Statement>,
}

/// For loop initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    /// Variable declaration
    Declaration(VariableDeclaration),
    /// Expression
    Expression(Expression),
}

/// A switch statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatement {
    /// The discriminant expression
    pub discriminant: Expression,
    /// The case clauses
    pub cases: Vec<SwitchCase>,
}

/// A switch case clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// The test expression (None for default)
    pub test: Option<Expression>,
    /// The consequent statements
    pub consequent: Vec<Statement>,
}

/// A return statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatement {
    /// The return value
    pub argument: Option<Expression>,
}

/// A break statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakStatement {
    /// The target label, if any
    pub label: Option<String>,
}

/// A continue statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueStatement {
    /// The target label, if any
    pub label: Option<String>,
}

/// A throw statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowStatement {
    /// The thrown expression
    pub argument: Expression,
}

/// A try statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStatement {
    /// The try block
    pub block: BlockStatement,
    /// The catch clause
    pub handler: Option<CatchClause>,
    /// The finally block
    pub finalizer: Option<BlockStatement>,
}

/// A catch clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// The error parameter
    pub param: Option<BindingTarget>,
    /// The catch body
    pub body: BlockStatement,
}

/// A labeled statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledStatement {
    /// The label
    pub label: String,
    /// The labeled body
    pub body: Box<Statement>,
}

// ============================================================================
// Functions and classes
// ============================================================================

/// What kind of function a [`FunctionNode`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    /// `function` declaration or expression
    Normal,
    /// `=>` function; no own `this`, `super` or `arguments`
    Arrow,
    /// Class or object method with a home object
    Method,
    /// Constructor of a base class
    ClassConstructor,
    /// Constructor of a class with an `extends` clause
    DerivedConstructor,
}

impl FunctionKind {
    /// Whether `super.x` is allowed directly inside this function.
    pub fn has_home_object(self) -> bool {
        matches!(
            self,
            FunctionKind::Method | FunctionKind::ClassConstructor | FunctionKind::DerivedConstructor
        )
    }
}

/// A function of any kind: declaration, expression, arrow, method or constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    /// The function name
    pub name: Option<Identifier>,
    /// What kind of function this is
    pub kind: FunctionKind,
    /// The parameters
    pub params: Vec<Parameter>,
    /// The function body
    pub body: Vec<Statement>,
    /// Whether the body starts with a "use strict" directive
    #[serde(default)]
    pub strict: bool,
    /// Where the function starts
    #[serde(default)]
    pub position: SourcePosition,
}

impl FunctionNode {
    /// Returns true if no parameter can run user code while binding, i.e.
    /// there are no defaults and no patterns containing expressions.
    pub fn has_simple_parameter_bindings(&self) -> bool {
        !self
            .params
            .iter()
            .any(|param| param.default.is_some() || param.target.contains_expression())
    }

    /// Returns true if every parameter is a plain identifier without default.
    pub fn has_simple_parameter_list(&self) -> bool {
        self.params.iter().all(|param| {
            param.default.is_none()
                && !param.is_rest
                && matches!(param.target, BindingTarget::Identifier(_))
        })
    }
}

/// A formal parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// What the argument is bound to
    pub target: BindingTarget,
    /// Default value expression
    pub default: Option<Expression>,
    /// Whether this is a `...rest` parameter
    #[serde(default)]
    pub is_rest: bool,
}

/// A class declaration or expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    /// The class name
    pub name: Option<Identifier>,
    /// The `extends` expression
    pub super_class: Option<Box<Expression>>,
    /// The explicit constructor, if any
    pub constructor: Option<FunctionNode>,
    /// Methods, getters and setters
    pub methods: Vec<ClassMethod>,
}

/// Kind of class element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Plain method
    Method,
    /// `get` accessor
    Getter,
    /// `set` accessor
    Setter,
}

/// A class method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMethod {
    /// The (non-computed) property name
    pub key: String,
    /// Method, getter or setter
    pub kind: MethodKind,
    /// Whether the method is `static`
    #[serde(default)]
    pub is_static: bool,
    /// The method function
    pub function: FunctionNode,
}

// ============================================================================
// Expressions
// ============================================================================

/// A JavaScript expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expression {
    /// The expression variant
    pub kind: ExpressionKind,
    /// Where the expression starts
    #[serde(default)]
    pub position: SourcePosition,
}

/// The expression variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionKind {
    /// Literal value
    Literal(Literal),
    /// Identifier reference
    Identifier(Identifier),
    /// this keyword
    This,
    /// super keyword; only valid as the object of a member expression
    Super,
    /// Array literal
    Array(ArrayExpression),
    /// Object literal
    Object(ObjectExpression),
    /// Binary and logical expressions
    Binary(BinaryExpression),
    /// Unary expression
    Unary(UnaryExpression),
    /// delete expression
    Delete(DeleteExpression),
    /// Assignment expression
    Assignment(AssignmentExpression),
    /// Call expression
    Call(CallExpression),
    /// super(...) call in a derived constructor
    SuperCall(SuperCallExpression),
    /// Member access expression
    Member(MemberExpression),
    /// Conditional (ternary) expression
    Conditional(ConditionalExpression),
    /// Function expression
    Function(FunctionNode),
    /// Arrow function expression
    Arrow(FunctionNode),
    /// Class expression
    Class(ClassNode),
    /// new expression
    New(NewExpression),
    /// Update expression (++/--)
    Update(UpdateExpression),
    /// Sequence expression (comma operator)
    Sequence(SequenceExpression),
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// Boolean literal
    Boolean(bool),
    /// null literal
    Null,
    /// undefined literal
    Undefined,
    /// BigInt literal, digits as written without the trailing `n`
    BigInt(String),
}

/// An array expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayExpression {
    /// The elements (None represents a hole)
    pub elements: Vec<Option<Expression>>,
}

/// An object expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectExpression {
    /// The properties
    pub properties: Vec<Property>,
}

/// An object property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// The property key
    pub key: PropertyKey,
    /// The property value
    pub value: Expression,
}

/// A property key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyKey {
    /// Identifier or string key
    Identifier(String),
    /// Numeric key
    Number(f64),
    /// Computed key
    Computed(Box<Expression>),
}

/// A binary expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpression {
    /// The operator
    pub operator: BinaryOperator,
    /// The left operand
    pub left: Box<Expression>,
    /// The right operand
    pub right: Box<Expression>,
}

/// Binary operators.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOperator {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    // Comparison
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    // Logical
    LogicalAnd,
    LogicalOr,
    NullishCoalescing,
    // Bitwise
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    // Other
    In,
    InstanceOf,
}

/// A unary expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpression {
    /// The operator
    pub operator: UnaryOperator,
    /// The operand
    pub argument: Box<Expression>,
}

/// Unary operators. `delete` has its own node, [`DeleteExpression`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOperator {
    /// -
    Minus,
    /// +
    Plus,
    /// !
    LogicalNot,
    /// ~
    BitwiseNot,
    /// typeof
    Typeof,
    /// void
    Void,
}

/// A delete expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteExpression {
    /// The reference being deleted
    pub argument: Box<Expression>,
}

/// An assignment expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentExpression {
    /// The operator
    pub operator: AssignmentOperator,
    /// The left-hand side
    pub target: Box<Expression>,
    /// The right-hand side
    pub value: Box<Expression>,
}

/// Assignment operators.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentOperator {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    ExponentAssign,
    LeftShiftAssign,
    RightShiftAssign,
    UnsignedRightShiftAssign,
    BitwiseAndAssign,
    BitwiseOrAssign,
    BitwiseXorAssign,
    LogicalAndAssign,
    LogicalOrAssign,
    NullishCoalescingAssign,
}

impl AssignmentOperator {
    /// The binary operator a compound assignment applies, if any.
    pub fn binary_operator(self) -> Option<BinaryOperator> {
        Some(match self {
            AssignmentOperator::Assign => return None,
            AssignmentOperator::AddAssign => BinaryOperator::Add,
            AssignmentOperator::SubtractAssign => BinaryOperator::Subtract,
            AssignmentOperator::MultiplyAssign => BinaryOperator::Multiply,
            AssignmentOperator::DivideAssign => BinaryOperator::Divide,
            AssignmentOperator::ModuloAssign => BinaryOperator::Modulo,
            AssignmentOperator::ExponentAssign => BinaryOperator::Exponent,
            AssignmentOperator::LeftShiftAssign => BinaryOperator::LeftShift,
            AssignmentOperator::RightShiftAssign => BinaryOperator::RightShift,
            AssignmentOperator::UnsignedRightShiftAssign => BinaryOperator::UnsignedRightShift,
            AssignmentOperator::BitwiseAndAssign => BinaryOperator::BitwiseAnd,
            AssignmentOperator::BitwiseOrAssign => BinaryOperator::BitwiseOr,
            AssignmentOperator::BitwiseXorAssign => BinaryOperator::BitwiseXor,
            AssignmentOperator::LogicalAndAssign => BinaryOperator::LogicalAnd,
            AssignmentOperator::LogicalOrAssign => BinaryOperator::LogicalOr,
            AssignmentOperator::NullishCoalescingAssign => BinaryOperator::NullishCoalescing,
        })
    }
}

/// A function call expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpression {
    /// The function being called
    pub callee: Box<Expression>,
    /// The arguments
    pub arguments: Vec<Expression>,
}

/// A `super(...)` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperCallExpression {
    /// The arguments
    pub arguments: Vec<Expression>,
}

/// A member access expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberExpression {
    /// The object; [`ExpressionKind::Super`] for super property access
    pub object: Box<Expression>,
    /// The property
    pub property: MemberProperty,
}

impl MemberExpression {
    /// Whether this is `super.x` or `super[x]`.
    pub fn is_super_property(&self) -> bool {
        matches!(self.object.kind, ExpressionKind::Super)
    }

    /// Whether this uses bracket notation.
    pub fn is_computed(&self) -> bool {
        matches!(self.property, MemberProperty::Expression(_))
    }

    /// The property name when it is known without evaluating anything:
    /// `o.name` and `o["name"]`.
    pub fn static_property_name(&self) -> Option<&str> {
        match &self.property {
            MemberProperty::Identifier(name) => Some(name),
            MemberProperty::Expression(expr) => match &expr.kind {
                ExpressionKind::Literal(Literal::String(s)) => Some(s),
                _ => None,
            },
        }
    }
}

/// Member property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberProperty {
    /// Identifier property
    Identifier(String),
    /// Computed property expression
    Expression(Box<Expression>),
}

/// A conditional (ternary) expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalExpression {
    /// The condition
    pub test: Box<Expression>,
    /// The consequent (if true)
    pub consequent: Box<Expression>,
    /// The alternate (if false)
    pub alternate: Box<Expression>,
}

/// A new expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExpression {
    /// The constructor
    pub callee: Box<Expression>,
    /// The arguments
    pub arguments: Vec<Expression>,
}

/// An update expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateExpression {
    /// The operator
    pub operator: UpdateOperator,
    /// Whether prefix (++x) or postfix (x++)
    pub prefix: bool,
    /// The argument
    pub argument: Box<Expression>,
}

/// Update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOperator {
    /// ++
    Increment,
    /// --
    Decrement,
}

/// A sequence expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceExpression {
    /// The expressions
    pub expressions: Vec<Expression>,
}
