// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Expression compilation.
//!
//! Every expression leaves exactly one value on the operand stack.
//!
//! ## Assignment Targets
//!
//! | Target | Base pushed first | Read | Write |
//! |--------|-------------------|------|-------|
//! | `x` | nothing | `GetBinding` / `GetGlobal` | `SetBinding` / `SetGlobal` |
//! | `o.p` | `o` | `GetById` | `PutById` |
//! | `o[k]` | `o k` | `GetByValue` | `PutByValue` |
//! | `super.p` | `this base` | `GetByIdWithThis` | `PutByIdWithThis` |
//! | `super[k]` | `this k base` | `GetByValueWithThis` | `PutByValueWithThis` |
//!
//! Compound and logical assignments duplicate the base (`Dup`/`DupN`)
//! before reading so the write can consume it afterwards. For `super`
//! targets `this` and the key are evaluated before `ResolveSuperBase`.
//!
//! ## Invalid Targets
//!
//! A call on the left of an assignment is a runtime `ReferenceError` in
//! sloppy code: the emitter evaluates nothing and emits a single
//! `ThrowReferenceError`. In strict code, and for any other target, it is
//! a compile error.

use num_bigint::BigInt;
use num_traits::Num;

use super::Emitter;
use crate::ast::*;
use crate::compiler::bytecode::{Constant, OpCode, Operand};
use crate::error::{CompileError, CompileErrorKind, Result};

/// An evaluated assignment target whose base values are on the stack.
#[derive(Clone, Copy)]
enum Reference<'e> {
    Identifier(&'e Identifier),
    Property(Operand),
    Value,
    SuperProperty(Operand),
    SuperValue,
}

impl Reference<'_> {
    /// Number of stack slots the base occupies.
    fn width(self) -> u16 {
        match self {
            Reference::Identifier(_) => 0,
            Reference::Property(_) => 1,
            Reference::Value | Reference::SuperProperty(_) => 2,
            Reference::SuperValue => 3,
        }
    }
}

const INVALID_ASSIGNMENT_MESSAGE: &str = "Invalid left-hand side in assignment";

impl Emitter<'_> {
    pub(super) fn compile_expression(&mut self, expr: &Expression) -> Result<()> {
        let saved = self.enter_position(expr.position);
        let result = self.compile_expression_kind(expr);
        self.builder.set_position(saved);
        result
    }

    fn compile_expression_kind(&mut self, expr: &Expression) -> Result<()> {
        match &expr.kind {
            ExpressionKind::Literal(lit) => self.compile_literal(lit),
            ExpressionKind::Identifier(id) => self.compile_identifier(id),
            ExpressionKind::This => {
                self.emit_op(OpCode::LoadThis);
                Ok(())
            }
            ExpressionKind::Super => Err(self.error(CompileErrorKind::InvalidSuperReference)),
            ExpressionKind::Array(arr) => self.compile_array(arr),
            ExpressionKind::Object(obj) => self.compile_object(obj),
            ExpressionKind::Binary(bin) => self.compile_binary(bin),
            ExpressionKind::Unary(un) => self.compile_unary(un),
            ExpressionKind::Delete(delete) => self.compile_delete(delete),
            ExpressionKind::Assignment(assign) => self.compile_assignment(assign),
            ExpressionKind::Call(call) => self.compile_call(call),
            ExpressionKind::SuperCall(call) => self.compile_super_call(call),
            ExpressionKind::Member(member) => self.compile_member(member),
            ExpressionKind::Conditional(cond) => self.compile_conditional(cond),
            ExpressionKind::Function(function) | ExpressionKind::Arrow(function) => {
                let index = self.compile_function(function)?;
                self.emit_with(OpCode::NewFunction, Operand::Function(index));
                Ok(())
            }
            ExpressionKind::Class(class) => self.compile_class(class, true),
            ExpressionKind::New(new_expr) => self.compile_new(new_expr),
            ExpressionKind::Update(update) => self.compile_update(update),
            ExpressionKind::Sequence(seq) => self.compile_sequence(seq),
        }
    }

    // ========================================================================
    // Literals
    // ========================================================================

    pub(super) fn compile_literal(&mut self, lit: &Literal) -> Result<()> {
        match lit {
            Literal::Number(n) => {
                let index = self.builder.add_constant(Constant::Number(*n))?;
                self.emit_with(OpCode::LoadConst, Operand::Constant(index));
            }
            Literal::String(s) => {
                let index = self.builder.add_constant(Constant::String(s.clone()))?;
                self.emit_with(OpCode::LoadConst, Operand::Constant(index));
            }
            Literal::Boolean(true) => self.emit_op(OpCode::LoadTrue),
            Literal::Boolean(false) => self.emit_op(OpCode::LoadFalse),
            Literal::Null => self.emit_op(OpCode::LoadNull),
            Literal::Undefined => self.emit_op(OpCode::LoadUndefined),
            Literal::BigInt(digits) => {
                let value = parse_bigint(digits).ok_or_else(|| {
                    self.error(CompileErrorKind::InvalidLiteral(format!("{}n", digits)))
                })?;
                let index = self.builder.add_constant(Constant::BigInt(value))?;
                self.emit_with(OpCode::LoadConst, Operand::Constant(index));
            }
        }
        Ok(())
    }

    fn compile_array(&mut self, arr: &ArrayExpression) -> Result<()> {
        let count = u16::try_from(arr.elements.len())
            .map_err(|_| self.builder.limit_exceeded("array elements"))?;
        for element in &arr.elements {
            match element {
                Some(expr) => self.compile_expression(expr)?,
                None => self.emit_op(OpCode::LoadUndefined),
            }
        }
        self.emit_with(OpCode::NewArray, Operand::ArgCount(count));
        Ok(())
    }

    fn compile_object(&mut self, obj: &ObjectExpression) -> Result<()> {
        self.emit_op(OpCode::NewObject);
        for prop in &obj.properties {
            self.emit_op(OpCode::Dup);
            match &prop.key {
                PropertyKey::Identifier(name) => {
                    let property = self.property_operand(name)?;
                    self.compile_expression(&prop.value)?;
                    self.emit_with(OpCode::PutById, property);
                }
                PropertyKey::Number(n) => {
                    self.compile_literal(&Literal::Number(*n))?;
                    self.compile_expression(&prop.value)?;
                    self.emit_op(OpCode::PutByValue);
                }
                PropertyKey::Computed(key) => {
                    self.compile_expression(key)?;
                    self.compile_expression(&prop.value)?;
                    self.emit_op(OpCode::PutByValue);
                }
            }
            self.emit_op(OpCode::Pop);
        }
        Ok(())
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn compile_binary(&mut self, bin: &BinaryExpression) -> Result<()> {
        if let Some(short_circuit) = short_circuit_jump(bin.operator) {
            let end = self.make_label();
            self.compile_expression(&bin.left)?;
            self.emit_op(OpCode::Dup);
            self.emit_jump(short_circuit, end);
            self.emit_op(OpCode::Pop);
            self.compile_expression(&bin.right)?;
            return self.bind_label(end);
        }

        self.compile_expression(&bin.left)?;
        self.compile_expression(&bin.right)?;
        let opcode = binary_opcode(bin.operator)
            .ok_or_else(|| self.internal("logical operator without a short circuit"))?;
        self.emit_op(opcode);
        Ok(())
    }

    fn compile_unary(&mut self, un: &UnaryExpression) -> Result<()> {
        if un.operator == UnaryOperator::Typeof {
            if let ExpressionKind::Identifier(id) = &un.argument.kind {
                if self.is_global_reference(id)? {
                    let index = self.builder.add_identifier(&id.name)?;
                    self.emit_with(OpCode::TypeOfGlobal, Operand::Global(index));
                    return Ok(());
                }
            }
        }

        self.compile_expression(&un.argument)?;
        match un.operator {
            UnaryOperator::Minus => self.emit_op(OpCode::Neg),
            UnaryOperator::Plus => self.emit_op(OpCode::ToNumber),
            UnaryOperator::LogicalNot => self.emit_op(OpCode::Not),
            UnaryOperator::BitwiseNot => self.emit_op(OpCode::BitNot),
            UnaryOperator::Typeof => self.emit_op(OpCode::TypeOf),
            UnaryOperator::Void => {
                self.emit_op(OpCode::Pop);
                self.emit_op(OpCode::LoadUndefined);
            }
        }
        Ok(())
    }

    fn is_global_reference(&self, id: &Identifier) -> Result<bool> {
        use crate::compiler::scope::Reference as Resolved;
        match self.shared.resolution.reference(id) {
            Some(reference) => Ok(reference == Resolved::Global),
            None => Err(self.internal("identifier was not resolved")),
        }
    }

    fn compile_delete(&mut self, delete: &DeleteExpression) -> Result<()> {
        let argument = &delete.argument;
        match &argument.kind {
            ExpressionKind::Identifier(id) => {
                if self.context.strict {
                    return Err(CompileError::new(
                        CompileErrorKind::InvalidDelete,
                        argument.position,
                    ));
                }
                if self.is_global_reference(id)? {
                    let index = self.builder.add_identifier(&id.name)?;
                    self.emit_with(OpCode::DeleteVariable, Operand::Global(index));
                } else {
                    // Declared bindings are never deletable.
                    self.emit_op(OpCode::LoadFalse);
                }
            }
            ExpressionKind::Member(member) if member.is_super_property() => {
                self.require_super_property(argument.position)?;
                self.emit_op(OpCode::LoadThis);
                match (&member.property, member.static_property_name()) {
                    (_, Some(name)) => {
                        let property = self.property_operand(name)?;
                        self.emit_op(OpCode::ResolveSuperBase);
                        self.emit_with(OpCode::DeleteByIdWithThis, property);
                    }
                    (MemberProperty::Expression(key), None) => {
                        self.compile_expression(key)?;
                        self.emit_op(OpCode::ResolveSuperBase);
                        self.emit_op(OpCode::DeleteByValueWithThis);
                    }
                    (MemberProperty::Identifier(_), None) => {
                        return Err(self.internal("identifier property without a name"));
                    }
                }
            }
            ExpressionKind::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Identifier(name) => {
                        let property = self.property_operand(name)?;
                        self.emit_with(OpCode::DeleteById, property);
                    }
                    MemberProperty::Expression(key) => {
                        self.compile_expression(key)?;
                        self.emit_op(OpCode::DeleteByValue);
                    }
                }
            }
            _ => {
                self.compile_expression(argument)?;
                self.emit_op(OpCode::Pop);
                self.emit_op(OpCode::LoadTrue);
            }
        }
        Ok(())
    }

    fn compile_conditional(&mut self, cond: &ConditionalExpression) -> Result<()> {
        let else_label = self.make_label();
        let end_label = self.make_label();

        self.compile_expression(&cond.test)?;
        self.emit_jump(OpCode::JumpIfFalse, else_label);
        self.compile_expression(&cond.consequent)?;
        self.emit_jump(OpCode::Jump, end_label);
        self.bind_label(else_label)?;
        self.compile_expression(&cond.alternate)?;
        self.bind_label(end_label)
    }

    fn compile_sequence(&mut self, seq: &SequenceExpression) -> Result<()> {
        let Some((last, rest)) = seq.expressions.split_last() else {
            self.emit_op(OpCode::LoadUndefined);
            return Ok(());
        };
        for expr in rest {
            self.compile_expression(expr)?;
            self.emit_op(OpCode::Pop);
        }
        self.compile_expression(last)
    }

    // ========================================================================
    // Property access and calls
    // ========================================================================

    fn require_super_property(&self, position: SourcePosition) -> Result<()> {
        if self.context.super_property {
            Ok(())
        } else {
            Err(CompileError::new(
                CompileErrorKind::InvalidSuperReference,
                position,
            ))
        }
    }

    fn compile_member(&mut self, member: &MemberExpression) -> Result<()> {
        if member.is_super_property() {
            return self.compile_super_property(member);
        }
        self.compile_expression(&member.object)?;
        match &member.property {
            MemberProperty::Identifier(name) => {
                let property = self.property_operand(name)?;
                self.emit_with(OpCode::GetById, property);
            }
            MemberProperty::Expression(key) => {
                self.compile_expression(key)?;
                self.emit_op(OpCode::GetByValue);
            }
        }
        Ok(())
    }

    /// `super.name` or `super[key]` read with the current `this`.
    fn compile_super_property(&mut self, member: &MemberExpression) -> Result<()> {
        self.require_super_property(member.object.position)?;
        if let Some(name) = member.static_property_name() {
            let property = self.property_operand(name)?;
            if self.shared.config.fast_super_property_access {
                self.emit_with(OpCode::GetSuperById, property);
            } else {
                self.emit_op(OpCode::LoadThis);
                self.emit_op(OpCode::ResolveSuperBase);
                self.emit_with(OpCode::GetByIdWithThis, property);
            }
            return Ok(());
        }
        let MemberProperty::Expression(key) = &member.property else {
            return Err(self.internal("identifier property without a name"));
        };
        self.emit_op(OpCode::LoadThis);
        self.compile_expression(key)?;
        self.emit_op(OpCode::ResolveSuperBase);
        self.emit_op(OpCode::GetByValueWithThis);
        Ok(())
    }

    fn argument_count(&self, arguments: &[Expression]) -> Result<Operand> {
        u16::try_from(arguments.len())
            .map(Operand::ArgCount)
            .map_err(|_| self.builder.limit_exceeded("arguments"))
    }

    fn compile_arguments(&mut self, arguments: &[Expression]) -> Result<()> {
        for arg in arguments {
            self.compile_expression(arg)?;
        }
        Ok(())
    }

    fn compile_call(&mut self, call: &CallExpression) -> Result<()> {
        let count = self.argument_count(&call.arguments)?;
        match &call.callee.kind {
            ExpressionKind::Member(member) if member.is_super_property() => {
                self.emit_op(OpCode::LoadThis);
                self.compile_super_property(member)?;
                self.compile_arguments(&call.arguments)?;
                self.emit_with(OpCode::CallWithThis, count);
            }
            ExpressionKind::Member(member) => {
                // The receiver stays below the callee.
                self.compile_expression(&member.object)?;
                self.emit_op(OpCode::Dup);
                match &member.property {
                    MemberProperty::Identifier(name) => {
                        let property = self.property_operand(name)?;
                        self.emit_with(OpCode::GetById, property);
                    }
                    MemberProperty::Expression(key) => {
                        self.compile_expression(key)?;
                        self.emit_op(OpCode::GetByValue);
                    }
                }
                self.compile_arguments(&call.arguments)?;
                self.emit_with(OpCode::CallWithThis, count);
            }
            _ => {
                self.compile_expression(&call.callee)?;
                self.compile_arguments(&call.arguments)?;
                self.emit_with(OpCode::Call, count);
            }
        }
        Ok(())
    }

    fn compile_super_call(&mut self, call: &SuperCallExpression) -> Result<()> {
        if !self.context.super_call {
            return Err(self.error(CompileErrorKind::InvalidSuperCall));
        }
        let count = self.argument_count(&call.arguments)?;
        self.compile_arguments(&call.arguments)?;
        self.emit_with(OpCode::SuperCall, count);
        Ok(())
    }

    fn compile_new(&mut self, new_expr: &NewExpression) -> Result<()> {
        let count = self.argument_count(&new_expr.arguments)?;
        self.compile_expression(&new_expr.callee)?;
        self.compile_arguments(&new_expr.arguments)?;
        self.emit_with(OpCode::New, count);
        Ok(())
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Checks that `target` can be assigned to. Returns false when a
    /// runtime `ReferenceError` was emitted instead.
    fn check_assignment_target(&mut self, target: &Expression) -> Result<bool> {
        match &target.kind {
            ExpressionKind::Identifier(_) | ExpressionKind::Member(_) => Ok(true),
            ExpressionKind::Call(_) if !self.context.strict => {
                let saved = self.enter_position(target.position);
                let message = self
                    .builder
                    .add_constant(Constant::String(INVALID_ASSIGNMENT_MESSAGE.to_string()))?;
                self.emit_with(OpCode::ThrowReferenceError, Operand::Constant(message));
                self.builder.set_position(saved);
                Ok(false)
            }
            _ => Err(CompileError::new(
                CompileErrorKind::InvalidAssignmentTarget,
                target.position,
            )),
        }
    }

    /// Evaluates the base of an assignment target onto the stack.
    fn compile_reference<'e>(&mut self, target: &'e Expression) -> Result<Reference<'e>> {
        match &target.kind {
            ExpressionKind::Identifier(id) => Ok(Reference::Identifier(id)),
            ExpressionKind::Member(member) if member.is_super_property() => {
                self.require_super_property(member.object.position)?;
                self.emit_op(OpCode::LoadThis);
                if let Some(name) = member.static_property_name() {
                    let property = self.property_operand(name)?;
                    self.emit_op(OpCode::ResolveSuperBase);
                    return Ok(Reference::SuperProperty(property));
                }
                let MemberProperty::Expression(key) = &member.property else {
                    return Err(self.internal("identifier property without a name"));
                };
                self.compile_expression(key)?;
                self.emit_op(OpCode::ResolveSuperBase);
                Ok(Reference::SuperValue)
            }
            ExpressionKind::Member(member) => {
                self.compile_expression(&member.object)?;
                match &member.property {
                    MemberProperty::Identifier(name) => {
                        Ok(Reference::Property(self.property_operand(name)?))
                    }
                    MemberProperty::Expression(key) => {
                        self.compile_expression(key)?;
                        Ok(Reference::Value)
                    }
                }
            }
            _ => Err(CompileError::new(
                CompileErrorKind::InvalidAssignmentTarget,
                target.position,
            )),
        }
    }

    /// Reads the current value of a reference, keeping its base.
    fn emit_reference_get(&mut self, reference: Reference<'_>) -> Result<()> {
        match reference.width() {
            0 => {}
            1 => self.emit_op(OpCode::Dup),
            width => self.emit_with(OpCode::DupN, Operand::ArgCount(width)),
        }
        match reference {
            Reference::Identifier(id) => self.compile_identifier(id)?,
            Reference::Property(property) => self.emit_with(OpCode::GetById, property),
            Reference::Value => self.emit_op(OpCode::GetByValue),
            Reference::SuperProperty(property) => self.emit_with(OpCode::GetByIdWithThis, property),
            Reference::SuperValue => self.emit_op(OpCode::GetByValueWithThis),
        }
        Ok(())
    }

    /// Writes the value on top of the stack through a reference, consuming
    /// its base. The value stays on the stack iff `keep_value`.
    fn emit_reference_put(&mut self, reference: Reference<'_>, keep_value: bool) -> Result<()> {
        match reference {
            Reference::Identifier(id) => {
                if keep_value {
                    self.emit_op(OpCode::Dup);
                }
                return self.store_identifier(id);
            }
            Reference::Property(property) => self.emit_with(OpCode::PutById, property),
            Reference::Value => self.emit_op(OpCode::PutByValue),
            Reference::SuperProperty(property) => self.emit_with(OpCode::PutByIdWithThis, property),
            Reference::SuperValue => self.emit_op(OpCode::PutByValueWithThis),
        }
        if !keep_value {
            self.emit_op(OpCode::Pop);
        }
        Ok(())
    }

    /// Drops the base below the value on top of the stack.
    fn emit_reference_discard(&mut self, reference: Reference<'_>) {
        let width = reference.width();
        if width == 0 {
            return;
        }
        self.emit_with(OpCode::Rotate, Operand::ArgCount(width + 1));
        for _ in 0..width {
            self.emit_op(OpCode::Pop);
        }
    }

    fn compile_assignment(&mut self, assign: &AssignmentExpression) -> Result<()> {
        if !self.check_assignment_target(&assign.target)? {
            return Ok(());
        }
        let reference = self.compile_reference(&assign.target)?;

        match assign.operator.binary_operator() {
            None => {
                self.compile_expression(&assign.value)?;
                self.emit_reference_put(reference, true)
            }
            Some(operator) => match short_circuit_jump(operator) {
                Some(short_circuit) => {
                    let short = self.make_label();
                    let end = self.make_label();
                    self.emit_reference_get(reference)?;
                    self.emit_op(OpCode::Dup);
                    self.emit_jump(short_circuit, short);
                    self.emit_op(OpCode::Pop);
                    self.compile_expression(&assign.value)?;
                    self.emit_reference_put(reference, true)?;
                    self.emit_jump(OpCode::Jump, end);
                    self.bind_label(short)?;
                    self.emit_reference_discard(reference);
                    self.bind_label(end)
                }
                None => {
                    let opcode = binary_opcode(operator)
                        .ok_or_else(|| self.internal("compound operator without an opcode"))?;
                    self.emit_reference_get(reference)?;
                    self.compile_expression(&assign.value)?;
                    self.emit_op(opcode);
                    self.emit_reference_put(reference, true)
                }
            },
        }
    }

    fn compile_update(&mut self, update: &UpdateExpression) -> Result<()> {
        if !self.check_assignment_target(&update.argument)? {
            return Ok(());
        }
        let opcode = match update.operator {
            UpdateOperator::Increment => OpCode::Increment,
            UpdateOperator::Decrement => OpCode::Decrement,
        };
        let reference = self.compile_reference(&update.argument)?;
        self.emit_reference_get(reference)?;

        if update.prefix {
            self.emit_op(opcode);
            return self.emit_reference_put(reference, true);
        }

        // The old value is the result; park a copy below the base.
        self.emit_op(OpCode::ToNumeric);
        self.emit_op(OpCode::Dup);
        if reference.width() > 0 {
            self.emit_with(OpCode::Rotate, Operand::ArgCount(reference.width() + 2));
        }
        self.emit_op(opcode);
        self.emit_reference_put(reference, false)
    }
}

/// The conditional jump that skips the right operand of a logical operator.
fn short_circuit_jump(operator: BinaryOperator) -> Option<OpCode> {
    match operator {
        BinaryOperator::LogicalAnd => Some(OpCode::JumpIfFalse),
        BinaryOperator::LogicalOr => Some(OpCode::JumpIfTrue),
        BinaryOperator::NullishCoalescing => Some(OpCode::JumpIfNotNullish),
        _ => None,
    }
}

fn binary_opcode(operator: BinaryOperator) -> Option<OpCode> {
    Some(match operator {
        BinaryOperator::Add => OpCode::Add,
        BinaryOperator::Subtract => OpCode::Sub,
        BinaryOperator::Multiply => OpCode::Mul,
        BinaryOperator::Divide => OpCode::Div,
        BinaryOperator::Modulo => OpCode::Mod,
        BinaryOperator::Exponent => OpCode::Pow,
        BinaryOperator::Equal => OpCode::Eq,
        BinaryOperator::NotEqual => OpCode::Ne,
        BinaryOperator::StrictEqual => OpCode::StrictEq,
        BinaryOperator::StrictNotEqual => OpCode::StrictNe,
        BinaryOperator::LessThan => OpCode::Lt,
        BinaryOperator::LessThanEqual => OpCode::Le,
        BinaryOperator::GreaterThan => OpCode::Gt,
        BinaryOperator::GreaterThanEqual => OpCode::Ge,
        BinaryOperator::BitwiseAnd => OpCode::BitAnd,
        BinaryOperator::BitwiseOr => OpCode::BitOr,
        BinaryOperator::BitwiseXor => OpCode::BitXor,
        BinaryOperator::LeftShift => OpCode::Shl,
        BinaryOperator::RightShift => OpCode::Shr,
        BinaryOperator::UnsignedRightShift => OpCode::Ushr,
        BinaryOperator::In => OpCode::In,
        BinaryOperator::InstanceOf => OpCode::InstanceOf,
        BinaryOperator::LogicalAnd
        | BinaryOperator::LogicalOr
        | BinaryOperator::NullishCoalescing => return None,
    })
}

/// Parses BigInt literal digits: decimal, or `0x`/`0o`/`0b` prefixed, with
/// `_` separators allowed.
fn parse_bigint(text: &str) -> Option<BigInt> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = match cleaned.get(..2) {
        Some("0x" | "0X") => (&cleaned[2..], 16),
        Some("0o" | "0O") => (&cleaned[2..], 8),
        Some("0b" | "0B") => (&cleaned[2..], 2),
        _ => (cleaned.as_str(), 10),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    BigInt::from_str_radix(digits, radix).ok()
}
