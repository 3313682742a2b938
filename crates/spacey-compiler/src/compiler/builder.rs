// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Instruction buffer with symbolic labels.
//!
//! Emission after a terminating instruction is dropped until the next label
//! is bound, so a finished executable never contains code that no jump,
//! handler or fallthrough can reach.

use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::ast::SourcePosition;
use crate::compiler::bytecode::{
    Constant, ExceptionHandler, Executable, Instruction, Label, OpCode, Operand,
};
use crate::error::{CompileError, CompileErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstantKey {
    Number(u64),
    String(String),
    BigInt(BigInt),
}

#[derive(Debug, Default, Clone, Copy)]
struct LabelState {
    offset: Option<u32>,
    referenced: bool,
}

#[derive(Debug)]
struct PendingHandler {
    start: u32,
    end: u32,
    handler: Label,
    environment_depth: u32,
}

/// Accumulates instructions and tables for one executable.
#[derive(Debug, Default)]
pub(crate) struct BytecodeBuilder {
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
    constant_indices: FxHashMap<ConstantKey, u16>,
    identifiers: Vec<String>,
    identifier_indices: FxHashMap<String, u16>,
    labels: Vec<LabelState>,
    handlers: Vec<PendingHandler>,
    position: SourcePosition,
    unreachable: bool,
}

impl BytecodeBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends an instruction at the current source position.
    ///
    /// Returns false when the instruction was dropped as unreachable.
    pub(crate) fn emit(&mut self, mut instruction: Instruction) -> bool {
        if self.unreachable {
            tracing::trace!(opcode = ?instruction.opcode, "dropping unreachable instruction");
            return false;
        }
        instruction.position = self.position;
        for operand in &instruction.operands {
            if let Operand::Label(label) = operand {
                if let Some(state) = self.labels.get_mut(label.0 as usize) {
                    state.referenced = true;
                }
            }
        }
        if instruction.opcode.is_terminator() {
            self.unreachable = true;
        }
        self.instructions.push(instruction);
        true
    }

    /// Whether the next emitted instruction would be kept.
    #[cfg(test)]
    pub(crate) fn is_reachable(&self) -> bool {
        !self.unreachable
    }

    pub(crate) fn offset(&self) -> u32 {
        self.instructions.len() as u32
    }

    pub(crate) fn position(&self) -> SourcePosition {
        self.position
    }

    /// Sets the position stamped on subsequent instructions, returning the
    /// previous one.
    pub(crate) fn set_position(&mut self, position: SourcePosition) -> SourcePosition {
        std::mem::replace(&mut self.position, position)
    }

    pub(crate) fn make_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() as u32 - 1)
    }

    /// Binds `label` to the next instruction offset. Code after it is
    /// reachable if control falls through or something already jumps to it;
    /// labels are only ever targeted backwards from code they precede.
    pub(crate) fn bind_label(&mut self, label: Label) -> Result<()> {
        let offset = self.offset();
        match self.labels.get_mut(label.0 as usize) {
            Some(state) if state.offset.is_none() => {
                state.offset = Some(offset);
                if state.referenced {
                    self.unreachable = false;
                }
                Ok(())
            }
            Some(_) => Err(CompileError::internal(
                format!("label {} bound twice", label),
                self.position,
            )),
            None => Err(CompileError::internal(
                format!("unknown label {}", label),
                self.position,
            )),
        }
    }

    /// Records a protected range whose handler is `handler`.
    pub(crate) fn add_handler(
        &mut self,
        start: u32,
        end: u32,
        handler: Label,
        environment_depth: u32,
    ) {
        if start < end {
            if let Some(state) = self.labels.get_mut(handler.0 as usize) {
                state.referenced = true;
            }
            self.handlers.push(PendingHandler {
                start,
                end,
                handler,
                environment_depth,
            });
        }
    }

    pub(crate) fn add_constant(&mut self, constant: Constant) -> Result<u16> {
        let key = match &constant {
            Constant::Number(n) => ConstantKey::Number(n.to_bits()),
            Constant::String(s) => ConstantKey::String(s.clone()),
            Constant::BigInt(b) => ConstantKey::BigInt(b.clone()),
        };
        if let Some(index) = self.constant_indices.get(&key) {
            return Ok(*index);
        }
        let index = u16::try_from(self.constants.len())
            .map_err(|_| self.limit_exceeded("constants"))?;
        self.constants.push(constant);
        self.constant_indices.insert(key, index);
        Ok(index)
    }

    /// Interns a string constant used as a property key.
    pub(crate) fn add_property(&mut self, name: &str) -> Result<u16> {
        self.add_constant(Constant::String(name.to_string()))
    }

    /// Interns a binding or global name.
    pub(crate) fn add_identifier(&mut self, name: &str) -> Result<u16> {
        if let Some(index) = self.identifier_indices.get(name) {
            return Ok(*index);
        }
        let index = u16::try_from(self.identifiers.len())
            .map_err(|_| self.limit_exceeded("identifiers"))?;
        self.identifiers.push(name.to_string());
        self.identifier_indices.insert(name.to_string(), index);
        Ok(index)
    }

    pub(crate) fn limit_exceeded(&self, what: &'static str) -> CompileError {
        CompileError::new(CompileErrorKind::LimitExceeded(what), self.position)
    }

    fn resolve(&self, label: Label) -> Result<u32> {
        self.labels
            .get(label.0 as usize)
            .and_then(|state| state.offset)
            .ok_or_else(|| {
                CompileError::internal(format!("label {} was never bound", label), self.position)
            })
    }

    /// Resolves every label and produces the instruction and handler tables
    /// of an executable. Tables for nested functions and classes are filled
    /// in by the caller.
    pub(crate) fn finish(mut self) -> Result<Executable> {
        let mut instructions = std::mem::take(&mut self.instructions);
        for instruction in &mut instructions {
            for operand in &mut instruction.operands {
                if let Operand::Label(label) = operand {
                    *operand = Operand::Jump(self.resolve(*label)?);
                }
            }
        }

        let exception_handlers = self
            .handlers
            .iter()
            .map(|pending| {
                Ok(ExceptionHandler {
                    start: pending.start,
                    end: pending.end,
                    handler: self.resolve(pending.handler)?,
                    environment_depth: pending.environment_depth,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if instructions
            .last()
            .is_some_and(|last| !last.opcode.is_terminator())
        {
            return Err(CompileError::internal(
                "executable does not end in a terminator",
                self.position,
            ));
        }
        let len = instructions.len();
        let dangling = instructions
            .iter()
            .flat_map(Instruction::jump_targets)
            .chain(exception_handlers.iter().map(|handler| handler.handler))
            .any(|target| target as usize >= len);
        if dangling {
            return Err(CompileError::internal(
                "jump target past the end of the executable",
                self.position,
            ));
        }

        Ok(Executable {
            instructions,
            constants: self.constants,
            identifiers: self.identifiers,
            exception_handlers,
            ..Executable::default()
        })
    }
}

/// Emits `opcode` with a label operand.
pub(crate) fn jump(opcode: OpCode, label: Label) -> Instruction {
    Instruction::with_operand(opcode, Operand::Label(label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve_to_offsets() {
        let mut builder = BytecodeBuilder::new();
        let end = builder.make_label();
        builder.emit(Instruction::simple(OpCode::LoadTrue));
        builder.emit(jump(OpCode::JumpIfFalse, end));
        builder.emit(Instruction::simple(OpCode::LoadNull));
        builder.emit(Instruction::simple(OpCode::Pop));
        builder.bind_label(end).unwrap();
        builder.emit(Instruction::simple(OpCode::Halt));

        let executable = builder.finish().unwrap();
        assert_eq!(executable.instructions()[1].operands, vec![Operand::Jump(4)]);
    }

    #[test]
    fn test_code_after_terminator_is_dropped() {
        let mut builder = BytecodeBuilder::new();
        let target = builder.make_label();
        builder.emit(jump(OpCode::JumpIfTrue, target));
        builder.emit(Instruction::simple(OpCode::Throw));
        assert!(!builder.emit(Instruction::simple(OpCode::Pop)));

        let unused = builder.make_label();
        builder.bind_label(unused).unwrap();
        assert!(!builder.is_reachable());

        builder.bind_label(target).unwrap();
        assert!(builder.emit(Instruction::simple(OpCode::Halt)));

        let executable = builder.finish().unwrap();
        let opcodes: Vec<_> = executable.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![OpCode::JumpIfTrue, OpCode::Throw, OpCode::Halt]
        );
    }

    #[test]
    fn test_constants_are_deduplicated() {
        let mut builder = BytecodeBuilder::new();
        let a = builder.add_property("length").unwrap();
        let b = builder.add_constant(Constant::Number(1.0)).unwrap();
        let c = builder.add_property("length").unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(builder.add_identifier("x").unwrap(), 0);
        assert_eq!(builder.add_identifier("y").unwrap(), 1);
        assert_eq!(builder.add_identifier("x").unwrap(), 0);
    }

    #[test]
    fn test_unbound_label_is_an_internal_error() {
        let mut builder = BytecodeBuilder::new();
        let label = builder.make_label();
        builder.emit(jump(OpCode::Jump, label));
        let error = builder.finish().unwrap_err();
        assert!(matches!(
            error.kind,
            CompileErrorKind::InternalInvariantViolation(_)
        ));
    }

    #[test]
    fn test_label_bound_twice() {
        let mut builder = BytecodeBuilder::new();
        let label = builder.make_label();
        builder.bind_label(label).unwrap();
        assert!(builder.bind_label(label).is_err());
    }
}
