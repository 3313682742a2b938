// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode definitions.
//!
//! The executor is a stack machine: operands name bindings, labels, constant
//! pool entries and literal property keys, while values travel on the
//! operand stack. Abrupt completions that cross a `finally` are carried as
//! explicit completion records by [`OpCode::EnterFinally`] and
//! [`OpCode::LeaveFinally`].

use std::fmt;

use num_bigint::BigInt;

use crate::ast::{FunctionKind, MethodKind, SourcePosition};

/// A compiled, read-only unit: the program or one function.
///
/// Built by the emitter and never modified afterwards; all fields are
/// reachable through accessors only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Executable {
    pub(crate) name: Option<String>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) constants: Vec<Constant>,
    pub(crate) identifiers: Vec<String>,
    pub(crate) functions: Vec<FunctionBlueprint>,
    pub(crate) classes: Vec<ClassBlueprint>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
    pub(crate) finally_regions: u16,
    pub(crate) parameter_count: u16,
    pub(crate) strict: bool,
}

impl Executable {
    /// The function name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The instructions in execution order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The constant pool.
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Binding and global names referenced by `Binding`/`Global` operands.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Nested functions referenced by `Function` operands.
    pub fn functions(&self) -> &[FunctionBlueprint] {
        &self.functions
    }

    /// Classes referenced by `Class` operands.
    pub fn classes(&self) -> &[ClassBlueprint] {
        &self.classes
    }

    /// Protected ranges, innermost first.
    pub fn exception_handlers(&self) -> &[ExceptionHandler] {
        &self.exception_handlers
    }

    /// Number of completion-record slots the executor must reserve.
    pub fn finally_region_count(&self) -> u16 {
        self.finally_regions
    }

    /// Number of formal parameters, excluding a rest parameter.
    pub fn parameter_count(&self) -> u16 {
        self.parameter_count
    }

    /// Whether the code is strict mode code.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resolves a `Constant` or `Property` operand.
    pub fn constant(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Resolves a `Binding` or `Global` operand.
    pub fn identifier(&self, index: u16) -> Option<&str> {
        self.identifiers.get(index as usize).map(String::as_str)
    }

    /// Counts instructions with `opcode`, including nested functions.
    pub fn count_opcode(&self, opcode: OpCode) -> usize {
        self.instructions
            .iter()
            .filter(|instruction| instruction.opcode == opcode)
            .count()
            + self
                .functions
                .iter()
                .map(|function| function.executable.count_opcode(opcode))
                .sum::<usize>()
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, operand: &Operand) -> fmt::Result {
        match operand {
            Operand::Constant(index) => match self.constant(*index) {
                Some(constant) => write!(f, "{}", constant),
                None => write!(f, "#{}", index),
            },
            Operand::Property(index) => match self.constant(*index) {
                Some(Constant::String(key)) => write!(f, ".{}", key),
                _ => write!(f, ".#{}", index),
            },
            Operand::Binding(index) => write!(f, "${}", self.identifier(*index).unwrap_or("?")),
            Operand::Global(index) => write!(f, "@{}", self.identifier(*index).unwrap_or("?")),
            other => write!(f, "{}", other),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        writeln!(
            f,
            "{}executable {} (params: {}{})",
            indent,
            self.name.as_deref().unwrap_or("<anonymous>"),
            self.parameter_count,
            if self.strict { ", strict" } else { "" }
        )?;
        for (offset, instruction) in self.instructions.iter().enumerate() {
            write!(
                f,
                "{}  {:04} [{}] {:?}",
                indent, offset, instruction.position, instruction.opcode
            )?;
            for operand in &instruction.operands {
                write!(f, " ")?;
                self.fmt_operand(f, operand)?;
            }
            writeln!(f)?;
        }
        for handler in &self.exception_handlers {
            writeln!(
                f,
                "{}  handler [{:04}, {:04}) -> {:04} (env depth {})",
                indent, handler.start, handler.end, handler.handler, handler.environment_depth
            )?;
        }
        for class in &self.classes {
            writeln!(
                f,
                "{}  class {} (constructor: {})",
                indent,
                class.name.as_deref().unwrap_or("<anonymous>"),
                class
                    .constructor
                    .map_or_else(|| "default".to_string(), |index| format!("fn#{}", index))
            )?;
        }
        for function in &self.functions {
            function.executable.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// A nested function referenced by `NewFunction`.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBlueprint {
    /// Normal, arrow, method or constructor
    pub kind: FunctionKind,
    /// The compiled body
    pub executable: Executable,
}

/// A class referenced by `NewClass`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassBlueprint {
    /// The class name
    pub name: Option<String>,
    /// Index into the functions table; None means a default constructor
    pub constructor: Option<u16>,
    /// Methods, getters and setters
    pub methods: Vec<ClassMethodBlueprint>,
    /// Whether `NewClass` pops a superclass value
    pub has_super_class: bool,
}

/// One method of a [`ClassBlueprint`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMethodBlueprint {
    /// Property name
    pub key: String,
    /// Method, getter or setter
    pub kind: MethodKind,
    /// Whether it lives on the constructor
    pub is_static: bool,
    /// Index into the functions table
    pub function: u16,
}

/// A protected instruction range.
///
/// When an instruction in `[start, end)` throws, the executor restores the
/// lexical environment depth, pushes the exception and jumps to `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First protected offset
    pub start: u32,
    /// One past the last protected offset
    pub end: u32,
    /// Handler offset
    pub handler: u32,
    /// Lexical environment depth to restore before running the handler
    pub environment_depth: u32,
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// A number
    Number(f64),
    /// A string; also used for property keys
    String(String),
    /// An arbitrary precision integer
    BigInt(BigInt),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Number(n) => write!(f, "{}", n),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::BigInt(b) => write!(f, "{}n", b),
        }
    }
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation code
    pub opcode: OpCode,
    /// Operands, in the order documented on the opcode
    pub operands: Vec<Operand>,
    /// Source position of the construct that produced it
    pub position: SourcePosition,
}

impl Instruction {
    /// Creates a new instruction with no operand.
    pub fn simple(opcode: OpCode) -> Self {
        Self::with_operands(opcode, Vec::new())
    }

    /// Creates a new instruction with one operand.
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Self::with_operands(opcode, vec![operand])
    }

    /// Creates a new instruction with several operands.
    pub fn with_operands(opcode: OpCode, operands: Vec<Operand>) -> Self {
        Self {
            opcode,
            operands,
            position: SourcePosition::default(),
        }
    }

    /// The first operand, if any.
    pub fn operand(&self) -> Option<&Operand> {
        self.operands.first()
    }

    /// Resolved jump targets of this instruction.
    pub fn jump_targets(&self) -> impl Iterator<Item = u32> + '_ {
        self.operands.iter().filter_map(|operand| match operand {
            Operand::Jump(offset) => Some(*offset),
            _ => None,
        })
    }

    /// The binding or global name index this instruction refers to.
    pub fn identifier_operand(&self) -> Option<u16> {
        self.operands.iter().find_map(|operand| match operand {
            Operand::Binding(index) | Operand::Global(index) => Some(*index),
            _ => None,
        })
    }
}

/// A symbolic jump target, resolved to an offset when the executable is
/// finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Completion record tags carried through finally regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionType {
    /// Fell off the end of the protected block
    Normal,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `return`; the value is popped by `EnterFinally`
    Return,
    /// An exception; the value is popped by `EnterFinally`
    Throw,
}

impl CompletionType {
    /// Whether the completion carries a value on the operand stack.
    pub fn carries_value(self) -> bool {
        matches!(self, CompletionType::Return | CompletionType::Throw)
    }
}

/// How `CreateVariable` creates a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingMode {
    /// Assignments are allowed
    pub mutable: bool,
    /// Starts uninitialized (TDZ) rather than usable
    pub lexical: bool,
    /// Referenced from a nested function
    pub captured: bool,
}

/// Instruction operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// Constant pool index
    Constant(u16),
    /// Identifier table index of a statically resolved binding
    Binding(u16),
    /// Identifier table index of a global lookup
    Global(u16),
    /// Property name index in constant pool
    Property(u16),
    /// Unresolved jump target; never present in a finished executable
    Label(Label),
    /// Resolved absolute instruction offset
    Jump(u32),
    /// Number of arguments or elements
    ArgCount(u16),
    /// Argument index
    Argument(u16),
    /// Index into the functions table
    Function(u16),
    /// Index into the classes table
    Class(u16),
    /// Finally region slot
    Region(u16),
    /// Completion record tag
    Completion(CompletionType),
    /// Binding creation mode
    Mode(BindingMode),
    /// Number of bindings an environment will hold
    Capacity(u32),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(index) => write!(f, "#{}", index),
            Operand::Binding(index) => write!(f, "$#{}", index),
            Operand::Global(index) => write!(f, "@#{}", index),
            Operand::Property(index) => write!(f, ".#{}", index),
            Operand::Label(label) => write!(f, "{}", label),
            Operand::Jump(offset) => write!(f, "-> {:04}", offset),
            Operand::ArgCount(count) => write!(f, "argc={}", count),
            Operand::Argument(index) => write!(f, "arg{}", index),
            Operand::Function(index) => write!(f, "fn#{}", index),
            Operand::Class(index) => write!(f, "class#{}", index),
            Operand::Region(index) => write!(f, "region{}", index),
            Operand::Completion(kind) => write!(f, "{:?}", kind),
            Operand::Mode(mode) => write!(
                f,
                "{}{}{}",
                if mode.mutable { "mutable" } else { "immutable" },
                if mode.lexical { ",lexical" } else { "" },
                if mode.captured { ",captured" } else { "" }
            ),
            Operand::Capacity(count) => write!(f, "capacity={}", count),
        }
    }
}

/// Operation codes for the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Stack operations
    /// Push a constant onto the stack
    LoadConst,
    /// Push undefined
    LoadUndefined,
    /// Push null
    LoadNull,
    /// Push true
    LoadTrue,
    /// Push false
    LoadFalse,
    /// Pop the top value
    Pop,
    /// Duplicate the top value
    Dup,
    /// Duplicate the top `ArgCount` values, preserving their order
    DupN,
    /// Move the top value below the next `ArgCount - 1` values
    Rotate,

    // Arithmetic operations
    /// Add top two values
    Add,
    /// Subtract
    Sub,
    /// Multiply
    Mul,
    /// Divide
    Div,
    /// Modulo
    Mod,
    /// Exponentiation
    Pow,
    /// Negate (unary minus)
    Neg,
    /// Unary plus
    ToNumber,
    /// Convert to a number or BigInt (postfix update)
    ToNumeric,
    /// Add one
    Increment,
    /// Subtract one
    Decrement,

    // Comparison operations
    /// Equal (==)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Strict equal (===)
    StrictEq,
    /// Strict not equal (!==)
    StrictNe,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,

    // Logical operations
    /// Logical NOT
    Not,

    // Bitwise operations
    /// Bitwise AND
    BitAnd,
    /// Bitwise OR
    BitOr,
    /// Bitwise XOR
    BitXor,
    /// Bitwise NOT
    BitNot,
    /// Left shift
    Shl,
    /// Signed right shift
    Shr,
    /// Unsigned right shift
    Ushr,

    // Bindings and environments
    /// Create a binding in the current environment: `Binding`, `Mode`
    CreateVariable,
    /// Pop a value and initialize a binding, ending its TDZ: `Binding`
    InitializeBinding,
    /// Throw a ReferenceError if the binding is uninitialized: `Binding`
    ThrowIfTDZ,
    /// Push the value of a binding: `Binding`
    GetBinding,
    /// Pop a value and assign it to an initialized binding: `Binding`
    SetBinding,
    /// Throw a TypeError for assignment to an immutable binding
    ThrowConstAssignment,
    /// Push a global: `Global`
    GetGlobal,
    /// Pop a value into a global: `Global`
    SetGlobal,
    /// Delete a global, pushing the result: `Global`
    DeleteVariable,
    /// typeof of a global that may not exist: `Global`
    TypeOfGlobal,
    /// Push a new declarative environment: `Capacity`
    CreateLexicalEnvironment,
    /// Pop the current declarative environment
    LeaveLexicalEnvironment,
    /// Replace the loop head environment with a fresh copy
    CopyPerIterationEnvironment,

    // Property operations
    /// Pop object, push property: `Property`
    GetById,
    /// Pop object and key, push property
    GetByValue,
    /// Pop object and value, store, push value: `Property`
    PutById,
    /// Pop object, key and value, store, push value
    PutByValue,
    /// Pop object, push deletion result: `Property`
    DeleteById,
    /// Pop object and key, push deletion result
    DeleteByValue,
    /// Push the home object's prototype
    ResolveSuperBase,
    /// Pop this and base, push `base[name]` read with `this` as receiver: `Property`
    GetByIdWithThis,
    /// Pop this, key and base, push `base[key]` read with `this` as receiver
    GetByValueWithThis,
    /// Pop this, base and value, store with `this` as receiver, push value: `Property`
    PutByIdWithThis,
    /// Pop this, key, base and value, store with `this` as receiver, push value
    PutByValueWithThis,
    /// Pop this and base; deleting a super reference always throws: `Property`
    DeleteByIdWithThis,
    /// Pop this, key and base; deleting a super reference always throws
    DeleteByValueWithThis,
    /// Push `super.name` read with the current `this` as receiver: `Property`
    GetSuperById,
    /// Pop the source and the `ArgCount` keys below it; push a copy of the
    /// source's own properties except those keys
    ObjectRest,
    /// Pop an array-like and push its elements from index `ArgCount` on as
    /// a new array
    ArrayRest,

    // Control flow
    /// Unconditional jump
    Jump,
    /// Pop; jump if falsy
    JumpIfFalse,
    /// Pop; jump if truthy
    JumpIfTrue,
    /// Pop; jump unless null or undefined
    JumpIfNotNullish,
    /// Record a completion for a finally region and run its cleanup code:
    /// `Region`, `Completion`, cleanup `Jump`, resume `Jump`
    EnterFinally,
    /// Resume the completion recorded for a finally region: `Region`
    LeaveFinally,

    // Function operations
    /// Push argument `Argument` (undefined if absent)
    LoadArgument,
    /// Push an array of the arguments from `Argument` on
    LoadRestArguments,
    /// Push the currently running function
    LoadCallee,
    /// Call a function with undefined `this`
    Call,
    /// Call a function with an explicit `this` below the callee
    CallWithThis,
    /// Call the parent constructor
    SuperCall,
    /// Return from function
    Return,
    /// Create a closure: `Function`
    NewFunction,
    /// Create a class: `Class`
    NewClass,

    // Object operations
    /// Create a new object
    NewObject,
    /// Create a new array
    NewArray,
    /// new operator
    New,
    /// typeof operator
    TypeOf,
    /// instanceof operator
    InstanceOf,
    /// in operator
    In,

    // Special
    /// this keyword
    LoadThis,
    /// Throw the value on top of the stack
    Throw,
    /// Throw a ReferenceError with message `Constant`
    ThrowReferenceError,
    /// Halt execution
    Halt,
}

impl OpCode {
    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            OpCode::Jump
                | OpCode::Return
                | OpCode::Throw
                | OpCode::ThrowReferenceError
                | OpCode::ThrowConstAssignment
                | OpCode::EnterFinally
                | OpCode::LeaveFinally
                | OpCode::Halt
        )
    }
}
