// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! A small stack machine for running compiled executables in tests.
//!
//! It covers the opcodes needed by plain functions, loops, objects with
//! prototype chains and getters, classes, `super` and try/catch/finally. Reading or writing an uninitialized binding without a
//! preceding `ThrowIfTDZ` is reported as [`Fault::Internal`], so tests catch
//! checks that were elided unsoundly.

#![allow(dead_code)]

use rustc_hash::FxHashMap;
use spacey_compiler::ast::{FunctionKind, MethodKind};
use spacey_compiler::compiler::{CompletionType, Constant};
use spacey_compiler::{Executable, Instruction, OpCode, Operand};
use std::cell::RefCell;
use std::rc::Rc;

const STEP_LIMIT: usize = 100_000;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Rc<RefCell<Object>>),
    Function(Rc<Closure>),
    Class(Rc<Class>),
    /// The recording `log` global
    Log,
    /// A thrown engine error: kind and message
    Error(Rc<str>, Rc<str>),
}

impl Value {
    fn string(text: impl Into<Rc<str>>) -> Self {
        Value::String(text.into())
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Error(..) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) | Value::Class(_) | Value::Log => "function",
        }
    }

    fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Log, Value::Log) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(_) | Value::Log => write!(f, "function"),
            Value::Class(_) => write!(f, "class"),
            Value::Error(kind, message) => write!(f, "{}: {}", kind, message),
        }
    }
}

/// An ordinary object.
#[derive(Debug, Default)]
pub struct Object {
    properties: FxHashMap<String, Value>,
    getters: FxHashMap<String, Value>,
    prototype: Option<Value>,
}

/// A function value: compiled code plus the environment it closes over.
#[derive(Debug)]
pub struct Closure {
    executable: Executable,
    environment: Env,
    /// Object whose prototype `super` resolves against
    home: Option<Value>,
    /// Parent class called by `super(...)`
    parent: Option<Value>,
}

/// A class created by `NewClass`.
#[derive(Debug)]
pub struct Class {
    /// None runs the parent's constructor, if any
    constructor: Option<Rc<Closure>>,
    prototype: Value,
    parent: Option<Value>,
    statics: Value,
}

/// Why execution stopped abnormally.
#[derive(Debug, Clone)]
pub enum Fault {
    /// An uncaught exception
    Thrown(Value),
    /// The executable did something the compiler must never emit
    Internal(String),
}

impl Fault {
    /// The `kind: message` text of an uncaught engine error.
    pub fn thrown_text(&self) -> Option<String> {
        match self {
            Fault::Thrown(value) => Some(value.to_string()),
            Fault::Internal(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    mutable: bool,
}

#[derive(Debug, Default)]
struct Environment {
    slots: FxHashMap<String, Slot>,
    parent: Option<Env>,
}

type Env = Rc<RefCell<Environment>>;

fn new_env(parent: Option<Env>) -> Env {
    Rc::new(RefCell::new(Environment {
        slots: FxHashMap::default(),
        parent,
    }))
}

/// Finds the environment in the chain that declares `name`.
fn find_env(env: &Env, name: &str) -> Option<Env> {
    let mut current = Some(env.clone());
    while let Some(candidate) = current {
        if candidate.borrow().slots.contains_key(name) {
            return Some(candidate);
        }
        current = candidate.borrow().parent.clone();
    }
    None
}

struct PendingCompletion {
    completion: CompletionType,
    value: Option<Value>,
    resume: usize,
}

struct Frame {
    pc: usize,
    stack: Vec<Value>,
    /// The frame environment followed by every pushed lexical environment
    environments: Vec<Env>,
    completions: Vec<Option<PendingCompletion>>,
    arguments: Vec<Value>,
    callee: Value,
    this: Value,
    home: Option<Value>,
    parent: Option<Value>,
}

/// What a call hands to the new frame.
struct Activation {
    arguments: Vec<Value>,
    callee: Value,
    this: Value,
    home: Option<Value>,
    parent: Option<Value>,
}

impl Frame {
    fn env(&self) -> &Env {
        // The frame environment is never popped.
        &self.environments[self.environments.len() - 1]
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack
            .pop()
            .ok_or_else(|| Fault::Internal(format!("stack underflow at {}", self.pc - 1)))
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, Fault> {
        if self.stack.len() < count {
            return Err(Fault::Internal(format!("stack underflow at {}", self.pc - 1)));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }
}

enum Flow {
    Next,
    Return(Value),
}

/// Runs executables against a global object with a recording `log`.
pub struct Interpreter {
    globals: FxHashMap<String, Value>,
    /// One entry per `log(...)` call, arguments joined by spaces
    pub output: Vec<String>,
    steps: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let mut globals = FxHashMap::default();
        globals.insert("log".to_string(), Value::Log);
        Self {
            globals,
            output: Vec::new(),
            steps: 0,
        }
    }

    /// Runs a program executable to its `Halt`.
    pub fn run(&mut self, program: &Executable) -> Result<(), Fault> {
        let activation = Activation {
            arguments: Vec::new(),
            callee: Value::Undefined,
            this: Value::Undefined,
            home: None,
            parent: None,
        };
        self.execute(program, new_env(None), activation).map(|_| ())
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn call(&mut self, callee: Value, this: Value, arguments: Vec<Value>) -> Result<Value, Fault> {
        match &callee {
            Value::Log => {
                let line: Vec<String> = arguments.iter().map(Value::to_string).collect();
                self.output.push(line.join(" "));
                Ok(Value::Undefined)
            }
            Value::Function(closure) => {
                let closure = closure.clone();
                self.invoke(&closure, callee, this, arguments)
            }
            Value::Class(_) => Err(type_error(
                "Class constructor cannot be invoked without 'new'".into(),
            )),
            other => Err(type_error(format!("{} is not a function", other))),
        }
    }

    fn invoke(
        &mut self,
        closure: &Rc<Closure>,
        callee: Value,
        this: Value,
        arguments: Vec<Value>,
    ) -> Result<Value, Fault> {
        let env = new_env(Some(closure.environment.clone()));
        let activation = Activation {
            arguments,
            callee,
            this,
            home: closure.home.clone(),
            parent: closure.parent.clone(),
        };
        self.execute(&closure.executable, env, activation)
    }

    /// `new callee(...arguments)`
    fn construct(&mut self, callee: Value, arguments: Vec<Value>) -> Result<Value, Fault> {
        match &callee {
            Value::Class(class) => {
                let instance = Value::Object(Rc::new(RefCell::new(Object {
                    prototype: Some(class.prototype.clone()),
                    ..Object::default()
                })));
                self.run_constructor(class, instance.clone(), arguments)?;
                Ok(instance)
            }
            Value::Function(_) => {
                let instance = new_object(FxHashMap::default());
                self.call(callee.clone(), instance.clone(), arguments)?;
                Ok(instance)
            }
            other => Err(type_error(format!("{} is not a constructor", other))),
        }
    }

    /// Runs a class's constructor chain against an existing instance.
    fn run_constructor(
        &mut self,
        class: &Rc<Class>,
        this: Value,
        arguments: Vec<Value>,
    ) -> Result<(), Fault> {
        match (&class.constructor, &class.parent) {
            (Some(constructor), _) => {
                self.invoke(constructor, Value::Class(class.clone()), this, arguments)?;
            }
            (None, Some(Value::Class(parent))) => self.run_constructor(parent, this, arguments)?,
            (None, _) => {}
        }
        Ok(())
    }

    /// Reads `key` from `object`'s prototype chain, running getters against
    /// `receiver`.
    fn get(&mut self, object: &Value, key: &str, receiver: Value) -> Result<Value, Fault> {
        match lookup(object, key)? {
            Lookup::Data(value) => Ok(value),
            Lookup::Getter(getter) => self.call(getter, receiver, Vec::new()),
        }
    }

    fn execute(
        &mut self,
        executable: &Executable,
        env: Env,
        activation: Activation,
    ) -> Result<Value, Fault> {
        let mut frame = Frame {
            pc: 0,
            stack: Vec::new(),
            environments: vec![env],
            completions: (0..executable.finally_region_count()).map(|_| None).collect(),
            arguments: activation.arguments,
            callee: activation.callee,
            this: activation.this,
            home: activation.home,
            parent: activation.parent,
        };
        loop {
            self.steps += 1;
            if self.steps > STEP_LIMIT {
                return Err(Fault::Internal("step limit exceeded".into()));
            }
            match self.step(executable, &mut frame) {
                Ok(Flow::Next) => {}
                Ok(Flow::Return(value)) => return Ok(value),
                Err(Fault::Thrown(value)) => {
                    let at = (frame.pc - 1) as u32;
                    let handler = executable
                        .exception_handlers()
                        .iter()
                        .find(|handler| handler.start <= at && at < handler.end);
                    let Some(handler) = handler else {
                        return Err(Fault::Thrown(value));
                    };
                    frame
                        .environments
                        .truncate(1 + handler.environment_depth as usize);
                    frame.stack.push(value);
                    frame.pc = handler.handler as usize;
                }
                Err(internal) => return Err(internal),
            }
        }
    }

    fn step(&mut self, executable: &Executable, frame: &mut Frame) -> Result<Flow, Fault> {
        let instruction = executable
            .instructions()
            .get(frame.pc)
            .ok_or_else(|| Fault::Internal(format!("fell off the end at {}", frame.pc)))?;
        frame.pc += 1;

        match instruction.opcode {
            OpCode::LoadConst => {
                let value = match constant(executable, instruction)? {
                    Constant::Number(n) => Value::Number(*n),
                    Constant::String(s) => Value::string(s.as_str()),
                    Constant::BigInt(b) => Value::string(format!("{}n", b)),
                };
                frame.stack.push(value);
            }
            OpCode::LoadUndefined => frame.stack.push(Value::Undefined),
            OpCode::LoadNull => frame.stack.push(Value::Null),
            OpCode::LoadTrue => frame.stack.push(Value::Bool(true)),
            OpCode::LoadFalse => frame.stack.push(Value::Bool(false)),
            OpCode::LoadThis => frame.stack.push(frame.this.clone()),
            OpCode::LoadCallee => frame.stack.push(frame.callee.clone()),
            OpCode::Pop => {
                frame.pop()?;
            }
            OpCode::Dup => {
                let top = frame.pop()?;
                frame.stack.push(top.clone());
                frame.stack.push(top);
            }
            OpCode::DupN => {
                let count = arg_count(instruction)?;
                let top = frame.pop_n(count)?;
                frame.stack.extend(top.iter().cloned());
                frame.stack.extend(top);
            }
            OpCode::Rotate => {
                let count = arg_count(instruction)?;
                let top = frame.pop()?;
                let below = frame.pop_n(count - 1)?;
                frame.stack.push(top);
                frame.stack.extend(below);
            }

            // Arithmetic
            OpCode::Add => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let result = match (&left, &right) {
                    (Value::String(_), _) | (_, Value::String(_)) => {
                        Value::string(format!("{}{}", left, right))
                    }
                    _ => Value::Number(left.to_number() + right.to_number()),
                };
                frame.stack.push(result);
            }
            OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                let right = frame.pop()?.to_number();
                let left = frame.pop()?.to_number();
                let result = match instruction.opcode {
                    OpCode::Sub => left - right,
                    OpCode::Mul => left * right,
                    OpCode::Div => left / right,
                    _ => left % right,
                };
                frame.stack.push(Value::Number(result));
            }
            OpCode::Neg => {
                let value = frame.pop()?.to_number();
                frame.stack.push(Value::Number(-value));
            }
            OpCode::ToNumber | OpCode::ToNumeric => {
                let value = frame.pop()?.to_number();
                frame.stack.push(Value::Number(value));
            }
            OpCode::Increment | OpCode::Decrement => {
                let value = frame.pop()?.to_number();
                let delta = if instruction.opcode == OpCode::Increment { 1.0 } else { -1.0 };
                frame.stack.push(Value::Number(value + delta));
            }

            // Comparison
            OpCode::StrictEq | OpCode::Eq | OpCode::StrictNe | OpCode::Ne => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let equal = left.strict_equals(&right);
                let negate = matches!(instruction.opcode, OpCode::StrictNe | OpCode::Ne);
                frame.stack.push(Value::Bool(equal != negate));
            }
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                let right = frame.pop()?.to_number();
                let left = frame.pop()?.to_number();
                let result = match instruction.opcode {
                    OpCode::Lt => left < right,
                    OpCode::Le => left <= right,
                    OpCode::Gt => left > right,
                    _ => left >= right,
                };
                frame.stack.push(Value::Bool(result));
            }
            OpCode::Not => {
                let value = frame.pop()?;
                frame.stack.push(Value::Bool(!value.truthy()));
            }
            OpCode::TypeOf => {
                let value = frame.pop()?;
                frame.stack.push(Value::string(value.type_of()));
            }

            // Bindings
            OpCode::CreateVariable => {
                let name = identifier(executable, instruction)?;
                let mode = instruction
                    .operands
                    .iter()
                    .find_map(|operand| match operand {
                        Operand::Mode(mode) => Some(*mode),
                        _ => None,
                    })
                    .ok_or_else(|| Fault::Internal("CreateVariable without a mode".into()))?;
                let slot = Slot {
                    value: (!mode.lexical).then_some(Value::Undefined),
                    mutable: mode.mutable,
                };
                frame.env().borrow_mut().slots.insert(name.to_string(), slot);
            }
            OpCode::InitializeBinding => {
                let name = identifier(executable, instruction)?;
                let value = frame.pop()?;
                let env = find_env(frame.env(), name)
                    .ok_or_else(|| Fault::Internal(format!("initialize of undeclared {}", name)))?;
                let mut env = env.borrow_mut();
                if let Some(slot) = env.slots.get_mut(name) {
                    slot.value = Some(value);
                }
            }
            OpCode::ThrowIfTDZ => {
                let name = identifier(executable, instruction)?;
                let env = find_env(frame.env(), name)
                    .ok_or_else(|| Fault::Internal(format!("TDZ check of undeclared {}", name)))?;
                let initialized = env.borrow().slots.get(name).is_some_and(|s| s.value.is_some());
                if !initialized {
                    return Err(reference_error(format!(
                        "Cannot access '{}' before initialization",
                        name
                    )));
                }
            }
            OpCode::GetBinding => {
                let name = identifier(executable, instruction)?;
                let env = find_env(frame.env(), name)
                    .ok_or_else(|| Fault::Internal(format!("read of undeclared {}", name)))?;
                let value = env.borrow().slots.get(name).and_then(|slot| slot.value.clone());
                let value = value.ok_or_else(|| {
                    Fault::Internal(format!("unchecked read of uninitialized {}", name))
                })?;
                frame.stack.push(value);
            }
            OpCode::SetBinding => {
                let name = identifier(executable, instruction)?;
                let value = frame.pop()?;
                let env = find_env(frame.env(), name)
                    .ok_or_else(|| Fault::Internal(format!("write of undeclared {}", name)))?;
                let mut env = env.borrow_mut();
                let slot = env
                    .slots
                    .get_mut(name)
                    .ok_or_else(|| Fault::Internal(format!("write of undeclared {}", name)))?;
                if slot.value.is_none() {
                    return Err(Fault::Internal(format!(
                        "unchecked write of uninitialized {}",
                        name
                    )));
                }
                if !slot.mutable {
                    return Err(Fault::Internal(format!("SetBinding on immutable {}", name)));
                }
                slot.value = Some(value);
            }
            OpCode::ThrowConstAssignment => {
                return Err(type_error("Assignment to constant variable.".into()));
            }
            OpCode::GetGlobal => {
                let name = identifier(executable, instruction)?;
                let value = self
                    .globals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| reference_error(format!("{} is not defined", name)))?;
                frame.stack.push(value);
            }
            OpCode::SetGlobal => {
                let name = identifier(executable, instruction)?;
                let value = frame.pop()?;
                self.globals.insert(name.to_string(), value);
            }
            OpCode::TypeOfGlobal => {
                let name = identifier(executable, instruction)?;
                let kind = self.globals.get(name).map_or("undefined", Value::type_of);
                frame.stack.push(Value::string(kind));
            }
            OpCode::DeleteVariable => {
                let name = identifier(executable, instruction)?;
                self.globals.remove(name);
                frame.stack.push(Value::Bool(true));
            }
            OpCode::CreateLexicalEnvironment => {
                let env = new_env(Some(frame.env().clone()));
                frame.environments.push(env);
            }
            OpCode::LeaveLexicalEnvironment => {
                if frame.environments.len() < 2 {
                    return Err(Fault::Internal("environment stack underflow".into()));
                }
                frame.environments.pop();
            }
            OpCode::CopyPerIterationEnvironment => {
                let current = frame.env().clone();
                let copy = {
                    let current = current.borrow();
                    let slots = current
                        .slots
                        .iter()
                        .map(|(name, slot)| {
                            (
                                name.clone(),
                                Slot {
                                    value: slot.value.clone(),
                                    mutable: slot.mutable,
                                },
                            )
                        })
                        .collect();
                    Rc::new(RefCell::new(Environment {
                        slots,
                        parent: current.parent.clone(),
                    }))
                };
                if let Some(top) = frame.environments.last_mut() {
                    *top = copy;
                }
            }

            // Properties
            OpCode::NewObject => frame.stack.push(new_object(FxHashMap::default())),
            OpCode::NewArray => {
                let count = arg_count(instruction)?;
                let elements = frame.pop_n(count)?;
                frame.stack.push(new_array(elements));
            }
            OpCode::GetById => {
                let key = property(executable, instruction)?;
                let object = frame.pop()?;
                let value = self.get(&object, key, object.clone())?;
                frame.stack.push(value);
            }
            OpCode::GetByValue => {
                let key = frame.pop()?.to_string();
                let object = frame.pop()?;
                let value = self.get(&object, &key, object.clone())?;
                frame.stack.push(value);
            }
            OpCode::PutById => {
                let key = property(executable, instruction)?;
                let value = frame.pop()?;
                let object = frame.pop()?;
                put_property(&object, key, value.clone())?;
                frame.stack.push(value);
            }
            OpCode::PutByValue => {
                let value = frame.pop()?;
                let key = frame.pop()?.to_string();
                let object = frame.pop()?;
                put_property(&object, &key, value.clone())?;
                frame.stack.push(value);
            }
            OpCode::ResolveSuperBase => {
                let base = super_base(frame)?;
                frame.stack.push(base);
            }
            OpCode::GetByIdWithThis => {
                let key = property(executable, instruction)?;
                let base = frame.pop()?;
                let this = frame.pop()?;
                let value = self.get(&base, key, this)?;
                frame.stack.push(value);
            }
            OpCode::GetByValueWithThis => {
                let base = frame.pop()?;
                let key = frame.pop()?.to_string();
                let this = frame.pop()?;
                let value = self.get(&base, &key, this)?;
                frame.stack.push(value);
            }
            OpCode::GetSuperById => {
                let key = property(executable, instruction)?;
                let base = super_base(frame)?;
                let value = self.get(&base, key, frame.this.clone())?;
                frame.stack.push(value);
            }
            OpCode::ObjectRest => {
                let count = arg_count(instruction)?;
                let source = frame.pop()?;
                let excluded: Vec<String> =
                    frame.pop_n(count)?.iter().map(Value::to_string).collect();
                let properties = match &source {
                    Value::Object(object) => object
                        .borrow()
                        .properties
                        .iter()
                        .filter(|(key, _)| !excluded.contains(*key))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                    Value::Undefined | Value::Null => {
                        return Err(type_error(format!("Cannot destructure {}", source)));
                    }
                    _ => FxHashMap::default(),
                };
                frame.stack.push(new_object(properties));
            }
            OpCode::ArrayRest => {
                let start = arg_count(instruction)?;
                let source = frame.pop()?;
                let length = self.get(&source, "length", source.clone())?.to_number() as usize;
                let mut elements = Vec::new();
                for index in start..length {
                    elements.push(self.get(&source, &index.to_string(), source.clone())?);
                }
                frame.stack.push(new_array(elements));
            }

            // Control flow
            OpCode::Jump => frame.pc = jump_target(instruction, 0)?,
            OpCode::JumpIfFalse | OpCode::JumpIfTrue => {
                let condition = frame.pop()?.truthy();
                if condition == (instruction.opcode == OpCode::JumpIfTrue) {
                    frame.pc = jump_target(instruction, 0)?;
                }
            }
            OpCode::JumpIfNotNullish => {
                let value = frame.pop()?;
                if !matches!(value, Value::Undefined | Value::Null) {
                    frame.pc = jump_target(instruction, 0)?;
                }
            }
            OpCode::EnterFinally => {
                let region = region(instruction)?;
                let completion = instruction
                    .operands
                    .iter()
                    .find_map(|operand| match operand {
                        Operand::Completion(completion) => Some(*completion),
                        _ => None,
                    })
                    .ok_or_else(|| Fault::Internal("EnterFinally without a completion".into()))?;
                let value = if completion.carries_value() {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let cleanup = jump_target(instruction, 0)?;
                let resume = jump_target(instruction, 1)?;
                let slot = frame
                    .completions
                    .get_mut(region)
                    .ok_or_else(|| Fault::Internal(format!("no slot for region {}", region)))?;
                *slot = Some(PendingCompletion {
                    completion,
                    value,
                    resume,
                });
                frame.pc = cleanup;
            }
            OpCode::LeaveFinally => {
                let region = region(instruction)?;
                let pending = frame
                    .completions
                    .get_mut(region)
                    .and_then(Option::take)
                    .ok_or_else(|| Fault::Internal(format!("region {} left twice", region)))?;
                if let Some(value) = pending.value {
                    frame.stack.push(value);
                }
                frame.pc = pending.resume;
            }
            OpCode::Throw => return Err(Fault::Thrown(frame.pop()?)),
            OpCode::ThrowReferenceError => {
                let message = match constant(executable, instruction)? {
                    Constant::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Err(reference_error(message));
            }
            OpCode::Return => return Ok(Flow::Return(frame.pop()?)),
            OpCode::Halt => return Ok(Flow::Return(Value::Undefined)),

            // Functions
            OpCode::LoadArgument => {
                let index = argument(instruction)?;
                let value = frame.arguments.get(index).cloned().unwrap_or(Value::Undefined);
                frame.stack.push(value);
            }
            OpCode::LoadRestArguments => {
                let index = argument(instruction)?;
                let rest = frame.arguments.iter().skip(index).cloned().collect();
                frame.stack.push(new_array(rest));
            }
            OpCode::NewFunction => {
                let index = match instruction.operand() {
                    Some(Operand::Function(index)) => *index as usize,
                    _ => return Err(Fault::Internal("NewFunction without a function".into())),
                };
                let blueprint = executable
                    .functions()
                    .get(index)
                    .ok_or_else(|| Fault::Internal(format!("no function {}", index)))?;
                // Arrows see the enclosing method's `super`.
                let (home, parent) = if blueprint.kind == FunctionKind::Arrow {
                    (frame.home.clone(), frame.parent.clone())
                } else {
                    (None, None)
                };
                frame.stack.push(Value::Function(Rc::new(Closure {
                    executable: blueprint.executable.clone(),
                    environment: frame.env().clone(),
                    home,
                    parent,
                })));
            }
            OpCode::NewClass => {
                let index = match instruction.operand() {
                    Some(Operand::Class(index)) => *index as usize,
                    _ => return Err(Fault::Internal("NewClass without a class".into())),
                };
                let blueprint = executable
                    .classes()
                    .get(index)
                    .ok_or_else(|| Fault::Internal(format!("no class {}", index)))?;
                let parent = if blueprint.has_super_class {
                    Some(frame.pop()?)
                } else {
                    None
                };
                let parent_prototype = match &parent {
                    Some(Value::Class(parent)) => Some(parent.prototype.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(type_error(format!(
                            "Class extends value {} is not a constructor or null",
                            other
                        )));
                    }
                };
                let environment = frame.env().clone();
                let prototype = Rc::new(RefCell::new(Object {
                    prototype: parent_prototype,
                    ..Object::default()
                }));
                let statics = Rc::new(RefCell::new(Object::default()));
                for method in &blueprint.methods {
                    let target = if method.is_static { &statics } else { &prototype };
                    let home = Value::Object(target.clone());
                    let function =
                        method_closure(executable, method.function, &environment, home, None)?;
                    let mut target = target.borrow_mut();
                    let table = match method.kind {
                        MethodKind::Method => &mut target.properties,
                        MethodKind::Getter => &mut target.getters,
                        MethodKind::Setter => {
                            return Err(Fault::Internal("setters are not supported".into()));
                        }
                    };
                    table.insert(method.key.clone(), Value::Function(function));
                }
                let prototype = Value::Object(prototype);
                let constructor = blueprint
                    .constructor
                    .map(|function| {
                        method_closure(
                            executable,
                            function,
                            &environment,
                            prototype.clone(),
                            parent.clone(),
                        )
                    })
                    .transpose()?;
                frame.stack.push(Value::Class(Rc::new(Class {
                    constructor,
                    prototype,
                    parent,
                    statics: Value::Object(statics),
                })));
            }
            OpCode::New => {
                let count = arg_count(instruction)?;
                let arguments = frame.pop_n(count)?;
                let callee = frame.pop()?;
                let instance = self.construct(callee, arguments)?;
                frame.stack.push(instance);
            }
            OpCode::SuperCall => {
                let count = arg_count(instruction)?;
                let arguments = frame.pop_n(count)?;
                let Some(Value::Class(parent)) = frame.parent.clone() else {
                    return Err(type_error("Super constructor is not a constructor".into()));
                };
                self.run_constructor(&parent, frame.this.clone(), arguments)?;
                frame.stack.push(frame.this.clone());
            }
            OpCode::Call => {
                let count = arg_count(instruction)?;
                let arguments = frame.pop_n(count)?;
                let callee = frame.pop()?;
                let result = self.call(callee, Value::Undefined, arguments)?;
                frame.stack.push(result);
            }
            OpCode::CallWithThis => {
                let count = arg_count(instruction)?;
                let arguments = frame.pop_n(count)?;
                let callee = frame.pop()?;
                let this = frame.pop()?;
                let result = self.call(callee, this, arguments)?;
                frame.stack.push(result);
            }

            other => return Err(Fault::Internal(format!("unsupported opcode {:?}", other))),
        }
        Ok(Flow::Next)
    }
}

fn reference_error(message: String) -> Fault {
    Fault::Thrown(Value::Error("ReferenceError".into(), message.into()))
}

fn type_error(message: String) -> Fault {
    Fault::Thrown(Value::Error("TypeError".into(), message.into()))
}

fn new_object(properties: FxHashMap<String, Value>) -> Value {
    Value::Object(Rc::new(RefCell::new(Object {
        properties,
        ..Object::default()
    })))
}

fn new_array(elements: Vec<Value>) -> Value {
    let mut properties: FxHashMap<String, Value> = elements
        .into_iter()
        .enumerate()
        .map(|(index, value)| (index.to_string(), value))
        .collect();
    properties.insert("length".into(), Value::Number(properties.len() as f64));
    new_object(properties)
}

/// Where a prototype chain lookup ended.
enum Lookup {
    Data(Value),
    Getter(Value),
}

fn lookup(object: &Value, key: &str) -> Result<Lookup, Fault> {
    if matches!(object, Value::Undefined | Value::Null) {
        return Err(type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            object, key
        )));
    }
    let mut current = object.clone();
    loop {
        let next = match &current {
            Value::Object(object) => {
                let object = object.borrow();
                if let Some(value) = object.properties.get(key) {
                    return Ok(Lookup::Data(value.clone()));
                }
                if let Some(getter) = object.getters.get(key) {
                    return Ok(Lookup::Getter(getter.clone()));
                }
                object.prototype.clone()
            }
            Value::Class(class) if key == "prototype" => {
                return Ok(Lookup::Data(class.prototype.clone()));
            }
            Value::Class(class) => Some(class.statics.clone()),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return Ok(Lookup::Data(Value::Undefined)),
        }
    }
}

/// The prototype of the running method's home object.
fn super_base(frame: &Frame) -> Result<Value, Fault> {
    match &frame.home {
        Some(Value::Object(home)) => Ok(home.borrow().prototype.clone().unwrap_or(Value::Null)),
        _ => Err(Fault::Internal("super used outside a method".into())),
    }
}

fn method_closure(
    executable: &Executable,
    function: u16,
    environment: &Env,
    home: Value,
    parent: Option<Value>,
) -> Result<Rc<Closure>, Fault> {
    let blueprint = executable
        .functions()
        .get(function as usize)
        .ok_or_else(|| Fault::Internal(format!("no function {}", function)))?;
    Ok(Rc::new(Closure {
        executable: blueprint.executable.clone(),
        environment: environment.clone(),
        home: Some(home),
        parent,
    }))
}

fn put_property(object: &Value, key: &str, value: Value) -> Result<(), Fault> {
    match object {
        Value::Object(object) => {
            object.borrow_mut().properties.insert(key.to_string(), value);
            Ok(())
        }
        Value::Class(class) => put_property(&class.statics, key, value),
        _ => Err(type_error(format!("Cannot set property '{}' of {}", key, object))),
    }
}

fn constant<'e>(executable: &'e Executable, instruction: &Instruction) -> Result<&'e Constant, Fault> {
    match instruction.operand() {
        Some(Operand::Constant(index)) => executable
            .constant(*index)
            .ok_or_else(|| Fault::Internal(format!("no constant {}", index))),
        _ => Err(Fault::Internal(format!("{:?} without a constant", instruction.opcode))),
    }
}

fn property<'e>(executable: &'e Executable, instruction: &Instruction) -> Result<&'e str, Fault> {
    match instruction.operand() {
        Some(Operand::Property(index)) => match executable.constant(*index) {
            Some(Constant::String(key)) => Ok(key),
            _ => Err(Fault::Internal(format!("property {} is not a string", index))),
        },
        _ => Err(Fault::Internal(format!("{:?} without a property", instruction.opcode))),
    }
}

fn identifier<'e>(executable: &'e Executable, instruction: &Instruction) -> Result<&'e str, Fault> {
    instruction
        .identifier_operand()
        .and_then(|index| executable.identifier(index))
        .ok_or_else(|| Fault::Internal(format!("{:?} without a name", instruction.opcode)))
}

fn arg_count(instruction: &Instruction) -> Result<usize, Fault> {
    match instruction.operand() {
        Some(Operand::ArgCount(count)) => Ok(*count as usize),
        _ => Err(Fault::Internal(format!("{:?} without a count", instruction.opcode))),
    }
}

fn argument(instruction: &Instruction) -> Result<usize, Fault> {
    match instruction.operand() {
        Some(Operand::Argument(index)) => Ok(*index as usize),
        _ => Err(Fault::Internal(format!("{:?} without an index", instruction.opcode))),
    }
}

fn region(instruction: &Instruction) -> Result<usize, Fault> {
    match instruction.operand() {
        Some(Operand::Region(region)) => Ok(*region as usize),
        _ => Err(Fault::Internal(format!("{:?} without a region", instruction.opcode))),
    }
}

fn jump_target(instruction: &Instruction, nth: usize) -> Result<usize, Fault> {
    instruction
        .jump_targets()
        .nth(nth)
        .map(|target| target as usize)
        .ok_or_else(|| Fault::Internal(format!("{:?} without a target", instruction.opcode)))
}
