// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode compiler for JavaScript.
//!
//! Transforms an AST into executables for a stack-based VM.
//!
//! # Module Structure
//!
//! - `scope`: Scope resolution; every identifier becomes a binding or a
//!   global reference
//! - `tdz`: Decides which lexical binding accesses can skip their TDZ check
//! - `unwind`: Plans `break`/`continue`/`return` across environments and
//!   finally regions
//! - `builder`: Instruction buffer with labels and unreachable-code dropping
//! - `codegen`: Code generation from AST
//! - `bytecode`: The executable format

mod builder;
pub mod bytecode;
mod codegen;
pub mod scope;
pub mod tdz;
mod unwind;

pub use bytecode::{
    BindingMode, ClassBlueprint, ClassMethodBlueprint, CompletionType, Constant,
    ExceptionHandler, Executable, FunctionBlueprint, Instruction, OpCode, Operand,
};

use crate::ast::Program;
use crate::config::CompilerConfig;
use crate::error::Result;

/// Compiles AST to bytecode.
#[derive(Debug, Default, Clone)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    /// Creates a compiler with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler with `config`.
    pub fn with_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// The configuration this compiler uses.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles a program.
    ///
    /// Runs scope resolution, then TDZ analysis, then emission. The program
    /// is only read; compiling the same tree twice yields identical
    /// executables.
    pub fn compile(&self, program: &Program) -> Result<Executable> {
        let span = tracing::debug_span!("compile", statements = program.body.len());
        let _enter = span.enter();

        let resolution = scope::resolve(program, &self.config)?;
        let tdz = tdz::analyze(program, &resolution, &self.config);
        tracing::debug!(elided = tdz.elided_count(), "TDZ analysis finished");

        codegen::emit_program(
            program,
            codegen::Shared {
                config: &self.config,
                resolution: &resolution,
                tdz: &tdz,
            },
        )
    }
}
