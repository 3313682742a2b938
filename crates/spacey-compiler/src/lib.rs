// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-compiler
//!
//! The front half of a JavaScript engine's bytecode pipeline: it takes a
//! parsed syntax tree and produces an executable for a stack-based VM.
//!
//! ## Overview
//!
//! Compilation runs three phases over a read-only [`ast::Program`]:
//! - Scope resolution: every identifier becomes a declared binding or a
//!   global reference; duplicate and conflicting declarations are rejected
//! - TDZ analysis: accesses to `let`/`const`/`class` bindings that are
//!   provably initialized skip their runtime check
//! - Emission: instructions, constant and identifier tables, exception
//!   handler ranges and finally regions, with `break`/`continue`/`return`
//!   routed through every enclosing `finally`
//!
//! ## Quick Start
//!
//! ```rust
//! use spacey_compiler::ast::build::*;
//! use spacey_compiler::{CompilerConfig, OpCode, compile};
//!
//! // let x = 1; x;
//! let program = program(vec![let_decl("x", Some(num(1.0))), expr_stmt(ident("x"))]);
//! let executable = compile(&program, &CompilerConfig::default()).unwrap();
//! assert_eq!(executable.count_opcode(OpCode::ThrowIfTDZ), 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;

pub use ast::Program;
pub use compiler::{Compiler, Executable, Instruction, OpCode, Operand};
pub use config::CompilerConfig;
pub use error::{CompileError, CompileErrorKind, ErrorCategory, Result};

/// Compiles one program with `config`.
pub fn compile(program: &Program, config: &CompilerConfig) -> Result<Executable> {
    Compiler::with_config(*config).compile(program)
}

/// Compiles independent programs, returning results in input order.
///
/// With the `parallel` feature the programs are compiled on the rayon
/// thread pool.
pub fn compile_all(programs: &[Program], config: &CompilerConfig) -> Vec<Result<Executable>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        programs
            .par_iter()
            .map(|program| compile(program, config))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        programs
            .iter()
            .map(|program| compile(program, config))
            .collect()
    }
}
