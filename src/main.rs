// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-jsc - compiles a JSON syntax tree and prints the bytecode
//!
//! The input is the serialized form of `spacey_compiler::ast::Program`, read
//! from a file or from stdin.

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use spacey_compiler::{Compiler, CompilerConfig, Program};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "spacey-jsc",
    about = "Compile a JSON syntax tree to Spacey bytecode",
    version,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// JSON syntax tree to compile (stdin when omitted)
    input: Option<PathBuf>,

    /// Compile as strict mode code
    #[arg(long)]
    strict: bool,

    /// Emit a TDZ check before every lexical binding access
    #[arg(long)]
    no_tdz_elision: bool,

    /// Compile `super.name` reads through the general path
    #[arg(long)]
    no_super_fast_path: bool,

    /// Reject free identifiers instead of compiling global lookups
    #[arg(long)]
    closed: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> CompilerConfig {
        CompilerConfig::new()
            .with_strict(self.strict)
            .with_tdz_elision(!self.no_tdz_elision)
            .with_fast_super_property_access(!self.no_super_fast_path)
            .with_global_references(!self.closed)
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_compiler=debug,spacey_jsc=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spacey_compiler=warn")
            .with_writer(std::io::stderr)
            .init();
    }

    let text = match &cli.input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read stdin")?;
            text
        }
    };

    let program = Program::from_json(&text).context("input is not a valid syntax tree")?;
    tracing::debug!(statements = program.body.len(), "syntax tree loaded");

    match Compiler::with_config(cli.config()).compile(&program) {
        Ok(executable) => {
            print_disassembly(&executable.to_string());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!(
                "{} ({:?}): {}",
                "CompileError".red().bold(),
                e.category(),
                e
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Prints the disassembly with headers and handler lines highlighted.
fn print_disassembly(text: &str) {
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("executable") {
            println!("{}", line.cyan().bold());
        } else if trimmed.starts_with("handler") || trimmed.starts_with("class") {
            println!("{}", line.yellow());
        } else {
            println!("{}", line);
        }
    }
}
