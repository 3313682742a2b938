// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the compiler.
//!
//! Every failure aborts the compilation unit; no instruction sequence is
//! returned alongside an error.

use crate::ast::SourcePosition;
use thiserror::Error;

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Broad class of a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The program violates a static rule of the language.
    StaticSemantic,
    /// Something that must be resolved statically could not be.
    Resolution,
    /// A compiler defect; never caused by user input alone.
    InternalInvariantViolation,
}

/// What went wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Left-hand side cannot be assigned to
    #[error("Invalid left-hand side in assignment")]
    InvalidAssignmentTarget,

    /// Two incompatible declarations of one name in one scope
    #[error("Identifier '{0}' has already been declared")]
    DuplicateBinding(String),

    /// Free identifier in a unit that forbids global references
    #[error("Cannot resolve binding '{0}'")]
    UnresolvableBinding(String),

    /// break/continue names a label that is not in scope
    #[error("Undefined label '{0}'")]
    UndefinedLabel(String),

    /// break outside of a loop, switch or labelled statement
    #[error("Illegal break statement")]
    IllegalBreak,

    /// continue outside of a loop, or naming a non-loop label
    #[error("Illegal continue statement")]
    IllegalContinue,

    /// return outside of a function
    #[error("Illegal return statement")]
    IllegalReturn,

    /// super property access outside of a method
    #[error("'super' keyword unexpected here")]
    InvalidSuperReference,

    /// super() outside of a derived class constructor
    #[error("'super' call is only valid inside a derived constructor")]
    InvalidSuperCall,

    /// delete of an unqualified identifier in strict code
    #[error("Delete of an unqualified identifier in strict mode")]
    InvalidDelete,

    /// Literal that cannot be represented
    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    /// A table outgrew its operand width
    #[error("Too many {0} in one function")]
    LimitExceeded(&'static str),

    /// Compiler defect
    #[error("Internal compiler error: {0}")]
    InternalInvariantViolation(String),
}

impl CompileErrorKind {
    /// The category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CompileErrorKind::InvalidAssignmentTarget
            | CompileErrorKind::DuplicateBinding(_)
            | CompileErrorKind::IllegalBreak
            | CompileErrorKind::IllegalContinue
            | CompileErrorKind::IllegalReturn
            | CompileErrorKind::InvalidSuperReference
            | CompileErrorKind::InvalidSuperCall
            | CompileErrorKind::InvalidDelete
            | CompileErrorKind::InvalidLiteral(_)
            | CompileErrorKind::LimitExceeded(_) => ErrorCategory::StaticSemantic,
            CompileErrorKind::UnresolvableBinding(_) | CompileErrorKind::UndefinedLabel(_) => {
                ErrorCategory::Resolution
            }
            CompileErrorKind::InternalInvariantViolation(_) => {
                ErrorCategory::InternalInvariantViolation
            }
        }
    }
}

/// A compile error with the position of the offending construct.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at {position}")]
pub struct CompileError {
    /// What went wrong
    pub kind: CompileErrorKind,
    /// Where it went wrong
    pub position: SourcePosition,
}

impl CompileError {
    /// Creates an error at `position`.
    pub fn new(kind: CompileErrorKind, position: SourcePosition) -> Self {
        Self { kind, position }
    }

    /// Creates an internal invariant violation.
    pub fn internal(message: impl Into<String>, position: SourcePosition) -> Self {
        Self::new(
            CompileErrorKind::InternalInvariantViolation(message.into()),
            position,
        )
    }

    /// Shorthand for `self.kind.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}
