// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Planning of non-local exits.
//!
//! While a function body is emitted the planner mirrors its nesting as a
//! stack of boundaries: jump targets, lexical environments and finally
//! regions. A `break`, `continue` or `return` is turned into the ordered
//! list of steps needed to leave every boundary it crosses, innermost
//! first, followed by the final jump or return.

use crate::compiler::bytecode::Label;
use crate::error::CompileErrorKind;

/// Where `break` and `continue` may go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct JumpTarget {
    pub break_label: Label,
    /// Present for loops only
    pub continue_label: Option<Label>,
    pub labels: Vec<String>,
    /// Loops and switches accept `break;` without a label
    pub accepts_unlabeled_break: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    Target(JumpTarget),
    LexicalEnvironment,
    Finally(u16),
}

/// An active finally region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FinallyContext {
    pub region: u16,
    pub cleanup: Label,
    /// Boundary stack depth when the region was entered
    pub boundary_depth: usize,
    /// Environment depth at the `try`
    pub environment_depth: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnwindStep {
    LeaveEnvironment,
    RunFinally { region: u16, cleanup: Label },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    Jump(Label),
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UnwindPlan {
    pub steps: Vec<UnwindStep>,
    pub destination: Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JumpKind {
    Break,
    Continue,
}

/// Per-function boundary and finally-region bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct UnwindPlanner {
    boundaries: Vec<Boundary>,
    finally_stack: Vec<FinallyContext>,
    next_region: u16,
    environment_depth: u32,
}

impl UnwindPlanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn environment_depth(&self) -> u32 {
        self.environment_depth
    }

    pub(crate) fn finally_depth(&self) -> usize {
        self.finally_stack.len()
    }

    /// Number of region slots handed out so far.
    pub(crate) fn region_count(&self) -> u16 {
        self.next_region
    }

    pub(crate) fn push_target(&mut self, target: JumpTarget) {
        self.boundaries.push(Boundary::Target(target));
    }

    pub(crate) fn pop_target(&mut self) -> Result<JumpTarget, CompileErrorKind> {
        match self.boundaries.pop() {
            Some(Boundary::Target(target)) => Ok(target),
            other => Err(self.mismatch("jump target", other)),
        }
    }

    pub(crate) fn push_environment(&mut self) {
        self.boundaries.push(Boundary::LexicalEnvironment);
        self.environment_depth += 1;
    }

    pub(crate) fn pop_environment(&mut self) -> Result<(), CompileErrorKind> {
        match self.boundaries.pop() {
            Some(Boundary::LexicalEnvironment) => {
                self.environment_depth -= 1;
                Ok(())
            }
            other => Err(self.mismatch("lexical environment", other)),
        }
    }

    /// Enters a finally region whose cleanup code starts at `cleanup`.
    pub(crate) fn push_finally(&mut self, cleanup: Label) -> Result<FinallyContext, CompileErrorKind> {
        let region = self.next_region;
        self.next_region = region
            .checked_add(1)
            .ok_or(CompileErrorKind::LimitExceeded("finally regions"))?;
        let context = FinallyContext {
            region,
            cleanup,
            boundary_depth: self.boundaries.len(),
            environment_depth: self.environment_depth,
        };
        self.boundaries.push(Boundary::Finally(region));
        self.finally_stack.push(context);
        Ok(context)
    }

    /// Leaves the innermost finally region, which must be `region`.
    pub(crate) fn pop_finally(&mut self, region: u16) -> Result<FinallyContext, CompileErrorKind> {
        let context = match self.finally_stack.pop() {
            Some(context) if context.region == region => context,
            Some(context) => {
                return Err(CompileErrorKind::InternalInvariantViolation(format!(
                    "finally region {} closed while region {} is innermost",
                    region, context.region
                )));
            }
            None => {
                return Err(CompileErrorKind::InternalInvariantViolation(format!(
                    "finally region {} closed with no region open",
                    region
                )));
            }
        };
        match self.boundaries.pop() {
            Some(Boundary::Finally(open)) if open == region => {}
            other => return Err(self.mismatch("finally region", other)),
        }
        if self.boundaries.len() != context.boundary_depth
            || self.environment_depth != context.environment_depth
        {
            return Err(CompileErrorKind::InternalInvariantViolation(format!(
                "finally region {} closed at a different nesting depth",
                region
            )));
        }
        Ok(context)
    }

    /// Plans `break` or `continue`, optionally labelled.
    pub(crate) fn plan_jump(
        &self,
        kind: JumpKind,
        label: Option<&str>,
    ) -> Result<UnwindPlan, CompileErrorKind> {
        let mut steps = Vec::new();
        for boundary in self.boundaries.iter().rev() {
            match boundary {
                Boundary::LexicalEnvironment => steps.push(UnwindStep::LeaveEnvironment),
                Boundary::Finally(region) => steps.push(self.run_finally(*region)?),
                Boundary::Target(target) => {
                    let matches = match (kind, label) {
                        (JumpKind::Break, None) => target.accepts_unlabeled_break,
                        (JumpKind::Continue, None) => target.continue_label.is_some(),
                        (_, Some(name)) => target.labels.iter().any(|l| l == name),
                    };
                    if !matches {
                        continue;
                    }
                    let destination = match kind {
                        JumpKind::Break => target.break_label,
                        JumpKind::Continue => target
                            .continue_label
                            .ok_or(CompileErrorKind::IllegalContinue)?,
                    };
                    return Ok(UnwindPlan {
                        steps,
                        destination: Destination::Jump(destination),
                    });
                }
            }
        }
        Err(match (kind, label) {
            (_, Some(name)) => CompileErrorKind::UndefinedLabel(name.to_string()),
            (JumpKind::Break, None) => CompileErrorKind::IllegalBreak,
            (JumpKind::Continue, None) => CompileErrorKind::IllegalContinue,
        })
    }

    /// Plans `return`. Environments outside the outermost finally region
    /// are discarded with the frame and need no step.
    pub(crate) fn plan_return(&self) -> Result<UnwindPlan, CompileErrorKind> {
        let mut steps = Vec::new();
        for boundary in self.boundaries.iter().rev() {
            match boundary {
                Boundary::LexicalEnvironment => steps.push(UnwindStep::LeaveEnvironment),
                Boundary::Finally(region) => steps.push(self.run_finally(*region)?),
                Boundary::Target(_) => {}
            }
        }
        while steps.last() == Some(&UnwindStep::LeaveEnvironment) {
            steps.pop();
        }
        Ok(UnwindPlan {
            steps,
            destination: Destination::Return,
        })
    }

    fn run_finally(&self, region: u16) -> Result<UnwindStep, CompileErrorKind> {
        self.finally_stack
            .iter()
            .find(|context| context.region == region)
            .map(|context| UnwindStep::RunFinally {
                region,
                cleanup: context.cleanup,
            })
            .ok_or_else(|| {
                CompileErrorKind::InternalInvariantViolation(format!(
                    "finally region {} has a boundary but no context",
                    region
                ))
            })
    }

    /// Puts back a boundary popped by mistake and describes the mismatch.
    fn mismatch(&mut self, expected: &str, found: Option<Boundary>) -> CompileErrorKind {
        let error = CompileErrorKind::InternalInvariantViolation(format!(
            "expected to close a {}, found {:?}",
            expected, found
        ));
        if let Some(boundary) = found {
            self.boundaries.push(boundary);
        }
        error
    }

    /// Checks that everything opened in a function was closed again.
    pub(crate) fn finish(&self) -> Result<(), CompileErrorKind> {
        if self.boundaries.is_empty()
            && self.finally_stack.is_empty()
            && self.environment_depth == 0
        {
            Ok(())
        } else {
            Err(CompileErrorKind::InternalInvariantViolation(format!(
                "{} boundaries and {} finally regions left open",
                self.boundaries.len(),
                self.finally_stack.len()
            )))
        }
    }
}
