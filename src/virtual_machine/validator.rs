//! Top-level transaction validation.
//!
//! [`validate`] runs a program on a fresh machine and applies the closed
//! ledger check: a run is accepted only if it completed without error, left
//! every linear-resource stack empty and left exactly one summary. The
//! transaction id is the id of that summary.

use crate::types::hash::Hash;
use crate::virtual_machine::entry::{Entry, Summary};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack::StackId;
use crate::virtual_machine::vm::{
    DEFAULT_RUNLIMIT, Effects, RunlimitProfile, StepView, Tracer, VM,
};
use std::fmt;
use tracing::debug;

/// Stacks that must be empty at the end of an accepted run.
const LINEAR_STACKS: [StackId; 8] = [
    StackId::Input,
    StackId::Value,
    StackId::Output,
    StackId::Condition,
    StackId::Nonce,
    StackId::Retirement,
    StackId::TimeConstraint,
    StackId::Annotation,
];

/// Error observer installed on a validation.
pub type ErrorSink<'a> = Box<dyn FnMut(&VMError) + 'a>;

/// Validation options.
pub struct Options<'a> {
    /// Execution budget.
    pub runlimit: u64,
    /// Invoked once per decoded instruction.
    pub tracer: Option<Tracer<'a>>,
    /// Invoked once if execution aborts.
    pub error_sink: Option<ErrorSink<'a>>,
}

impl Default for Options<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Options<'a> {
    pub fn new() -> Self {
        Self {
            runlimit: DEFAULT_RUNLIMIT,
            tracer: None,
            error_sink: None,
        }
    }

    pub fn with_runlimit(mut self, runlimit: u64) -> Self {
        self.runlimit = runlimit;
        self
    }

    pub fn with_tracer(mut self, tracer: impl FnMut(&StepView<'_>) + 'a) -> Self {
        self.tracer = Some(Box::new(tracer));
        self
    }

    pub fn with_error_sink(mut self, sink: impl FnMut(&VMError) + 'a) -> Self {
        self.error_sink = Some(Box::new(sink));
        self
    }
}

/// Why a run was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Execution stopped on an error.
    Aborted(VMError),
    /// The run completed but a stack held the wrong number of entries.
    Unbalanced { stack: &'static str, count: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Aborted(err) => write!(f, "aborted: {err}"),
            Rejection::Unbalanced { stack, count } => {
                write!(f, "{count} entries left on the {stack} stack")
            }
        }
    }
}

/// Outcome of one validation.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Summary id, or all zeroes when rejected.
    pub txid: Hash,
    pub accepted: bool,
    pub rejection: Option<Rejection>,
    /// The terminal summary of an accepted run.
    pub summary: Option<Summary>,
    /// Effects recorded by the run; empty when rejected.
    pub effects: Effects,
    pub runlimit_used: u64,
    pub profile: RunlimitProfile,
}

/// Runs `program` and decides whether it is a valid transaction.
///
/// Deterministic: the same bytes and runlimit always give the same result.
pub fn validate(program: &[u8], options: Options<'_>) -> Validation {
    let Options {
        runlimit,
        tracer,
        mut error_sink,
    } = options;

    let mut vm = VM::new(runlimit);
    vm.set_tracer(tracer);
    let outcome = vm.run(program);
    let runlimit_used = vm.runlimit().used();
    let profile = vm.runlimit().profile().clone();

    let verdict = match outcome {
        Err(err) => {
            if let Some(sink) = error_sink.as_mut() {
                sink(&err);
            }
            Err(Rejection::Aborted(err))
        }
        Ok(()) => check_balance(&vm),
    };

    match verdict {
        Ok((txid, summary)) => {
            debug!(%txid, runlimit_used, "transaction accepted");
            Validation {
                txid,
                accepted: true,
                rejection: None,
                summary: Some(summary),
                effects: vm.into_effects(),
                runlimit_used,
                profile,
            }
        }
        Err(rejection) => {
            debug!(%rejection, runlimit_used, "transaction rejected");
            Validation {
                txid: Hash::zero(),
                accepted: false,
                rejection: Some(rejection),
                summary: None,
                effects: Effects::default(),
                runlimit_used,
                profile,
            }
        }
    }
}

/// Applies the closed ledger check to a completed run.
fn check_balance(vm: &VM<'_>) -> Result<(Hash, Summary), Rejection> {
    let stacks = vm.stacks();
    for id in LINEAR_STACKS {
        let count = stacks.len(id);
        if count != 0 {
            return Err(Rejection::Unbalanced {
                stack: id.as_str(),
                count,
            });
        }
    }

    let unbalanced_summary = Rejection::Unbalanced {
        stack: StackId::Summary.as_str(),
        count: stacks.len(StackId::Summary),
    };
    let Some(summaries) = stacks.entry(StackId::Summary) else {
        return Err(unbalanced_summary);
    };
    match (summaries.entries(), summaries.ids()) {
        ([Entry::Summary(summary)], [id]) => Ok((*id, summary.clone())),
        _ => Err(unbalanced_summary),
    }
}
