use crate::types::hash::Hash;
use thiserror::Error;

/// Errors that can occur during execution, decoding or assembly.
///
/// Every execution error is fatal to the run that raised it: the validator
/// turns the first one into a rejection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VMError {
    /// The `fail` instruction was executed.
    #[error("fail instruction executed at pc {pc}")]
    Failed { pc: usize },
    /// Undefined opcode byte encountered in a program.
    #[error("invalid instruction 0x{opcode:02x} at offset {offset}")]
    InvalidInstruction { opcode: u8, offset: usize },
    /// A stack held fewer items than an instruction needed.
    #[error("{instruction}: {stack} stack underflow (needed {needed}, available {available})")]
    StackUnderflow {
        instruction: &'static str,
        stack: &'static str,
        needed: usize,
        available: usize,
    },
    /// An operand had the wrong item type, or an entry stack yielded the wrong kind.
    #[error("{instruction}: expected {expected}, got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    /// A tuple could not be read as the named entry kind.
    #[error("malformed {entry} entry: {reason}")]
    MalformedEntry {
        entry: &'static str,
        reason: &'static str,
    },
    /// Integer overflow, division by zero, or an out-of-range shift.
    #[error("{instruction}: arithmetic error: {reason}")]
    Arithmetic {
        instruction: &'static str,
        reason: &'static str,
    },
    /// An operand was outside the range the instruction accepts.
    #[error("{instruction}: value out of range: {reason}")]
    Range {
        instruction: &'static str,
        reason: &'static str,
    },
    /// An operand had the right type but an unusable shape (wrong length, wrong target).
    #[error("{instruction}: invalid operand: {reason}")]
    InvalidOperand {
        instruction: &'static str,
        reason: &'static str,
    },
    /// A stack selector did not name any stack.
    #[error("{instruction}: invalid stack selector {selector}")]
    InvalidStack {
        instruction: &'static str,
        selector: i64,
    },
    /// A structural operation targeted an append-only effect stack.
    #[error("{instruction}: operation not permitted on the {stack} stack")]
    IllegalStackOp {
        instruction: &'static str,
        stack: &'static str,
    },
    /// A jump landed outside the current program.
    #[error("jump target {target} outside program of length {len}")]
    InvalidJumpTarget { target: i64, len: usize },
    /// Two values of different assets were merged.
    #[error("merge of different assets {left} and {right}")]
    AssetMismatch { left: Hash, right: Hash },
    /// Input ended before a declared length was satisfied.
    #[error("truncated input: needed {needed} bytes, {available} available")]
    TruncatedInput { needed: usize, available: usize },
    /// A varint was overlong, non-minimal, or overflowed 64 bits.
    #[error("bad varint: {reason}")]
    BadVarint { reason: &'static str },
    /// The run exhausted its runlimit or nesting budget.
    #[error("{resource} limit exceeded: {used} > {limit}")]
    ResourceLimitExceeded {
        resource: &'static str,
        used: u64,
        limit: u64,
    },
    /// Unrecognized identifier in assembly source.
    #[error("line {line}:{offset}: unknown mnemonic `{token}`")]
    BadMnemonic {
        token: String,
        line: usize,
        offset: usize,
    },
    /// Malformed `"..."x` literal.
    #[error("line {line}:{offset}: bad hex literal `{token}`")]
    BadHexLiteral {
        token: String,
        line: usize,
        offset: usize,
    },
    /// A `[` or `{` group was never closed.
    #[error("line {line}:{offset}: unterminated `{open}` group")]
    UnterminatedProgram {
        open: char,
        line: usize,
        offset: usize,
    },
    /// Label defined more than once in the same program.
    #[error("line {line}:{offset}: duplicate label `{label}`")]
    DuplicateLabel {
        label: String,
        line: usize,
        offset: usize,
    },
    /// Jump to a label that was never defined.
    #[error("line {line}:{offset}: undefined label `{label}`")]
    UndefinedLabel {
        label: String,
        line: usize,
        offset: usize,
    },
}

impl VMError {
    /// Returns the source location for assembler errors.
    pub fn location(&self) -> Option<(usize, usize)> {
        match self {
            VMError::BadMnemonic { line, offset, .. }
            | VMError::BadHexLiteral { line, offset, .. }
            | VMError::UnterminatedProgram { line, offset, .. }
            | VMError::DuplicateLabel { line, offset, .. }
            | VMError::UndefinedLabel { line, offset, .. } => Some((*line, *offset)),
            _ => None,
        }
    }
}
