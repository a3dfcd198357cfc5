use crate::virtual_machine::isa::Op;
use crate::virtual_machine::stack::{StackId, Stacks};
use std::fmt;

/// Read-only view of the machine handed to a step tracer.
///
/// Produced once per decoded instruction, before it executes.
pub struct StepView<'a> {
    /// Number of active frames (1 for the top-level program).
    pub depth: usize,
    /// Offset of the instruction within its frame's program.
    pub pc: usize,
    /// The decoded instruction, including any push-data.
    pub op: Op<'a>,
    /// Every stack as it stands before the instruction runs.
    pub stacks: &'a Stacks,
}

/// Step observer installed on a machine.
pub type Tracer<'t> = Box<dyn FnMut(&StepView<'_>) + 't>;

impl fmt::Display for StepView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>3} {:>5}  ", self.depth, self.pc)?;
        match self.op {
            Op::SmallInt(n) => write!(f, "{n:<14}")?,
            Op::PushData(data) => write!(f, "{:<14}", format!("\"{}\"x", hex::encode(data)))?,
            Op::Instruction(instr) => write!(f, "{:<14}", instr.mnemonic())?,
        }
        write!(f, " data={:?}", self.stacks.data.items())?;
        for id in StackId::ALL.iter().skip(2) {
            let len = self.stacks.len(*id);
            if len > 0 {
                write!(f, " {}={}", id.as_str(), len)?;
            }
        }
        Ok(())
    }
}
