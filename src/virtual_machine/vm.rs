//! Core virtual machine implementation.
//!
//! The VM executes one transaction program against a bank of stacks: a data
//! stack and an alt stack of items, and ten typed entry stacks. Nested
//! programs (`exec`, `satisfy`) run in frames on an explicit frame stack, so
//! execution never recurses on the host stack. All integer arithmetic is
//! checked; every failure aborts the run with a [`VMError`].

mod runlimit;
mod trace;

#[cfg(test)]
mod tests;

pub use runlimit::{
    CostCategory, DATA_BYTE_COST, DEFAULT_RUNLIMIT, ENTRY_COST, HASH_BYTE_COST, LITERAL_COST,
    Runlimit, RunlimitProfile, SIGNATURE_COST,
};
pub use trace::{StepView, Tracer};

use crate::crypto::signature;
use crate::types::bytes::Bytes;
use crate::types::encoding::read_uvarint;
use crate::types::hash::Hash;
use crate::virtual_machine::entry::{
    Anchor, Annotation, AssetDefinition, Condition, Contract, Entry, Input, IssuanceCandidate,
    MaxTime, MinTime, Nonce, Output, Read, Retirement, Summary, Value, derived_anchor,
};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, Op, decode_op};
use crate::virtual_machine::item::{Item, MAX_TUPLE_DEPTH, Tuple};
use crate::virtual_machine::stack::{EntryStack, StackId, Stacks};
use sha2::{Digest, Sha256};
use tracing::trace;

/// Maximum number of nested frames.
pub const MAX_FRAME_DEPTH: usize = 1024;

macro_rules! exec_vm {
    // Entry point
    (
        vm = $vm:ident,
        instr = $instr:ident,
        { $( $variant:ident => $handler:ident ( $( $field:ident : $kind:ident ),* $(,)? ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant => {
                    let instr_name = $instr.mnemonic();
                    exec_vm!(@pop $vm, instr_name, [ $( $field : $kind ),* ]);
                    $vm.$handler(instr_name $(, $field )*)
                }
            ),*
        }
    }};

    // Operands are listed deepest first. Reverse the list, then pop top first.
    (@pop $vm:ident, $name:ident, [] $( $rev:tt )*) => {
        $( exec_vm!(@bind $vm, $name, $rev); )*
    };
    (@pop $vm:ident, $name:ident,
        [ $field:ident : $kind:ident $(, $rest_f:ident : $rest_k:ident )* ] $( $rev:tt )*
    ) => {
        exec_vm!(@pop $vm, $name, [ $( $rest_f : $rest_k ),* ] ($field : $kind) $( $rev )*)
    };

    (@bind $vm:ident, $name:ident, ($field:ident : $kind:ident)) => {
        let $field = exec_vm!(@read $vm, $name, $kind)?;
    };

    (@read $vm:ident, $name:ident, Int) => { $vm.stacks.data.pop_int($name) };
    (@read $vm:ident, $name:ident, Bytes) => { $vm.stacks.data.pop_bytes($name) };
    (@read $vm:ident, $name:ident, Tuple) => { $vm.stacks.data.pop_tuple($name) };
    (@read $vm:ident, $name:ident, Item) => { $vm.stacks.data.pop($name) };
}

/// Execution frame: a program and the offset of its next instruction.
#[derive(Clone, Debug)]
struct Frame {
    program: Bytes,
    pc: usize,
}

/// Entries a run has committed to, for the external store to persist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Effects {
    pub inputs: Vec<Entry>,
    pub outputs: Vec<Entry>,
    pub nonces: Vec<Entry>,
    pub retirements: Vec<Entry>,
    pub time_constraints: Vec<Entry>,
    pub annotations: Vec<Entry>,
    /// Contracts created by `lock`, in creation order.
    pub contracts: Vec<Contract>,
}

/// Transaction virtual machine.
///
/// Each machine owns its state outright; independent validations never
/// share one, so they can run on separate threads without locking.
pub struct VM<'t> {
    frames: Vec<Frame>,
    stacks: Stacks,
    runlimit: Runlimit,
    effects: Effects,
    tracer: Option<Tracer<'t>>,
}

impl<'t> VM<'t> {
    /// Creates a machine with empty stacks and the given runlimit.
    pub fn new(runlimit: u64) -> Self {
        Self {
            frames: Vec::new(),
            stacks: Stacks::new(),
            runlimit: Runlimit::new(runlimit),
            effects: Effects::default(),
            tracer: None,
        }
    }

    /// Installs a step tracer.
    pub fn with_tracer(mut self, tracer: impl FnMut(&StepView<'_>) + 't) -> Self {
        self.tracer = Some(Box::new(tracer));
        self
    }

    pub(crate) fn set_tracer(&mut self, tracer: Option<Tracer<'t>>) {
        self.tracer = tracer;
    }

    /// Executes `program` until its last frame returns or an error aborts it.
    pub fn run(&mut self, program: impl Into<Bytes>) -> Result<(), VMError> {
        self.push_frame(program.into())?;
        while let Some(frame) = self.frames.last() {
            if frame.pc >= frame.program.len() {
                self.frames.pop();
                continue;
            }
            self.step()?;
        }
        Ok(())
    }

    pub fn stacks(&self) -> &Stacks {
        &self.stacks
    }

    pub fn effects(&self) -> &Effects {
        &self.effects
    }

    pub fn into_effects(self) -> Effects {
        self.effects
    }

    pub fn runlimit(&self) -> &Runlimit {
        &self.runlimit
    }

    fn push_frame(&mut self, program: Bytes) -> Result<(), VMError> {
        if self.frames.len() >= MAX_FRAME_DEPTH {
            return Err(VMError::ResourceLimitExceeded {
                resource: "frame depth",
                used: self.frames.len() as u64 + 1,
                limit: MAX_FRAME_DEPTH as u64,
            });
        }
        self.frames.push(Frame { program, pc: 0 });
        Ok(())
    }

    /// Decodes and executes the instruction at the current frame's pc.
    fn step(&mut self) -> Result<(), VMError> {
        let depth = self.frames.len();
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        let program = frame.program.clone();
        let pc = frame.pc;
        let (op, size) = decode_op(&program, pc)?;
        frame.pc = pc + size;

        trace!(depth, pc, op = op.mnemonic(), "step");
        if let Some(tracer) = self.tracer.as_mut() {
            tracer(&StepView {
                depth,
                pc,
                op,
                stacks: &self.stacks,
            });
        }

        match op {
            Op::SmallInt(n) => {
                self.runlimit.charge(CostCategory::Opcode, LITERAL_COST)?;
                self.stacks.data.push(n as i64);
                Ok(())
            }
            Op::PushData(data) => {
                self.runlimit.charge(CostCategory::Opcode, LITERAL_COST)?;
                self.charge_data(data.len())?;
                self.stacks.data.push(Bytes::from(data));
                Ok(())
            }
            Op::Instruction(instr) => {
                self.runlimit.charge(CostCategory::Opcode, instr.base_cost())?;
                self.exec(instr)
            }
        }
    }

    /// Executes a single named instruction.
    fn exec(&mut self, instruction: Instruction) -> Result<(), VMError> {
        exec_vm! {
            vm = self,
            instr = instruction,
            {
                // Control
                Fail => op_fail(),
                Pc => op_pc(),
                JumpIf => op_jump_if(cond: Int, offset: Int),
                // Stack
                Roll => op_roll(sel: Int, n: Int),
                Bury => op_bury(sel: Int, n: Int),
                Reverse => op_reverse(sel: Int, n: Int),
                Depth => op_depth(sel: Int),
                Peek => op_peek(sel: Int, n: Int),
                Drop => op_drop(x: Item),
                ToAlt => op_to_alt(x: Item),
                FromAlt => op_from_alt(),
                // Comparison / boolean
                Equal => op_equal(a: Item, b: Item),
                Not => op_not(x: Int),
                And => op_and(a: Int, b: Int),
                Or => op_or(a: Int, b: Int),
                Gt => op_gt(a: Int, b: Int),
                Ge => op_ge(a: Int, b: Int),
                // Integer arithmetic
                Abs => op_abs(a: Int),
                Negate => op_negate(a: Int),
                Add => op_add(a: Int, b: Int),
                Sub => op_sub(a: Int, b: Int),
                Mul => op_mul(a: Int, b: Int),
                Div => op_div(a: Int, b: Int),
                Mod => op_mod(a: Int, b: Int),
                LShift => op_lshift(a: Int, n: Int),
                RShift => op_rshift(a: Int, n: Int),
                MinusOne => op_minus_one(),
                // Bitwise
                BitNot => op_bit_not(x: Item),
                BitAnd => op_bit_and(a: Item, b: Item),
                BitOr => op_bit_or(a: Item, b: Item),
                BitXor => op_bit_xor(a: Item, b: Item),
                // Strings
                Cat => op_cat(a: Bytes, b: Bytes),
                Slice => op_slice(s: Bytes, start: Int, end: Int),
                Len => op_len(x: Item),
                // Encoding / tuples
                Encode => op_encode(x: Item),
                Varint => op_varint(b: Bytes),
                Tuple => op_tuple(n: Int),
                Untuple => op_untuple(t: Tuple),
                Field => op_field(t: Tuple, i: Int),
                Type => op_type(x: Item),
                // Cryptography
                Sha256 => op_sha256(b: Bytes),
                Sha3 => op_sha3(b: Bytes),
                VmHash => op_vm_hash(x: Item),
                CheckSig => op_check_sig(sig: Bytes, msg: Bytes, pubkey: Bytes),
                CheckMultiSig => op_check_multi_sig(nkey: Int, nsig: Int),
                // Programs
                Exec => op_exec(prog: Bytes),
                Defer => op_defer(prog: Bytes),
                Satisfy => op_satisfy(),
                // Entries
                Nonce => op_nonce(blockchain_id: Bytes, mintime: Int, maxtime: Int, prog: Bytes),
                Anchor => op_anchor(),
                Issue => op_issue(amount: Int, prog: Bytes),
                IssueCandidate => op_issue_candidate(prog: Bytes),
                Unlock => op_unlock(contract: Tuple),
                UnlockOutput => op_unlock_output(contract: Tuple),
                Read => op_read(contract: Tuple),
                Merge => op_merge(),
                Split => op_split(amount: Int),
                Lock => op_lock(prog: Bytes),
                Retire => op_retire(),
                Before => op_before(t: Int),
                After => op_after(t: Int),
                Annotate => op_annotate(data: Bytes),
                Summarize => op_summarize(),
            }
        }
    }

    // ==================== Metering helpers ====================

    fn charge_data(&mut self, len: usize) -> Result<(), VMError> {
        self.runlimit.charge(
            CostCategory::Data,
            (len as u64).saturating_mul(DATA_BYTE_COST),
        )
    }

    fn charge_hashing(&mut self, len: usize) -> Result<(), VMError> {
        self.runlimit.charge(
            CostCategory::Hashing,
            (len as u64).saturating_mul(HASH_BYTE_COST),
        )
    }

    /// Charges for hashing `item` and returns its id.
    fn hash_item(&mut self, item: &Item) -> Result<Hash, VMError> {
        self.charge_hashing(item.encoded_len())?;
        Ok(item.id())
    }

    /// Charges for one entry, including hashing its encoding for the id, then
    /// pushes it.
    fn push_entry(
        &mut self,
        stack: fn(&mut Stacks) -> &mut EntryStack,
        entry: impl Into<Entry>,
    ) -> Result<Hash, VMError> {
        let entry = entry.into();
        self.runlimit.charge(CostCategory::Entry, ENTRY_COST)?;
        self.charge_hashing(entry.encoded_len())?;
        Ok(stack(&mut self.stacks).push(entry))
    }

    fn contract_id(&mut self, contract: &Contract) -> Result<Hash, VMError> {
        self.hash_item(&Item::Tuple(contract.to_tuple()))
    }

    fn asset_id(&mut self, issuance_program: &Bytes) -> Result<Hash, VMError> {
        let definition = AssetDefinition {
            issuance_program: issuance_program.clone(),
        };
        self.hash_item(&Item::Tuple(definition.to_tuple()))
    }

    // ==================== Entry stack helpers ====================

    fn pop_value(&mut self, instr: &'static str) -> Result<(Value, Hash), VMError> {
        match self.stacks.value().pop(instr)? {
            (Entry::Value(v), id) => Ok((v, id)),
            (other, _) => Err(entry_mismatch(instr, Value::TYPE_NAME, &other)),
        }
    }

    fn pop_anchor(&mut self, instr: &'static str) -> Result<(Anchor, Hash), VMError> {
        match self.stacks.anchor().pop(instr)? {
            (Entry::Anchor(a), id) => Ok((a, id)),
            (other, _) => Err(entry_mismatch(instr, Anchor::TYPE_NAME, &other)),
        }
    }

    fn pop_condition(&mut self, instr: &'static str) -> Result<Condition, VMError> {
        match self.stacks.condition().pop(instr)? {
            (Entry::Condition(c), _) => Ok(c),
            (other, _) => Err(entry_mismatch(instr, Condition::TYPE_NAME, &other)),
        }
    }

    /// Resolves a selector for read-only access.
    fn select(&self, instr: &'static str, sel: i64) -> Result<StackId, VMError> {
        StackId::from_selector(sel).ok_or(VMError::InvalidStack {
            instruction: instr,
            selector: sel,
        })
    }

    /// Resolves a selector for a structural operation.
    fn select_structural(&self, instr: &'static str, sel: i64) -> Result<StackId, VMError> {
        let id = self.select(instr, sel)?;
        if id.is_effect() {
            return Err(VMError::IllegalStackOp {
                instruction: instr,
                stack: id.as_str(),
            });
        }
        Ok(id)
    }

    // ==================== Control ====================

    fn op_fail(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let pc = self.frames.last().map(|f| f.pc.saturating_sub(1)).unwrap_or(0);
        Err(VMError::Failed { pc })
    }

    fn op_pc(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let pc = self.frames.last().map(|f| f.pc).unwrap_or(0);
        self.stacks.data.push(pc as i64);
        Ok(())
    }

    fn op_jump_if(
        &mut self,
        _instr: &'static str,
        cond: i64,
        offset: i64,
    ) -> Result<(), VMError> {
        if cond == 0 {
            return Ok(());
        }
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        let len = frame.program.len();
        let target = (frame.pc as i64)
            .checked_add(offset)
            .ok_or(VMError::InvalidJumpTarget {
                target: offset,
                len,
            })?;
        if target < 0 || target as u64 > len as u64 {
            return Err(VMError::InvalidJumpTarget { target, len });
        }
        frame.pc = target as usize;
        Ok(())
    }

    // ==================== Stack ====================

    fn op_roll(&mut self, instr: &'static str, sel: i64, n: i64) -> Result<(), VMError> {
        let id = self.select_structural(instr, sel)?;
        let n = stack_index(instr, n)?;
        self.stacks.ops_mut(id).roll(n, instr)
    }

    fn op_bury(&mut self, instr: &'static str, sel: i64, n: i64) -> Result<(), VMError> {
        let id = self.select_structural(instr, sel)?;
        let n = stack_index(instr, n)?;
        self.stacks.ops_mut(id).bury(n, instr)
    }

    fn op_reverse(&mut self, instr: &'static str, sel: i64, n: i64) -> Result<(), VMError> {
        let id = self.select_structural(instr, sel)?;
        let n = stack_index(instr, n)?;
        self.stacks.ops_mut(id).reverse(n, instr)
    }

    fn op_depth(&mut self, instr: &'static str, sel: i64) -> Result<(), VMError> {
        let id = self.select(instr, sel)?;
        let depth = self.stacks.len(id);
        self.stacks.data.push(depth as i64);
        Ok(())
    }

    fn op_peek(&mut self, instr: &'static str, sel: i64, n: i64) -> Result<(), VMError> {
        let id = self.select(instr, sel)?;
        let n = stack_index(instr, n)?;
        let item = self.stacks.ops(id).peek_item(n, instr)?;
        self.stacks.data.push(item);
        Ok(())
    }

    fn op_drop(&mut self, _instr: &'static str, _x: Item) -> Result<(), VMError> {
        Ok(())
    }

    fn op_to_alt(&mut self, _instr: &'static str, x: Item) -> Result<(), VMError> {
        self.stacks.alt.push(x);
        Ok(())
    }

    fn op_from_alt(&mut self, instr: &'static str) -> Result<(), VMError> {
        let x = self.stacks.alt.pop(instr)?;
        self.stacks.data.push(x);
        Ok(())
    }

    // ==================== Comparison / boolean ====================

    fn op_equal(&mut self, _instr: &'static str, a: Item, b: Item) -> Result<(), VMError> {
        self.stacks.data.push(a.script_eq(&b));
        Ok(())
    }

    fn op_not(&mut self, _instr: &'static str, x: i64) -> Result<(), VMError> {
        self.stacks.data.push(x == 0);
        Ok(())
    }

    fn op_and(&mut self, _instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        self.stacks.data.push(a != 0 && b != 0);
        Ok(())
    }

    fn op_or(&mut self, _instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        self.stacks.data.push(a != 0 || b != 0);
        Ok(())
    }

    fn op_gt(&mut self, _instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        self.stacks.data.push(a > b);
        Ok(())
    }

    fn op_ge(&mut self, _instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        self.stacks.data.push(a >= b);
        Ok(())
    }

    // ==================== Integer arithmetic ====================

    fn op_abs(&mut self, instr: &'static str, a: i64) -> Result<(), VMError> {
        let v = a.checked_abs().ok_or(VMError::Range {
            instruction: instr,
            reason: "absolute value of the minimum integer",
        })?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_negate(&mut self, instr: &'static str, a: i64) -> Result<(), VMError> {
        let v = a.checked_neg().ok_or(VMError::Range {
            instruction: instr,
            reason: "negation of the minimum integer",
        })?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_add(&mut self, instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        let v = a.checked_add(b).ok_or(overflow(instr))?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_sub(&mut self, instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        let v = a.checked_sub(b).ok_or(overflow(instr))?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_mul(&mut self, instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        let v = a.checked_mul(b).ok_or(overflow(instr))?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_div(&mut self, instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        if b == 0 {
            return Err(division_by_zero(instr));
        }
        let v = a.checked_div(b).ok_or(overflow(instr))?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_mod(&mut self, instr: &'static str, a: i64, b: i64) -> Result<(), VMError> {
        if b == 0 {
            return Err(division_by_zero(instr));
        }
        let v = a.checked_rem(b).ok_or(overflow(instr))?;
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_lshift(&mut self, instr: &'static str, a: i64, n: i64) -> Result<(), VMError> {
        let n = shift_amount(instr, n)?;
        let v = a << n;
        if v >> n != a {
            return Err(VMError::Arithmetic {
                instruction: instr,
                reason: "left shift loses bits",
            });
        }
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_rshift(&mut self, instr: &'static str, a: i64, n: i64) -> Result<(), VMError> {
        let n = shift_amount(instr, n)?;
        self.stacks.data.push(a >> n);
        Ok(())
    }

    fn op_minus_one(&mut self, _instr: &'static str) -> Result<(), VMError> {
        self.stacks.data.push(-1i64);
        Ok(())
    }

    // ==================== Bitwise ====================

    fn op_bit_not(&mut self, instr: &'static str, x: Item) -> Result<(), VMError> {
        let v = match x {
            Item::Int(v) => Item::Int(!v),
            Item::Bytes(b) => {
                self.charge_data(b.len())?;
                Item::Bytes(b.iter().map(|x| !x).collect::<Vec<u8>>().into())
            }
            Item::Tuple(_) => {
                return Err(VMError::TypeMismatch {
                    instruction: instr,
                    expected: "int or bytes",
                    actual: x.type_name(),
                });
            }
        };
        self.stacks.data.push(v);
        Ok(())
    }

    fn op_bit_and(&mut self, instr: &'static str, a: Item, b: Item) -> Result<(), VMError> {
        self.bitwise(instr, a, b, |x, y| x & y)
    }

    fn op_bit_or(&mut self, instr: &'static str, a: Item, b: Item) -> Result<(), VMError> {
        self.bitwise(instr, a, b, |x, y| x | y)
    }

    fn op_bit_xor(&mut self, instr: &'static str, a: Item, b: Item) -> Result<(), VMError> {
        self.bitwise(instr, a, b, |x, y| x ^ y)
    }

    fn bitwise(
        &mut self,
        instr: &'static str,
        a: Item,
        b: Item,
        op: fn(u64, u64) -> u64,
    ) -> Result<(), VMError> {
        let v = match (a, b) {
            (Item::Int(a), Item::Int(b)) => Item::Int(op(a as u64, b as u64) as i64),
            (Item::Bytes(a), Item::Bytes(b)) => {
                if a.len() != b.len() {
                    return Err(VMError::InvalidOperand {
                        instruction: instr,
                        reason: "byte strings differ in length",
                    });
                }
                self.charge_data(a.len())?;
                let out: Vec<u8> = a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| op(u64::from(*x), u64::from(*y)) as u8)
                    .collect();
                Item::Bytes(out.into())
            }
            (a, b) => {
                let actual = if matches!(a, Item::Tuple(_)) { a } else { b };
                return Err(VMError::TypeMismatch {
                    instruction: instr,
                    expected: "two ints or two byte strings",
                    actual: actual.type_name(),
                });
            }
        };
        self.stacks.data.push(v);
        Ok(())
    }

    // ==================== Strings ====================

    fn op_cat(&mut self, _instr: &'static str, a: Bytes, b: Bytes) -> Result<(), VMError> {
        self.charge_data(a.len() + b.len())?;
        let mut out = Vec::with_capacity(a.len() + b.len());
        out.extend_from_slice(&a);
        out.extend_from_slice(&b);
        self.stacks.data.push(Bytes::from(out));
        Ok(())
    }

    fn op_slice(
        &mut self,
        instr: &'static str,
        s: Bytes,
        start: i64,
        end: i64,
    ) -> Result<(), VMError> {
        let bounds = usize::try_from(start).ok().zip(usize::try_from(end).ok());
        let (start, end) = match bounds {
            Some((start, end)) if start <= end && end <= s.len() => (start, end),
            _ => {
                return Err(VMError::Range {
                    instruction: instr,
                    reason: "slice bounds outside the byte string",
                });
            }
        };
        self.charge_data(end - start)?;
        self.stacks.data.push(Bytes::from(&s[start..end]));
        Ok(())
    }

    fn op_len(&mut self, instr: &'static str, x: Item) -> Result<(), VMError> {
        let len = match &x {
            Item::Bytes(b) => b.len(),
            Item::Tuple(t) => t.len(),
            Item::Int(_) => {
                return Err(VMError::TypeMismatch {
                    instruction: instr,
                    expected: "bytes or tuple",
                    actual: x.type_name(),
                });
            }
        };
        self.stacks.data.push(len as i64);
        Ok(())
    }

    // ==================== Encoding / tuples ====================

    fn op_encode(&mut self, _instr: &'static str, x: Item) -> Result<(), VMError> {
        self.charge_data(x.encoded_len())?;
        self.stacks.data.push(Bytes::from(x.encode()));
        Ok(())
    }

    fn op_varint(&mut self, _instr: &'static str, b: Bytes) -> Result<(), VMError> {
        let (v, used) = read_uvarint(&b)?;
        if used != b.len() {
            return Err(VMError::BadVarint {
                reason: "trailing bytes after varint",
            });
        }
        self.stacks.data.push(v as i64);
        Ok(())
    }

    fn op_tuple(&mut self, instr: &'static str, n: i64) -> Result<(), VMError> {
        let n = usize::try_from(n).map_err(|_| VMError::Range {
            instruction: instr,
            reason: "negative tuple size",
        })?;
        let tuple = Tuple::from(self.stacks.data.pop_many(n, instr)?);
        if tuple.depth() > MAX_TUPLE_DEPTH {
            return Err(VMError::ResourceLimitExceeded {
                resource: "tuple depth",
                used: tuple.depth() as u64,
                limit: MAX_TUPLE_DEPTH as u64,
            });
        }
        self.stacks.data.push(Item::Tuple(tuple));
        Ok(())
    }

    fn op_untuple(&mut self, _instr: &'static str, t: Tuple) -> Result<(), VMError> {
        for field in t.iter() {
            self.stacks.data.push(field.clone());
        }
        self.stacks.data.push(t.len() as i64);
        Ok(())
    }

    fn op_field(&mut self, instr: &'static str, t: Tuple, i: i64) -> Result<(), VMError> {
        let field = usize::try_from(i)
            .ok()
            .and_then(|i| t.get(i))
            .ok_or(VMError::Range {
                instruction: instr,
                reason: "field index outside the tuple",
            })?;
        self.stacks.data.push(field.clone());
        Ok(())
    }

    fn op_type(&mut self, _instr: &'static str, x: Item) -> Result<(), VMError> {
        self.stacks.data.push(x.type_code());
        Ok(())
    }

    // ==================== Cryptography ====================

    fn op_sha256(&mut self, _instr: &'static str, b: Bytes) -> Result<(), VMError> {
        self.charge_hashing(b.len())?;
        let digest: [u8; 32] = Sha256::digest(&b).into();
        self.stacks.data.push(Bytes::from(digest));
        Ok(())
    }

    fn op_sha3(&mut self, _instr: &'static str, b: Bytes) -> Result<(), VMError> {
        self.charge_hashing(b.len())?;
        let digest = Hash::sha3().chain(&b).finalize();
        self.stacks.data.push(digest);
        Ok(())
    }

    fn op_vm_hash(&mut self, _instr: &'static str, x: Item) -> Result<(), VMError> {
        let id = self.hash_item(&x)?;
        self.stacks.data.push(id);
        Ok(())
    }

    fn op_check_sig(
        &mut self,
        instr: &'static str,
        sig: Bytes,
        msg: Bytes,
        pubkey: Bytes,
    ) -> Result<(), VMError> {
        let pubkey = public_key(instr, &pubkey)?;
        let msg = message(instr, &msg)?;
        self.runlimit.charge(CostCategory::Signature, SIGNATURE_COST)?;
        self.stacks.data.push(signature::verify(&pubkey, &msg, &sig));
        Ok(())
    }

    /// Greedy m-of-n check.
    ///
    /// Keys and signatures are walked in the order they are popped. Each
    /// attempt consumes the key; a signature is consumed only when it
    /// verifies. Succeeds when every signature has been consumed.
    fn op_check_multi_sig(
        &mut self,
        instr: &'static str,
        nkey: i64,
        nsig: i64,
    ) -> Result<(), VMError> {
        if nkey < 0 || nsig < 0 || nsig > nkey || (nkey > 0 && nsig == 0) {
            return Err(VMError::Range {
                instruction: instr,
                reason: "signature counts must satisfy 0 <= m <= n and m > 0 when n > 0",
            });
        }
        let mut keys = Vec::with_capacity(nkey as usize);
        for _ in 0..nkey {
            let key = self.stacks.data.pop_bytes(instr)?;
            keys.push(public_key(instr, &key)?);
        }
        let msg = self.stacks.data.pop_bytes(instr)?;
        let msg = message(instr, &msg)?;
        let mut sigs = Vec::with_capacity(nsig as usize);
        for _ in 0..nsig {
            sigs.push(self.stacks.data.pop_bytes(instr)?);
        }

        let (mut k, mut s) = (0, 0);
        while s < sigs.len() && keys.len() - k >= sigs.len() - s {
            self.runlimit.charge(CostCategory::Signature, SIGNATURE_COST)?;
            if signature::verify(&keys[k], &msg, &sigs[s]) {
                s += 1;
            }
            k += 1;
        }
        self.stacks.data.push(s == sigs.len());
        Ok(())
    }

    // ==================== Programs ====================

    fn op_exec(&mut self, _instr: &'static str, prog: Bytes) -> Result<(), VMError> {
        self.push_frame(prog)
    }

    fn op_defer(&mut self, _instr: &'static str, prog: Bytes) -> Result<(), VMError> {
        self.push_entry(Stacks::condition, Condition { program: prog })?;
        Ok(())
    }

    fn op_satisfy(&mut self, instr: &'static str) -> Result<(), VMError> {
        let condition = self.pop_condition(instr)?;
        self.push_frame(condition.program)
    }

    // ==================== Entries ====================

    fn op_nonce(
        &mut self,
        instr: &'static str,
        blockchain_id: Bytes,
        mintime: i64,
        maxtime: i64,
        prog: Bytes,
    ) -> Result<(), VMError> {
        if mintime > maxtime {
            return Err(VMError::Range {
                instruction: instr,
                reason: "nonce mintime is after maxtime",
            });
        }
        let nonce = Nonce {
            program: prog.clone(),
            mintime,
            maxtime,
            blockchain_id,
        };
        let nonce_id = self.push_entry(Stacks::nonce, nonce)?;
        self.push_entry(Stacks::anchor, Anchor { value: nonce_id })?;
        self.push_entry(Stacks::condition, Condition { program: prog })?;
        self.push_entry(Stacks::time_constraint, MinTime { time: mintime })?;
        self.push_entry(Stacks::time_constraint, MaxTime { time: maxtime })?;
        Ok(())
    }

    fn op_anchor(&mut self, instr: &'static str) -> Result<(), VMError> {
        let (anchor, _) = self.pop_anchor(instr)?;
        self.stacks.data.push(anchor.value);
        Ok(())
    }

    fn op_issue(&mut self, instr: &'static str, amount: i64, prog: Bytes) -> Result<(), VMError> {
        if amount <= 0 {
            return Err(VMError::Range {
                instruction: instr,
                reason: "issued amount must be positive",
            });
        }
        let (_, anchor_id) = self.pop_anchor(instr)?;
        let asset_id = self.asset_id(&prog)?;
        let value = Value {
            amount,
            asset_id,
            anchor: anchor_id,
        };
        self.push_entry(Stacks::value, value)?;
        self.push_entry(Stacks::condition, Condition { program: prog })?;
        Ok(())
    }

    fn op_issue_candidate(&mut self, _instr: &'static str, prog: Bytes) -> Result<(), VMError> {
        self.runlimit.charge(CostCategory::Entry, ENTRY_COST)?;
        let candidate = IssuanceCandidate {
            asset_id: self.asset_id(&prog)?,
            issuance_program: prog,
        };
        self.stacks.data.push(Item::Tuple(candidate.to_tuple()));
        Ok(())
    }

    fn op_unlock(&mut self, instr: &'static str, contract: Tuple) -> Result<(), VMError> {
        let contract = unlockable(instr, &contract)?;
        let contract_id = self.contract_id(&contract)?;
        self.push_entry(Stacks::input, Input { contract_id })?;
        self.release(contract, contract_id)
    }

    /// Spends an output created earlier in this run, which also withdraws its
    /// contract from the effects.
    fn op_unlock_output(&mut self, instr: &'static str, contract: Tuple) -> Result<(), VMError> {
        let contract = unlockable(instr, &contract)?;
        let contract_id = self.contract_id(&contract)?;
        let matches = matches!(
            self.stacks.output().top(),
            Some((Entry::Output(out), _)) if out.contract_id == contract_id
        );
        if !matches {
            return Err(VMError::InvalidOperand {
                instruction: instr,
                reason: "contract does not match the top output",
            });
        }
        self.stacks.output().pop(instr)?;
        if let Some(pos) = self.effects.contracts.iter().rposition(|c| *c == contract) {
            self.effects.contracts.remove(pos);
        }
        self.release(contract, contract_id)
    }

    /// Pushes the value and condition held by an unlocked contract.
    fn release(&mut self, contract: Contract, contract_id: Hash) -> Result<(), VMError> {
        let value = Value {
            amount: contract.amount,
            asset_id: contract.asset_id,
            anchor: contract_id,
        };
        self.push_entry(Stacks::value, value)?;
        let condition = Condition {
            program: contract.program,
        };
        self.push_entry(Stacks::condition, condition)?;
        Ok(())
    }

    fn op_read(&mut self, _instr: &'static str, contract: Tuple) -> Result<(), VMError> {
        let contract = Contract::from_tuple(&contract)?;
        let contract_id = self.contract_id(&contract)?;
        self.push_entry(Stacks::input, Read { contract_id })?;
        Ok(())
    }

    fn op_merge(&mut self, instr: &'static str) -> Result<(), VMError> {
        let (b, b_id) = self.pop_value(instr)?;
        let (a, a_id) = self.pop_value(instr)?;
        if a.asset_id != b.asset_id {
            return Err(VMError::AssetMismatch {
                left: a.asset_id,
                right: b.asset_id,
            });
        }
        let amount = a.amount.checked_add(b.amount).ok_or(overflow(instr))?;
        let merged = Value {
            amount,
            asset_id: a.asset_id,
            anchor: derived_anchor("merge", &[a_id.into(), b_id.into()]),
        };
        self.push_entry(Stacks::value, merged)?;
        Ok(())
    }

    fn op_split(&mut self, instr: &'static str, amount: i64) -> Result<(), VMError> {
        let (parent, parent_id) = self.pop_value(instr)?;
        if amount <= 0 || amount >= parent.amount {
            return Err(VMError::Range {
                instruction: instr,
                reason: "split amount must be strictly between zero and the value amount",
            });
        }
        let remainder = Value {
            amount: parent.amount - amount,
            asset_id: parent.asset_id,
            anchor: derived_anchor("split", &[parent_id.into(), Item::Int(0)]),
        };
        let split = Value {
            amount,
            asset_id: parent.asset_id,
            anchor: derived_anchor("split", &[parent_id.into(), Item::Int(1)]),
        };
        self.push_entry(Stacks::value, remainder)?;
        self.push_entry(Stacks::value, split)?;
        Ok(())
    }

    fn op_lock(&mut self, instr: &'static str, prog: Bytes) -> Result<(), VMError> {
        let (value, _) = self.pop_value(instr)?;
        let contract = Contract::lock(&value, prog);
        let contract_id = self.contract_id(&contract)?;
        self.push_entry(Stacks::output, Output { contract_id })?;
        self.effects.contracts.push(contract);
        Ok(())
    }

    fn op_retire(&mut self, instr: &'static str) -> Result<(), VMError> {
        let (value, _) = self.pop_value(instr)?;
        let retirement = Retirement {
            amount: value.amount,
            asset_id: value.asset_id,
            anchor: value.anchor,
        };
        self.push_entry(Stacks::retirement, retirement)?;
        Ok(())
    }

    fn op_before(&mut self, _instr: &'static str, t: i64) -> Result<(), VMError> {
        self.push_entry(Stacks::time_constraint, MaxTime { time: t })?;
        Ok(())
    }

    fn op_after(&mut self, _instr: &'static str, t: i64) -> Result<(), VMError> {
        self.push_entry(Stacks::time_constraint, MinTime { time: t })?;
        Ok(())
    }

    fn op_annotate(&mut self, _instr: &'static str, data: Bytes) -> Result<(), VMError> {
        self.charge_data(data.len())?;
        self.push_entry(Stacks::annotation, Annotation { data })?;
        Ok(())
    }

    fn op_summarize(&mut self, _instr: &'static str) -> Result<(), VMError> {
        let (inputs, input_ids) = drain(self.stacks.input());
        let (outputs, output_ids) = drain(self.stacks.output());
        let (nonces, nonce_ids) = drain(self.stacks.nonce());
        let (retirements, retirement_ids) = drain(self.stacks.retirement());
        let (time_constraints, time_constraint_ids) = drain(self.stacks.time_constraint());
        let (annotations, annotation_ids) = drain(self.stacks.annotation());

        let summary = Summary {
            inputs: input_ids,
            outputs: output_ids,
            nonces: nonce_ids,
            retirements: retirement_ids,
            time_constraints: time_constraint_ids,
            annotations: annotation_ids,
        };
        let summary_id = self.push_entry(Stacks::summary, summary)?;
        trace!(summary = %summary_id, "summarized");

        self.effects.inputs.extend(inputs);
        self.effects.outputs.extend(outputs);
        self.effects.nonces.extend(nonces);
        self.effects.retirements.extend(retirements);
        self.effects.time_constraints.extend(time_constraints);
        self.effects.annotations.extend(annotations);
        Ok(())
    }
}

/// Empties an effect stack, splitting entries from their ids.
fn drain(stack: &mut EntryStack) -> (Vec<Entry>, Vec<Hash>) {
    stack.drain().into_iter().unzip()
}

fn entry_mismatch(instr: &'static str, expected: &'static str, actual: &Entry) -> VMError {
    VMError::TypeMismatch {
        instruction: instr,
        expected,
        actual: actual.type_name(),
    }
}

fn overflow(instr: &'static str) -> VMError {
    VMError::Arithmetic {
        instruction: instr,
        reason: "integer overflow",
    }
}

fn division_by_zero(instr: &'static str) -> VMError {
    VMError::Arithmetic {
        instruction: instr,
        reason: "division by zero",
    }
}

fn shift_amount(instr: &'static str, n: i64) -> Result<u32, VMError> {
    if !(0..64).contains(&n) {
        return Err(VMError::Arithmetic {
            instruction: instr,
            reason: "shift amount outside [0, 64)",
        });
    }
    Ok(n as u32)
}

fn stack_index(instr: &'static str, n: i64) -> Result<usize, VMError> {
    usize::try_from(n).map_err(|_| VMError::Range {
        instruction: instr,
        reason: "negative stack depth",
    })
}

fn public_key(
    instr: &'static str,
    key: &[u8],
) -> Result<[u8; signature::PUBLIC_KEY_LEN], VMError> {
    key.try_into().map_err(|_| VMError::InvalidOperand {
        instruction: instr,
        reason: "public key must be 32 bytes",
    })
}

fn message(instr: &'static str, msg: &[u8]) -> Result<[u8; signature::MESSAGE_LEN], VMError> {
    msg.try_into().map_err(|_| VMError::InvalidOperand {
        instruction: instr,
        reason: "message must be 32 bytes",
    })
}

/// Reads a contract tuple and checks it can yield a value.
fn unlockable(instr: &'static str, tuple: &[Item]) -> Result<Contract, VMError> {
    let contract = Contract::from_tuple(tuple)?;
    if contract.amount <= 0 {
        return Err(VMError::Range {
            instruction: instr,
            reason: "contract amount must be positive",
        });
    }
    Ok(contract)
}
