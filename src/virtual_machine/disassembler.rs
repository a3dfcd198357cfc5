//! Bytecode to assembly text.
//!
//! The output assembles back to the exact input bytes. Push-data is printed
//! as a hex literal, except that a canonical integer push (`PUSHDATA
//! uvarint(v)` followed by `varint`) is folded back into its decimal form.

use crate::types::encoding::read_uvarint;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, Op, SMALL_INT_MAX, decode_op};
use crate::virtual_machine::item::Item;

/// Renders `program` as assembly, one operation per token.
pub fn disassemble(program: &[u8]) -> Result<String, VMError> {
    let mut ops = Vec::new();
    let mut pc = 0;
    while pc < program.len() {
        let (op, size) = decode_op(program, pc)?;
        ops.push((op, pc, size));
        pc += size;
    }

    let mut tokens = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        let (op, start, size) = ops[i];
        match op {
            Op::SmallInt(n) => tokens.push(n.to_string()),
            Op::Instruction(instr) => tokens.push(instr.mnemonic().to_string()),
            Op::PushData(data) => {
                let folded = match ops.get(i + 1) {
                    Some((Op::Instruction(Instruction::Varint), _, 1)) => {
                        canonical_int(data, &program[start..start + size + 1])
                    }
                    _ => None,
                };
                if let Some(v) = folded {
                    tokens.push(v.to_string());
                    i += 1;
                } else {
                    tokens.push(format!("\"{}\"x", hex::encode(data)));
                }
            }
        }
        i += 1;
    }
    Ok(tokens.join(" "))
}

/// The integer `data` encodes, if `code` is exactly its canonical push.
fn canonical_int(data: &[u8], code: &[u8]) -> Option<i64> {
    let (v, used) = read_uvarint(data).ok()?;
    let v = i64::try_from(v).ok()?;
    (used == data.len() && v > SMALL_INT_MAX && Item::Int(v).encode() == code).then_some(v)
}
