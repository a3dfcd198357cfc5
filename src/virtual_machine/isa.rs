//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction table and invokes a callback macro for code
//! generation, so the interpreter, the assembler and the ISA regression check
//! all derive from one list.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonics and base runlimit costs
//!
//! # Bytecode Format
//!
//! Every instruction starts with one byte:
//! - `0x00..=0x3E`: a named operation from the table below
//! - `0x3F..=0xEE`: undefined
//! - [`PUSHDATA`]: followed by an unsigned varint length and that many bytes
//! - `0xF0..=0xFF`: small integer literals 0 through 15
//!
//! Named operations take their operands from the data stack. The bracketed
//! list in each table row is the typed signature popped before the handler
//! runs, deepest operand first, top of stack last.

use crate::types::encoding::read_prefixed;
use crate::virtual_machine::errors::VMError;

/// Opcode that introduces a length-prefixed byte string literal.
pub const PUSHDATA: u8 = 0xEF;
/// Opcode of the small integer literal 0; literals run up to `0xFF` (15).
pub const SMALL_INT_BASE: u8 = 0xF0;
/// Largest value encodable as a single small integer opcode.
pub const SMALL_INT_MAX: i64 = 15;

/// Invokes a callback macro with the complete instruction definition list.
///
/// This macro enables code generation for instructions in multiple modules
/// without duplicating the instruction definitions.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Control
            // =========================
            /// fail ; abort the run
            Fail = 0x00, "fail" => [], 1,
            /// pc ; push the offset of the next instruction
            Pc = 0x01, "pc" => [], 1,
            /// jumpif cond offset ; if cond != 0, pc += offset
            JumpIf = 0x02, "jumpif" => [cond: Int, offset: Int], 1,
            // =========================
            // Stack
            // =========================
            /// roll sel n ; move item n of stack sel to its top
            Roll = 0x03, "roll" => [sel: Int, n: Int], 1,
            /// bury sel n ; move the top of stack sel n positions down
            Bury = 0x04, "bury" => [sel: Int, n: Int], 1,
            /// reverse sel n ; reverse the top n items of stack sel
            Reverse = 0x05, "reverse" => [sel: Int, n: Int], 1,
            /// depth sel ; push the size of stack sel
            Depth = 0x06, "depth" => [sel: Int], 1,
            /// peek sel n ; push a copy of item n of stack sel
            Peek = 0x07, "peek" => [sel: Int, n: Int], 1,
            /// drop x ;
            Drop = 0x08, "drop" => [x: Item], 1,
            /// toalt x ; move x to the alt stack
            ToAlt = 0x09, "toalt" => [x: Item], 1,
            /// fromalt ; move the top of the alt stack to the data stack
            FromAlt = 0x0A, "fromalt" => [], 1,
            // =========================
            // Comparison / boolean
            // =========================
            /// equal a b ; a == b for like-typed non-tuple items, else false
            Equal = 0x0B, "equal" => [a: Item, b: Item], 1,
            /// not x ; x == 0
            Not = 0x0C, "not" => [x: Int], 1,
            /// and a b ; a != 0 && b != 0
            And = 0x0D, "and" => [a: Int, b: Int], 1,
            /// or a b ; a != 0 || b != 0
            Or = 0x0E, "or" => [a: Int, b: Int], 1,
            /// gt a b ; a > b
            Gt = 0x0F, "gt" => [a: Int, b: Int], 1,
            /// ge a b ; a >= b
            Ge = 0x10, "ge" => [a: Int, b: Int], 1,
            // =========================
            // Integer arithmetic (checked)
            // =========================
            /// abs a ; |a|
            Abs = 0x11, "abs" => [a: Int], 1,
            /// negate a ; -a
            Negate = 0x12, "negate" => [a: Int], 1,
            /// add a b ; a + b
            Add = 0x13, "add" => [a: Int, b: Int], 1,
            /// sub a b ; a - b
            Sub = 0x14, "sub" => [a: Int, b: Int], 1,
            /// mul a b ; a * b
            Mul = 0x15, "mul" => [a: Int, b: Int], 1,
            /// div a b ; a / b, truncating
            Div = 0x16, "div" => [a: Int, b: Int], 1,
            /// mod a b ; a % b, sign of a
            Mod = 0x17, "mod" => [a: Int, b: Int], 1,
            /// lshift a n ; a << n, lost bits are an error
            LShift = 0x18, "lshift" => [a: Int, n: Int], 1,
            /// rshift a n ; a >> n, arithmetic
            RShift = 0x19, "rshift" => [a: Int, n: Int], 1,
            /// minusone ; push -1
            MinusOne = 0x1A, "minusone" => [], 1,
            // =========================
            // Bitwise
            // =========================
            /// bitnot x ; !x on an int or every byte of a string
            BitNot = 0x1B, "bitnot" => [x: Item], 1,
            /// bitand a b ; a & b
            BitAnd = 0x1C, "bitand" => [a: Item, b: Item], 1,
            /// bitor a b ; a | b
            BitOr = 0x1D, "bitor" => [a: Item, b: Item], 1,
            /// bitxor a b ; a ^ b
            BitXor = 0x1E, "bitxor" => [a: Item, b: Item], 1,
            // =========================
            // Strings
            // =========================
            /// cat a b ; a || b
            Cat = 0x1F, "cat" => [a: Bytes, b: Bytes], 1,
            /// slice s start end ; s[start..end]
            Slice = 0x20, "slice" => [s: Bytes, start: Int, end: Int], 1,
            /// len x ; byte length or tuple arity
            Len = 0x21, "len" => [x: Item], 1,
            // =========================
            // Encoding / tuples
            // =========================
            /// encode x ; canonical encoding of x
            Encode = 0x22, "encode" => [x: Item], 2,
            /// varint b ; decode one canonical unsigned varint
            Varint = 0x23, "varint" => [b: Bytes], 1,
            /// tuple x1..xn n ; (x1..xn)
            Tuple = 0x24, "tuple" => [n: Int], 1,
            /// untuple t ; x1..xn n
            Untuple = 0x25, "untuple" => [t: Tuple], 1,
            /// field t i ; t[i]
            Field = 0x26, "field" => [t: Tuple, i: Int], 1,
            /// type x ; 0 int, 1 bytes, 2 tuple
            Type = 0x27, "type" => [x: Item], 1,
            // =========================
            // Cryptography
            // =========================
            /// sha256 b ; SHA-256 digest
            Sha256 = 0x28, "sha256" => [b: Bytes], 4,
            /// sha3 b ; SHA3-256 digest
            Sha3 = 0x29, "sha3" => [b: Bytes], 4,
            /// vmhash x ; id of x
            VmHash = 0x2A, "vmhash" => [x: Item], 4,
            /// checksig sig msg pubkey ; Ed25519 verification
            CheckSig = 0x2B, "checksig" => [sig: Bytes, msg: Bytes, pubkey: Bytes], 4,
            /// checkmultisig sig1..sigm msg key1..keyn n m ; greedy m-of-n verification
            CheckMultiSig = 0x2C, "checkmultisig" => [nkey: Int, nsig: Int], 8,
            // =========================
            // Programs
            // =========================
            /// exec prog ; run prog in a nested frame
            Exec = 0x2D, "exec" => [prog: Bytes], 8,
            /// defer prog ; push condition(prog)
            Defer = 0x2E, "defer" => [prog: Bytes], 8,
            /// satisfy ; pop a condition and run its program
            Satisfy = 0x2F, "satisfy" => [], 8,
            // =========================
            // Entries
            // =========================
            /// nonce chainid mintime maxtime prog ; nonce, anchor, condition, time bounds
            Nonce = 0x30, "nonce" => [blockchain_id: Bytes, mintime: Int, maxtime: Int, prog: Bytes], 16,
            /// anchor ; pop an anchor, push its value
            Anchor = 0x31, "anchor" => [], 8,
            /// issue amount prog ; consume an anchor into value + condition
            Issue = 0x32, "issue" => [amount: Int, prog: Bytes], 16,
            /// issuecandidate prog ; push an issuancecandidate tuple
            IssueCandidate = 0x33, "issuecandidate" => [prog: Bytes], 8,
            /// unlock contract ; input + value + condition
            Unlock = 0x34, "unlock" => [contract: Tuple], 16,
            /// unlockoutput contract ; consume the matching output into value + condition
            UnlockOutput = 0x35, "unlockoutput" => [contract: Tuple], 16,
            /// read contract ; record a read of the contract
            Read = 0x36, "read" => [contract: Tuple], 8,
            /// merge ; two values of one asset into one
            Merge = 0x37, "merge" => [], 16,
            /// split amount ; one value into remainder and amount
            Split = 0x38, "split" => [amount: Int], 16,
            /// lock prog ; consume a value into an output
            Lock = 0x39, "lock" => [prog: Bytes], 16,
            /// retire ; consume a value into a retirement
            Retire = 0x3A, "retire" => [], 8,
            /// before t ; maxtime(t)
            Before = 0x3B, "before" => [t: Int], 8,
            /// after t ; mintime(t)
            After = 0x3C, "after" => [t: Int], 8,
            /// annotate data ; annotation(data)
            Annotate = 0x3D, "annotate" => [data: Bytes], 8,
            /// summarize ; drain the effect stacks into one summary
            Summarize = 0x3E, "summarize" => [], 32,
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ], $cost:expr
        ),* $(,)?
    ) => {
        // =========================
        // VM instruction enum
        // =========================
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::InvalidInstruction {
                        opcode: value,
                        offset: 0,
                    }),
                }
            }
        }

        impl Instruction {
            /// Every instruction, in opcode order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Returns the base runlimit cost for this instruction.
            pub const fn base_cost(&self) -> u64 {
                match self {
                    $( Instruction::$name => $cost, )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

/// One decoded instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Op<'a> {
    /// A named operation.
    Instruction(Instruction),
    /// A small integer literal (0..=15).
    SmallInt(u8),
    /// A byte string literal.
    PushData(&'a [u8]),
}

impl Op<'_> {
    /// Assembly-facing name of this operation.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Instruction(instr) => instr.mnemonic(),
            Op::SmallInt(_) => "smallint",
            Op::PushData(_) => "pushdata",
        }
    }

    /// Raw opcode byte.
    pub fn opcode(&self) -> u8 {
        match self {
            Op::Instruction(instr) => *instr as u8,
            Op::SmallInt(n) => SMALL_INT_BASE + n,
            Op::PushData(_) => PUSHDATA,
        }
    }
}

/// Decodes the instruction starting at `pc`.
///
/// Returns the operation and its encoded size in bytes. Callers guarantee
/// `pc < program.len()`.
pub fn decode_op(program: &[u8], pc: usize) -> Result<(Op<'_>, usize), VMError> {
    let opcode = program[pc];
    match opcode {
        SMALL_INT_BASE..=0xFF => Ok((Op::SmallInt(opcode - SMALL_INT_BASE), 1)),
        PUSHDATA => {
            let (data, used) = read_prefixed(&program[pc + 1..])?;
            Ok((Op::PushData(data), 1 + used))
        }
        _ => {
            let instr = Instruction::try_from(opcode).map_err(|_| VMError::InvalidInstruction {
                opcode,
                offset: pc,
            })?;
            Ok((Op::Instruction(instr), 1))
        }
    }
}
