//! Transaction virtual machine.
//!
//! Executes one transaction program against a bank of stacks, enforcing
//! that every value and contract it touches is created and consumed exactly
//! once, and derives the transaction id from the terminal summary entry.
//!
//! # Architecture
//!
//! - **Items**: dynamically typed [`item::Item`]s (`Int`, `Bytes`, `Tuple`) on
//!   a data stack and an alt stack
//! - **Entries**: named tuples ([`entry::Entry`]) on ten typed entry stacks,
//!   each stored with its precomputed content id
//! - **Instruction format**: one opcode byte per operation; small integers
//!   and push-data are literal encodings at the top of the byte space
//! - **Execution model**: nested programs run in frames on an explicit frame
//!   stack; every failure aborts the whole run
//! - **Runlimit**: execution is bounded by a budget with category profiling
//!
//! # Modules
//!
//! - [`assembler`]: Assembly parsing, diagnostics, and bytecode generation
//! - [`disassembler`]: Bytecode back to assembly text
//! - [`entry`]: Protocol entry kinds and their tuple form
//! - [`errors`]: Assembly and execution error types
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`item`]: Stack items and their canonical encoding
//! - [`stack`]: Data, alt and entry stacks
//! - [`validator`]: Top-level accept/reject decision
//! - [`vm`]: Core virtual machine implementation and runlimit metering

pub mod assembler;
pub mod disassembler;
pub mod entry;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod item;
pub mod stack;
pub mod validator;
pub mod vm;
