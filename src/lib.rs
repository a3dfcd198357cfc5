//! Transaction virtual machine library.
//!
//! Provides the primitive types, signature verification, and the
//! transaction virtual machine with its assembler and validator.

pub mod crypto;
pub mod types;
pub mod virtual_machine;
