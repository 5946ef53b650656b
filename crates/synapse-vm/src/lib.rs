//! Instruction set and program container for the Synapse tensor VM.
//!
//! This crate defines the output side of the compiler: the flat,
//! serializable program a graph is lowered into. It knows nothing about
//! graphs; it is the wire-level data model shared by the emitter and the
//! VM runtime.
//!
//! # Design Principles
//!
//! 1. **Opcodes are data** - an instruction is an opcode plus operands,
//!    never behavior
//! 2. **Explicit lifetimes** - registers are created and released by
//!    dedicated instructions (`In`, `Free`, `Out`), not by a collector
//! 3. **Flat register space** - one dense id space per program, id 0
//!    reserved, `-1` marks an absent optional operand
//!
//! # Architecture
//!
//! - [`opcode`] - the VM instruction inventory
//! - [`operand`] - register ids and typed operand encoding
//! - [`program`] - instruction records and the growing program
//! - [`dtype`] - element types with exchange-dialect wire codes

pub mod dtype;
pub mod opcode;
pub mod operand;
pub mod program;

pub use dtype::DType;
pub use opcode::Opcode;
pub use operand::{Operand, Reg};
pub use program::{Instruction, Program};
