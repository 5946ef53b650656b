//! Instruction records and the growing program.

use serde::{Deserialize, Serialize};

use crate::opcode::Opcode;
use crate::operand::{Operand, Reg};

/// A single VM instruction.
///
/// The registers an instruction writes are listed in `outputs`; the
/// values it reads (register references, immediates, attribute lists)
/// are typed operands in `inputs`. `debug_info` carries the printable
/// form of the graph construct the instruction was lowered from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// The operation to perform.
    pub opcode: Opcode,
    /// Registers written by this instruction.
    pub outputs: Vec<Reg>,
    /// Positional operands read by this instruction.
    pub inputs: Vec<Operand>,
    /// Origin annotation for diagnostics; never semantic.
    pub debug_info: Option<String>,
}

impl Instruction {
    /// Create an instruction with no debug annotation.
    pub fn new(opcode: Opcode, outputs: Vec<Reg>, inputs: Vec<Operand>) -> Self {
        Self {
            opcode,
            outputs,
            inputs,
            debug_info: None,
        }
    }

    /// Bind the named external input to `reg`.
    pub fn in_op(reg: Reg, name: impl Into<String>) -> Self {
        Self::new(Opcode::In, vec![reg], vec![Operand::Str(name.into())])
    }

    /// Publish `reg` under the external `name`.
    pub fn out_op(name: impl Into<String>, reg: Reg) -> Self {
        Self::new(
            Opcode::Out,
            vec![],
            vec![Operand::Str(name.into()), Operand::Reg(reg)],
        )
    }

    /// Release `reg`.
    pub fn free(reg: Reg) -> Self {
        Self::new(Opcode::Free, vec![], vec![Operand::Reg(reg)])
    }

    /// Attach a debug annotation.
    pub fn set_debug_info(&mut self, debug_info: impl Into<String>) {
        self.debug_info = Some(debug_info.into());
    }
}

/// A complete VM program: an ordered instruction sequence.
///
/// Programs are the primary artifact produced by the emitter and
/// executed by the VM. Instruction order is significant; jump targets
/// are indices into this sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Create a new, empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions appended so far.
    ///
    /// Also the index the next appended instruction will occupy, which
    /// is how the emitter records jump targets.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Append an instruction and return a mutable reference to it, so
    /// the caller can attach debug info to what it just emitted.
    pub fn add(&mut self, instruction: Instruction) -> &mut Instruction {
        self.instructions.push(instruction);
        self.instructions
            .last_mut()
            .expect("push cannot leave the program empty")
    }

    /// Instruction at `index`, if in range.
    pub fn instruction(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Mutable instruction at `index`, if in range.
    ///
    /// Used to backpatch jump targets once the destination index is
    /// known.
    pub fn instruction_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        self.instructions.get_mut(index)
    }

    /// All instructions in order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Serializes the program to a MessagePack byte vector.
    pub fn to_vec(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Deserializes a program from a MessagePack byte slice.
    pub fn from_slice(data: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(data)
    }
}
