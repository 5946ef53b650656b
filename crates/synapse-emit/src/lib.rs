//! Graph-to-bytecode emitter for the Synapse tensor VM.
//!
//! Walks a finalized [`Model`](synapse_graph::Model) and appends a flat
//! instruction stream to a [`Program`](synapse_vm::Program): one or more
//! VM instructions per graph node, `In` bindings for external inputs on
//! first use, `Free` releases when a value's last reader completes, and
//! a trailing `Out` block publishing graph outputs. `Loop` nodes lower
//! into a register-level program with conditional jumps, loop-carried
//! state propagation, and scan-output accumulation into sequences.
//!
//! # Design Principles
//!
//! 1. **Trust the graph** - no type checking, shape inference, or
//!    folding here; malformed arities and unsupported features are
//!    reported, nothing is repaired
//! 2. **Deterministic** - register ids and instruction order follow the
//!    graph's declaration and topological order
//! 3. **Lifetime-exact** - the VM has no collector; every register is
//!    released exactly once on every path
//!
//! # Architecture
//!
//! - [`table`] - value-to-register-id assignment
//! - node lowering - the per-operator dispatch
//! - loop lowering - `Loop` into jumps, state moves, scan appends
//! - the walker - topological traversal interleaving lifetime ops

mod emitter;
mod loops;
mod node;
pub mod table;

use synapse_graph::{CycleError, Model, OpKind};
use synapse_vm::Program;
use thiserror::Error;

use crate::emitter::Emitter;
pub use crate::table::ValueIdTable;

/// Emitter errors.
///
/// All of these mean the input graph is malformed or uses a feature the
/// VM does not support; there is no recovery, and the contents of the
/// output program are unspecified after an error.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("{op}: input {index} is mandatory")]
    MissingInput { op: OpKind, index: usize },

    #[error("{op}: output {index} is mandatory")]
    MissingOutput { op: OpKind, index: usize },

    #[error("{op}: expected {expected} inputs, found {found}")]
    InputArity {
        op: OpKind,
        expected: String,
        found: usize,
    },

    #[error("{op}: expected {expected} outputs, found {found}")]
    OutputArity {
        op: OpKind,
        expected: String,
        found: usize,
    },

    #[error("value {0} assigned a register id twice")]
    DuplicateValue(String),

    #[error("{op}: {message}")]
    Unsupported { op: OpKind, message: String },

    #[error("{op}: {message}")]
    InvalidAttribute { op: OpKind, message: String },

    #[error("infinite loop: neither a trip count nor a termination condition in {0}")]
    InfiniteLoop(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("program serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
}

/// Emit `model` into `program`.
///
/// When `dump_value_names` is true, a table of register ids, value
/// names, and declared byte sizes is written to standard error after
/// emission.
pub fn emit(model: &Model, program: &mut Program, dump_value_names: bool) -> Result<(), EmitError> {
    let graph = model.graph();
    let mut emitter = Emitter::new(graph)?;
    emitter.emit(graph, program, dump_value_names)
}

/// Emit `model` into a fresh program and serialize it to bytes.
pub fn emit_to_vec(model: &Model, dump_value_names: bool) -> Result<Vec<u8>, EmitError> {
    let mut program = Program::new();
    emit(model, &mut program, dump_value_names)?;
    Ok(program.to_vec()?)
}
