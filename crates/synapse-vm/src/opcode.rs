//! Opcode inventory for the Synapse VM.
//!
//! Opcodes name operations; their semantics live in the VM's kernel
//! dispatch, not here. The emitter is the only producer of instruction
//! streams and is responsible for operand layouts.
//!
//! # Opcode Categories
//!
//! - **Elementwise** - unary and binary tensor math
//! - **Neural** - convolution, pooling, normalization, recurrent cells
//! - **Shape** - reshape, slice, concat, transpose and friends
//! - **Constant** - scalar and tensor constant materialization
//! - **Control** - conditional jumps over instruction indices
//! - **Lifetime** - register binding, publication, and release
//! - **Sequence** - ordered containers of tensors

use serde::{Deserialize, Serialize};

/// One VM operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // === Binary elementwise ===
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Equal,
    Greater,
    GreaterEqual,

    // === Unary elementwise ===
    Neg,
    Reciprocal,
    Exp,
    Log,
    Sqrt,
    Abs,
    Tanh,
    Sigmoid,
    Relu,
    Floor,
    Ceil,
    Not,
    Identity,

    // === Activations with parameters ===
    Selu,
    LeakyRelu,
    Elu,

    // === Gradients ===
    ReluGrad,
    MaxPoolGrad,
    AveragePoolGrad,
    SelectItem,
    SelectItemGrad,
    ConvGradWeight,
    LRNGrad,
    BatchNormalizationGrad,

    // === Argmax / softmax family ===
    ArgMax,
    Hardmax,
    Softmax,
    LogSoftmax,

    // === Reductions ===
    ReduceMax,
    ReduceSum,
    ReduceSumSquare,
    ReduceSumTo,
    ReduceMean,

    // === Convolution / pooling ===
    Conv,
    ConvTranspose,
    ConvTransposeWithDynamicShape,
    MaxPool,
    AveragePool,

    // === Linear algebra ===
    MatMul,
    Gemm,

    // === Normalization ===
    BatchNormalization,
    LRN,

    // === Recurrent ===
    RNN,
    GRU,
    LSTM,

    // === Tensor shape ===
    Shape,
    Size,
    Reshape,
    Expand,
    Squeeze,
    Unsqueeze,
    Slice,
    DynamicSlice,
    Gather,
    Concat,
    Split,
    Transpose,
    Pad,
    Clip,
    Max,

    // === Constants and casts ===
    IntScalarConstant,
    FloatScalarConstant,
    IntConstant,
    FloatConstant,
    ConstantFill,
    Cast,

    // === Control flow ===
    /// Jump to the instruction index in the operand when the condition
    /// register holds a true scalar.
    JmpTrue,
    /// Jump to the instruction index in the operand when the condition
    /// register holds a false scalar.
    JmpFalse,

    // === Lifetime / IO ===
    /// Bind a named external input to a register.
    In,
    /// Publish a register under an external name.
    Out,
    /// Release a register.
    Free,

    // === Sequences ===
    SequenceCreate,
    SequenceClear,
    SequenceAppend,
    SequenceLookup,
    SequenceStack,
    SequencePad,
    SequenceSplit,
    SequenceUnpad,
    SequenceSize,
    SequenceLengths,
    SequenceCopy,
    SequenceMove,

    // === Generic containers ===
    GenericLen,
    GenericGetItem,
    GenericGetSlice,
    GenericAdd,
}
