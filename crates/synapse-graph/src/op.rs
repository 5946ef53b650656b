//! Graph operator kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operator kind of a graph node.
///
/// The inventory is the exchange dialect's operator set plus the
/// domain extensions (gradients, sequences, generic containers) the
/// importer produces. Most kinds lower to the VM opcode of the same
/// name; `Constant`, `Dropout`, `SequenceAppend`, and `Loop` have
/// dedicated lowerings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    // Unary elementwise.
    Neg,
    Reciprocal,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
    Relu,
    Floor,
    Ceil,
    Sigmoid,
    Not,
    Identity,

    // Binary elementwise.
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Equal,
    Greater,

    // Gradient helpers.
    ReluGrad,
    MaxPoolGrad,
    AveragePoolGrad,
    SelectItem,
    SelectItemGrad,
    BatchNormalizationGrad,
    ConvGradWeight,
    LRNGrad,

    // Activations.
    Dropout,
    Selu,
    LeakyRelu,
    Elu,

    // Convolutions.
    Conv,
    ConvTranspose,
    ConvTransposeWithDynamicShape,

    // Recurrent cells.
    RNN,
    GRU,
    LSTM,

    // Shape and reshaping.
    Shape,
    Size,
    Reshape,
    Expand,
    Squeeze,
    Unsqueeze,

    // Linear algebra.
    MatMul,
    Gemm,

    // Normalization.
    BatchNormalization,
    LRN,

    // Pooling and padding.
    MaxPool,
    AveragePool,
    Pad,

    // Softmax family.
    Softmax,
    LogSoftmax,
    Hardmax,
    ArgMax,

    // Reductions.
    ReduceMax,
    ReduceSum,
    ReduceSumSquare,
    ReduceSumTo,
    ReduceMean,

    // Casting and filling.
    Cast,
    ConstantFill,

    // Slicing and gathering.
    Slice,
    DynamicSlice,
    Gather,

    // Structural tensor ops.
    Concat,
    Split,
    Clip,
    Max,
    Transpose,

    // Constants and control flow.
    Constant,
    Loop,

    // Sequences.
    SequenceCreate,
    SequenceSize,
    SequenceLengths,
    SequenceAppend,
    SequenceLookup,
    SequenceStack,
    SequenceSplit,
    SequenceUnpad,
    SequencePad,

    // Generic containers.
    GenericLen,
    GenericGetItem,
    GenericGetSlice,
    GenericAdd,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
